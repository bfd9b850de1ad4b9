use std::fmt::Debug;

use bincode::{Decode, Encode};
use libm::sqrt;
use crate::integrate::romb_fn;

pub mod units {
    /// 21 cm line rest frequency in MHz
    pub const NU21: f64 = 1420.405_751_77;
    /// Newton's constant in m^3 kg^-1 s^-2
    pub const G: f64 = 6.674_30e-11;
    /// kg
    pub const SOLAR_MASS: f64 = 1.988_47e30;
    /// m
    pub const MEGA_PARSEC: f64 = 3.085_677_581_491_367e22;
    /// km/s
    pub const C_KM_S: f64 = 299_792.458;
}

/// Background cosmology as seen by the field pipeline. Distances are in Mpc/h.
pub trait Cosmology: Debug + Send + Sync {
    /// Linear growth factor, normalised to one today.
    fn growth_factor(&self, z: f64) -> f64;
    /// `d ln D / d ln a`
    fn growth_rate(&self, z: f64) -> f64;
    fn comoving_distance(&self, z: f64) -> f64;
    /// H(z) in s^-1
    fn hubble(&self, z: f64) -> f64;
    /// H0 in km/s/Mpc
    fn h0(&self) -> f64;

    fn h(&self) -> f64 {
        self.h0() / 100.0
    }
}

pub fn redshift_from_frequency(freq_mhz: f64) -> f64 {
    units::NU21 / freq_mhz - 1.0
}

pub fn frequency_from_redshift(z: f64) -> f64 {
    units::NU21 / (1.0 + z)
}

#[derive(Clone, Copy, Debug, PartialEq, Encode, Decode)]
pub struct LambdaCdm {
    pub omega_m: f64,
    pub omega_l: f64,
    pub h: f64,
}

impl Default for LambdaCdm {
    /// Planck 2018 best fit.
    fn default() -> Self {
        Self {
            omega_m: 0.3111,
            omega_l: 0.6889,
            h: 0.6766,
        }
    }
}

const DISTANCE_ORDER: u32 = 12;
const GROWTH_ORDER: u32 = 12;

impl LambdaCdm {
    pub fn omega_k(&self) -> f64 {
        1.0 - self.omega_m - self.omega_l
    }
    /// `E(a) = H(a) / H0`
    fn efunc_a(&self, a: f64) -> f64 {
        sqrt(self.omega_m / (a * a * a) + self.omega_k() / (a * a) + self.omega_l)
    }
    pub fn efunc(&self, z: f64) -> f64 {
        self.efunc_a(1.0 / (1.0 + z))
    }
    /// `int_0^a da' / (a' E(a'))^3`
    fn growth_integral(&self, a: f64) -> f64 {
        let da = a / (1usize << GROWTH_ORDER) as f64;
        romb_fn(GROWTH_ORDER, da, |i| {
            let ai = da * i as f64;
            if ai == 0.0 {
                0.0
            } else {
                let ae = ai * self.efunc_a(ai);
                1.0 / (ae * ae * ae)
            }
        })
    }
    fn growth_unnormalised(&self, a: f64) -> f64 {
        2.5 * self.omega_m * self.efunc_a(a) * self.growth_integral(a)
    }
}

impl Cosmology for LambdaCdm {
    fn growth_factor(&self, z: f64) -> f64 {
        self.growth_unnormalised(1.0 / (1.0 + z)) / self.growth_unnormalised(1.0)
    }

    fn growth_rate(&self, z: f64) -> f64 {
        let a = 1.0 / (1.0 + z);
        let e = self.efunc_a(a);
        let dlne = (-3.0 * self.omega_m / (a * a * a) - 2.0 * self.omega_k() / (a * a)) / (2.0 * e * e);
        dlne + 1.0 / (a * a * e * e * e * self.growth_integral(a))
    }

    fn comoving_distance(&self, z: f64) -> f64 {
        if z == 0.0 {
            return 0.0;
        }
        let dz = z / (1usize << DISTANCE_ORDER) as f64;
        units::C_KM_S / 100.0 * romb_fn(DISTANCE_ORDER, dz, |i| 1.0 / self.efunc(dz * i as f64))
    }

    fn hubble(&self, z: f64) -> f64 {
        self.h0() * 1e3 / units::MEGA_PARSEC * self.efunc(z)
    }

    fn h0(&self) -> f64 {
        100.0 * self.h
    }
}
