use libm::sin;
use log::{debug, info};
use ndarray::{Array2, Array3, ArrayView2, Axis, s};

use crate::{
    cosmology::Cosmology,
    error::Result,
    field::{BiasedLss, InitialLss},
    healpix::{Healpix, Pixelization},
    pmesh::{za_density_grid, za_density_sph},
    sht::{alm2map_der1, map2alm},
    util::radial_derivative,
};

/// Turns a Lagrangian biased field into the final Eulerian field.
pub trait Dynamics {
    fn evolve(&self, initial: &InitialLss, biased: &BiasedLss) -> Result<BiasedLss>;
}

/// Gradient of a field on shells, shaped `(3, nchi, npix)`: the radial
/// derivative, then `d/dtheta` and `(1 / sin theta) d/dphi` on the unit sphere.
pub fn gradient(hp: &Healpix, field: ArrayView2<f64>, chi: &[f64]) -> Result<Array3<f64>> {
    let (nchi, npix) = field.dim();
    let mut out = Array3::zeros((3, nchi, npix));
    let radial = radial_derivative(field, ndarray::ArrayView1::from(chi))?;
    out.index_axis_mut(Axis(0), 0).assign(&radial);
    let lmax = hp.lmax();
    for (i, row) in field.outer_iter().enumerate() {
        let alm = map2alm(hp, row, lmax)?;
        let (_, dtheta, dphi) = alm2map_der1(hp, &alm);
        out.slice_mut(s![1, i, ..]).assign(&dtheta);
        out.slice_mut(s![2, i, ..]).assign(&dphi);
    }
    Ok(out)
}

fn growth(biased: &BiasedLss) -> (Vec<f64>, Vec<f64>) {
    let c = &biased.axes.cosmology;
    let z = biased.shell_redshifts();
    let d0 = c.growth_factor(0.0);
    let d = z.iter().map(|z| c.growth_factor(*z) / d0).collect();
    let f = z.iter().map(|z| c.growth_rate(*z)).collect();
    (d, f)
}

/// Zel'dovich displacements `psi = D grad phi` applied to the biased mass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ZeldovichDynamics {
    pub redshift_space: bool,
    /// density dependent Gaussian clouds instead of point-like cells
    pub sph: bool,
}

impl Default for ZeldovichDynamics {
    fn default() -> Self {
        Self {
            redshift_space: true,
            sph: true,
        }
    }
}

impl ZeldovichDynamics {
    /// Displacement field in `(dchi, dtheta, dphi)`, shaped `(3, nchi, npix)`.
    pub fn displacements(&self, hp: &Healpix, initial: &InitialLss, biased: &BiasedLss) -> Result<Array3<f64>> {
        let chi = &biased.axes.chi;
        let (d, f) = growth(biased);
        let mut psi = gradient(hp, initial.phi.view(), chi)?;
        for c in 0..3 {
            for (i, mut row) in psi.index_axis_mut(Axis(0), c).outer_iter_mut().enumerate() {
                let mut scale = d[i];
                if c > 0 {
                    scale /= chi[i];
                }
                if c == 0 && self.redshift_space {
                    scale *= 1.0 + f[i];
                }
                row.mapv_inplace(|v| v * scale);
            }
        }
        // angular displacement to a change in phi
        let sin_theta: Vec<f64> = (0..hp.npix()).map(|p| sin(hp.pix2ang(p).0)).collect();
        for mut row in psi.index_axis_mut(Axis(0), 2).outer_iter_mut() {
            for (v, st) in row.iter_mut().zip(&sin_theta) {
                *v /= st;
            }
        }
        Ok(psi)
    }
}

impl Dynamics for ZeldovichDynamics {
    fn evolve(&self, initial: &InitialLss, biased: &BiasedLss) -> Result<BiasedLss> {
        initial.axes.check_compatible(&biased.axes)?;
        let hp = biased.axes.pixelization()?;
        info!(
            "applying Zel'dovich dynamics ({} scheme, redshift space: {})",
            if self.sph { "sph" } else { "grid" },
            self.redshift_space
        );
        let psi = self.displacements(&hp, initial, biased)?;
        let (d, _) = growth(biased);
        let mut delta_m = initial.delta.clone();
        for (mut row, d) in delta_m.outer_iter_mut().zip(&d) {
            row.mapv_inplace(|v| v * d);
        }
        let chi = &biased.axes.chi;
        let delta = if self.sph {
            za_density_sph(&hp, psi.view(), biased.delta.view(), delta_m.view(), chi)?
        } else {
            za_density_grid(&hp, psi.view(), biased.delta.view(), delta_m.view(), chi)?
        };
        biased.with_delta(delta)
    }
}

/// First order Eulerian perturbation theory.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinearDynamics {
    pub redshift_space: bool,
}

impl Default for LinearDynamics {
    fn default() -> Self {
        Self { redshift_space: true }
    }
}

impl Dynamics for LinearDynamics {
    fn evolve(&self, initial: &InitialLss, biased: &BiasedLss) -> Result<BiasedLss> {
        initial.axes.check_compatible(&biased.axes)?;
        info!("applying linear dynamics (redshift space: {})", self.redshift_space);
        let (d, f) = growth(biased);
        let mut delta: Array2<f64> = biased.delta.clone();
        for (i, (mut out, dl)) in delta.outer_iter_mut().zip(initial.delta.outer_iter()).enumerate() {
            out.scaled_add(d[i], &dl);
        }
        if self.redshift_space {
            debug!("adding the redshift space velocity term");
            let chi = ndarray::ArrayView1::from(&biased.axes.chi[..]);
            let vterm = radial_derivative(initial.phi.view(), chi)?;
            for (i, (mut out, v)) in delta.outer_iter_mut().zip(vterm.outer_iter()).enumerate() {
                out.scaled_add(-d[i] * f[i], &v);
            }
        }
        biased.with_delta(delta)
    }
}
