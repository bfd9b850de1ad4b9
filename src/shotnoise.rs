use std::f64::consts::PI;

use libm::pow;
use log::info;
use ndarray::{ArrayView2, s};

use crate::{
    cosmology::{Cosmology, units},
    error::{LssError, Result, assert_shape},
    field::{BiasedLss, InitialLss, LssAxes},
    healpix::Pixelization,
    models::{OmegaHiModel, RedshiftFn},
    util::{Gaussian, adler32, calculate_width},
};

/// Columns of the initial density hashed into the shot noise seed.
const SEED_COLUMNS: usize = 100;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ShotNoiseParams {
    /// tracer number density in (Mpc/h)^-3
    pub n_eff: Option<f64>,
    /// log10 of the mean HI mass per tracer in solar masses, used when
    /// `n_eff` is not set
    pub log_m_hi_g: Option<f64>,
    pub omega_hi_model: OmegaHiModel,
    /// overrides the seed derived from the initial field
    pub seed: Option<u64>,
}

/// Adler-32 checksum of the little endian bytes of the first hundred
/// columns of `delta`, read row by row.
pub fn field_seed(delta: ArrayView2<f64>) -> u64 {
    let ncol = delta.ncols().min(SEED_COLUMNS);
    let bytes: Vec<u8> = delta
        .slice(s![.., ..ncol])
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect();
    adler32(&bytes) as u64
}

/// Poisson-like noise correlated with its generating initial field: every
/// consumer of the same [`InitialLss`] draws the same realization.
#[derive(Clone, Debug, PartialEq)]
pub struct ShotNoise {
    pub seed: u64,
    n_eff: Vec<f64>,
    /// axes of the initial field the noise was derived from
    axes: LssAxes,
}

impl ShotNoise {
    pub fn new(params: &ShotNoiseParams, lss: &InitialLss) -> Result<Self> {
        let seed = params.seed.unwrap_or_else(|| field_seed(lss.delta.view()));
        let axes = &lss.axes;
        let n_eff = match (params.n_eff, params.log_m_hi_g) {
            (Some(n), _) => vec![n; axes.nchi()],
            (None, Some(log_m)) => {
                let c = &axes.cosmology;
                let h = c.h();
                let h0 = c.hubble(0.0);
                let omega_hi = params.omega_hi_model.resolve();
                let mass = pow(10.0, log_m) * units::SOLAR_MASS;
                axes.redshift
                    .iter()
                    .map(|z| {
                        // mass per tracer over the mean HI density, in m^3 then (Mpc/h)^3
                        let v = 8.0 * PI * units::G * mass / (3.0 * omega_hi.value(*z) * h0 * h0);
                        1.0 / (v * h * h * h / pow(units::MEGA_PARSEC, 3.0))
                    })
                    .collect()
            }
            (None, None) => {
                return Err(LssError::Configuration(
                    "one of n_eff or log_M_HI_g must be set".to_string(),
                ));
            }
        };
        Ok(Self {
            seed,
            n_eff,
            axes: axes.clone(),
        })
    }

    pub fn n_eff(&self) -> &[f64] {
        &self.n_eff
    }

    /// Adds the noise to `field` in place. This is the one stage that
    /// mutates its input.
    pub fn add_in_place(&self, field: &mut BiasedLss) -> Result<()> {
        self.axes.check_compatible(&field.axes)?;
        let axes = &field.axes;
        assert_shape("n_eff", &[self.n_eff.len()], &[axes.nchi()])?;
        let pixarea = axes.pixelization()?.pixel_area();
        let width = calculate_width(&axes.chi)?;
        info!("adding shot noise with seed {}", self.seed);
        let mut rand = Gaussian::new(random::default(self.seed));
        for (i, mut row) in field.delta.outer_iter_mut().enumerate() {
            let volume = pixarea * axes.chi[i] * axes.chi[i] * width[i];
            let std = pow(volume * self.n_eff[i], -0.5);
            for v in row.iter_mut() {
                *v += std * rand.sample();
            }
        }
        Ok(())
    }
}
