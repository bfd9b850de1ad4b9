use libm::exp;
use log::info;
use ndarray::Array2;

use crate::{
    cosmology::Cosmology,
    error::{Result, assert_shape},
    field::BiasedLss,
    models::{Polynomial, RedshiftFn, SigmaPModel, polynomial_or_model},
    util::calculate_width,
};

/// `exp(-x) sinh(y) / y`, finite for large `x >= y`.
fn damped_sinhc(x: f64, y: f64) -> f64 {
    if y == 0.0 {
        exp(-x)
    } else {
        (exp(y - x) - exp(-y - x)) / (2.0 * y)
    }
}

/// Radial smoothing matrix for shells at `chi`, the exponential kernel dual
/// to a `(1 + k^2 sigma_P^2 / 2)^-1` suppression, averaged over each bin.
///
/// Rows are normalised to conserve mass. The growth `growth` already applied
/// to each shell is divided out before smoothing and re-applied afterwards.
pub fn exponential_fog_kernel(chi: &[f64], sigma_p: &[f64], growth: &[f64]) -> Result<Array2<f64>> {
    let n = chi.len();
    assert_shape("sigma_P", &[sigma_p.len()], &[n])?;
    assert_shape("growth", &[growth.len()], &[n])?;
    let dchi = calculate_width(chi)?;
    let mut k = Array2::from_shape_fn((n, n), |(i, j)| {
        if !(sigma_p[i] > 0.0) {
            return if i == j { 1.0 } else { 0.0 };
        }
        let a = 2f64.sqrt() / sigma_p[i];
        if i == j {
            // reflection about zero lag leaves slightly less than the peak
            damped_sinhc(a * dchi[j] / 4.0, a * dchi[j] / 4.0)
        } else {
            damped_sinhc(a * (chi[i] - chi[j]).abs(), a * dchi[j] / 2.0)
        }
    });
    for (i, mut row) in k.outer_iter_mut().enumerate() {
        let norm: f64 = row.sum();
        for (j, v) in row.iter_mut().enumerate() {
            *v *= growth[i] / (norm * growth[j]);
        }
    }
    Ok(k)
}

#[derive(Clone, Debug, PartialEq)]
pub struct FogParams {
    /// strength of the smoothing; 0 turns it off
    pub alpha_fog: f64,
    pub model: Option<SigmaPModel>,
    pub fog_coeff: Option<Vec<f64>>,
    pub z_eff: Option<f64>,
}

impl Default for FogParams {
    fn default() -> Self {
        Self {
            alpha_fog: 1.0,
            model: None,
            fog_coeff: None,
            z_eff: None,
        }
    }
}

/// Fingers of God smoothing along the line of sight.
pub struct FingersOfGod {
    pub alpha_fog: f64,
    sigma_p: Polynomial,
}

impl FingersOfGod {
    pub fn new(params: &FogParams) -> Result<Self> {
        let sigma_p = polynomial_or_model(
            params.z_eff,
            params.fog_coeff.as_deref(),
            params.model,
            SigmaPModel::resolve,
            "Fingers of God",
        )?;
        Ok(Self {
            alpha_fog: params.alpha_fog,
            sigma_p,
        })
    }

    pub fn apply(&self, field: &BiasedLss) -> Result<BiasedLss> {
        if self.alpha_fog == 0.0 {
            return Ok(field.clone());
        }
        info!("applying Fingers of God smoothing with alpha = {}", self.alpha_fog);
        let c = &field.axes.cosmology;
        let z = &field.axes.redshift;
        let growth: Vec<f64> = z.iter().map(|z| c.growth_factor(*z)).collect();
        let sigma_p: Vec<f64> = z.iter().map(|z| self.alpha_fog * self.sigma_p.value(*z)).collect();
        let k = exponential_fog_kernel(&field.axes.chi, &sigma_p, &growth)?;
        field.with_delta(k.dot(&field.delta))
    }
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;

    use super::*;
    use crate::{cosmology::LambdaCdm, error::LssError, field::LssAxes};

    fn shells() -> Vec<f64> {
        (0..20).map(|i| 1000.0 + 5.0 * i as f64).collect()
    }

    #[test]
    fn rows_sum_to_one() -> anyhow::Result<()> {
        let chi = shells();
        let k = exponential_fog_kernel(&chi, &vec![4.0; 20], &vec![1.0; 20])?;
        for row in k.outer_iter() {
            assert_approx_eq!(row.sum(), 1.0, 1e-12);
            assert!(row.iter().all(|v| *v >= 0.0));
        }
        // wider smoothing takes weight off the diagonal
        let wide = exponential_fog_kernel(&chi, &vec![20.0; 20], &vec![1.0; 20])?;
        assert!(wide[[10, 10]] < k[[10, 10]]);
        Ok(())
    }

    #[test]
    fn vanishing_scale_tends_to_identity() -> anyhow::Result<()> {
        let chi = shells();
        let k = exponential_fog_kernel(&chi, &vec![1e-3; 20], &vec![1.0; 20])?;
        for ((i, j), v) in k.indexed_iter() {
            let expected = if i == j { 1.0 } else { 0.0 };
            assert_approx_eq!(*v, expected, 1e-10);
        }
        Ok(())
    }

    #[test]
    fn growth_is_divided_out_and_reapplied() -> anyhow::Result<()> {
        let chi = shells();
        let growth: Vec<f64> = (0..20).map(|i| 0.5 + 0.01 * i as f64).collect();
        let k = exponential_fog_kernel(&chi, &vec![8.0; 20], &growth)?;
        // a field proportional to the growth stays put
        for (i, row) in k.outer_iter().enumerate() {
            let smoothed: f64 = row.iter().zip(&growth).map(|(k, d)| k * d).sum();
            assert_approx_eq!(smoothed, growth[i], 1e-12);
        }
        Ok(())
    }

    #[test]
    fn stage() -> anyhow::Result<()> {
        let z: Vec<f64> = (0..6).map(|i| 1.0 + 0.01 * i as f64).collect();
        let axes = LssAxes::from_redshifts(1, z, LambdaCdm::default())?;
        let delta = Array2::from_shape_fn(axes.shape(), |(i, p)| ((i * 12 + p) as f64).sin());
        let field = BiasedLss::new(axes, delta, true, None)?;

        let off = FingersOfGod::new(&FogParams {
            alpha_fog: 0.0,
            model: Some(SigmaPModel::Fiducial),
            ..Default::default()
        })?;
        assert_eq!(off.apply(&field)?.delta, field.delta);

        let on = FingersOfGod::new(&FogParams {
            model: Some(SigmaPModel::Fiducial),
            ..Default::default()
        })?;
        let smoothed = on.apply(&field)?;
        assert_ne!(smoothed.delta, field.delta);
        assert_eq!(smoothed.axes, field.axes);

        assert!(matches!(FingersOfGod::new(&FogParams::default()), Err(LssError::Configuration(_))));
        Ok(())
    }
}
