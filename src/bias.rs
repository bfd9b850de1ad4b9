use log::{debug, info, warn};
use ndarray::{Array2, ArrayView2, Axis};

use crate::{
    cosmology::Cosmology,
    error::{LssError, Result},
    field::{BiasedLss, InitialLss},
    models::{BiasModel, Constant, RedshiftFn, eulerian_scaling, polynomial_or_model},
};

/// Lognormal field `exp(x - var / 2) - 1` with the same first order two point
/// statistics as `field`. The variance is taken along `axis`, or over the
/// whole array when `None`.
pub fn lognormal_transform(field: ArrayView2<f64>, axis: Option<Axis>) -> Array2<f64> {
    let mut out = field.to_owned();
    match axis {
        Some(axis) => {
            for mut lane in out.lanes_mut(axis) {
                let var = lane.var(0.0);
                lane.mapv_inplace(|x| (x - var / 2.0).exp() - 1.0);
            }
        }
        None => {
            let var = field.var(0.0);
            out.mapv_inplace(|x| (x - var / 2.0).exp() - 1.0);
        }
    }
    out
}

#[derive(Clone, Debug, PartialEq)]
pub struct BiasParams {
    /// evaluate each shell at its own redshift rather than at `redshift`
    pub lightcone: bool,
    pub redshift: Option<f64>,
    pub lognormal: bool,
}

impl Default for BiasParams {
    fn default() -> Self {
        Self {
            lightcone: true,
            redshift: None,
            lognormal: false,
        }
    }
}

/// `b_1(z) = sum_n c_n (z - z_eff)^n`, explicit or from a built-in model.
#[derive(Clone, Debug, PartialEq)]
pub struct PolynomialBiasParams {
    pub z_eff: Option<f64>,
    /// Lagrangian coefficients
    pub bias_coeff: Option<Vec<f64>>,
    pub model: Option<BiasModel>,
    /// multiplies the Eulerian bias
    pub alpha_b: f64,
}

impl Default for PolynomialBiasParams {
    fn default() -> Self {
        Self {
            z_eff: None,
            bias_coeff: None,
            model: None,
            alpha_b: 1.0,
        }
    }
}

/// Lagrangian bias to second order:
/// `delta_B = D b_1 delta_L + D^2 b_2 (delta_L^2 - <delta_L^2>)`.
pub struct LagrangianBias {
    pub params: BiasParams,
    b1: Option<Box<dyn RedshiftFn>>,
    b2: Option<Box<dyn RedshiftFn>>,
}

impl LagrangianBias {
    pub fn new(
        params: BiasParams,
        b1: Option<Box<dyn RedshiftFn>>,
        b2: Option<Box<dyn RedshiftFn>>,
    ) -> Result<Self> {
        if !params.lightcone && params.redshift.is_none() {
            return Err(LssError::Configuration(
                "a fixed redshift is needed when not on the lightcone".to_string(),
            ));
        }
        if b1.is_none() {
            warn!("first order bias is absent, the biased field has no linear term");
        }
        Ok(Self { params, b1, b2 })
    }

    /// Constant first order Lagrangian bias `b_L = b_E - 1`.
    pub fn constant(params: BiasParams, bias_l: f64) -> Result<Self> {
        Self::new(params, Some(Box::new(Constant(bias_l))), None)
    }

    pub fn polynomial(params: BiasParams, poly: &PolynomialBiasParams) -> Result<Self> {
        let b = polynomial_or_model(
            poly.z_eff,
            poly.bias_coeff.as_deref(),
            poly.model,
            BiasModel::resolve,
            "bias",
        )?;
        Self::new(params, Some(Box::new(eulerian_scaling(poly.alpha_b, b))), None)
    }

    pub fn with_second_order(mut self, b2: Box<dyn RedshiftFn>) -> Self {
        self.b2 = Some(b2);
        self
    }

    pub fn apply(&self, f: &InitialLss) -> Result<BiasedLss> {
        let axes = &f.axes;
        let z = match (self.params.lightcone, self.params.redshift) {
            (false, Some(z)) => vec![z; axes.nchi()],
            _ => axes.redshift.clone(),
        };
        let c = &axes.cosmology;
        let d0 = c.growth_factor(0.0);
        let growth: Vec<f64> = z.iter().map(|z| c.growth_factor(*z) / d0).collect();

        let mut delta = Array2::zeros(f.delta.raw_dim());
        if let Some(b1) = &self.b1 {
            for (i, (mut out, dl)) in delta.outer_iter_mut().zip(f.delta.outer_iter()).enumerate() {
                let scale = growth[i] * b1.value(z[i]);
                out.scaled_add(scale, &dl);
            }
        } else {
            info!("First order bias is not set");
        }
        if let Some(b2) = &self.b2 {
            for (i, (mut out, dl)) in delta.outer_iter_mut().zip(f.delta.outer_iter()).enumerate() {
                let d2 = dl.mapv(|v| v * v);
                let mean = d2.mean().unwrap_or(0.0);
                let scale = growth[i] * growth[i] * b2.value(z[i]);
                out.zip_mut_with(&d2, |o, v| *o += scale * (v - mean));
            }
        } else {
            debug!("No second order bias to apply");
        }
        if self.params.lognormal {
            let axis = self.params.lightcone.then_some(Axis(1));
            delta = lognormal_transform(delta.view(), axis);
        }
        BiasedLss::new(axes.clone(), delta, self.params.lightcone, self.params.redshift)
    }
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;

    use super::*;
    use crate::{cosmology::LambdaCdm, field::LssAxes, util::Gaussian};

    fn gaussian_field(nchi: usize, nside: usize, sigma: f64, seed: u64) -> anyhow::Result<InitialLss> {
        let z: Vec<f64> = (0..nchi).map(|i| 0.5 + 0.1 * i as f64).collect();
        let axes = LssAxes::from_redshifts(nside, z, LambdaCdm::default())?;
        let mut g = Gaussian::new(random::default(seed));
        let delta = Array2::from_shape_simple_fn(axes.shape(), || sigma * g.sample());
        let phi = Array2::zeros(axes.shape());
        Ok(InitialLss::new(axes, delta, phi, seed)?)
    }

    #[test]
    fn lognormal_mean_density() -> anyhow::Result<()> {
        let f = gaussian_field(2, 64, 0.3, 5)?;
        let out = lognormal_transform(f.delta.view(), Some(Axis(1)));
        assert!(out.iter().all(|v| *v > -1.0));
        for row in out.outer_iter() {
            // 1 + out = exp(x - var / 2) has unit mean up to sample noise
            assert_approx_eq!(row.mapv(|v| 1.0 + v).mean().unwrap_or(0.0), 1.0, 1e-2);
        }
        let whole = lognormal_transform(f.delta.view(), None);
        assert_approx_eq!(whole.mean().unwrap_or(0.0), 0.0, 1e-2);
        Ok(())
    }

    #[test]
    fn linear_bias_scales_by_growth() -> anyhow::Result<()> {
        let f = gaussian_field(3, 2, 1.0, 1)?;
        let biased = LagrangianBias::constant(BiasParams::default(), 2.0)?.apply(&f)?;
        let c = f.axes.cosmology;
        for i in 0..3 {
            let d = c.growth_factor(f.axes.redshift[i]);
            for p in 0..48 {
                assert_approx_eq!(biased.delta[[i, p]], 2.0 * d * f.delta[[i, p]], 1e-12);
            }
        }
        assert!(biased.lightcone);

        let fixed = LagrangianBias::constant(
            BiasParams {
                lightcone: false,
                redshift: Some(1.0),
                lognormal: false,
            },
            1.0,
        )?
        .apply(&f)?;
        let d = c.growth_factor(1.0);
        assert_approx_eq!(fixed.delta[[2, 7]], d * f.delta[[2, 7]], 1e-12);
        assert_eq!(fixed.shell_redshifts(), vec![1.0; 3]);
        Ok(())
    }

    #[test]
    fn second_order_term_has_zero_pixel_mean() -> anyhow::Result<()> {
        let f = gaussian_field(2, 4, 1.0, 2)?;
        let bias = LagrangianBias::new(BiasParams::default(), None, None)?.with_second_order(Box::new(Constant(0.5)));
        let biased = bias.apply(&f)?;
        for row in biased.delta.outer_iter() {
            assert!(row.mean().unwrap_or(1.0).abs() < 1e-12);
        }
        let none = LagrangianBias::new(BiasParams::default(), None, None)?.apply(&f)?;
        assert!(none.delta.iter().all(|v| *v == 0.0));
        Ok(())
    }

    #[test]
    fn polynomial_bias_configuration() -> anyhow::Result<()> {
        let missing = LagrangianBias::polynomial(BiasParams::default(), &PolynomialBiasParams::default());
        assert!(matches!(missing, Err(LssError::Configuration(_))));
        let no_z = LagrangianBias::constant(
            BiasParams {
                lightcone: false,
                ..Default::default()
            },
            1.0,
        );
        assert!(no_z.is_err());

        let f = gaussian_field(1, 2, 1.0, 3)?;
        let poly = PolynomialBiasParams {
            z_eff: Some(0.5),
            bias_coeff: Some(vec![0.5]),
            alpha_b: 2.0,
            ..Default::default()
        };
        let biased = LagrangianBias::polynomial(BiasParams::default(), &poly)?.apply(&f)?;
        // 2 * 0.5 + 2 - 1 = 2
        let d = f.axes.cosmology.growth_factor(0.5);
        assert_approx_eq!(biased.delta[[0, 3]], 2.0 * d * f.delta[[0, 3]], 1e-12);
        Ok(())
    }
}
