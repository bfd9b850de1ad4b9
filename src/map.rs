use log::info;
use ndarray::{Array3, Axis};

use crate::{
    bias::lognormal_transform,
    cosmology::Cosmology,
    error::Result,
    field::{BiasedLss, SkyMap},
    models::{OmegaHiModel, RedshiftFn},
};

/// Polarisations of the output map; the field goes into Stokes I.
pub const NPOL: usize = 4;

/// Mean 21 cm brightness temperature in K.
pub fn mean_21cm_temperature(c: &impl Cosmology, z: f64, omega_hi: f64) -> f64 {
    // fundamental constants and the A_10 Einstein coefficient only
    const T0: f64 = 191.06e-3;
    T0 * (c.hubble(0.0) / c.hubble(z)) * (1.0 + z) * (1.0 + z) * c.h() * omega_hi
}

#[derive(Clone, Debug, PartialEq)]
pub struct MapParams {
    /// multiply by the mean 21 cm temperature of each shell
    pub use_mean_21cm_t: bool,
    pub map_prefactor: f64,
    pub lognormal: bool,
    pub omega_hi_model: OmegaHiModel,
}

impl Default for MapParams {
    fn default() -> Self {
        Self {
            use_mean_21cm_t: false,
            map_prefactor: 1.0,
            lognormal: false,
            omega_hi_model: OmegaHiModel::Crighton2015,
        }
    }
}

pub fn biased_to_map(field: &BiasedLss, params: &MapParams) -> Result<SkyMap> {
    let axes = &field.axes;
    let freq = axes.frequencies();
    let freq_width = if freq.len() > 1 { (freq[1] - freq[0]).abs() } else { 0.0 };

    let mut delta = if params.lognormal {
        lognormal_transform(field.delta.view(), Some(Axis(1)))
    } else {
        field.delta.clone()
    };
    if params.map_prefactor != 1.0 {
        info!("Multiplying map by {}", params.map_prefactor);
        delta.mapv_inplace(|v| v * params.map_prefactor);
    }
    if params.use_mean_21cm_t {
        let omega_hi = params.omega_hi_model.resolve();
        for (mut row, z) in delta.outer_iter_mut().zip(&axes.redshift) {
            let tb = mean_21cm_temperature(&axes.cosmology, *z, omega_hi.value(*z));
            row.mapv_inplace(|v| v * tb);
        }
    }

    let (nfreq, npix) = delta.dim();
    let mut map = Array3::zeros((nfreq, NPOL, npix));
    map.index_axis_mut(Axis(1), 0).assign(&delta);
    Ok(SkyMap {
        nside: axes.nside,
        freq_centre: freq,
        freq_width,
        map,
    })
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;
    use ndarray::Array2;

    use super::*;
    use crate::{
        cosmology::{LambdaCdm, units},
        field::LssAxes,
    };

    #[test]
    fn temperature_today() {
        let c = LambdaCdm::default();
        assert_approx_eq!(mean_21cm_temperature(&c, 0.0, 1e-3), 0.19106 * c.h * 1e-3, 1e-15);
        assert!(mean_21cm_temperature(&c, 1.0, 1e-3) > mean_21cm_temperature(&c, 0.0, 1e-3));
    }

    #[test]
    fn map_layout_and_scaling() -> anyhow::Result<()> {
        let freq = vec![700.0, 710.0, 720.0];
        let axes = LssAxes::from_frequencies(1, freq.clone(), LambdaCdm::default())?;
        let delta = Array2::from_shape_fn(axes.shape(), |(i, p)| 0.01 * (i + p) as f64);
        let field = BiasedLss::new(axes.clone(), delta.clone(), true, None)?;

        let plain = biased_to_map(&field, &MapParams::default())?;
        assert_eq!(plain.map.shape(), &[3, NPOL, 12]);
        assert_eq!(plain.stokes_i(), delta);
        assert!(plain.map.index_axis(Axis(1), 2).iter().all(|v| *v == 0.0));
        assert_eq!(plain.freq_centre, freq);
        assert_approx_eq!(plain.freq_width, 10.0, 1e-12);

        let scaled = biased_to_map(
            &field,
            &MapParams {
                use_mean_21cm_t: true,
                map_prefactor: 2.0,
                ..Default::default()
            },
        )?;
        let z = units::NU21 / 710.0 - 1.0;
        let tb = mean_21cm_temperature(&axes.cosmology, z, 4e-4 * (1.0 + z).powf(0.6));
        assert_approx_eq!(scaled.map[[1, 0, 3]], 2.0 * tb * delta[[1, 3]], 1e-15);

        let ln = biased_to_map(
            &field,
            &MapParams {
                lognormal: true,
                ..Default::default()
            },
        )?;
        assert!(ln.stokes_i().iter().all(|v| *v > -1.0));
        Ok(())
    }
}
