use std::path::Path;

use ndarray::{Array1, Array2, Array3};
use ndarray_npy::write_npy;

use crate::{
    cosmology::{Cosmology, LambdaCdm, frequency_from_redshift, redshift_from_frequency},
    error::{LssError, Result, assert_shape},
    healpix::Healpix,
};

/// Radial and angular axes shared by every field of a realization.
#[derive(Clone, Debug, PartialEq)]
pub struct LssAxes {
    pub nside: usize,
    /// comoving distance of each shell in Mpc/h
    pub chi: Vec<f64>,
    pub redshift: Vec<f64>,
    /// observing frequency of each shell in MHz, if the shells were given that way
    pub freq: Option<Vec<f64>>,
    pub cosmology: LambdaCdm,
}

impl LssAxes {
    pub fn from_redshifts(nside: usize, redshift: Vec<f64>, cosmology: LambdaCdm) -> Result<Self> {
        Healpix::new(nside)?;
        if redshift.is_empty() {
            return Err(LssError::Configuration("no redshift shells given".to_string()));
        }
        let chi = redshift.iter().map(|z| cosmology.comoving_distance(*z)).collect();
        Ok(Self {
            nside,
            chi,
            redshift,
            freq: None,
            cosmology,
        })
    }

    pub fn from_frequencies(nside: usize, freq: Vec<f64>, cosmology: LambdaCdm) -> Result<Self> {
        if let Some(f) = freq.iter().find(|f| !(**f > 0.0)) {
            return Err(LssError::Configuration(format!("invalid frequency {} MHz", f)));
        }
        let redshift = freq.iter().map(|f| redshift_from_frequency(*f)).collect();
        let mut axes = Self::from_redshifts(nside, redshift, cosmology)?;
        axes.freq = Some(freq);
        Ok(axes)
    }

    pub fn nchi(&self) -> usize {
        self.chi.len()
    }

    pub fn npix(&self) -> usize {
        12 * self.nside * self.nside
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nchi(), self.npix())
    }

    pub fn pixelization(&self) -> Result<Healpix> {
        Healpix::new(self.nside)
    }

    /// Frequency centres, derived from the redshifts when not given directly.
    pub fn frequencies(&self) -> Vec<f64> {
        match &self.freq {
            Some(freq) => freq.clone(),
            None => self.redshift.iter().map(|z| frequency_from_redshift(*z)).collect(),
        }
    }

    /// Fails unless both fields live on the same shells and pixels.
    pub fn check_compatible(&self, other: &Self) -> Result<()> {
        if self.chi != other.chi {
            return Err(LssError::Consistency(
                "radial axes do not match between the two fields".to_string(),
            ));
        }
        if self.nside != other.nside {
            return Err(LssError::Consistency(format!(
                "angular axes do not match between the two fields (nside {} and {})",
                self.nside, other.nside
            )));
        }
        Ok(())
    }

    fn check_field(&self, name: &str, field: &Array2<f64>) -> Result<()> {
        let (nchi, npix) = self.shape();
        assert_shape(name, field.shape(), &[nchi, npix])
    }
}

/// Gaussian initial conditions: density contrast and Lagrangian potential.
#[derive(Clone, Debug)]
pub struct InitialLss {
    pub axes: LssAxes,
    pub delta: Array2<f64>,
    pub phi: Array2<f64>,
    pub seed: u64,
}

impl InitialLss {
    pub fn new(axes: LssAxes, delta: Array2<f64>, phi: Array2<f64>, seed: u64) -> Result<Self> {
        axes.check_field("delta", &delta)?;
        axes.check_field("phi", &phi)?;
        Ok(Self { axes, delta, phi, seed })
    }
}

/// A density contrast after biasing and possibly dynamics.
#[derive(Clone, Debug)]
pub struct BiasedLss {
    pub axes: LssAxes,
    pub delta: Array2<f64>,
    /// shells are at the redshift of their distance rather than `fixed_redshift`
    pub lightcone: bool,
    pub fixed_redshift: Option<f64>,
}

impl BiasedLss {
    pub fn new(axes: LssAxes, delta: Array2<f64>, lightcone: bool, fixed_redshift: Option<f64>) -> Result<Self> {
        axes.check_field("delta", &delta)?;
        if !lightcone && fixed_redshift.is_none() {
            return Err(LssError::Configuration(
                "a field off the lightcone needs a fixed redshift".to_string(),
            ));
        }
        Ok(Self {
            axes,
            delta,
            lightcone,
            fixed_redshift,
        })
    }

    /// New field on the same axes with the same epoch settings.
    pub fn with_delta(&self, delta: Array2<f64>) -> Result<Self> {
        Self::new(self.axes.clone(), delta, self.lightcone, self.fixed_redshift)
    }

    /// Redshift at which each shell is evaluated.
    pub fn shell_redshifts(&self) -> Vec<f64> {
        match (self.lightcone, self.fixed_redshift) {
            (false, Some(z)) => vec![z; self.axes.nchi()],
            _ => self.axes.redshift.clone(),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        write_npy(path, &self.delta)?;
        Ok(())
    }
}

/// Output sky, shaped `(nfreq, 4, npix)` with the signal in Stokes I.
#[derive(Clone, Debug)]
pub struct SkyMap {
    pub nside: usize,
    pub freq_centre: Vec<f64>,
    pub freq_width: f64,
    pub map: Array3<f64>,
}

impl SkyMap {
    pub fn stokes_i(&self) -> Array2<f64> {
        self.map.index_axis(ndarray::Axis(1), 0).to_owned()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        write_npy(path, &self.map)?;
        Ok(())
    }

    pub fn save_frequencies(&self, path: impl AsRef<Path>) -> Result<()> {
        write_npy(path, &Array1::from(self.freq_centre.clone()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;

    use super::*;
    use crate::cosmology::units;

    #[test]
    fn frequency_axes() -> anyhow::Result<()> {
        let cosmo = LambdaCdm::default();
        let axes = LssAxes::from_frequencies(4, vec![units::NU21 / 2.0, units::NU21 / 3.0], cosmo)?;
        assert_approx_eq!(axes.redshift[0], 1.0, 1e-12);
        assert_approx_eq!(axes.redshift[1], 2.0, 1e-12);
        assert!(axes.chi[1] > axes.chi[0]);
        assert_eq!(axes.frequencies(), axes.freq.clone().unwrap_or_default());
        let from_z = LssAxes::from_redshifts(4, vec![1.0], cosmo)?;
        assert_approx_eq!(from_z.frequencies()[0], units::NU21 / 2.0, 1e-9);
        assert!(LssAxes::from_frequencies(4, vec![-1.0], cosmo).is_err());
        assert!(LssAxes::from_redshifts(0, vec![1.0], cosmo).is_err());
        assert!(LssAxes::from_redshifts(4, vec![], cosmo).is_err());
        Ok(())
    }

    #[test]
    fn shape_and_axis_checks() -> anyhow::Result<()> {
        let cosmo = LambdaCdm::default();
        let axes = LssAxes::from_redshifts(2, vec![0.5, 1.0], cosmo)?;
        let bad = InitialLss::new(axes.clone(), Array2::zeros((2, 48)), Array2::zeros((2, 47)), 0);
        assert!(matches!(bad, Err(LssError::ShapeMismatch { name, .. }) if name == "phi"));

        let other = LssAxes::from_redshifts(2, vec![0.5, 1.1], cosmo)?;
        assert!(matches!(axes.check_compatible(&other), Err(LssError::Consistency(_))));
        let other = LssAxes::from_redshifts(4, vec![0.5, 1.0], cosmo)?;
        assert!(axes.check_compatible(&other).is_err());
        assert!(axes.check_compatible(&axes.clone()).is_ok());
        Ok(())
    }

    #[test]
    fn fixed_epoch_redshifts() -> anyhow::Result<()> {
        let axes = LssAxes::from_redshifts(1, vec![0.5, 1.0, 1.5], LambdaCdm::default())?;
        let f = BiasedLss::new(axes.clone(), Array2::zeros((3, 12)), false, Some(0.8))?;
        assert_eq!(f.shell_redshifts(), vec![0.8; 3]);
        let f = BiasedLss::new(axes.clone(), Array2::zeros((3, 12)), true, None)?;
        assert_eq!(f.shell_redshifts(), axes.redshift);
        assert!(BiasedLss::new(axes, Array2::zeros((3, 12)), false, None).is_err());
        Ok(())
    }
}
