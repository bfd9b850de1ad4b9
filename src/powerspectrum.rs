use std::{
    f64::consts::PI,
    path::{Path, PathBuf},
};

use libm::{cos, exp, pow, sin};
use log::info;
use ndarray::{Array1, Array2};
use ndarray_npy::{read_npy, write_npy};

use crate::{
    cosmology::{Cosmology, LambdaCdm},
    error::{LssError, Result},
    integrate::romb,
};

/// Tabulated matter power spectrum at one redshift, in (Mpc/h)^3 against
/// k in h/Mpc.
#[derive(Clone, Debug, PartialEq)]
pub struct PowerSpectrum {
    pub k: Vec<f64>,
    pub p: Vec<f64>,
    pub redshift: f64,
    pub tag: String,
    pub cosmology: LambdaCdm,
    log_k: Vec<f64>,
    log_p: Vec<f64>,
}

impl PowerSpectrum {
    pub fn new(k: Vec<f64>, p: Vec<f64>, redshift: f64, tag: &str, cosmology: LambdaCdm) -> Result<Self> {
        if k.len() != p.len() {
            return Err(LssError::ShapeMismatch {
                name: "p".to_string(),
                got: vec![p.len()],
                expected: vec![k.len()],
            });
        }
        if k.len() < 2 {
            return Err(LssError::Configuration(format!(
                "power spectrum {} needs at least two samples",
                tag
            )));
        }
        if k[0] <= 0.0 || k.windows(2).any(|w| w[1] <= w[0]) {
            return Err(LssError::Configuration(format!(
                "k of power spectrum {} must be positive and strictly increasing",
                tag
            )));
        }
        if let Some((k, _)) = k.iter().zip(&p).find(|(_, p)| !(**p > 0.0) || !p.is_finite()) {
            return Err(LssError::NonFinite {
                what: format!("log of power spectrum {}", tag),
                at: *k,
            });
        }
        let log_k = k.iter().map(|v| v.ln()).collect();
        let log_p = p.iter().map(|v| v.ln()).collect();
        Ok(Self {
            k,
            p,
            redshift,
            tag: tag.to_string(),
            cosmology,
            log_k,
            log_p,
        })
    }

    /// Log-log interpolation, extended by the power laws of the end segments.
    pub fn value(&self, k: f64) -> f64 {
        let x = k.ln();
        let n = self.log_k.len();
        let i = self.log_k.partition_point(|v| *v <= x).clamp(1, n - 1) - 1;
        let slope = (self.log_p[i + 1] - self.log_p[i]) / (self.log_k[i + 1] - self.log_k[i]);
        exp(self.log_p[i] + slope * (x - self.log_k[i]))
    }

    /// `(D(z) / D(z_ps))^2`, taking the tabulated spectrum to redshift `z`.
    pub fn growth_scaling(&self, z: f64) -> f64 {
        let g = self.cosmology.growth_factor(z) / self.cosmology.growth_factor(self.redshift);
        g * g
    }

    /// `P_lin^(1 - alpha) P_nl^alpha`.
    pub fn blend(linear: &Self, nonlinear: &Self, alpha: f64) -> Result<Self> {
        if linear.redshift != nonlinear.redshift {
            return Err(LssError::Consistency(format!(
                "cannot blend spectra at z = {} and z = {}",
                linear.redshift, nonlinear.redshift
            )));
        }
        if linear.k != nonlinear.k {
            return Err(LssError::Consistency(
                "cannot blend spectra sampled on different k".to_string(),
            ));
        }
        let p = linear
            .p
            .iter()
            .zip(&nonlinear.p)
            .map(|(l, nl)| pow(*l, 1.0 - alpha) * pow(*nl, alpha))
            .collect();
        Self::new(
            linear.k.clone(),
            p,
            linear.redshift,
            &format!("{}_{}_{}", linear.tag, nonlinear.tag, alpha),
            linear.cosmology,
        )
    }

    /// BBKS spectrum `A k^ns T(k)^2 D(z)^2` normalised to `sigma8` today.
    pub fn bbks(cosmology: LambdaCdm, sigma8: f64, ns: f64, redshift: f64, k: Vec<f64>) -> Result<Self> {
        let shape = cosmology.omega_m * cosmology.h;
        let unnormalised = |k: f64| pow(k, ns) * pow(bbks_transfer(k / shape), 2.0);
        let amp = sigma8 * sigma8 / sigma_r(&unnormalised, 8.0)?;
        let growth = cosmology.growth_factor(redshift);
        let p = k.iter().map(|k| amp * growth * growth * unnormalised(*k)).collect();
        Self::new(k, p, redshift, &format!("bbks_{}_{}", sigma8, ns), cosmology)
    }
}

fn bbks_transfer(q: f64) -> f64 {
    let x = 2.34 * q;
    let poly = 1.0 + 3.89 * q + pow(16.1 * q, 2.0) + pow(5.46 * q, 3.0) + pow(6.71 * q, 4.0);
    (1.0 + x).ln() / x * pow(poly, -0.25)
}

/// Variance of the field smoothed with a top hat of radius `r`.
pub fn sigma_r(pk: &impl Fn(f64) -> f64, r: f64) -> Result<f64> {
    let n = (1 << 13) + 1;
    let (lo, hi) = (-5.0 * 10f64.ln(), 3.0 * 10f64.ln());
    let dlnk = (hi - lo) / (n - 1) as f64;
    let y = Array1::from_shape_fn(n, |i| {
        let k = exp(lo + dlnk * i as f64);
        let x = k * r;
        let w = 3.0 * (sin(x) - x * cos(x)) / (x * x * x);
        pk(k) * k * k * k * w * w / (2.0 * PI * PI)
    });
    romb(y.view(), dlnk)
}

/// Source of precomputed spectra by name.
pub trait PowerSpectrumStore {
    fn load(&self, name: &str) -> Result<PowerSpectrum>;
}

/// Directory of `ps_<name>.npy` tables (columns k, P) with
/// `ps_<name>_meta.npy` holding `[redshift, h, omega_m, omega_l]`.
pub struct NpyStore {
    pub dir: PathBuf,
}

impl NpyStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
    fn paths(&self, name: &str) -> (PathBuf, PathBuf) {
        (
            self.dir.join(format!("ps_{}.npy", name)),
            self.dir.join(format!("ps_{}_meta.npy", name)),
        )
    }
    pub fn save(&self, name: &str, ps: &PowerSpectrum) -> Result<()> {
        let (table, meta) = self.paths(name);
        let mut arr = Array2::zeros((ps.k.len(), 2));
        for (i, (k, p)) in ps.k.iter().zip(&ps.p).enumerate() {
            arr[[i, 0]] = *k;
            arr[[i, 1]] = *p;
        }
        write_npy(&table, &arr)?;
        let c = &ps.cosmology;
        write_npy(&meta, &Array1::from(vec![ps.redshift, c.h, c.omega_m, c.omega_l]))?;
        Ok(())
    }
}

impl PowerSpectrumStore for NpyStore {
    fn load(&self, name: &str) -> Result<PowerSpectrum> {
        let (table, meta) = self.paths(name);
        let arr: Array2<f64> = read_npy(&table)?;
        if arr.ncols() != 2 {
            return Err(LssError::ShapeMismatch {
                name: format!("ps_{}", name),
                got: arr.shape().to_vec(),
                expected: vec![arr.nrows(), 2],
            });
        }
        let meta: Array1<f64> = read_npy(&meta)?;
        if meta.len() != 4 {
            return Err(LssError::ShapeMismatch {
                name: format!("ps_{}_meta", name),
                got: meta.shape().to_vec(),
                expected: vec![4],
            });
        }
        let cosmology = LambdaCdm {
            h: meta[1],
            omega_m: meta[2],
            omega_l: meta[3],
        };
        info!("loaded power spectrum {} at z = {}", name, meta[0]);
        PowerSpectrum::new(arr.column(0).to_vec(), arr.column(1).to_vec(), meta[0], name, cosmology)
    }
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;

    use super::*;
    use crate::util::logspace;

    fn power_law() -> anyhow::Result<PowerSpectrum> {
        let k = logspace(-3.0, 1.0, 41, true);
        let p = k.iter().map(|k| 100.0 * pow(*k, -1.5)).collect();
        Ok(PowerSpectrum::new(k, p, 0.5, "pl", LambdaCdm::default())?)
    }

    #[test]
    fn log_log_interpolation_and_extrapolation() -> anyhow::Result<()> {
        let ps = power_law()?;
        for &k in &[1e-5, 2e-3, 0.37, 10.0, 300.0] {
            assert_approx_eq!(ps.value(k) / (100.0 * pow(k, -1.5)), 1.0, 1e-10);
        }
        assert!(PowerSpectrum::new(vec![1.0, 0.5], vec![1.0, 1.0], 0.0, "x", LambdaCdm::default()).is_err());
        assert!(PowerSpectrum::new(vec![0.5, 1.0], vec![1.0, -1.0], 0.0, "x", LambdaCdm::default()).is_err());
        Ok(())
    }

    #[test]
    fn blending() -> anyhow::Result<()> {
        let lin = power_law()?;
        let mut nl = lin.clone();
        nl.p.iter_mut().for_each(|p| *p *= 4.0);
        let nl = PowerSpectrum::new(nl.k, nl.p, 0.5, "nl", LambdaCdm::default())?;
        let half = PowerSpectrum::blend(&lin, &nl, 0.5)?;
        assert_approx_eq!(half.p[3] / lin.p[3], 2.0, 1e-12);
        let other_z = PowerSpectrum::new(lin.k.clone(), lin.p.clone(), 1.0, "z1", LambdaCdm::default())?;
        assert!(matches!(
            PowerSpectrum::blend(&lin, &other_z, 0.5),
            Err(LssError::Consistency(_))
        ));
        Ok(())
    }

    #[test]
    fn bbks_normalisation() -> anyhow::Result<()> {
        let cosmo = LambdaCdm::default();
        let k = logspace(-5.0, 3.0, 801, true);
        let ps = PowerSpectrum::bbks(cosmo, 0.8, 0.965, 0.0, k)?;
        let s = sigma_r(&|k| ps.value(k), 8.0)?;
        assert_approx_eq!(s.sqrt(), 0.8, 1e-3);
        let ps1 = PowerSpectrum::bbks(cosmo, 0.8, 0.965, 1.0, ps.k.clone())?;
        let d = cosmo.growth_factor(1.0);
        assert_approx_eq!(ps1.p[100] / ps.p[100], d * d, 1e-12);
        assert_approx_eq!(ps1.growth_scaling(0.0) * ps1.p[100] / ps.p[100], 1.0, 1e-12);
        Ok(())
    }

    #[test]
    fn npy_store_round_trip() -> anyhow::Result<()> {
        let dir = std::env::temp_dir().join(format!("lsscone-ps-{}", std::process::id()));
        std::fs::create_dir_all(&dir)?;
        let store = NpyStore::new(&dir);
        let ps = power_law()?;
        store.save("test", &ps)?;
        let back = store.load("test")?;
        assert_eq!(back.k, ps.k);
        assert_eq!(back.p, ps.p);
        assert_eq!(back.redshift, 0.5);
        assert_eq!(back.cosmology, ps.cosmology);
        assert!(store.load("missing").is_err());
        std::fs::remove_dir_all(&dir)?;
        Ok(())
    }
}
