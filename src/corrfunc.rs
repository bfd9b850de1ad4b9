//! Power spectrum to correlation function transforms.
//!
//! Small separations are integrated directly, large separations go through a
//! log-spaced Hankel transform, either once at a large upsampling factor or at
//! a ladder of upsampling factors followed by Richardson extrapolation.

use std::{
    f64::consts::PI,
    path::{Path, PathBuf},
};

use bincode::{Decode, Encode};
use libm::{asinh, exp, log10, sin, sinh};
use log::{debug, info};
use ndarray::Array1;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use crate::{
    cosmology::LambdaCdm,
    error::{LssError, Result},
    fftlog::{HankelPlan, power_to_correlation},
    integrate::{richardson, romb},
    powerspectrum::PowerSpectrum,
    util::{BINCODE_CONFIG, adler32, cutoff, interp, lazy_file, logspace},
};

#[derive(Clone, Copy, Debug, PartialEq, Encode, Decode)]
pub struct DirectParams {
    pub logk_min: f64,
    pub logk_max: f64,
    /// the k grid has `2^order + 1` samples
    pub order: u32,
}

impl Default for DirectParams {
    fn default() -> Self {
        Self {
            logk_min: -5.0,
            logk_max: 3.0,
            order: 16,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Encode, Decode)]
pub struct FftLogParams {
    pub upsample: usize,
    pub pad_low: f64,
    pub pad_high: f64,
    pub q_bias: f64,
}

impl Default for FftLogParams {
    fn default() -> Self {
        Self {
            upsample: 1000,
            pad_low: 2.0,
            pad_high: 1.0,
            q_bias: 0.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Encode, Decode)]
pub struct HankelRichardsonParams {
    pub pad_low: f64,
    pub pad_high: f64,
    pub richardson_n: usize,
    /// leading power of the discretisation error cancelled by the extrapolation
    pub base_pow: i32,
}

impl Default for HankelRichardsonParams {
    fn default() -> Self {
        Self {
            pad_low: 2.0,
            pad_high: 1.0,
            richardson_n: 6,
            base_pow: 1,
        }
    }
}

/// How separations above the switch radius are computed.
#[derive(Clone, Copy, Debug, PartialEq, Encode, Decode)]
pub enum LargeScaleMethod {
    FftLog(FftLogParams),
    HankelRichardson(HankelRichardsonParams),
}

#[derive(Clone, Copy, Debug, PartialEq, Encode, Decode)]
pub struct TransformParams {
    pub minlogr: f64,
    pub maxlogr: f64,
    pub switchlogr: f64,
    pub samples_per_decade: usize,
    pub direct: DirectParams,
    pub large_scale: LargeScaleMethod,
}

impl Default for TransformParams {
    fn default() -> Self {
        Self {
            minlogr: -1.0,
            maxlogr: 5.0,
            switchlogr: 2.0,
            samples_per_decade: 100,
            direct: DirectParams::default(),
            large_scale: LargeScaleMethod::HankelRichardson(HankelRichardsonParams::default()),
        }
    }
}

fn sinc(x: f64) -> f64 {
    if x == 0.0 { 1.0 } else { sin(x) / x }
}

fn sample_checked(pk: &(impl Fn(f64) -> f64 + Sync), k: &[f64]) -> Result<Vec<f64>> {
    k.iter()
        .map(|k| {
            let p = pk(*k);
            if p.is_finite() {
                Ok(p)
            } else {
                Err(LssError::NonFinite {
                    what: "power spectrum".to_string(),
                    at: *k,
                })
            }
        })
        .collect()
}

/// `xi(r) = 1 / (2 pi^2) int P(k) k^3 sinc(k r) dln k` by Romberg integration.
pub fn corr_direct(pk: &(impl Fn(f64) -> f64 + Sync), r: &[f64], params: &DirectParams) -> Result<Vec<f64>> {
    let n = (1usize << params.order) + 1;
    let k = logspace(params.logk_min, params.logk_max, n, true);
    let dlnk = (k[1] / k[0]).ln();
    let weight: Array1<f64> = sample_checked(pk, &k)?
        .iter()
        .zip(&k)
        .map(|(p, k)| p * k * k * k / (2.0 * PI * PI))
        .collect();
    r.par_iter()
        .map(|r| {
            let y = Array1::from_shape_fn(n, |i| weight[i] * sinc(k[i] * r));
            romb(y.view(), dlnk)
        })
        .collect()
}

fn in_window(r: f64, logrmin: f64, logrmax: f64) -> bool {
    const SLACK: f64 = 1e-9;
    let l = log10(r);
    l >= logrmin - SLACK && l <= logrmax + SLACK
}

fn trim(r: Vec<f64>, xi: Vec<f64>, logrmin: f64, logrmax: f64) -> (Vec<f64>, Vec<f64>) {
    r.into_iter()
        .zip(xi)
        .filter(|(r, _)| in_window(*r, logrmin, logrmax))
        .unzip()
}

/// Single log-FFT transform at `upsample` times the target density, then
/// decimated back.
pub fn corr_fftlog(
    pk: &(impl Fn(f64) -> f64 + Sync),
    logrmin: f64,
    logrmax: f64,
    samples_per_decade: usize,
    params: &FftLogParams,
) -> Result<(Vec<f64>, Vec<f64>)> {
    let rlow = logrmin - params.pad_low;
    let rhigh = logrmax + params.pad_high;
    let n = (samples_per_decade as f64 * params.upsample as f64 * (rhigh - rlow)).round() as usize;
    let dlnr = (rhigh - rlow) * 10f64.ln() / n as f64;
    let rc = 10f64.powf((rhigh + rlow) / 2.0);
    let plan = HankelPlan::new(n, 0.5, params.q_bias, dlnr, 1.0, true)?;
    let kc = plan.kr / rc;
    let p = sample_checked(pk, &plan.input_grid(kc))?;
    let (r, xi) = power_to_correlation(&plan, kc, &p)?;
    let step = params.upsample.max(1);
    let r: Vec<f64> = r.into_iter().step_by(step).collect();
    let xi: Vec<f64> = xi.into_iter().step_by(step).collect();
    Ok(trim(r, xi, logrmin, logrmax))
}

/// Every upsampling level must land on the radii of the base level.
fn check_common_radii(radii: &[Vec<f64>]) -> Result<()> {
    let Some(r0) = radii.first() else {
        return Ok(());
    };
    for (level, r) in radii.iter().enumerate().skip(1) {
        let matches = r.len() == r0.len() && r.iter().zip(r0).all(|(a, b)| (a - b).abs() <= 1e-8 * b.abs());
        if !matches {
            return Err(LssError::Consistency(format!(
                "radii at upsampling level {} differ from the base level",
                level
            )));
        }
    }
    Ok(())
}

/// Log-FFT transforms at upsampling factors `2^0 .. 2^(n-1)`, sampled on a
/// common radius grid and Richardson extrapolated.
pub fn corr_hankel_richardson(
    pk: &(impl Fn(f64) -> f64 + Sync),
    logrmin: f64,
    logrmax: f64,
    samples_per_decade: usize,
    params: &HankelRichardsonParams,
) -> Result<(Vec<f64>, Vec<f64>)> {
    let rlow = logrmin - params.pad_low;
    let rhigh = logrmax + params.pad_high;
    let n = (samples_per_decade as f64 * (rhigh - rlow)) as usize;
    if n < 2 || params.richardson_n == 0 {
        return Err(LssError::Configuration(format!(
            "Hankel transform over [{}, {}] with {} samples per decade and {} levels is empty",
            rlow, rhigh, samples_per_decade, params.richardson_n
        )));
    }
    let mut radii: Vec<Vec<f64>> = Vec::with_capacity(params.richardson_n);
    let mut estimates: Vec<Array1<f64>> = Vec::with_capacity(params.richardson_n);
    for level in 0..params.richardson_n {
        let u = 1usize << level;
        let len = n * u;
        debug!("Hankel level {} with {} samples", level, len);
        let dlnk = (rhigh - rlow) * 10f64.ln() / len as f64;
        // centre of logspace(-rhigh, -rlow, len, endpoint = false)
        let kc = 10f64.powf(-rhigh + (len as f64 - 1.0) / 2.0 * (rhigh - rlow) / len as f64);
        let plan = HankelPlan::new(len, 0.5, 0.0, dlnk, 1.0, false)?;
        let p = sample_checked(pk, &plan.input_grid(kc))?;
        let (r, xi) = power_to_correlation(&plan, kc, &p)?;
        radii.push(r.into_iter().skip(u - 1).step_by(u).collect());
        estimates.push(xi.into_iter().skip(u - 1).step_by(u).collect());
    }
    check_common_radii(&radii)?;
    let r0 = &radii[0];
    let keep: Vec<bool> = r0.iter().map(|r| in_window(*r, logrmin, logrmax)).collect();
    let r: Vec<f64> = r0.iter().zip(&keep).filter(|(_, k)| **k).map(|(r, _)| *r).collect();
    let estimates: Vec<Array1<f64>> = estimates
        .into_iter()
        .map(|e| e.iter().zip(&keep).filter(|(_, k)| **k).map(|(v, _)| *v).collect())
        .collect();
    let xi = richardson(&estimates, 2.0, params.base_pow)?;
    Ok((r, xi.to_vec()))
}

/// Correlation function from zero lag to `10^maxlogr`: direct integration
/// below the switch radius, the large scale method above it.
pub fn ps_to_corr(pk: &(impl Fn(f64) -> f64 + Sync), params: &TransformParams) -> Result<(Vec<f64>, Vec<f64>)> {
    if !(params.minlogr < params.switchlogr && params.switchlogr < params.maxlogr) {
        return Err(LssError::Configuration(format!(
            "need minlogr < switchlogr < maxlogr, got {} / {} / {}",
            params.minlogr, params.switchlogr, params.maxlogr
        )));
    }
    let nlow = ((params.switchlogr - params.minlogr) * params.samples_per_decade as f64) as usize;
    let mut r = vec![0.0];
    r.extend(logspace(params.minlogr, params.switchlogr, nlow, false));
    let mut xi = corr_direct(pk, &r, &params.direct)?;
    let (rhigh, xihigh) = match &params.large_scale {
        LargeScaleMethod::FftLog(p) => corr_fftlog(pk, params.switchlogr, params.maxlogr, params.samples_per_decade, p)?,
        LargeScaleMethod::HankelRichardson(p) => {
            corr_hankel_richardson(pk, params.switchlogr, params.maxlogr, params.samples_per_decade, p)?
        }
    };
    r.extend(rhigh);
    xi.extend(xihigh);
    Ok((r, xi))
}

#[derive(Clone, Copy, Debug, PartialEq, Encode, Decode)]
pub enum Interpolation {
    Linear,
    /// linear in `(asinh(x / x_t), asinh(f / f_t))`
    Sinh { x_t: f64, f_t: f64 },
}

impl Interpolation {
    fn forward_x(&self, x: f64) -> f64 {
        match self {
            Self::Linear => x,
            Self::Sinh { x_t, .. } => asinh(x / x_t),
        }
    }
    fn forward_f(&self, f: f64) -> f64 {
        match self {
            Self::Linear => f,
            Self::Sinh { f_t, .. } => asinh(f / f_t),
        }
    }
    fn backward_f(&self, f: f64) -> f64 {
        match self {
            Self::Linear => f,
            Self::Sinh { f_t, .. } => f_t * sinh(f),
        }
    }
}

/// A sampled function evaluated by interpolation in a transformed space,
/// clamped to the end values outside the samples.
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct TabulatedFunction {
    pub x: Vec<f64>,
    pub f: Vec<f64>,
    pub interpolation: Interpolation,
    xt: Vec<f64>,
    ft: Vec<f64>,
}

impl TabulatedFunction {
    pub fn new(x: Vec<f64>, f: Vec<f64>, interpolation: Interpolation) -> Result<Self> {
        if x.len() != f.len() {
            return Err(LssError::ShapeMismatch {
                name: "f".to_string(),
                got: vec![f.len()],
                expected: vec![x.len()],
            });
        }
        if x.len() < 2 || x.windows(2).any(|w| w[1] <= w[0]) {
            return Err(LssError::Configuration(
                "tabulated function needs at least two strictly increasing samples".to_string(),
            ));
        }
        if let Interpolation::Sinh { x_t, f_t } = interpolation {
            if !(x_t > 0.0 && f_t > 0.0) {
                return Err(LssError::Configuration(format!(
                    "sinh interpolation scales must be positive, got x_t = {}, f_t = {}",
                    x_t, f_t
                )));
            }
        }
        let xt = x.iter().map(|v| interpolation.forward_x(*v)).collect();
        let ft = f.iter().map(|v| interpolation.forward_f(*v)).collect();
        Ok(Self {
            x,
            f,
            interpolation,
            xt,
            ft,
        })
    }

    pub fn value(&self, x: f64) -> f64 {
        let t = self.interpolation.forward_x(x);
        self.interpolation.backward_f(interp(t, &self.xt, &self.ft))
    }
}

/// Density-density, density-potential and potential-potential correlation
/// functions of one power spectrum.
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct CorrelationFunctions {
    pub corr0: TabulatedFunction,
    pub corr2: TabulatedFunction,
    pub corr4: TabulatedFunction,
    pub cosmology: LambdaCdm,
    pub tag: String,
}

impl CorrelationFunctions {
    pub fn new(
        corr0: TabulatedFunction,
        corr2: TabulatedFunction,
        corr4: TabulatedFunction,
        cosmology: LambdaCdm,
        tag: &str,
    ) -> Result<Self> {
        for (name, f) in [("corr0", &corr0), ("corr2", &corr2), ("corr4", &corr4)] {
            if f.x[0] != 0.0 {
                return Err(LssError::Configuration(format!(
                    "{} must start at zero lag, starts at {}",
                    name, f.x[0]
                )));
            }
        }
        Ok(Self {
            corr0,
            corr2,
            corr4,
            cosmology,
            tag: tag.to_string(),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Encode, Decode)]
pub struct CorrelationParams {
    pub transform: TransformParams,
    /// width of a Gaussian suppression of the spectrum, none if `None`
    pub ksmooth: Option<f64>,
    pub logkcut_low: f64,
    pub logkcut_high: f64,
}

impl Default for CorrelationParams {
    fn default() -> Self {
        Self {
            transform: TransformParams {
                switchlogr: 1.0,
                samples_per_decade: 1000,
                large_scale: LargeScaleMethod::HankelRichardson(HankelRichardsonParams {
                    pad_low: 4.0,
                    pad_high: 6.0,
                    richardson_n: 9,
                    base_pow: 1,
                }),
                ..Default::default()
            },
            ksmooth: None,
            logkcut_low: -4.0,
            logkcut_high: 4.0,
        }
    }
}

/// Computes [`CorrelationFunctions`] from a tabulated spectrum taken to z = 0.
pub struct CorrelationCalculator<'a> {
    pub params: CorrelationParams,
    pub spectrum: &'a PowerSpectrum,
}

impl<'a> CorrelationCalculator<'a> {
    pub fn new(params: CorrelationParams, spectrum: &'a PowerSpectrum) -> Self {
        Self { params, spectrum }
    }

    /// Regularised `P(k) k^-n`.
    pub fn ps_n(&self, n: i32) -> impl Fn(f64) -> f64 + Sync + '_ {
        let ks = self.params.ksmooth.unwrap_or(1e10);
        let scaling = self.spectrum.growth_scaling(0.0);
        let (low, high) = (self.params.logkcut_low, self.params.logkcut_high);
        move |k: f64| {
            cutoff(k, low, 1.0, 0.5, 6.0)
                * cutoff(k, high, -1.0, 0.5, 4.0)
                * exp(-0.5 * (k / ks) * (k / ks))
                * scaling
                * self.spectrum.value(k)
                * k.powi(-n)
        }
    }

    pub fn calculate(&self) -> Result<CorrelationFunctions> {
        info!("calculating correlation functions of {}", self.spectrum.tag);
        let t = &self.params.transform;
        debug!("Generating C_dd(r)");
        let (r0, c0) = ps_to_corr(&self.ps_n(0), t)?;
        debug!("Generating C_dp(r)");
        let (r2, c2) = ps_to_corr(&self.ps_n(2), t)?;
        debug!("Generating C_pp(r)");
        let (r4, c4) = ps_to_corr(&self.ps_n(4), t)?;
        let sinh = |r: &[f64], f_t: f64| Interpolation::Sinh { x_t: r[1], f_t };
        let corr0 = TabulatedFunction::new(r0.clone(), c0, sinh(&r0, 1e-3))?;
        let corr2 = TabulatedFunction::new(r2.clone(), c2, sinh(&r2, 1e-6))?;
        let corr4 = TabulatedFunction::new(r4.clone(), c4, sinh(&r4, 1e2))?;
        CorrelationFunctions::new(corr0, corr2, corr4, self.spectrum.cosmology, &self.spectrum.tag)
    }

    /// Checksum over every input of [`Self::calculate`]: the sampled
    /// spectrum with its redshift and cosmology, and all parameters.
    pub fn cache_key(&self) -> Result<String> {
        let ps = self.spectrum;
        let bytes = bincode::encode_to_vec((&ps.k, &ps.p, ps.redshift, ps.cosmology, self.params), BINCODE_CONFIG)?;
        Ok(format!("{:x}{:08x}", bytes.len(), adler32(&bytes)))
    }

    /// `corr.<tag>.<key>.bincode` in `dir`.
    pub fn cache_path(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let name = format!("corr.{}.{}.bincode", self.spectrum.tag, self.cache_key()?);
        Ok(dir.as_ref().join(name))
    }

    /// [`Self::calculate`] through a bincode file cache.
    pub fn calculate_with_cache(&self, path: impl AsRef<Path>) -> Result<CorrelationFunctions> {
        lazy_file(path, BINCODE_CONFIG, || self.calculate())
    }
}
