use std::{f64::consts::PI, fs, path::Path};

use bincode::{
    Decode, Encode,
    config::{Configuration, standard},
};
use libm::{cos, log10, pow, sin, sqrt};
use log::info;
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use num_complex::Complex64;
use random::Source;

use crate::error::{LssError, Result};

pub const BINCODE_CONFIG: Configuration = standard();

/// Loads `fname` if it exists, otherwise evaluates `f` and stores its result there.
pub fn lazy_file<T, F>(fname: impl AsRef<Path>, config: Configuration, f: F) -> Result<T>
where
    T: Encode + Decode<()>,
    F: FnOnce() -> Result<T>,
{
    let path = fname.as_ref();
    if path.exists() {
        let bytes = fs::read(path)?;
        let (ret, _) = bincode::decode_from_slice(&bytes, config)?;
        info!("loaded cache {}", path.display());
        Ok(ret)
    } else {
        let ret = f()?;
        fs::write(path, bincode::encode_to_vec(&ret, config)?)?;
        info!("wrote cache {}", path.display());
        Ok(ret)
    }
}

pub fn linspace(start: f64, end: f64, count: usize, endpoint: bool) -> Vec<f64> {
    let div = if endpoint {
        count.saturating_sub(1).max(1)
    } else {
        count.max(1)
    };
    let step = (end - start) / div as f64;
    (0..count).map(|i| start + step * i as f64).collect()
}

/// `count` points spaced evenly in log10 between `10^start` and `10^end`.
pub fn logspace(start: f64, end: f64, count: usize, endpoint: bool) -> Vec<f64> {
    linspace(start, end, count, endpoint)
        .into_iter()
        .map(|e| pow(10.0, e))
        .collect()
}

/// First index `i` with `sorted[i] >= x`.
pub fn searchsorted(sorted: &[f64], x: f64) -> usize {
    sorted.partition_point(|v| *v < x)
}

/// Piecewise linear interpolation, clamped to the end values outside `xp`.
pub fn interp(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    let n = xp.len();
    if x <= xp[0] {
        return fp[0];
    }
    if x >= xp[n - 1] {
        return fp[n - 1];
    }
    let i = xp.partition_point(|v| *v <= x) - 1;
    let t = (x - xp[i]) / (xp[i + 1] - xp[i]);
    fp[i] + t * (fp[i + 1] - fp[i])
}

/// Widths of contiguous bins estimated from their centres, always positive.
pub fn calculate_width(centres: &[f64]) -> Result<Vec<f64>> {
    let n = centres.len();
    if n < 2 {
        return Err(LssError::Configuration(
            "bin widths need at least two bin centres".to_string(),
        ));
    }
    if n == 2 {
        let w = (centres[1] - centres[0]).abs();
        return Ok(vec![w, w]);
    }
    let mut widths = vec![0.0; n];
    for i in 1..n - 1 {
        widths[i] = (centres[i + 1] - centres[i - 1]) / 2.0;
    }
    widths[0] = 2.0 * (centres[1] - widths[1] / 2.0 - centres[0]);
    widths[n - 1] = 2.0 * (centres[n - 1] - widths[n - 2] / 2.0 - centres[n - 2]);
    Ok(widths.into_iter().map(f64::abs).collect())
}

/// Derivative along axis 0 on a non-uniform grid: second order in the interior
/// and one sided at the ends.
pub fn radial_derivative(field: ArrayView2<f64>, x: ArrayView1<f64>) -> Result<Array2<f64>> {
    let n = field.len_of(Axis(0));
    if x.len() != n {
        return Err(LssError::ShapeMismatch {
            name: "x".to_string(),
            got: vec![x.len()],
            expected: vec![n],
        });
    }
    if n < 2 {
        return Err(LssError::Configuration(
            "radial derivative needs at least two shells".to_string(),
        ));
    }
    let mut out = Array2::zeros(field.raw_dim());
    for i in 0..n {
        let mut row = out.row_mut(i);
        if i == 0 || i == n - 1 {
            let (i0, i1) = if i == 0 { (0, 1) } else { (n - 2, n - 1) };
            let h = x[i1] - x[i0];
            row.assign(&((&field.row(i1) - &field.row(i0)) / h));
        } else {
            let hs = x[i] - x[i - 1];
            let hd = x[i + 1] - x[i];
            let denom = hs * hd * (hd + hs);
            ndarray::Zip::from(&mut row)
                .and(field.row(i - 1))
                .and(field.row(i))
                .and(field.row(i + 1))
                .for_each(|o, &fm, &f0, &fp| {
                    *o = (hs * hs * fp + (hd * hd - hs * hs) * f0 - hd * hd * fm) / denom;
                });
        }
    }
    Ok(out)
}

/// Smooth power-law cutoff in log10 k. For `direction = 1` it suppresses
/// `k << 10^logk0` as `(k / k0)^index`; for `direction = -1` it suppresses
/// `k >> k0` as `(k0 / k)^index`. `width` is the transition width in decades.
pub fn cutoff(k: f64, logk0: f64, direction: f64, width: f64, index: f64) -> f64 {
    let x = direction * (logk0 - log10(k)) / width;
    pow(1.0 + pow(10.0, x), -index * width)
}

/// Adler-32 checksum.
pub fn adler32(bytes: &[u8]) -> u32 {
    const MOD: u32 = 65521;
    const BLOCK: usize = 5552;
    let mut a = 1u32;
    let mut b = 0u32;
    for chunk in bytes.chunks(BLOCK) {
        for &x in chunk {
            a += x as u32;
            b += a;
        }
        a %= MOD;
        b %= MOD;
    }
    (b << 16) | a
}

pub struct Gaussian<S> {
    source: S,
    spare: Option<f64>,
}

impl<S: Source> Gaussian<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            spare: None,
        }
    }
    fn uniform_open(&mut self) -> f64 {
        // read_f64 is in [0, 1), flip it to keep the log finite
        1.0 - self.source.read_f64()
    }
    /// Standard normal deviate (Box-Muller, pairs cached).
    pub fn sample(&mut self) -> f64 {
        if let Some(v) = self.spare.take() {
            return v;
        }
        let m = sqrt(-2.0 * self.uniform_open().ln());
        let phase = 2.0 * PI * self.source.read_f64();
        self.spare = Some(m * sin(phase));
        m * cos(phase)
    }
    /// Complex deviate with unit variance split evenly between both parts.
    pub fn sample_complex(&mut self) -> Complex64 {
        let phase = 2.0 * PI * self.source.read_f64();
        let m = sqrt(-self.uniform_open().ln());
        Complex64::from_polar(m, phase)
    }
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;
    use ndarray::{Array1, Array2};

    use super::*;

    #[test]
    fn adler32_reference() {
        assert_eq!(adler32(b"Wikipedia"), 0x11E60398);
        assert_eq!(adler32(b""), 1);
        let long = vec![0xffu8; 20000];
        let mut a = 1u64;
        let mut b = 0u64;
        for &x in &long {
            a = (a + x as u64) % 65521;
            b = (b + a) % 65521;
        }
        assert_eq!(adler32(&long) as u64, (b << 16) | a);
    }

    #[test]
    fn widths() -> anyhow::Result<()> {
        let w = calculate_width(&[1.0, 2.0, 3.0, 4.0])?;
        for v in w {
            assert_approx_eq!(v, 1.0, 1e-14);
        }
        let w = calculate_width(&[4.0, 3.0, 1.0])?;
        assert_approx_eq!(w[1], 1.5, 1e-14);
        assert!(w.iter().all(|v| *v > 0.0));
        assert!(calculate_width(&[1.0]).is_err());
        Ok(())
    }

    #[test]
    fn derivative_of_quadratic() -> anyhow::Result<()> {
        let x = Array1::from(vec![0.0, 0.5, 1.5, 2.0, 3.5]);
        let mut f = Array2::zeros((5, 2));
        for i in 0..5 {
            f[[i, 0]] = x[i] * x[i];
            f[[i, 1]] = 3.0 * x[i];
        }
        let d = radial_derivative(f.view(), x.view())?;
        for i in 1..4 {
            assert_approx_eq!(d[[i, 0]], 2.0 * x[i], 1e-12);
        }
        for i in 0..5 {
            assert_approx_eq!(d[[i, 1]], 3.0, 1e-12);
        }
        Ok(())
    }

    #[test]
    fn interpolation_and_grids() {
        let xp = [0.0, 1.0, 3.0];
        let fp = [1.0, 3.0, -1.0];
        assert_approx_eq!(interp(0.5, &xp, &fp), 2.0, 1e-15);
        assert_approx_eq!(interp(2.0, &xp, &fp), 1.0, 1e-15);
        assert_eq!(interp(-1.0, &xp, &fp), 1.0);
        assert_eq!(interp(5.0, &xp, &fp), -1.0);
        assert_eq!(searchsorted(&xp, 1.0), 1);
        assert_eq!(searchsorted(&xp, 1.5), 2);

        let l = logspace(-1.0, 2.0, 3, false);
        assert_approx_eq!(l[1], 1.0, 1e-14);
        let r = linspace(1.0, 3.0, 5, true);
        assert_approx_eq!(r[4], 3.0, 1e-15);
        assert_approx_eq!(r[1], 1.5, 1e-15);
    }

    #[test]
    fn cutoff_limits() {
        assert_approx_eq!(cutoff(1e2, -4.0, 1.0, 0.5, 6.0), 1.0, 1e-12);
        let low = cutoff(1e-7, -4.0, 1.0, 0.5, 6.0);
        assert_approx_eq!(low / 1e-18, 1.0, 1e-3);
        let high = cutoff(1e7, 4.0, -1.0, 0.5, 4.0);
        assert_approx_eq!(high / 1e-12, 1.0, 1e-3);
    }

    #[test]
    fn gaussian_moments() {
        let mut g = Gaussian::new(random::default(7));
        let n = 200000;
        let (mut s1, mut s2) = (0.0, 0.0);
        for _ in 0..n {
            let v = g.sample();
            s1 += v;
            s2 += v * v;
        }
        assert!((s1 / n as f64).abs() < 1e-2);
        assert_approx_eq!(s2 / n as f64, 1.0, 2e-2);
        let mut c2 = 0.0;
        for _ in 0..n {
            c2 += g.sample_complex().norm_sqr();
        }
        assert_approx_eq!(c2 / n as f64, 1.0, 2e-2);
    }

    #[test]
    fn lazy_file_roundtrip() -> anyhow::Result<()> {
        let path = std::env::temp_dir().join(format!("lsscone-lazy-{}.bincode", std::process::id()));
        let _ = fs::remove_file(&path);
        let first: Vec<f64> = lazy_file(&path, BINCODE_CONFIG, || Ok(vec![1.0, 2.0]))?;
        let second: Vec<f64> = lazy_file(&path, BINCODE_CONFIG, || Ok(vec![]))?;
        assert_eq!(first, second);
        fs::remove_file(&path)?;
        Ok(())
    }
}
