//! Spherical harmonic transforms on the HEALPix ring grid.

use std::f64::consts::PI;

use libm::{cos, sin, sqrt};
use ndarray::{Array1, ArrayView1};
use num_complex::Complex64;
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use rustfft::FftDirection;

use crate::{
    error::{LssError, Result},
    fft::FftCache,
    healpix::{Healpix, Pixelization, RingInfo},
};

/// Harmonic coefficients `a_lm` for `0 <= m <= l <= lmax`, stored m-major.
#[derive(Clone, Debug, PartialEq)]
pub struct Alm {
    pub lmax: usize,
    pub data: Vec<Complex64>,
}

impl Alm {
    pub fn zeros(lmax: usize) -> Self {
        Self {
            lmax,
            data: vec![Complex64::new(0.0, 0.0); Self::size(lmax)],
        }
    }
    pub fn size(lmax: usize) -> usize {
        (lmax + 1) * (lmax + 2) / 2
    }
    pub fn index(&self, l: usize, m: usize) -> usize {
        m * (2 * self.lmax + 1 - m) / 2 + l
    }
    pub fn get(&self, l: usize, m: usize) -> Complex64 {
        self.data[self.index(l, m)]
    }
    pub fn set(&mut self, l: usize, m: usize, v: Complex64) {
        let i = self.index(l, m);
        self.data[i] = v;
    }
    /// Angular power spectrum `C_l = sum_m |a_lm|^2 / (2l + 1)`.
    pub fn power(&self) -> Vec<f64> {
        (0..=self.lmax)
            .map(|l| {
                let mut s = self.get(l, 0).norm_sqr();
                for m in 1..=l {
                    s += 2.0 * self.get(l, m).norm_sqr();
                }
                s / (2 * l + 1) as f64
            })
            .collect()
    }
}

/// Orthonormal associated Legendre functions `lambda_lm(cos theta)`, including
/// the Condon-Shortley phase, for one ring.
struct RingLegendre {
    lmax: usize,
    cos_theta: f64,
    sin_theta: f64,
    /// indexed like [`Alm`]
    values: Vec<f64>,
}

impl RingLegendre {
    fn new(lmax: usize, theta: f64) -> Self {
        let x = cos(theta);
        let s = sin(theta);
        let mut values = vec![0.0; Alm::size(lmax)];
        let idx = |l: usize, m: usize| m * (2 * lmax + 1 - m) / 2 + l;
        let mut pmm = sqrt(1.0 / (4.0 * PI));
        for m in 0..=lmax {
            if m > 0 {
                pmm *= -sqrt((2 * m + 1) as f64 / (2 * m) as f64) * s;
            }
            values[idx(m, m)] = pmm;
            if m == lmax {
                break;
            }
            let mut p1 = pmm;
            let mut p2 = sqrt((2 * m + 3) as f64) * x * pmm;
            values[idx(m + 1, m)] = p2;
            for l in m + 2..=lmax {
                let lf = l as f64;
                let mf = m as f64;
                let a = sqrt((4.0 * lf * lf - 1.0) / (lf * lf - mf * mf));
                let b = sqrt(((lf - 1.0) * (lf - 1.0) - mf * mf) / (4.0 * (lf - 1.0) * (lf - 1.0) - 1.0));
                let p = a * (x * p2 - b * p1);
                values[idx(l, m)] = p;
                p1 = p2;
                p2 = p;
            }
        }
        Self {
            lmax,
            cos_theta: x,
            sin_theta: s,
            values,
        }
    }
    fn get(&self, l: usize, m: usize) -> f64 {
        self.values[m * (2 * self.lmax + 1 - m) / 2 + l]
    }
    /// `d lambda_lm / d theta`
    fn theta_derivative(&self, l: usize, m: usize) -> f64 {
        let lf = l as f64;
        let mf = m as f64;
        let prev = if l > m {
            sqrt((2.0 * lf + 1.0) / (2.0 * lf - 1.0) * (lf * lf - mf * mf)) * self.get(l - 1, m)
        } else {
            0.0
        };
        (lf * self.cos_theta * self.get(l, m) - prev) / self.sin_theta
    }
}

fn check_map(hp: &Healpix, map: ArrayView1<f64>) -> Result<()> {
    if map.len() != hp.npix() {
        return Err(LssError::ShapeMismatch {
            name: "map".to_string(),
            got: vec![map.len()],
            expected: vec![hp.npix()],
        });
    }
    Ok(())
}

/// Real ring values from the Fourier coefficients `f_m` (m >= 0) of a real
/// function of phi, aliasing `m` onto the ring length.
fn synthesise_ring(fft: &FftCache<f64>, info: &RingInfo, fm: &[Complex64]) -> Vec<f64> {
    let n = info.len;
    let phi0 = info.phi0();
    let mut buf = vec![Complex64::new(0.0, 0.0); n];
    for (m, f) in fm.iter().enumerate() {
        let w = if m == 0 { 1.0 } else { 2.0 };
        buf[m % n] += f * w * Complex64::from_polar(1.0, m as f64 * phi0);
    }
    fft.process(&mut buf, FftDirection::Inverse);
    buf.iter().map(|c| c.re).collect()
}

/// Fourier coefficients of the ring values and of their theta derivative.
fn ring_fourier(alm: &Alm, legendre: &RingLegendre) -> (Vec<Complex64>, Vec<Complex64>) {
    let lmax = alm.lmax;
    let mut fm = vec![Complex64::new(0.0, 0.0); lmax + 1];
    let mut dfm = vec![Complex64::new(0.0, 0.0); lmax + 1];
    for m in 0..=lmax {
        for l in m..=lmax {
            let a = alm.get(l, m);
            fm[m] += a * legendre.get(l, m);
            dfm[m] += a * legendre.theta_derivative(l, m);
        }
    }
    (fm, dfm)
}

/// Map from harmonic coefficients.
pub fn alm2map(hp: &Healpix, alm: &Alm) -> Array1<f64> {
    let fft = FftCache::new();
    let rings: Vec<(RingInfo, Vec<f64>)> = (1..=hp.num_rings())
        .into_par_iter()
        .map(|ring| {
            let info = hp.ring_info(ring);
            let legendre = RingLegendre::new(alm.lmax, info.theta);
            let mut fm = vec![Complex64::new(0.0, 0.0); alm.lmax + 1];
            for (m, f) in fm.iter_mut().enumerate() {
                for l in m..=alm.lmax {
                    *f += alm.get(l, m) * legendre.get(l, m);
                }
            }
            (info, synthesise_ring(&fft, &info, &fm))
        })
        .collect();
    let mut map = Array1::zeros(hp.npix());
    for (info, values) in rings {
        for (j, v) in values.into_iter().enumerate() {
            map[info.start + j] = v;
        }
    }
    map
}

/// Map and its first derivatives `d/dtheta` and `(1 / sin theta) d/dphi`.
pub fn alm2map_der1(hp: &Healpix, alm: &Alm) -> (Array1<f64>, Array1<f64>, Array1<f64>) {
    let fft = FftCache::new();
    let rings: Vec<_> = (1..=hp.num_rings())
        .into_par_iter()
        .map(|ring| {
            let info = hp.ring_info(ring);
            let legendre = RingLegendre::new(alm.lmax, info.theta);
            let (fm, dfm) = ring_fourier(alm, &legendre);
            let im_over_sin: Vec<Complex64> = fm
                .iter()
                .enumerate()
                .map(|(m, f)| f * Complex64::new(0.0, m as f64 / legendre.sin_theta))
                .collect();
            (
                info,
                synthesise_ring(&fft, &info, &fm),
                synthesise_ring(&fft, &info, &dfm),
                synthesise_ring(&fft, &info, &im_over_sin),
            )
        })
        .collect();
    let mut map = Array1::zeros(hp.npix());
    let mut dtheta = Array1::zeros(hp.npix());
    let mut dphi = Array1::zeros(hp.npix());
    for (info, v, dt, dp) in rings {
        for j in 0..info.len {
            map[info.start + j] = v[j];
            dtheta[info.start + j] = dt[j];
            dphi[info.start + j] = dp[j];
        }
    }
    (map, dtheta, dphi)
}

/// Harmonic coefficients of a map by direct pixel quadrature.
pub fn map2alm(hp: &Healpix, map: ArrayView1<f64>, lmax: usize) -> Result<Alm> {
    check_map(hp, map)?;
    let fft = FftCache::new();
    let area = hp.pixel_area();
    let partial: Vec<Alm> = (1..=hp.num_rings())
        .into_par_iter()
        .map(|ring| {
            let info = hp.ring_info(ring);
            let n = info.len;
            let mut buf: Vec<Complex64> = (0..n)
                .map(|j| Complex64::new(map[info.start + j], 0.0))
                .collect();
            fft.process(&mut buf, FftDirection::Forward);
            let legendre = RingLegendre::new(lmax, info.theta);
            let mut alm = Alm::zeros(lmax);
            for m in 0..=lmax {
                let gm = buf[m % n] * Complex64::from_polar(area, -(m as f64) * info.phi0());
                for l in m..=lmax {
                    let i = alm.index(l, m);
                    alm.data[i] = gm * legendre.get(l, m);
                }
            }
            alm
        })
        .collect();
    let mut alm = Alm::zeros(lmax);
    for p in partial {
        for (a, b) in alm.data.iter_mut().zip(p.data) {
            *a += b;
        }
    }
    Ok(alm)
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;

    use super::*;

    #[test]
    fn legendre_low_orders() {
        let theta = 0.7;
        let p = RingLegendre::new(3, theta);
        let x = cos(theta);
        let s = sin(theta);
        assert_approx_eq!(p.get(0, 0), sqrt(1.0 / (4.0 * PI)), 1e-15);
        assert_approx_eq!(p.get(1, 0), sqrt(3.0 / (4.0 * PI)) * x, 1e-15);
        assert_approx_eq!(p.get(1, 1), -sqrt(3.0 / (8.0 * PI)) * s, 1e-15);
        assert_approx_eq!(p.get(2, 0), sqrt(5.0 / (16.0 * PI)) * (3.0 * x * x - 1.0), 1e-15);
        assert_approx_eq!(p.get(2, 2), sqrt(15.0 / (32.0 * PI)) * s * s, 1e-15);
        // d/dtheta of Y_10
        assert_approx_eq!(p.theta_derivative(1, 0), -sqrt(3.0 / (4.0 * PI)) * s, 1e-14);
    }

    #[test]
    fn dipole_map_and_gradient() -> anyhow::Result<()> {
        let hp = Healpix::new(4)?;
        let mut alm = Alm::zeros(hp.lmax());
        // f = cos(theta)
        alm.set(1, 0, Complex64::new(sqrt(4.0 * PI / 3.0), 0.0));
        let (map, dtheta, dphi) = alm2map_der1(&hp, &alm);
        let plain = alm2map(&hp, &alm);
        for p in 0..hp.npix() {
            let (theta, _) = hp.pix2ang(p);
            assert_approx_eq!(map[p], cos(theta), 1e-12);
            assert_approx_eq!(plain[p], map[p], 1e-14);
            assert_approx_eq!(dtheta[p], -sin(theta), 1e-12);
            assert_approx_eq!(dphi[p], 0.0, 1e-12);
        }
        Ok(())
    }

    #[test]
    fn azimuthal_derivative() -> anyhow::Result<()> {
        let hp = Healpix::new(4)?;
        let mut alm = Alm::zeros(hp.lmax());
        // Y_11 + c.c. is proportional to sin(theta) cos(phi)
        let c = -sqrt(3.0 / (8.0 * PI));
        alm.set(1, 1, Complex64::new(0.5 / c, 0.0));
        let (map, _, dphi) = alm2map_der1(&hp, &alm);
        for p in 0..hp.npix() {
            let (theta, phi) = hp.pix2ang(p);
            assert_approx_eq!(map[p], sin(theta) * cos(phi), 1e-12);
            assert_approx_eq!(dphi[p], -sin(phi), 1e-12);
        }
        Ok(())
    }

    #[test]
    fn analysis_recovers_low_multipoles() -> anyhow::Result<()> {
        let hp = Healpix::new(16)?;
        let lmax = 8;
        let mut alm = Alm::zeros(lmax);
        alm.set(0, 0, Complex64::new(1.0, 0.0));
        alm.set(3, 2, Complex64::new(0.3, -0.2));
        alm.set(5, 0, Complex64::new(-0.4, 0.0));
        let map = alm2map(&hp, &alm);
        let back = map2alm(&hp, map.view(), lmax)?;
        for (a, b) in back.data.iter().zip(&alm.data) {
            assert!((a - b).norm() < 2e-2);
        }
        assert!(map2alm(&hp, map.slice(ndarray::s![..10]), lmax).is_err());
        Ok(())
    }
}
