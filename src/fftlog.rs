//! Discrete Hankel transform of logarithmically sampled functions (FFTLog).
//!
//! For `a(x)` sampled at `x_j = x_c exp((j - j_c) dlnx)`, `j_c = (n - 1) / 2`,
//! computes
//!
//! `A(y) = int_0^inf a(x) J_mu(x y) y dx`
//!
//! at `y_j = (kr / x_c) exp((j - j_c) dlnx)`, treating `a` as periodic in
//! `ln x`. A power-law bias `q` can be used to tame the periodic wrap-around.

use std::f64::consts::PI;

use libm::{exp, sqrt};
use num_complex::Complex64;
use rustfft::FftDirection;

use crate::{
    error::{LssError, Result},
    fft::FftCache,
};

const LANCZOS_G: f64 = 7.0;
const LANCZOS: [f64; 9] = [
    0.999_999_999_999_809_9,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_1,
    -176.615_029_162_140_6,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_572e-6,
    1.505_632_735_149_311_6e-7,
];

/// Continuous branch of `ln Gamma(z)` for `Re z > 0`.
pub fn ln_gamma(z: Complex64) -> Complex64 {
    let z = z - 1.0;
    let mut x = Complex64::new(LANCZOS[0], 0.0);
    for (i, c) in LANCZOS.iter().enumerate().skip(1) {
        x += c / (z + i as f64);
    }
    let t = z + LANCZOS_G + 0.5;
    0.5 * (2.0 * PI).ln() + (z + 0.5) * t.ln() - t + x.ln()
}

/// `kr` adjusted by less than one sample so that the Nyquist coefficient is
/// real, which minimises ringing.
pub fn low_ringing_kr(mu: f64, q: f64, dlnr: f64, kr: f64) -> f64 {
    let xp = (mu + 1.0 + q) / 2.0;
    let xm = (mu + 1.0 - q) / 2.0;
    let y = PI / (2.0 * dlnr);
    let zp = ln_gamma(Complex64::new(xp, y));
    let zm = ln_gamma(Complex64::new(xm, y));
    let arg = (2.0 / kr).ln() / dlnr + (zp.im + zm.im) / PI;
    let iarg = arg.round();
    if arg != iarg {
        kr * exp((arg - iarg) * dlnr)
    } else {
        kr
    }
}

pub struct HankelPlan {
    pub n: usize,
    pub mu: f64,
    pub q: f64,
    pub dlnr: f64,
    pub kr: f64,
    /// `u_m` for `m = 0..=n/2`
    coeffs: Vec<Complex64>,
    fft: FftCache<f64>,
}

impl HankelPlan {
    pub fn new(n: usize, mu: f64, q: f64, dlnr: f64, kr: f64, kropt: bool) -> Result<Self> {
        if n < 2 {
            return Err(LssError::Configuration(format!(
                "Hankel transform needs at least two samples, got {}",
                n
            )));
        }
        if !(dlnr > 0.0) || !(kr > 0.0) {
            return Err(LssError::Configuration(format!(
                "invalid Hankel grid: dlnr = {}, kr = {}",
                dlnr, kr
            )));
        }
        if !(mu + 1.0 + q > 0.0 && q < 0.5 + f64::EPSILON) {
            return Err(LssError::Configuration(format!(
                "bias q = {} is outside the convergent range for mu = {}",
                q, mu
            )));
        }
        let kr = if kropt {
            low_ringing_kr(mu, q, dlnr, kr)
        } else {
            kr
        };
        let period = n as f64 * dlnr;
        let ln2kr = (2.0 / kr).ln();
        let coeffs = (0..=n / 2)
            .map(|m| {
                let y = PI * m as f64 / period;
                let zp = ln_gamma(Complex64::new((mu + 1.0 + q) / 2.0, y));
                let zm = ln_gamma(Complex64::new((mu + 1.0 - q) / 2.0, y));
                let amp = exp(q * 2f64.ln() + zp.re - zm.re);
                let phase = 2.0 * y * ln2kr + zp.im + zm.im;
                Complex64::from_polar(amp, phase) * exp(-q * kr.ln())
            })
            .collect();
        Ok(Self {
            n,
            mu,
            q,
            dlnr,
            kr,
            coeffs,
            fft: FftCache::new(),
        })
    }

    fn centre(&self) -> f64 {
        (self.n as f64 - 1.0) / 2.0
    }

    /// Sample positions for a grid centred on `centre`.
    pub fn input_grid(&self, centre: f64) -> Vec<f64> {
        let jc = self.centre();
        (0..self.n)
            .map(|j| centre * exp((j as f64 - jc) * self.dlnr))
            .collect()
    }

    /// Output positions matching an input grid centred on `centre`.
    pub fn output_grid(&self, centre: f64) -> Vec<f64> {
        self.input_grid(self.kr / centre)
    }

    pub fn transform(&self, a: &[f64]) -> Result<Vec<f64>> {
        let n = self.n;
        if a.len() != n {
            return Err(LssError::ShapeMismatch {
                name: "a".to_string(),
                got: vec![a.len()],
                expected: vec![n],
            });
        }
        let jc = self.centre();
        let mut data: Vec<Complex64> = a
            .iter()
            .enumerate()
            .map(|(j, v)| Complex64::new(v * exp(-self.q * (j as f64 - jc) * self.dlnr), 0.0))
            .collect();
        self.fft.process(&mut data, FftDirection::Forward);

        let mut spectrum = vec![Complex64::new(0.0, 0.0); n];
        let mmax = (n - 1) / 2;
        for m in 0..=mmax {
            let shift = Complex64::from_polar(1.0, 4.0 * PI * m as f64 * jc / n as f64);
            let u = self.coeffs[m];
            spectrum[m] = data[m] / n as f64 * u * shift;
            if m > 0 {
                spectrum[n - m] = data[n - m] / n as f64 * u.conj() * shift.conj();
            }
        }
        // the Nyquist term of an even-length transform is dropped
        self.fft.process(&mut spectrum, FftDirection::Forward);

        Ok(spectrum
            .iter()
            .enumerate()
            .map(|(j, v)| v.re * exp(-self.q * (j as f64 - jc) * self.dlnr))
            .collect())
    }
}

/// `xi(r) = 1 / (2 pi^2) int P(k) k^2 j_0(k r) dk` through the order-1/2
/// transform of `P(k) k^{3/2}`, sampled at `k`, returning `(r, xi)`.
pub fn power_to_correlation(plan: &HankelPlan, k_centre: f64, pk: &[f64]) -> Result<(Vec<f64>, Vec<f64>)> {
    let k = plan.input_grid(k_centre);
    let a: Vec<f64> = k.iter().zip(pk).map(|(k, p)| p * k * sqrt(*k)).collect();
    let r = plan.output_grid(k_centre);
    let t = plan.transform(&a)?;
    let norm = (2.0 * PI).powf(-1.5);
    let xi = r.iter().zip(&t).map(|(r, t)| norm * t / (r * sqrt(*r))).collect();
    Ok((r, xi))
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;
    use num_complex::Complex64;

    use super::*;

    #[test]
    fn ln_gamma_known_values() {
        assert_approx_eq!(ln_gamma(Complex64::new(1.0, 0.0)).re, 0.0, 1e-13);
        assert_approx_eq!(ln_gamma(Complex64::new(5.0, 0.0)).re, 24f64.ln(), 1e-12);
        assert_approx_eq!(ln_gamma(Complex64::new(0.5, 0.0)).re, PI.sqrt().ln(), 1e-13);
        // |Gamma(1/2 + iy)|^2 = pi / cosh(pi y)
        let y = 3.0;
        let z = ln_gamma(Complex64::new(0.5, y));
        assert_approx_eq!(2.0 * z.re, (PI / (PI * y).cosh()).ln(), 1e-11);
        // conjugate symmetry
        let w = ln_gamma(Complex64::new(0.75, -2.0));
        let v = ln_gamma(Complex64::new(0.75, 2.0));
        assert_approx_eq!(w.im, -v.im, 1e-12);
    }

    #[test]
    fn gaussian_is_self_reciprocal() -> anyhow::Result<()> {
        // int_0^inf k^{mu+1} e^{-k^2/2} J_mu(k r) r dk = r^{mu+1} e^{-r^2/2}
        let mu = 0.5;
        let n = 512;
        let plan = HankelPlan::new(n, mu, 0.0, 0.05, 1.0, false)?;
        let x = plan.input_grid(1.0);
        let a: Vec<f64> = x.iter().map(|x| x.powf(mu + 1.0) * (-x * x / 2.0).exp()).collect();
        let out = plan.transform(&a)?;
        let y = plan.output_grid(1.0);
        for (y, v) in y.iter().zip(&out) {
            if *y > 0.05 && *y < 5.0 {
                let expected = y.powf(mu + 1.0) * (-y * y / 2.0).exp();
                assert_approx_eq!(*v, expected, 1e-6);
            }
        }
        Ok(())
    }

    #[test]
    fn low_ringing_kr_is_close() {
        let kr = low_ringing_kr(0.5, 0.0, 0.01, 1.0);
        assert!((kr.ln()).abs() <= 0.01);
    }

    #[test]
    fn gaussian_power_spectrum_correlation() -> anyhow::Result<()> {
        // P(k) = exp(-k^2 s^2 / 2) gives xi(r) = (2 pi s^2)^{-3/2} exp(-r^2 / 2 s^2)
        let s = 2.0;
        let n = 1024;
        let plan = HankelPlan::new(n, 0.5, 0.0, 0.03, 1.0, true)?;
        let k = plan.input_grid(0.5);
        let pk: Vec<f64> = k.iter().map(|k| (-k * k * s * s / 2.0).exp()).collect();
        let (r, xi) = power_to_correlation(&plan, 0.5, &pk)?;
        let norm = (2.0 * PI * s * s).powf(-1.5);
        for (r, xi) in r.iter().zip(&xi) {
            if *r > 0.2 && *r < 6.0 {
                let expected = norm * (-r * r / (2.0 * s * s)).exp();
                assert_approx_eq!(*xi, expected, 1e-7);
            }
        }
        Ok(())
    }
}
