use log::debug;
use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array2, ArrayView3, Axis};
use num_complex::Complex64;
use random::Source;

use crate::{
    error::{LssError, Result},
    healpix::{Healpix, Pixelization},
    sht::{Alm, alm2map},
    util::Gaussian,
};

/// Draws jointly correlated Gaussian maps from a per-multipole covariance.
pub trait SkyRealizer {
    /// `cla` is shaped `(lmax + 1, n, n)`; the result is `(n, npix)`.
    fn realize<S: Source>(&self, cla: ArrayView3<f64>, rand: &mut Gaussian<S>) -> Result<Array2<f64>>;
}

pub struct HarmonicRealizer {
    pub pixelization: Healpix,
}

impl HarmonicRealizer {
    pub fn new(nside: usize) -> Result<Self> {
        Ok(Self {
            pixelization: Healpix::new(nside)?,
        })
    }
}

/// `V sqrt(max(lambda, 0))` of a symmetric matrix.
fn matrix_root(c: DMatrix<f64>) -> DMatrix<f64> {
    let eigen = SymmetricEigen::new(c);
    let mut v = eigen.eigenvectors;
    for (j, lambda) in eigen.eigenvalues.iter().enumerate() {
        let s = lambda.max(0.0).sqrt();
        v.column_mut(j).scale_mut(s);
    }
    v
}

impl SkyRealizer for HarmonicRealizer {
    fn realize<S: Source>(&self, cla: ArrayView3<f64>, rand: &mut Gaussian<S>) -> Result<Array2<f64>> {
        let (nl, n, n2) = cla.dim();
        if n != n2 || nl == 0 {
            return Err(LssError::ShapeMismatch {
                name: "cla".to_string(),
                got: cla.shape().to_vec(),
                expected: vec![nl.max(1), n, n],
            });
        }
        let lmax = nl - 1;
        let mut alms = vec![Alm::zeros(lmax); n];
        for (l, cl) in cla.axis_iter(Axis(0)).enumerate() {
            for i in 0..n {
                for j in 0..i {
                    if (cl[[i, j]] - cl[[j, i]]).abs() > 1e-8 * (cl[[i, i]].abs() + cl[[j, j]].abs()) {
                        return Err(LssError::Consistency(format!(
                            "covariance at l = {} is not symmetric in ({}, {})",
                            l, i, j
                        )));
                    }
                }
            }
            let root = matrix_root(DMatrix::from_fn(n, n, |i, j| cl[[i, j]]));
            for m in 0..=l {
                let z: Vec<Complex64> = (0..n)
                    .map(|_| {
                        if m == 0 {
                            Complex64::new(rand.sample(), 0.0)
                        } else {
                            rand.sample_complex()
                        }
                    })
                    .collect();
                for (i, alm) in alms.iter_mut().enumerate() {
                    let v: Complex64 = (0..n).map(|j| z[j] * root[(i, j)]).sum();
                    alm.set(l, m, v);
                }
            }
        }
        debug!("synthesising {} correlated maps up to l = {}", n, lmax);
        let hp = &self.pixelization;
        let mut out = Array2::zeros((n, hp.npix()));
        for (mut row, alm) in out.outer_iter_mut().zip(&alms) {
            row.assign(&alm2map(hp, alm));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;
    use ndarray::Array3;

    use super::*;

    #[test]
    fn matrix_root_reproduces_covariance() {
        let c = DMatrix::from_row_slice(3, 3, &[2.0, 0.5, 0.1, 0.5, 1.0, 0.2, 0.1, 0.2, 0.5]);
        let r = matrix_root(c.clone());
        let back = &r * r.transpose();
        for (a, b) in back.iter().zip(c.iter()) {
            assert_approx_eq!(a, b, 1e-12);
        }
        // a negative eigenvalue is clipped rather than producing NaN
        let bad = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
        assert!(matrix_root(bad).iter().all(|v| v.is_finite()));
    }

    #[test]
    fn fully_correlated_maps() -> anyhow::Result<()> {
        let realizer = HarmonicRealizer::new(4)?;
        let lmax = 11;
        let mut cla = Array3::zeros((lmax + 1, 2, 2));
        for l in 1..=lmax {
            let cl = 1.0 / (l * l) as f64;
            // second map is exactly twice the first
            cla[[l, 0, 0]] = cl;
            cla[[l, 0, 1]] = 2.0 * cl;
            cla[[l, 1, 0]] = 2.0 * cl;
            cla[[l, 1, 1]] = 4.0 * cl;
        }
        let mut rand = Gaussian::new(random::default(7));
        let maps = realizer.realize(cla.view(), &mut rand)?;
        assert_eq!(maps.shape(), &[2, 192]);
        let scale = maps.row(0).iter().map(|v| v.abs()).fold(0.0, f64::max);
        assert!(scale > 0.0);
        for (a, b) in maps.row(0).iter().zip(maps.row(1)) {
            assert_approx_eq!(2.0 * a, b, 1e-5 * scale);
        }
        Ok(())
    }

    #[test]
    fn same_seed_same_maps() -> anyhow::Result<()> {
        let realizer = HarmonicRealizer::new(2)?;
        let mut cla = Array3::zeros((6, 1, 1));
        cla.slice_mut(ndarray::s![.., 0, 0]).fill(0.5);
        let a = realizer.realize(cla.view(), &mut Gaussian::new(random::default(3)))?;
        let b = realizer.realize(cla.view(), &mut Gaussian::new(random::default(3)))?;
        assert_eq!(a, b);
        assert!(realizer.realize(Array3::<f64>::zeros((6, 1, 2)).view(), &mut Gaussian::new(random::default(3))).is_err());
        Ok(())
    }
}
