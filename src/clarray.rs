use std::f64::consts::PI;

use log::debug;
use ndarray::{Array2, Array3, Axis, s};
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::{
    error::{LssError, Result},
    integrate::{gauss_legendre, legendre_array, romb_axis, split_even},
    util::linspace,
};

/// Quadrature nodes evaluated together; bounds the size of the intermediate
/// correlation tensor.
const NODE_BATCH: usize = 50;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClArrayParams {
    /// Romberg order of the integral across each radial bin, 0 disables it
    pub xromb: u32,
    /// full radial bin width; taken from the two closest-in-order shells if absent
    pub xwidth: Option<f64>,
    /// Gauss-Legendre nodes per multipole
    pub q: usize,
}

impl Default for ClArrayParams {
    fn default() -> Self {
        Self {
            xromb: 3,
            xwidth: None,
            q: 2,
        }
    }
}

/// `C_l(chi_1, chi_2)` for `0 <= l <= lmax` from a real space correlation
/// function, shaped `(lmax + 1, n, n)`.
pub fn corr_to_clarray(
    corr: &(impl Fn(f64) -> f64 + Sync),
    lmax: usize,
    xarray: &[f64],
    params: &ClArrayParams,
) -> Result<Array3<f64>> {
    if params.q == 0 {
        return Err(LssError::Configuration("clarray needs q >= 1".to_string()));
    }
    let xlen = xarray.len();
    if xlen == 0 {
        return Err(LssError::ShapeMismatch {
            name: "xarray".to_string(),
            got: vec![0],
            expected: vec![1],
        });
    }
    let m = (params.q * lmax).max(1);
    let (mu, w) = gauss_legendre(m);
    let wsum: f64 = w.iter().sum();

    let (xa, xint, xspace, xhalf) = if params.xromb > 0 {
        let xhalf = match params.xwidth {
            Some(width) => width / 2.0,
            None => {
                if xlen < 2 {
                    return Err(LssError::Configuration(
                        "bin width cannot be inferred from a single shell, set xwidth".to_string(),
                    ));
                }
                let mut xsort = xarray.to_vec();
                xsort.sort_by(f64::total_cmp);
                (xsort[1] - xsort[0]).abs() / 2.0
            }
        };
        let xint = (1usize << params.xromb) + 1;
        let offsets = linspace(-xhalf, xhalf, xint, true);
        let xa: Vec<f64> = xarray
            .iter()
            .flat_map(|x| offsets.iter().map(move |o| x + o))
            .collect();
        (xa, xint, 2.0 * xhalf / (1usize << params.xromb) as f64, xhalf)
    } else {
        (xarray.to_vec(), 1, 0.0, 0.0)
    };
    let na = xa.len();

    let mut corr_array = Array3::zeros((m, xlen, xlen));
    let batches = split_even(m, (m / NODE_BATCH).max(1));
    debug!("clarray: {} nodes in {} batches over {} distances", m, batches.len(), na);
    for batch in batches {
        let start = batch.start;
        let slices: Vec<Result<Array2<f64>>> = batch
            .into_par_iter()
            .map(|node| {
                let mu = mu[node];
                let c = Array2::from_shape_fn((na, na), |(i, j)| {
                    let (x1, x2) = (xa[i], xa[j]);
                    corr(((x1 - x2) * (x1 - x2) + 2.0 * x1 * x2 * (1.0 - mu)).sqrt())
                });
                if params.xromb == 0 {
                    return Ok(c);
                }
                let c = c
                    .into_shape_with_order((xlen, xint, xlen, xint))
                    .map_err(|e| LssError::Consistency(format!("radial sub-grid reshape: {}", e)))?;
                let c = romb_axis(c.view(), Axis(3), xspace)?;
                let c = romb_axis(c.view(), Axis(1), xspace)?;
                Ok(c / (4.0 * xhalf * xhalf))
            })
            .collect();
        for (offset, slice) in slices.into_iter().enumerate() {
            corr_array.slice_mut(s![start + offset, .., ..]).assign(&slice?);
        }
    }

    let mut lm = legendre_array(lmax, &mu);
    for mut row in lm.rows_mut() {
        for (v, w) in row.iter_mut().zip(&w) {
            *v *= w * 4.0 * PI / wsum;
        }
    }
    let flat = corr_array
        .into_shape_with_order((m, xlen * xlen))
        .map_err(|e| LssError::Consistency(format!("correlation tensor reshape: {}", e)))?;
    lm.dot(&flat)
        .into_shape_with_order((lmax + 1, xlen, xlen))
        .map_err(|e| LssError::Consistency(format!("clarray reshape: {}", e)))
}
