use std::ops::{Div, Mul, Sub};

use libm::cos;
use ndarray::{Array, Array2, ArrayView, ArrayView1, Axis, Dimension, RemoveAxis};

use crate::error::{LssError, Result};

fn extrapolation_table<T>(estimates: &[T], t: f64, base_pow: i32) -> Vec<Vec<T>>
where
    T: Clone + Sub<T, Output = T> + Mul<f64, Output = T> + Div<f64, Output = T>,
{
    let mut table: Vec<Vec<T>> = Vec::with_capacity(estimates.len());
    for (row, estimate) in estimates.iter().enumerate() {
        let mut new_row = vec![estimate.clone()];
        for col in 1..=row {
            let tn = t.powi(col as i32 * base_pow);
            let r = (new_row[col - 1].clone() * tn - table[row - 1][col - 1].clone()) / (tn - 1.0);
            new_row.push(r);
        }
        table.push(new_row);
    }
    table
}

/// Full Richardson table for `estimates` whose step size shrinks by `t` per
/// entry and whose error series has powers `base_pow`, `2 base_pow`, ...
pub fn richardson_table<T>(estimates: &[T], t: f64, base_pow: i32) -> Result<Vec<Vec<T>>>
where
    T: Clone + Sub<T, Output = T> + Mul<f64, Output = T> + Div<f64, Output = T>,
{
    if !(t > 1.0) {
        return Err(LssError::Configuration(format!(
            "Richardson step ratio must exceed 1, got {}",
            t
        )));
    }
    if base_pow < 1 {
        return Err(LssError::Configuration(format!(
            "Richardson error power must be positive, got {}",
            base_pow
        )));
    }
    Ok(extrapolation_table(estimates, t, base_pow))
}

/// Apex of the Richardson table.
pub fn richardson<T>(estimates: &[T], t: f64, base_pow: i32) -> Result<T>
where
    T: Clone + Sub<T, Output = T> + Mul<f64, Output = T> + Div<f64, Output = T>,
{
    let mut table = richardson_table(estimates, t, base_pow)?;
    table
        .pop()
        .and_then(|mut row| row.pop())
        .ok_or_else(|| LssError::Configuration("no estimates to extrapolate".to_string()))
}

fn romberg_order(samples: usize) -> Result<u32> {
    let intervals = samples.saturating_sub(1);
    if intervals == 0 || !intervals.is_power_of_two() {
        return Err(LssError::Configuration(format!(
            "Romberg integration needs 2^k + 1 samples, got {}",
            samples
        )));
    }
    Ok(intervals.trailing_zeros())
}

fn romberg(order: u32, dx: f64, y: impl Fn(usize) -> f64) -> f64 {
    let intervals = 1usize << order;
    let mut h = intervals as f64 * dx;
    let mut trapezoid = Vec::with_capacity(order as usize + 1);
    trapezoid.push((y(0) + y(intervals)) / 2.0 * h);
    let mut step = intervals;
    for i in 1..=order as usize {
        let start = step >> 1;
        let added: f64 = (start..intervals).step_by(step).map(&y).sum();
        trapezoid.push(0.5 * (trapezoid[i - 1] + h * added));
        step >>= 1;
        h /= 2.0;
    }
    let table = extrapolation_table(&trapezoid, 2.0, 2);
    table[order as usize][order as usize]
}

/// Romberg integration of equally spaced samples (`2^k + 1` of them).
pub fn romb(y: ArrayView1<f64>, dx: f64) -> Result<f64> {
    let k = romberg_order(y.len())?;
    Ok(romberg(k, dx, |i| y[i]))
}

/// Romberg integration of `f(0), f(1), ..., f(2^order)` spaced by `dx`.
/// The sample count is valid by construction, so this cannot fail.
pub fn romb_fn(order: u32, dx: f64, f: impl Fn(usize) -> f64) -> f64 {
    let y: Vec<f64> = (0..=1usize << order).map(f).collect();
    romberg(order, dx, |i| y[i])
}

/// [`romb`] along one axis of an array.
pub fn romb_axis<D>(a: ArrayView<f64, D>, axis: Axis, dx: f64) -> Result<Array<f64, D::Smaller>>
where
    D: Dimension + RemoveAxis,
{
    romberg_order(a.len_of(axis))?;
    let mut err = None;
    let out = a.map_axis(axis, |lane| match romb(lane, dx) {
        Ok(v) => v,
        Err(e) => {
            err = Some(e);
            f64::NAN
        }
    });
    match err {
        Some(e) => Err(e),
        None => Ok(out),
    }
}

/// Gauss-Legendre nodes and weights on [-1, 1], nodes ascending.
pub fn gauss_legendre(n: usize) -> (Vec<f64>, Vec<f64>) {
    let mut nodes = vec![0.0; n];
    let mut weights = vec![0.0; n];
    let nf = n as f64;
    for i in 0..n.div_ceil(2) {
        let mut x = cos(std::f64::consts::PI * (i as f64 + 0.75) / (nf + 0.5));
        for _ in 0..100 {
            let (p, d) = legendre_with_derivative(n, x);
            let dx = p / d;
            x -= dx;
            if dx.abs() < 1e-15 {
                break;
            }
        }
        let (_, dp) = legendre_with_derivative(n, x);
        let w = 2.0 / ((1.0 - x * x) * dp * dp);
        nodes[i] = -x;
        nodes[n - 1 - i] = x;
        weights[i] = w;
        weights[n - 1 - i] = w;
    }
    (nodes, weights)
}

fn legendre_with_derivative(n: usize, x: f64) -> (f64, f64) {
    let mut p0 = 1.0;
    let mut p1 = x;
    if n == 0 {
        return (1.0, 0.0);
    }
    for l in 2..=n {
        let lf = l as f64;
        let p2 = ((2.0 * lf - 1.0) * x * p1 - (lf - 1.0) * p0) / lf;
        p0 = p1;
        p1 = p2;
    }
    let nf = n as f64;
    (p1, nf * (x * p1 - p0) / (x * x - 1.0))
}

/// Legendre polynomials `P_l(mu)` for `l <= lmax`, shaped `(lmax + 1, mu.len())`.
pub fn legendre_array(lmax: usize, mu: &[f64]) -> Array2<f64> {
    let mut out = Array2::zeros((lmax + 1, mu.len()));
    for (j, &x) in mu.iter().enumerate() {
        out[[0, j]] = 1.0;
        if lmax >= 1 {
            out[[1, j]] = x;
        }
        for l in 2..=lmax {
            let lf = l as f64;
            out[[l, j]] = ((2.0 * lf - 1.0) * x * out[[l - 1, j]] - (lf - 1.0) * out[[l - 2, j]]) / lf;
        }
    }
    out
}

/// Near-equal contiguous batches, `sections` of them, as numpy's `array_split`.
pub fn split_even(len: usize, sections: usize) -> Vec<std::ops::Range<usize>> {
    let sections = sections.max(1);
    let base = len / sections;
    let extra = len % sections;
    let mut start = 0;
    (0..sections)
        .map(|i| {
            let size = base + usize::from(i < extra);
            let r = start..start + size;
            start += size;
            r
        })
        .collect()
}
