use libm::{erf, exp, sqrt};
use ndarray::{Array2, ArrayView1, ArrayView2, ArrayView3, Axis};
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::{
    error::{LssError, Result, assert_shape},
    healpix::{Pixelization, angular_distance, displace},
};

/// Where one displaced cell deposits its mass. Negative weights mark
/// contributions that fall outside the grid.
struct Deposit<const P: usize, const R: usize> {
    pixels: [usize; P],
    pixel_weights: [f64; P],
    shells: [isize; R],
    shell_weights: [f64; R],
}

/// Final angular positions after displacing every pixel centre by
/// `(dtheta, dphi)`.
pub fn calculate_positions<P: Pixelization>(
    pix: &P,
    dtheta: ArrayView1<f64>,
    dphi: ArrayView1<f64>,
) -> Vec<(f64, f64)> {
    (0..pix.npix())
        .map(|p| {
            let (theta, phi) = pix.pix2ang(p);
            displace(theta, phi, dtheta[p], dphi[p])
        })
        .collect()
}

fn check_shapes(psi: ArrayView3<f64>, delta_bias: ArrayView2<f64>, delta_m: ArrayView2<f64>, chi: &[f64]) -> Result<(usize, usize)> {
    let (nchi, npix) = delta_bias.dim();
    assert_shape("psi", psi.shape(), &[3, nchi, npix])?;
    assert_shape("delta_m", delta_m.shape(), &[nchi, npix])?;
    assert_shape("chi", &[chi.len()], &[nchi])?;
    if nchi < 2 {
        return Err(LssError::Configuration(
            "mass assignment needs at least two radial shells".to_string(),
        ));
    }
    Ok((nchi, npix))
}

fn increasing(chi: &[f64]) -> bool {
    chi[chi.len() - 1] > chi[0]
}

/// Index `j` with `bins[j - 1] <= x < bins[j]` for increasing bins, or
/// `bins[j - 1] > x >= bins[j]` for decreasing ones.
fn digitize(bins: &[f64], x: f64) -> usize {
    if increasing(bins) {
        bins.partition_point(|v| *v <= x)
    } else {
        bins.partition_point(|v| *v > x)
    }
}

fn nearest_shell(chi: &[f64], x: f64) -> usize {
    let j = digitize(chi, x);
    if j == 0 {
        0
    } else if j >= chi.len() {
        chi.len() - 1
    } else if (x - chi[j - 1]).abs() <= (chi[j] - x).abs() {
        j - 1
    } else {
        j
    }
}

/// Spread the mass `1 + delta` of every cell of one shell into `out`, each
/// particle normalised to unit total weight over the cells it reaches.
fn bin_delta<const P: usize, const R: usize>(density: ArrayView1<f64>, deposits: &[Deposit<P, R>], out: &mut Array2<f64>) {
    let nchi = out.len_of(Axis(0)) as isize;
    for (mass, d) in density.iter().zip(deposits) {
        let valid = |k: usize| d.shells[k] >= 0 && d.shells[k] < nchi && d.shell_weights[k] >= 0.0;
        let radial: f64 = (0..R).filter(|k| valid(*k)).map(|k| d.shell_weights[k]).sum();
        let angular: f64 = d.pixel_weights.iter().sum();
        let total = radial * angular;
        if !(total > 0.0) {
            continue;
        }
        for k in (0..R).filter(|k| valid(*k)) {
            let r = d.shells[k] as usize;
            let wr = mass * d.shell_weights[k] / total;
            for (pix, wp) in d.pixels.iter().zip(&d.pixel_weights) {
                out[[r, *pix]] += wr * wp;
            }
        }
    }
}

/// Zel'dovich density by moving every cell as a point and sharing its mass
/// bilinearly between the four surrounding pixels and linearly between the
/// two surrounding shells.
///
/// The change in volume of the displaced cells is ignored, so this does not
/// conserve volume near strongly distorted pixels.
pub fn za_density_grid<P: Pixelization>(
    pix: &P,
    psi: ArrayView3<f64>,
    delta_bias: ArrayView2<f64>,
    delta_m: ArrayView2<f64>,
    chi: &[f64],
) -> Result<Array2<f64>> {
    let (nchi, npix) = check_shapes(psi, delta_bias, delta_m, chi)?;
    assert_shape("delta", &[npix], &[pix.npix()])?;

    // one extra cell at each end to interpolate across the boundaries
    let mut chi_ext = Vec::with_capacity(nchi + 2);
    chi_ext.push(chi[0] - (chi[1] - chi[0]));
    chi_ext.extend_from_slice(chi);
    chi_ext.push(chi[nchi - 1] + (chi[nchi - 1] - chi[nchi - 2]));
    let next = nchi + 2;

    let mut out = Array2::zeros((nchi, npix));
    for ii in 0..nchi {
        let angpos = calculate_positions(pix, psi.slice(ndarray::s![1, ii, ..]), psi.slice(ndarray::s![2, ii, ..]));
        let deposits: Vec<Deposit<4, 2>> = (0..npix)
            .into_par_iter()
            .map(|p| {
                let (theta, phi) = angpos[p];
                let (pixels, pixel_weights) = pix.interp_weights(theta, phi);
                let new_chi = chi[ii] + psi[[0, ii, p]];
                let j = digitize(&chi_ext, new_chi);
                let chi0 = chi_ext[(j + next - 1) % next];
                let chi1 = chi_ext[j % next];
                let dchi = chi1 - chi0;
                Deposit {
                    pixels,
                    pixel_weights,
                    shells: [j as isize - 2, j as isize - 1],
                    shell_weights: [((chi1 - new_chi) / dchi).abs(), ((new_chi - chi0) / dchi).abs()],
                }
            })
            .collect();
        bin_delta(delta_bias.row(ii).mapv(|d| 1.0 + d).view(), &deposits, &mut out);
    }
    out.mapv_inplace(|v| v - 1.0);
    Ok(out)
}

/// Probability mass of `N(mu, sigma^2)` inside `[a, b]`.
fn gaussian_overlap(mu: f64, sigma: f64, a: f64, b: f64) -> f64 {
    let s = sigma * sqrt(2.0);
    0.5 * (erf((b - mu) / s) - erf((a - mu) / s)).abs()
}

/// Zel'dovich density treating every cell as a Gaussian cloud whose size
/// follows the local matter density, truncated to the pixel and its
/// neighbours and to the three nearest shells.
pub fn za_density_sph<P: Pixelization>(
    pix: &P,
    psi: ArrayView3<f64>,
    delta_bias: ArrayView2<f64>,
    delta_m: ArrayView2<f64>,
    chi: &[f64],
) -> Result<Array2<f64>> {
    let (nchi, npix) = check_shapes(psi, delta_bias, delta_m, chi)?;
    assert_shape("delta", &[npix], &[pix.npix()])?;

    // nominal smoothing scales at mean density
    let sigma_chi = chi.windows(2).map(|w| (w[1] - w[0]).abs()).sum::<f64>() / (nchi - 1) as f64 / 2.0;
    let sigma_ang = pix.resolution() / 2.0;

    // shell edges at the mid points, extended by half a spacing at the ends
    let mut edges = Vec::with_capacity(nchi + 1);
    edges.push(chi[0] - (chi[1] - chi[0]) / 2.0);
    edges.extend(chi.windows(2).map(|w| (w[0] + w[1]) / 2.0));
    edges.push(chi[nchi - 1] + (chi[nchi - 1] - chi[nchi - 2]) / 2.0);

    let mut out = Array2::zeros((nchi, npix));
    for ii in 0..nchi {
        let angpos = calculate_positions(pix, psi.slice(ndarray::s![1, ii, ..]), psi.slice(ndarray::s![2, ii, ..]));
        let deposits: Vec<Deposit<9, 3>> = (0..npix)
            .into_par_iter()
            .map(|p| {
                // compressed particles shrink, rarefied ones grow, within bounds
                let scaling = (1.0 + delta_m[[ii, p]]).clamp(0.1, 3.0).powf(-1.0 / 3.0);
                let (theta, phi) = angpos[p];
                let vec = pix.ang2vec(theta, phi);
                let centre = pix.ang2pix(theta, phi);
                let mut pixels = [centre; 9];
                pixels[1..].copy_from_slice(&pix.neighbours(centre));
                let s_ang = sigma_ang * scaling;
                let pixel_weights = pixels.map(|q| {
                    let d = angular_distance(&vec, &pix.pix2vec(q));
                    exp(-d * d / (2.0 * s_ang * s_ang))
                });

                let new_chi = chi[ii] + psi[[0, ii, p]];
                let c = nearest_shell(chi, new_chi) as isize;
                let s_chi = sigma_chi * scaling;
                let shells = [c - 1, c, c + 1];
                let shell_weights = shells.map(|k| {
                    if k < 0 || k >= nchi as isize {
                        -1.0
                    } else {
                        let k = k as usize;
                        gaussian_overlap(new_chi, s_chi, edges[k], edges[k + 1])
                    }
                });
                Deposit {
                    pixels,
                    pixel_weights,
                    shells,
                    shell_weights,
                }
            })
            .collect();
        bin_delta(delta_bias.row(ii).mapv(|d| 1.0 + d).view(), &deposits, &mut out);
    }
    out.mapv_inplace(|v| v - 1.0);
    Ok(out)
}
