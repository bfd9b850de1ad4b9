use std::f64::consts::{FRAC_PI_2, PI};

use libm::{acos, atan2, cos, sin, sqrt};

use crate::error::{LssError, Result};

/// Equal-area spherical pixelization used by the mass assignment schemes.
pub trait Pixelization: Sync {
    fn nside(&self) -> usize;
    fn npix(&self) -> usize;
    /// `(theta, phi)` of the pixel centre
    fn pix2ang(&self, pix: usize) -> (f64, f64);
    fn ang2pix(&self, theta: f64, phi: f64) -> usize;
    /// Indices of the eight pixels surrounding `pix`.
    fn neighbours(&self, pix: usize) -> [usize; 8];
    /// Four pixels and bilinear weights (summing to one) for a position.
    fn interp_weights(&self, theta: f64, phi: f64) -> ([usize; 4], [f64; 4]);

    fn ang2vec(&self, theta: f64, phi: f64) -> [f64; 3] {
        ang2vec(theta, phi)
    }
    fn pix2vec(&self, pix: usize) -> [f64; 3] {
        let (theta, phi) = self.pix2ang(pix);
        ang2vec(theta, phi)
    }
    fn pixel_area(&self) -> f64 {
        4.0 * PI / self.npix() as f64
    }
    fn resolution(&self) -> f64 {
        sqrt(self.pixel_area())
    }
}

pub fn ang2vec(theta: f64, phi: f64) -> [f64; 3] {
    let st = sin(theta);
    [st * cos(phi), st * sin(phi), cos(theta)]
}

pub fn angular_distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    let cross = [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ];
    let s = sqrt(cross[0] * cross[0] + cross[1] * cross[1] + cross[2] * cross[2]);
    let c = a[0] * b[0] + a[1] * b[1] + a[2] * b[2];
    atan2(s, c)
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RingInfo {
    pub start: usize,
    pub len: usize,
    pub theta: f64,
    /// pixel centres are offset by half a pixel in phi
    pub shifted: bool,
}

impl RingInfo {
    pub fn phi0(&self) -> f64 {
        if self.shifted {
            PI / self.len as f64
        } else {
            0.0
        }
    }
}

/// HEALPix in the RING ordering.
#[derive(Clone, Debug, PartialEq)]
pub struct Healpix {
    nside: usize,
    npix: usize,
    ncap: usize,
}

fn isqrt(v: usize) -> usize {
    let mut r = sqrt(v as f64) as usize;
    while r * r > v {
        r -= 1;
    }
    while (r + 1) * (r + 1) <= v {
        r += 1;
    }
    r
}

impl Healpix {
    pub fn new(nside: usize) -> Result<Self> {
        if nside == 0 {
            return Err(LssError::Configuration("nside must be positive".to_string()));
        }
        Ok(Self {
            nside,
            npix: 12 * nside * nside,
            ncap: 2 * nside * (nside - 1),
        })
    }

    pub fn from_npix(npix: usize) -> Result<Self> {
        let nside = isqrt(npix / 12);
        if nside == 0 || 12 * nside * nside != npix {
            return Err(LssError::Configuration(format!(
                "{} is not a valid HEALPix pixel count",
                npix
            )));
        }
        Self::new(nside)
    }

    pub fn lmax(&self) -> usize {
        3 * self.nside - 1
    }

    pub fn num_rings(&self) -> usize {
        4 * self.nside - 1
    }

    /// Geometry of ring `ring` (1-based, north to south).
    pub fn ring_info(&self, ring: usize) -> RingInfo {
        let nside = self.nside;
        let north = if ring > 2 * nside { 4 * nside - ring } else { ring };
        let (mut start, len, mut theta, shifted) = if north < nside {
            let tmp = (north * north) as f64 * 4.0 / self.npix as f64;
            (
                2 * north * (north - 1),
                4 * north,
                atan2(sqrt(tmp * (2.0 - tmp)), 1.0 - tmp),
                true,
            )
        } else {
            (
                self.ncap + (north - nside) * 4 * nside,
                4 * nside,
                acos((2 * nside - north) as f64 * 2.0 / (3 * nside) as f64),
                (north - nside) & 1 == 0,
            )
        };
        if north != ring {
            theta = PI - theta;
            start = self.npix - start - len;
        }
        RingInfo {
            start,
            len,
            theta,
            shifted,
        }
    }

    /// Ring of `pix` and its index within the ring, both from the pixel number.
    fn pix2ring(&self, pix: usize) -> (usize, usize) {
        let nside = self.nside;
        if pix < self.ncap {
            let ring = (1 + isqrt(1 + 2 * pix)) >> 1;
            (ring, pix - 2 * ring * (ring - 1))
        } else if pix < self.npix - self.ncap {
            let ip = pix - self.ncap;
            (ip / (4 * nside) + nside, ip % (4 * nside))
        } else {
            let ip = self.npix - pix;
            let ring = (1 + isqrt(2 * ip - 1)) >> 1;
            let start = self.npix - 2 * ring * (ring + 1);
            (4 * nside - ring, pix - start)
        }
    }

    /// Ring directly north of colatitude `cos(theta) = z` (0 above the first ring).
    fn ring_above(&self, z: f64) -> usize {
        let nside = self.nside as f64;
        let az = z.abs();
        if az <= 2.0 / 3.0 {
            return (nside * (2.0 - 1.5 * z)) as usize;
        }
        let iring = (nside * sqrt(3.0 * (1.0 - az))) as usize;
        if z > 0.0 { iring } else { 4 * self.nside - iring - 1 }
    }

    /// Two pixels of `ring` bracketing `phi`, with the weight of the first.
    fn ring_bracket(&self, ring: usize, phi: f64) -> (usize, usize, f64, f64) {
        let info = self.ring_info(ring);
        let dphi = 2.0 * PI / info.len as f64;
        let shift = if info.shifted { 0.5 } else { 0.0 };
        let tmp = phi / dphi - shift;
        let i1f = tmp.floor();
        let w1 = tmp - i1f;
        let len = info.len as i64;
        let i1 = (i1f as i64).rem_euclid(len) as usize;
        let i2 = (i1f as i64 + 1).rem_euclid(len) as usize;
        (info.start + i1, info.start + i2, 1.0 - w1, info.theta)
    }
}

impl Pixelization for Healpix {
    fn nside(&self) -> usize {
        self.nside
    }

    fn npix(&self) -> usize {
        self.npix
    }

    fn pix2ang(&self, pix: usize) -> (f64, f64) {
        let (ring, i) = self.pix2ring(pix);
        let info = self.ring_info(ring);
        let phi = info.phi0() + 2.0 * PI * i as f64 / info.len as f64;
        (info.theta, phi)
    }

    fn ang2pix(&self, theta: f64, phi: f64) -> usize {
        let nside = self.nside as f64;
        let nl4 = 4 * self.nside as i64;
        let z = cos(theta);
        let za = z.abs();
        let tt = (phi / FRAC_PI_2).rem_euclid(4.0);
        if za <= 2.0 / 3.0 {
            let temp1 = nside * (0.5 + tt);
            let temp2 = nside * z * 0.75;
            let jp = (temp1 - temp2) as i64;
            let jm = (temp1 + temp2) as i64;
            let ir = self.nside as i64 + 1 + jp - jm;
            let kshift = 1 - (ir & 1);
            let t1 = jp + jm - self.nside as i64 + kshift + 1 + 2 * nl4;
            let ip = (t1 / 2) % nl4;
            (self.ncap as i64 + (ir - 1) * nl4 + ip) as usize
        } else {
            let tp = tt - tt.floor();
            let tmp = nside * sqrt(3.0 * (1.0 - za));
            let jp = (tp * tmp) as i64;
            let jm = ((1.0 - tp) * tmp) as i64;
            let ir = jp + jm + 1;
            let ip = ((tt * ir as f64) as i64).rem_euclid(4 * ir);
            if z > 0.0 {
                (2 * ir * (ir - 1) + ip) as usize
            } else {
                (self.npix as i64 - 2 * ir * (ir + 1) + ip) as usize
            }
        }
    }

    fn neighbours(&self, pix: usize) -> [usize; 8] {
        // the eight nearest centres taken from the two rings on either side
        let (ring, _) = self.pix2ring(pix);
        let centre = self.pix2vec(pix);
        let (_, phi) = self.pix2ang(pix);
        let first = ring.saturating_sub(2).max(1);
        let last = (ring + 2).min(self.num_rings());
        let mut candidates: Vec<(f64, usize)> = Vec::with_capacity(40);
        for r in first..=last {
            let info = self.ring_info(r);
            let dphi = 2.0 * PI / info.len as f64;
            let nearest = ((phi - info.phi0()) / dphi).round() as i64;
            let len = info.len as i64;
            let span = 3.min((len - 1) / 2);
            for off in -span..=span {
                let p = info.start + (nearest + off).rem_euclid(len) as usize;
                if p != pix && !candidates.iter().any(|(_, q)| *q == p) {
                    candidates.push((angular_distance(&centre, &self.pix2vec(p)), p));
                }
            }
        }
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        let mut ret = [pix; 8];
        for (slot, (_, p)) in ret.iter_mut().zip(candidates) {
            *slot = p;
        }
        ret
    }

    fn interp_weights(&self, theta: f64, phi: f64) -> ([usize; 4], [f64; 4]) {
        let nrings = 4 * self.nside;
        let z = cos(theta);
        let ir1 = self.ring_above(z);
        let ir2 = ir1 + 1;
        let mut pix = [0usize; 4];
        let mut wgt = [0.0f64; 4];
        let mut theta1 = 0.0;
        let mut theta2 = PI;
        if ir1 > 0 {
            let (p0, p1, w, t) = self.ring_bracket(ir1, phi);
            pix[0] = p0;
            pix[1] = p1;
            wgt[0] = w;
            wgt[1] = 1.0 - w;
            theta1 = t;
        }
        if ir2 < nrings {
            let (p2, p3, w, t) = self.ring_bracket(ir2, phi);
            pix[2] = p2;
            pix[3] = p3;
            wgt[2] = w;
            wgt[3] = 1.0 - w;
            theta2 = t;
        }
        if ir1 == 0 {
            let wtheta = theta / theta2;
            wgt[2] *= wtheta;
            wgt[3] *= wtheta;
            let fac = (1.0 - wtheta) * 0.25;
            wgt[0] = fac;
            wgt[1] = fac;
            wgt[2] += fac;
            wgt[3] += fac;
            pix[0] = (pix[2] + 2) & 3;
            pix[1] = (pix[3] + 2) & 3;
        } else if ir2 == nrings {
            let wtheta = (theta - theta1) / (PI - theta1);
            wgt[0] *= 1.0 - wtheta;
            wgt[1] *= 1.0 - wtheta;
            let fac = wtheta * 0.25;
            wgt[0] += fac;
            wgt[1] += fac;
            wgt[2] = fac;
            wgt[3] = fac;
            pix[2] = ((pix[0] + 2) & 3) + self.npix - 4;
            pix[3] = ((pix[1] + 2) & 3) + self.npix - 4;
        } else {
            let wtheta = (theta - theta1) / (theta2 - theta1);
            wgt[0] *= 1.0 - wtheta;
            wgt[1] *= 1.0 - wtheta;
            wgt[2] *= wtheta;
            wgt[3] *= wtheta;
        }
        (pix, wgt)
    }
}

/// Displace angular positions by `(dtheta, dphi)`, reflecting through the poles.
pub fn displace(theta: f64, phi: f64, dtheta: f64, dphi: f64) -> (f64, f64) {
    let mut t = theta + dtheta;
    let mut p = phi + dphi;
    if t < 0.0 {
        t = -t;
        p += PI;
    }
    if t > PI {
        t = 2.0 * PI - t;
        p += PI;
    }
    (t, p.rem_euclid(2.0 * PI))
}
