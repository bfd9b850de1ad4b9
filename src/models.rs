use std::{fmt::Display, str::FromStr};

use libm::pow;

use crate::error::LssError;

/// A physical quantity as a function of redshift.
pub trait RedshiftFn: Send + Sync {
    fn value(&self, z: f64) -> f64;

    fn plus<F: RedshiftFn>(self, other: F) -> Plus<Self, F>
    where
        Self: Sized,
    {
        Plus { f1: self, f2: other }
    }
    fn mul<F: RedshiftFn>(self, other: F) -> Times<Self, F>
    where
        Self: Sized,
    {
        Times { f1: self, f2: other }
    }
}

impl<F: RedshiftFn + ?Sized> RedshiftFn for Box<F> {
    fn value(&self, z: f64) -> f64 {
        (**self).value(z)
    }
}

pub struct Plus<F1, F2> {
    pub f1: F1,
    pub f2: F2,
}

impl<F1: RedshiftFn, F2: RedshiftFn> RedshiftFn for Plus<F1, F2> {
    fn value(&self, z: f64) -> f64 {
        self.f1.value(z) + self.f2.value(z)
    }
}

pub struct Times<F1, F2> {
    pub f1: F1,
    pub f2: F2,
}

impl<F1: RedshiftFn, F2: RedshiftFn> RedshiftFn for Times<F1, F2> {
    fn value(&self, z: f64) -> f64 {
        self.f1.value(z) * self.f2.value(z)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Constant(pub f64);

impl RedshiftFn for Constant {
    fn value(&self, _z: f64) -> f64 {
        self.0
    }
}

/// `sum_n c_n (z - z_eff)^n`
#[derive(Clone, Debug, PartialEq)]
pub struct Polynomial {
    pub z_eff: f64,
    pub coeffs: Vec<f64>,
}

impl RedshiftFn for Polynomial {
    fn value(&self, z: f64) -> f64 {
        let x = z - self.z_eff;
        self.coeffs.iter().rev().fold(0.0, |acc, c| acc * x + c)
    }
}

/// `amplitude (1 + z)^index`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PowerLaw {
    pub amplitude: f64,
    pub index: f64,
}

impl RedshiftFn for PowerLaw {
    fn value(&self, z: f64) -> f64 {
        self.amplitude * pow(1.0 + z, self.index)
    }
}

/// Scales the Eulerian bias `1 + b_L` of a Lagrangian bias model by `alpha`,
/// i.e. `b_L -> alpha b_L + alpha - 1`. A no-op for `alpha = 1`.
pub fn eulerian_scaling<F: RedshiftFn>(alpha: f64, bias: F) -> Plus<Times<F, Constant>, Constant> {
    bias.mul(Constant(alpha)).plus(Constant(alpha - 1.0))
}

fn unknown_model<T>(kind: &str, tag: &str, known: &[&str]) -> Result<T, LssError> {
    Err(LssError::Configuration(format!(
        "unknown {} model `{}`, expected one of {}",
        kind,
        tag,
        known.join(", ")
    )))
}

/// Built-in first order Lagrangian bias models.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BiasModel {
    /// quasar clustering `b_E = 0.53 + 0.289 (1 + z)^2`, expanded about z = 1.5
    Laurent2017,
    /// tracer following the matter, `b_E = 1`
    Unbiased,
}

impl BiasModel {
    const TAGS: [&'static str; 2] = ["Laurent2017", "Unbiased"];

    pub fn resolve(self) -> Polynomial {
        match self {
            Self::Laurent2017 => Polynomial {
                z_eff: 1.5,
                coeffs: vec![1.336_25, 1.445, 0.289],
            },
            Self::Unbiased => Polynomial {
                z_eff: 0.0,
                coeffs: vec![0.0],
            },
        }
    }
}

impl FromStr for BiasModel {
    type Err = LssError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Laurent2017" => Ok(Self::Laurent2017),
            "Unbiased" => Ok(Self::Unbiased),
            _ => unknown_model("bias", s, &Self::TAGS),
        }
    }
}

impl Display for BiasModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Laurent2017 => write!(f, "Laurent2017"),
            Self::Unbiased => write!(f, "Unbiased"),
        }
    }
}

/// Built-in Fingers of God smoothing scales `sigma_P(z)` in Mpc/h.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SigmaPModel {
    /// 4 Mpc/h at z = 1 falling slowly with redshift
    Fiducial,
    /// no velocity dispersion
    None,
}

impl SigmaPModel {
    const TAGS: [&'static str; 2] = ["Fiducial", "None"];

    pub fn resolve(self) -> Polynomial {
        match self {
            Self::Fiducial => Polynomial {
                z_eff: 1.0,
                coeffs: vec![4.0, -0.8],
            },
            Self::None => Polynomial {
                z_eff: 0.0,
                coeffs: vec![0.0],
            },
        }
    }
}

impl FromStr for SigmaPModel {
    type Err = LssError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Fiducial" => Ok(Self::Fiducial),
            "None" => Ok(Self::None),
            _ => unknown_model("sigma_P", s, &Self::TAGS),
        }
    }
}

impl Display for SigmaPModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fiducial => write!(f, "Fiducial"),
            Self::None => write!(f, "None"),
        }
    }
}

/// Built-in HI density models `Omega_HI(z)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OmegaHiModel {
    /// `4e-4 (1 + z)^0.6`
    #[default]
    Crighton2015,
    /// `4e-4` at all redshifts
    Constant,
}

impl OmegaHiModel {
    const TAGS: [&'static str; 2] = ["Crighton2015", "Constant"];

    pub fn resolve(self) -> PowerLaw {
        match self {
            Self::Crighton2015 => PowerLaw {
                amplitude: 4e-4,
                index: 0.6,
            },
            Self::Constant => PowerLaw {
                amplitude: 4e-4,
                index: 0.0,
            },
        }
    }
}

impl FromStr for OmegaHiModel {
    type Err = LssError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Crighton2015" => Ok(Self::Crighton2015),
            "Constant" => Ok(Self::Constant),
            _ => unknown_model("Omega_HI", s, &Self::TAGS),
        }
    }
}

impl Display for OmegaHiModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Crighton2015 => write!(f, "Crighton2015"),
            Self::Constant => write!(f, "Constant"),
        }
    }
}

/// Resolves a polynomial from explicit `(z_eff, coeffs)` or else a built-in
/// model; neither is a configuration error naming `what`.
pub fn polynomial_or_model<M>(
    z_eff: Option<f64>,
    coeffs: Option<&[f64]>,
    model: Option<M>,
    resolve: impl FnOnce(M) -> Polynomial,
    what: &str,
) -> Result<Polynomial, LssError> {
    match (z_eff, coeffs, model) {
        (Some(z_eff), Some(coeffs), _) => Ok(Polynomial {
            z_eff,
            coeffs: coeffs.to_vec(),
        }),
        (_, _, Some(model)) => Ok(resolve(model)),
        _ => Err(LssError::Configuration(format!(
            "either a {} model or both z_eff and the coefficients must be set",
            what
        ))),
    }
}
