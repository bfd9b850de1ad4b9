use std::{fmt::Display, str::FromStr};

use log::info;

use crate::{
    bias::{BiasParams, LagrangianBias, PolynomialBiasParams},
    corrfunc::CorrelationFunctions,
    dynamics::{Dynamics, LinearDynamics, ZeldovichDynamics},
    error::{LssError, Result},
    field::{BiasedLss, InitialLss, SkyMap},
    fog::{FingersOfGod, FogParams},
    initial::{InitialLssGenerator, InitialParams},
    map::{MapParams, biased_to_map},
    shotnoise::{ShotNoise, ShotNoiseParams},
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DynamicsScheme {
    /// keep the Lagrangian field
    None,
    Linear,
    ZeldovichGrid,
    #[default]
    ZeldovichSph,
}

impl FromStr for DynamicsScheme {
    type Err = LssError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Self::None),
            "linear" => Ok(Self::Linear),
            "zeldovich-grid" => Ok(Self::ZeldovichGrid),
            "zeldovich-sph" => Ok(Self::ZeldovichSph),
            _ => Err(LssError::Configuration(format!(
                "unknown dynamics `{}`, expected none, linear, zeldovich-grid or zeldovich-sph",
                s
            ))),
        }
    }
}

impl Display for DynamicsScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Linear => "linear",
            Self::ZeldovichGrid => "zeldovich-grid",
            Self::ZeldovichSph => "zeldovich-sph",
        };
        write!(f, "{}", s)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum BiasSpec {
    /// constant Lagrangian bias
    Constant(f64),
    Polynomial(PolynomialBiasParams),
}

#[derive(Clone, Debug, PartialEq)]
pub struct PipelineParams {
    pub initial: InitialParams,
    pub bias: BiasParams,
    pub bias_model: BiasSpec,
    pub dynamics: DynamicsScheme,
    pub redshift_space: bool,
    pub fog: Option<FogParams>,
    pub shot_noise: Option<ShotNoiseParams>,
    pub map: MapParams,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            initial: InitialParams::default(),
            bias: BiasParams::default(),
            bias_model: BiasSpec::Constant(0.0),
            dynamics: DynamicsScheme::default(),
            redshift_space: true,
            fog: None,
            shot_noise: None,
            map: MapParams::default(),
        }
    }
}

/// Every intermediate field of one realization.
pub struct Realization {
    pub initial: InitialLss,
    pub biased: BiasedLss,
    pub evolved: BiasedLss,
    pub map: SkyMap,
}

/// Runs realizations through generate, bias, dynamics, Fingers of God,
/// shot noise and map emission in that order.
pub struct Pipeline<'a> {
    generator: InitialLssGenerator<'a>,
    bias: LagrangianBias,
    dynamics: Option<Box<dyn Dynamics>>,
    fog: Option<FingersOfGod>,
    shot_noise: Option<ShotNoiseParams>,
    map: MapParams,
}

impl<'a> Pipeline<'a> {
    /// Validates every stage before any numerical work.
    pub fn new(params: PipelineParams, correlations: &'a CorrelationFunctions) -> Result<Self> {
        let bias = match &params.bias_model {
            BiasSpec::Constant(b) => LagrangianBias::constant(params.bias.clone(), *b)?,
            BiasSpec::Polynomial(poly) => LagrangianBias::polynomial(params.bias.clone(), poly)?,
        };
        let redshift_space = params.redshift_space;
        let dynamics: Option<Box<dyn Dynamics>> = match params.dynamics {
            DynamicsScheme::None => None,
            DynamicsScheme::Linear => Some(Box::new(LinearDynamics { redshift_space })),
            DynamicsScheme::ZeldovichGrid => Some(Box::new(ZeldovichDynamics {
                redshift_space,
                sph: false,
            })),
            DynamicsScheme::ZeldovichSph => Some(Box::new(ZeldovichDynamics {
                redshift_space,
                sph: true,
            })),
        };
        let fog = params.fog.as_ref().map(FingersOfGod::new).transpose()?;
        if let Some(sn) = &params.shot_noise {
            if sn.n_eff.is_none() && sn.log_m_hi_g.is_none() {
                return Err(LssError::Configuration(
                    "one of n_eff or log_M_HI_g must be set".to_string(),
                ));
            }
        }
        Ok(Self {
            generator: InitialLssGenerator::new(params.initial, correlations)?,
            bias,
            dynamics,
            fog,
            shot_noise: params.shot_noise,
            map: params.map,
        })
    }

    /// The next realization, or `None` once all have been generated.
    pub fn next_realization(&mut self) -> Result<Option<Realization>> {
        let Some(initial) = self.generator.next_realization()? else {
            info!("all realizations generated");
            return Ok(None);
        };
        let biased = self.bias.apply(&initial)?;
        let mut evolved = match &self.dynamics {
            Some(dynamics) => dynamics.evolve(&initial, &biased)?,
            None => biased.clone(),
        };
        if let Some(fog) = &self.fog {
            evolved = fog.apply(&evolved)?;
        }
        if let Some(params) = &self.shot_noise {
            ShotNoise::new(params, &initial)?.add_in_place(&mut evolved)?;
        }
        let map = biased_to_map(&evolved, &self.map)?;
        Ok(Some(Realization {
            initial,
            biased,
            evolved,
            map,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initial::tests::toy_correlations;

    fn scenario(seed: u64) -> PipelineParams {
        PipelineParams {
            initial: InitialParams {
                nside: 4,
                redshift: Some(vec![0.5, 1.0, 1.5]),
                start_seed: seed,
                ..Default::default()
            },
            bias_model: BiasSpec::Constant(1.0),
            dynamics: DynamicsScheme::None,
            ..Default::default()
        }
    }

    #[test]
    fn fixed_seed_is_bit_reproducible() -> anyhow::Result<()> {
        let corr = toy_correlations()?;
        let run = |seed| -> anyhow::Result<Realization> {
            let mut pipeline = Pipeline::new(scenario(seed), &corr)?;
            pipeline.next_realization()?.ok_or_else(|| anyhow::anyhow!("no realization"))
        };
        let a = run(42)?;
        let b = run(42)?;
        assert_eq!(a.evolved.delta.shape(), &[3, 192]);
        assert_eq!(a.evolved.delta, b.evolved.delta);
        assert_eq!(a.map.map, b.map.map);
        let c = run(43)?;
        assert_ne!(a.evolved.delta, c.evolved.delta);
        Ok(())
    }

    #[test]
    fn every_stage() -> anyhow::Result<()> {
        let corr = toy_correlations()?;
        for dynamics in ["linear", "zeldovich-grid", "zeldovich-sph"] {
            let params = PipelineParams {
                dynamics: dynamics.parse()?,
                fog: Some(FogParams {
                    model: Some(crate::models::SigmaPModel::Fiducial),
                    ..Default::default()
                }),
                shot_noise: Some(ShotNoiseParams {
                    n_eff: Some(1e-2),
                    ..Default::default()
                }),
                ..scenario(1)
            };
            let mut pipeline = Pipeline::new(params, &corr)?;
            let r = pipeline.next_realization()?.ok_or_else(|| anyhow::anyhow!("no realization"))?;
            assert!(r.evolved.delta.iter().all(|v| v.is_finite()));
            assert_eq!(r.map.map.shape(), &[3, 4, 192]);
            assert!(pipeline.next_realization()?.is_none());
        }
        Ok(())
    }

    #[test]
    fn stages_are_validated_up_front() -> anyhow::Result<()> {
        let corr = toy_correlations()?;
        let params = PipelineParams {
            fog: Some(FogParams::default()),
            ..scenario(0)
        };
        assert!(matches!(Pipeline::new(params, &corr), Err(LssError::Configuration(_))));
        let params = PipelineParams {
            shot_noise: Some(ShotNoiseParams::default()),
            ..scenario(0)
        };
        assert!(Pipeline::new(params, &corr).is_err());
        assert!("warp".parse::<DynamicsScheme>().is_err());
        Ok(())
    }
}
