use std::{fs::create_dir_all, path::PathBuf};

use anyhow::Context;
use clap::Parser;
use log::info;
use lsscone::{
    bias::{BiasParams, PolynomialBiasParams},
    corrfunc::{CorrelationCalculator, CorrelationParams, TransformParams},
    cosmology::LambdaCdm,
    fog::FogParams,
    initial::InitialParams,
    map::MapParams,
    models::{BiasModel, OmegaHiModel, SigmaPModel},
    pipeline::{BiasSpec, DynamicsScheme, Pipeline, PipelineParams},
    powerspectrum::{NpyStore, PowerSpectrum, PowerSpectrumStore},
    shotnoise::ShotNoiseParams,
    util::logspace,
};

/// Simulate biased, dynamically evolved large scale structure on HEALPix shells.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    #[arg(long, default_value_t = 64)]
    nside: usize,
    /// comma separated shell redshifts
    #[arg(long, value_delimiter = ',')]
    redshift: Option<Vec<f64>>,
    /// comma separated shell frequencies in MHz, overrides --redshift
    #[arg(long, value_delimiter = ',')]
    frequencies: Option<Vec<f64>>,
    #[arg(long, default_value_t = 1)]
    num_sims: usize,
    #[arg(long, default_value_t = 0)]
    start_seed: u64,
    #[arg(long, default_value_t = 2)]
    xromb: u32,
    #[arg(long, default_value_t = 4)]
    leg_q: usize,

    /// directory holding ps_<name>.npy tables; a BBKS spectrum is used if absent
    #[arg(long)]
    ps_dir: Option<PathBuf>,
    #[arg(long, default_value = "linear")]
    ps_name: String,
    #[arg(long, default_value_t = 0.8)]
    sigma8: f64,
    #[arg(long, default_value_t = 0.965)]
    ns: f64,
    /// width in h/Mpc of a Gaussian suppression of the spectrum
    #[arg(long)]
    ksmooth: Option<f64>,
    /// log10 k below which the spectrum is cut off
    #[arg(long, default_value_t = -4.0, allow_hyphen_values = true)]
    logkcut_low: f64,
    /// log10 k above which the spectrum is cut off
    #[arg(long, default_value_t = 4.0, allow_hyphen_values = true)]
    logkcut_high: f64,
    #[arg(long, default_value_t = 1000)]
    samples_per_decade: usize,

    /// constant Lagrangian bias, used when no polynomial bias is configured
    #[arg(long, default_value_t = 0.0)]
    bias_l: f64,
    #[arg(long)]
    bias_model: Option<BiasModel>,
    #[arg(long)]
    z_eff: Option<f64>,
    #[arg(long, value_delimiter = ',')]
    bias_coeff: Option<Vec<f64>>,
    #[arg(long, default_value_t = 1.0)]
    alpha_b: f64,
    /// evaluate every shell at --fixed-redshift instead of on the lightcone
    #[arg(long)]
    no_lightcone: bool,
    #[arg(long)]
    fixed_redshift: Option<f64>,
    #[arg(long)]
    lognormal_bias: bool,

    #[arg(long, default_value_t = DynamicsScheme::ZeldovichSph)]
    dynamics: DynamicsScheme,
    #[arg(long)]
    real_space: bool,

    #[arg(long)]
    fog_model: Option<SigmaPModel>,
    #[arg(long, value_delimiter = ',')]
    fog_coeff: Option<Vec<f64>>,
    #[arg(long)]
    fog_z_eff: Option<f64>,
    #[arg(long, default_value_t = 1.0)]
    alpha_fog: f64,

    #[arg(long)]
    n_eff: Option<f64>,
    #[arg(long)]
    log_m_hi_g: Option<f64>,
    #[arg(long)]
    shot_noise_seed: Option<u64>,

    #[arg(long)]
    use_mean_21cm_t: bool,
    #[arg(long, default_value_t = 1.0)]
    map_prefactor: f64,
    #[arg(long)]
    lognormal_map: bool,
    #[arg(long, default_value_t = OmegaHiModel::Crighton2015)]
    omega_hi_model: OmegaHiModel,

    #[arg(long, default_value = "out/lsscone")]
    out_dir: PathBuf,
}

impl Args {
    fn pipeline_params(&self) -> PipelineParams {
        let polynomial = self.bias_model.is_some() || self.bias_coeff.is_some();
        let bias_model = if polynomial {
            BiasSpec::Polynomial(PolynomialBiasParams {
                z_eff: self.z_eff,
                bias_coeff: self.bias_coeff.clone(),
                model: self.bias_model,
                alpha_b: self.alpha_b,
            })
        } else {
            BiasSpec::Constant(self.bias_l)
        };
        let fog = (self.fog_model.is_some() || self.fog_coeff.is_some()).then(|| FogParams {
            alpha_fog: self.alpha_fog,
            model: self.fog_model,
            fog_coeff: self.fog_coeff.clone(),
            z_eff: self.fog_z_eff,
        });
        let shot_noise = (self.n_eff.is_some() || self.log_m_hi_g.is_some()).then(|| ShotNoiseParams {
            n_eff: self.n_eff,
            log_m_hi_g: self.log_m_hi_g,
            omega_hi_model: self.omega_hi_model,
            seed: self.shot_noise_seed,
        });
        PipelineParams {
            initial: InitialParams {
                nside: self.nside,
                redshift: self.redshift.clone(),
                frequencies: self.frequencies.clone(),
                num_sims: self.num_sims,
                start_seed: self.start_seed,
                xromb: self.xromb,
                leg_q: self.leg_q,
            },
            bias: BiasParams {
                lightcone: !self.no_lightcone,
                redshift: self.fixed_redshift,
                lognormal: self.lognormal_bias,
            },
            bias_model,
            dynamics: self.dynamics,
            redshift_space: !self.real_space,
            fog,
            shot_noise,
            map: MapParams {
                use_mean_21cm_t: self.use_mean_21cm_t,
                map_prefactor: self.map_prefactor,
                lognormal: self.lognormal_map,
                omega_hi_model: self.omega_hi_model,
            },
        }
    }

    fn correlation_params(&self) -> CorrelationParams {
        let defaults = CorrelationParams::default();
        CorrelationParams {
            transform: TransformParams {
                samples_per_decade: self.samples_per_decade,
                ..defaults.transform
            },
            ksmooth: self.ksmooth,
            logkcut_low: self.logkcut_low,
            logkcut_high: self.logkcut_high,
        }
    }

    fn spectrum(&self) -> anyhow::Result<PowerSpectrum> {
        match &self.ps_dir {
            Some(dir) => NpyStore::new(dir)
                .load(&self.ps_name)
                .with_context(|| format!("loading power spectrum {} from {}", self.ps_name, dir.display())),
            None => {
                info!("using a BBKS spectrum with sigma8 = {}", self.sigma8);
                let k = logspace(-5.0, 3.0, 2001, true);
                Ok(PowerSpectrum::bbks(LambdaCdm::default(), self.sigma8, self.ns, 0.0, k)?)
            }
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    create_dir_all(&args.out_dir)?;

    let spectrum = args.spectrum()?;
    let calculator = CorrelationCalculator::new(args.correlation_params(), &spectrum);
    let cache = calculator.cache_path(&args.out_dir)?;
    let correlations = calculator
        .calculate_with_cache(&cache)
        .with_context(|| format!("computing correlation functions into {}", cache.display()))?;

    let mut pipeline = Pipeline::new(args.pipeline_params(), &correlations)?;
    while let Some(realization) = pipeline.next_realization()? {
        let seed = realization.initial.seed;
        let delta_file = args.out_dir.join(format!("delta_{}.npy", seed));
        let map_file = args.out_dir.join(format!("map_{}.npy", seed));
        realization.evolved.save(&delta_file)?;
        realization.map.save(&map_file)?;
        realization.map.save_frequencies(args.out_dir.join(format!("freq_{}.npy", seed)))?;
        info!("wrote {} and {}", delta_file.display(), map_file.display());
    }
    Ok(())
}
