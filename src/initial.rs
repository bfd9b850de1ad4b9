use log::{debug, info};
use ndarray::{Array3, s};

use crate::{
    clarray::{ClArrayParams, corr_to_clarray},
    corrfunc::CorrelationFunctions,
    error::{LssError, Result},
    field::{InitialLss, LssAxes},
    skysim::{HarmonicRealizer, SkyRealizer},
    util::Gaussian,
};

/// Environment variables set by the common MPI launchers.
const MPI_SIZE_VARS: [&str; 3] = ["OMPI_COMM_WORLD_SIZE", "PMI_SIZE", "PMIX_SIZE"];

/// Size of the enclosing MPI job, 1 when not launched by MPI.
pub fn mpi_job_size() -> usize {
    MPI_SIZE_VARS
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .filter_map(|v| v.trim().parse::<usize>().ok())
        .max()
        .unwrap_or(1)
}

fn check_single_process(size: usize) -> Result<()> {
    if size > 1 {
        return Err(LssError::UnsupportedConfiguration(format!(
            "initial field generation is not MPI parallel, but is running in an MPI job of size {}",
            size
        )));
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq)]
pub struct InitialParams {
    pub nside: usize,
    pub redshift: Option<Vec<f64>>,
    /// observing frequencies in MHz; take precedence over `redshift`
    pub frequencies: Option<Vec<f64>>,
    pub num_sims: usize,
    /// realization `i` uses seed `start_seed + i`
    pub start_seed: u64,
    pub xromb: u32,
    pub leg_q: usize,
}

impl Default for InitialParams {
    fn default() -> Self {
        Self {
            nside: 64,
            redshift: None,
            frequencies: None,
            num_sims: 1,
            start_seed: 0,
            xromb: 2,
            leg_q: 4,
        }
    }
}

/// Draws successive realizations of the initial density and potential.
pub struct InitialLssGenerator<'a> {
    pub params: InitialParams,
    correlations: &'a CorrelationFunctions,
    axes: LssAxes,
    realizer: HarmonicRealizer,
    cla: Option<Array3<f64>>,
    remaining: usize,
    seed: u64,
}

impl<'a> InitialLssGenerator<'a> {
    pub fn new(params: InitialParams, correlations: &'a CorrelationFunctions) -> Result<Self> {
        let cosmology = correlations.cosmology;
        let axes = match (&params.frequencies, &params.redshift) {
            (Some(freq), _) => LssAxes::from_frequencies(params.nside, freq.clone(), cosmology)?,
            (None, Some(z)) => LssAxes::from_redshifts(params.nside, z.clone(), cosmology)?,
            (None, None) => {
                return Err(LssError::Configuration(
                    "redshifts or frequencies must be specified".to_string(),
                ));
            }
        };
        if params.leg_q == 0 {
            return Err(LssError::Configuration("leg_q must be at least 1".to_string()));
        }
        Ok(Self {
            realizer: HarmonicRealizer::new(params.nside)?,
            remaining: params.num_sims,
            seed: params.start_seed,
            params,
            correlations,
            axes,
            cla: None,
        })
    }

    pub fn axes(&self) -> &LssAxes {
        &self.axes
    }

    /// Joint covariance of `(phi, delta)` per multipole, shaped
    /// `(lmax + 1, 2 nz, 2 nz)` with potential shells first.
    pub fn covariance(&self) -> Result<Array3<f64>> {
        // Higher multipoles alias back down when maps are transformed later on.
        let lmax = 3 * self.params.nside - 1;
        let nz = self.axes.nchi();
        let cl_params = ClArrayParams {
            xromb: self.params.xromb,
            xwidth: None,
            q: self.params.leg_q,
        };
        let chi = &self.axes.chi;
        let c = self.correlations;
        debug!("Generating C_l(x, x')");
        let cla0 = corr_to_clarray(&|r| c.corr0.value(r), lmax, chi, &cl_params)?;
        let cla2 = corr_to_clarray(&|r| c.corr2.value(r), lmax, chi, &cl_params)?;
        let cla4 = corr_to_clarray(&|r| c.corr4.value(r), lmax, chi, &cl_params)?;

        let mut cla = Array3::zeros((lmax + 1, 2 * nz, 2 * nz));
        cla.slice_mut(s![.., ..nz, ..nz]).assign(&cla4);
        cla.slice_mut(s![.., ..nz, nz..]).assign(&cla2);
        cla.slice_mut(s![.., nz.., ..nz]).assign(&cla2);
        cla.slice_mut(s![.., nz.., nz..]).assign(&cla0);
        Ok(cla)
    }

    /// The next realization, or `None` once `num_sims` have been drawn.
    pub fn next_realization(&mut self) -> Result<Option<InitialLss>> {
        check_single_process(mpi_job_size())?;
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;

        if self.cla.is_none() {
            self.cla = Some(self.covariance()?);
        }
        let Some(cla) = self.cla.as_ref() else {
            return Err(LssError::Consistency("covariance was not computed".to_string()));
        };

        let seed = self.seed;
        info!("Generating realisation of fields using seed {}", seed);
        let mut rand = Gaussian::new(random::default(seed));
        let sky = self.realizer.realize(cla.view(), &mut rand)?;

        let nz = self.axes.nchi();
        let phi = sky.slice(s![..nz, ..]).to_owned();
        let delta = sky.slice(s![nz.., ..]).to_owned();
        self.seed += 1;
        InitialLss::new(self.axes.clone(), delta, phi, seed).map(Some)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        corrfunc::{Interpolation, TabulatedFunction},
        cosmology::LambdaCdm,
        util::linspace,
    };

    /// Smooth analytic correlation functions standing in for a computed set.
    pub(crate) fn toy_correlations() -> anyhow::Result<CorrelationFunctions> {
        let r = linspace(0.0, 20000.0, 4001, true);
        let f = |amp: f64, s: f64| -> anyhow::Result<TabulatedFunction> {
            let v = r.iter().map(|r| amp * (-r * r / (2.0 * s * s)).exp()).collect();
            Ok(TabulatedFunction::new(r.clone(), v, Interpolation::Linear)?)
        };
        Ok(CorrelationFunctions::new(
            f(1.0, 150.0)?,
            f(-30.0, 300.0)?,
            f(2000.0, 600.0)?,
            LambdaCdm::default(),
            "toy",
        )?)
    }

    #[test]
    fn single_process_check() {
        assert!(check_single_process(1).is_ok());
        assert!(matches!(
            check_single_process(4),
            Err(LssError::UnsupportedConfiguration(_))
        ));
    }

    #[test]
    fn needs_shells() -> anyhow::Result<()> {
        let corr = toy_correlations()?;
        let res = InitialLssGenerator::new(InitialParams::default(), &corr);
        assert!(matches!(res, Err(LssError::Configuration(_))));
        Ok(())
    }

    #[test]
    fn seeds_and_exhaustion() -> anyhow::Result<()> {
        let corr = toy_correlations()?;
        let params = InitialParams {
            nside: 2,
            redshift: Some(vec![0.8, 1.0]),
            num_sims: 2,
            start_seed: 10,
            ..Default::default()
        };
        let mut generator = InitialLssGenerator::new(params.clone(), &corr)?;
        let a = generator.next_realization()?.ok_or_else(|| anyhow::anyhow!("first"))?;
        let b = generator.next_realization()?.ok_or_else(|| anyhow::anyhow!("second"))?;
        assert!(generator.next_realization()?.is_none());
        assert_eq!((a.seed, b.seed), (10, 11));
        assert_eq!(a.delta.shape(), &[2, 48]);
        assert_ne!(a.delta, b.delta);

        // a fresh generator reproduces the same fields
        let mut again = InitialLssGenerator::new(params, &corr)?;
        let a2 = again.next_realization()?.ok_or_else(|| anyhow::anyhow!("again"))?;
        assert_eq!(a.delta, a2.delta);
        assert_eq!(a.phi, a2.phi);
        Ok(())
    }

    #[test]
    fn covariance_blocks() -> anyhow::Result<()> {
        let corr = toy_correlations()?;
        let generator = InitialLssGenerator::new(
            InitialParams {
                nside: 2,
                redshift: Some(vec![0.5, 0.6, 0.7]),
                ..Default::default()
            },
            &corr,
        )?;
        let cla = generator.covariance()?;
        assert_eq!(cla.shape(), &[6, 6, 6]);
        for l in 0..6 {
            for i in 0..3 {
                assert_eq!(cla[[l, i, 3 + i]], cla[[l, 3 + i, i]]);
            }
        }
        // density-density monopole is positive
        assert!(cla[[0, 3, 3]] > 0.0);
        Ok(())
    }
}
