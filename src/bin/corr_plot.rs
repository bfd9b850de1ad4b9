use std::fs::create_dir_all;

use log::info;
use lsscone::{
    clarray::{ClArrayParams, corr_to_clarray},
    corrfunc::{CorrelationCalculator, CorrelationParams, TransformParams},
    cosmology::{Cosmology, LambdaCdm},
    powerspectrum::PowerSpectrum,
    util::{BINCODE_CONFIG, lazy_file, logspace},
};
use plotly::{
    Layout, Plot, Scatter,
    common::ExponentFormat,
    layout::{Axis, AxisType, LayoutGrid},
};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let out_dir = "out/corr_plot";
    create_dir_all(out_dir)?;

    let cosmology = LambdaCdm::default();
    let spectrum = PowerSpectrum::bbks(cosmology, 0.8, 0.965, 0.0, logspace(-5.0, 3.0, 2001, true))?;
    let params = CorrelationParams {
        transform: TransformParams {
            samples_per_decade: 100,
            ..CorrelationParams::default().transform
        },
        ..Default::default()
    };
    let calculator = CorrelationCalculator::new(params, &spectrum);
    let corr = calculator.calculate_with_cache(calculator.cache_path(out_dir)?)?;

    {
        let r = logspace(-1.0, 3.0, 400, true);
        let mut plot = Plot::new();
        for (name, f, y_axis) in [("xi_dd", &corr.corr0, "y"), ("xi_dp", &corr.corr2, "y2"), ("xi_pp", &corr.corr4, "y3")] {
            let v: Vec<f64> = r.iter().map(|r| r * r * f.value(*r)).collect();
            plot.add_trace(Scatter::new(r.clone(), v).name(name).y_axis(y_axis));
        }
        plot.set_layout(
            Layout::new()
                .grid(LayoutGrid::new().rows(3).columns(1))
                .x_axis(
                    Axis::new()
                        .type_(AxisType::Log)
                        .exponent_format(ExponentFormat::Power),
                )
                .y_axis(Axis::new().exponent_format(ExponentFormat::Power))
                .y_axis2(Axis::new().exponent_format(ExponentFormat::Power))
                .y_axis3(Axis::new().exponent_format(ExponentFormat::Power))
                .height(1000),
        );
        plot.write_html(format!("{}/correlation.html", out_dir));
    }

    {
        let redshifts = [0.8, 0.82, 0.84, 0.86];
        let chi: Vec<f64> = redshifts.iter().map(|z| cosmology.comoving_distance(*z)).collect();
        let lmax = 191;
        let cache = format!("{}/clarray.{}.bincode", out_dir, calculator.cache_key()?);
        let cla = lazy_file(cache, BINCODE_CONFIG, || {
            let cla = corr_to_clarray(&|r| corr.corr0.value(r), lmax, &chi, &ClArrayParams::default())?;
            Ok(cla.iter().copied().collect::<Vec<f64>>())
        })?;
        let n = chi.len();
        let l: Vec<f64> = (0..=lmax).map(|l| l as f64).collect();
        let mut plot = Plot::new();
        for j in 0..n {
            let v: Vec<f64> = (0..=lmax).map(|l| cla[(l * n) * n + j]).collect();
            plot.add_trace(Scatter::new(l.clone(), v).name(&format!("C_l(0, {})", j)));
        }
        plot.set_layout(
            Layout::new()
                .x_axis(Axis::new().type_(AxisType::Log))
                .y_axis(
                    Axis::new()
                        .type_(AxisType::Log)
                        .exponent_format(ExponentFormat::Power),
                )
                .height(800),
        );
        plot.write_html(format!("{}/clarray.html", out_dir));
        info!("wrote diagnostics into {}", out_dir);
    }
    Ok(())
}
