/// Calibration tool: optionally fits stand distributions from inventory plots,
/// simulates shadowed/unshadowed stands, and fits one shadow-bias model per
/// analysis scale. The result is a JSON `CalibrationSet` consumed by
/// `landscape --model`.
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::{info, warn, Level};

use lsm_core::calibrate::{build_samples, CalibrationModel, CalibrationSet};
use lsm_core::config::{LsmConfig, Scale};
use lsm_core::inventory::{fit_diameter, fit_stem_count, PlotFilter, PlotRecord, TreeRecord};
use lsm_core::metrics::MetricEngine;
use lsm_core::simulate::{simulate, SimulationConfig};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "calibrate", about = "Fit per-scale shadow-bias calibration models from simulated stands")]
struct Args {
    /// Run configuration (JSON); defaults apply for missing fields
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Inventory plot records (JSON array) used to fit the stand distributions
    #[arg(long, requires = "trees")]
    plots: Option<PathBuf>,

    /// Inventory tree records (JSON array)
    #[arg(long, requires = "plots")]
    trees: Option<PathBuf>,

    /// Output model file
    #[arg(short, long, default_value = "calibration.json")]
    output: PathBuf,

    /// Override the number of simulated stands per scale
    #[arg(short, long)]
    n: Option<usize>,

    /// Override the random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

// ── Config file ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
struct RunConfig {
    /// Window areas in acres; one model per entry.
    scales_acres: Vec<f64>,
    /// Connectivity, edge depth and scope used for both renderings.
    metrics: LsmConfig,
    simulation: SimulationConfig,
    plot_filter: PlotFilter,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            scales_acres: vec![0.5, 1.0, 2.0],
            metrics: LsmConfig::default(),
            simulation: SimulationConfig::default(),
            plot_filter: PlotFilter::default(),
        }
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
}

// ── Main ─────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    let mut run: RunConfig = match &args.config {
        Some(path) => read_json(path)?,
        None => RunConfig::default(),
    };
    if let Some(n) = args.n {
        run.simulation.n_stands = n;
    }
    if let Some(seed) = args.seed {
        run.simulation.seed = seed;
    }
    if run.scales_acres.is_empty() {
        bail!("No analysis scales configured");
    }

    if let (Some(plots), Some(trees)) = (&args.plots, &args.trees) {
        let plots: Vec<PlotRecord> = read_json(plots)?;
        let trees: Vec<TreeRecord> = read_json(trees)?;
        let samples = run.plot_filter.apply(&plots, &trees);
        run.simulation.stem_count = fit_stem_count(&samples).context("Stem-count fit failed")?;
        run.simulation.diameter =
            fit_diameter(&samples, run.plot_filter.min_dbh_cm).context("Diameter fit failed")?;
        info!(
            plots = samples.len(),
            mean_per_acre = run.simulation.stem_count.mean_per_acre,
            size = run.simulation.stem_count.size,
            "Stand distributions fitted from inventory"
        );
    }
    run.simulation.validate().context("Invalid simulation configuration")?;

    let engine = MetricEngine::new(&run.metrics);
    let mut set = CalibrationSet::default();
    for &acres in &run.scales_acres {
        let scale = Scale::acres(acres);
        let config = LsmConfig { scale: scale.clone(), ..run.metrics.clone() };
        config
            .validate(run.simulation.cell_size)
            .with_context(|| format!("Invalid configuration for scale {}", scale.label))?;

        let stands = simulate(&run.simulation, &scale)?;
        let samples = build_samples(&engine, &stands);
        let settings = config.metric_settings(run.simulation.cell_size);
        let model = CalibrationModel::fit(&scale, settings, &samples);
        let failed: Vec<&str> = model
            .fits
            .iter()
            .filter(|(_, f)| !f.is_fitted())
            .map(|(m, _)| m.name())
            .collect();
        if !failed.is_empty() {
            warn!(scale = %scale.label, ?failed, "Metrics left uncalibrated");
        }
        set.insert(model);
    }

    set.save(&args.output)
        .with_context(|| format!("Cannot write {}", args.output.display()))?;
    eprintln!("[calibrate] Wrote {} model(s) to {}", set.models.len(), args.output.display());
    Ok(())
}
