/// Landscape tool: computes the 13 landscape structure metrics over a
/// classified canopy/shadow/other GeoTIFF at one analysis scale and writes the
/// observed (and, given a calibration model, calibrated) multi-band rasters.
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::Level;

use lsm_core::calibrate::CalibrationSet;
use lsm_core::config::{BoundaryPolicy, LsmConfig, SamplingMode, Scale};
use lsm_core::io::{read_classified, write_lsm_raster};
use lsm_core::pipeline::{process_raster, CancelToken};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Boundary {
    Exclude,
    Mark,
}

#[derive(Parser, Debug)]
#[command(name = "landscape", about = "Compute (calibrated) landscape structure metric rasters")]
struct Args {
    /// Classified raster (0 = canopy, 1 = shadow, 2 = other)
    input: PathBuf,

    /// Output directory (created if absent)
    #[arg(short, long, default_value = "out")]
    output: PathBuf,

    /// Metric configuration (JSON); command-line flags override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Window area in acres
    #[arg(long)]
    acres: Option<f64>,

    /// Overlapping windows advancing by this fraction of the window side
    #[arg(long)]
    step_fraction: Option<f64>,

    /// Treatment of windows overhanging the raster edge
    #[arg(long, value_enum)]
    boundary: Option<Boundary>,

    /// Calibration models written by `calibrate`
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Tile name used in output file names (defaults to the input file stem)
    #[arg(long)]
    tile: Option<String>,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(args: &Args) -> Result<LsmConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))?
        }
        None => LsmConfig::default(),
    };
    if let Some(acres) = args.acres {
        config.scale = Scale::acres(acres);
    }
    if let Some(step_fraction) = args.step_fraction {
        config.sampling = SamplingMode::Overlapping { step_fraction };
    }
    if let Some(b) = args.boundary {
        config.boundary = match b {
            Boundary::Exclude => BoundaryPolicy::Exclude,
            Boundary::Mark => BoundaryPolicy::Mark,
        };
    }
    Ok(config)
}

fn tile_name(args: &Args) -> String {
    args.tile.clone().unwrap_or_else(|| {
        args.input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "tile".to_string())
    })
}

fn write(dir: &Path, tile: &str, raster: &lsm_core::OutputLsmRaster) -> Result<()> {
    let path = dir.join(raster.file_name(tile));
    write_lsm_raster(&path, raster).with_context(|| format!("Cannot write {}", path.display()))?;
    eprintln!("[landscape] {}", path.display());
    Ok(())
}

// ── Main ─────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    let config = load_config(&args)?;
    let raster =
        read_classified(&args.input).with_context(|| format!("Cannot read {}", args.input.display()))?;
    config.validate(raster.cell_size()).context("Invalid configuration")?;

    let models = args
        .model
        .as_deref()
        .map(|p| CalibrationSet::load(p).with_context(|| format!("Cannot load {}", p.display())))
        .transpose()?;
    let model = match &models {
        Some(set) => Some(set.for_scale(&config.scale.label).with_context(|| {
            format!("No calibration model for scale {}", config.scale.label)
        })?),
        None => None,
    };

    let out = process_raster(&raster, &config, model, &CancelToken::new())?;

    fs::create_dir_all(&args.output)?;
    let tile = tile_name(&args);
    write(&args.output, &tile, &out.observed)?;
    if let Some(calibrated) = &out.calibrated {
        write(&args.output, &tile, calibrated)?;
    }
    eprintln!(
        "[landscape] {} windows: {} processed, {} undefined, {} boundary",
        out.summary.windows, out.summary.processed, out.summary.undefined, out.summary.boundary
    );
    Ok(())
}
