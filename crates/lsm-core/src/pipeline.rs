//! Production run over one classified raster at one scale.
//!
//! Windows are independent: each is cut from the read-only raster, measured,
//! optionally calibrated and placed in the mosaic by a rayon worker. The
//! mosaic's write-once cells are the only shared state. Cancellation is
//! checked before every window; cancelled windows stay `UNPROCESSED`.
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::calibrate::{cover_proportions, CalibrationModel};
use crate::config::{BoundaryPolicy, LsmConfig};
use crate::error::Result;
use crate::metrics::MetricEngine;
use crate::mosaic::{encode_vector, CalibrationStatus, Mosaic, OutputLsmRaster};
use crate::partition::partition;
use crate::raster::ClassifiedRaster;

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub windows: usize,
    pub processed: usize,
    /// Windows whose metrics were all undefined (no valid cells).
    pub undefined: usize,
    pub boundary: usize,
    /// Windows skipped after cancellation.
    pub cancelled: usize,
}

#[derive(Debug)]
pub struct RunOutput {
    pub observed: OutputLsmRaster,
    pub calibrated: Option<OutputLsmRaster>,
    pub summary: RunSummary,
}

/// Compute observed (and, with a model, calibrated) LSM rasters.
///
/// Fails before any processing on an invalid configuration or a model for a
/// different scale.
pub fn process_raster(
    raster: &ClassifiedRaster,
    config: &LsmConfig,
    model: Option<&CalibrationModel>,
    cancel: &CancelToken,
) -> Result<RunOutput> {
    let part = partition(raster.width, raster.height, raster.transform, config)?;
    if let Some(m) = model {
        m.check_compatible(config, raster.cell_size())?;
    }
    if part.windows.is_empty() {
        warn!(
            width = raster.width,
            height = raster.height,
            side = part.geometry.side,
            "Raster holds no complete analysis window"
        );
    }
    info!(
        scale = %config.scale.label,
        windows = part.windows.len(),
        side = part.geometry.side,
        step = part.geometry.step,
        "Processing raster"
    );

    let engine = MetricEngine::new(config);
    let with_econ = config.edge_contrast;
    let mosaic = || Mosaic::new(&part, with_econ).with_spatial_ref(raster.spatial_ref.clone());
    let observed = mosaic();
    let calibrated = model.map(|_| mosaic());

    let processed = AtomicUsize::new(0);
    let undefined = AtomicUsize::new(0);
    let cancelled = AtomicUsize::new(0);

    part.windows.par_iter().try_for_each(|w| -> Result<()> {
        if cancel.is_cancelled() {
            cancelled.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        let cells = raster.window(w.row, w.col, w.rows, w.cols);
        let metrics = engine.compute(&cells);
        if metrics.is_all_undefined() {
            undefined.fetch_add(1, Ordering::Relaxed);
            debug!(row = w.grid_row, col = w.grid_col, "Window has no valid cells");
        }
        let econ = with_econ.then(|| engine.edge_contrast(&cells));

        observed.place(w.centroid, encode_vector(&metrics, econ), w.boundary)?;
        if let (Some(model), Some(out)) = (model, calibrated.as_ref()) {
            let (canopy, shadow) = cover_proportions(&cells);
            let values = model.apply(&metrics, canopy, shadow);
            out.place(w.centroid, values.encode(econ), w.boundary)?;
        }
        processed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    })?;

    let summary = RunSummary {
        windows: part.windows.len(),
        processed: processed.into_inner(),
        undefined: undefined.into_inner(),
        boundary: part.windows.iter().filter(|w| w.boundary).count(),
        cancelled: cancelled.into_inner(),
    };
    if summary.cancelled > 0 {
        warn!(cancelled = summary.cancelled, "Run cancelled; unprocessed cells left empty");
    }
    info!(?summary, "Raster processed");

    let mark = config.boundary == BoundaryPolicy::Mark;
    let label = &config.scale.label;
    Ok(RunOutput {
        observed: observed.finish(label, CalibrationStatus::Observed, mark),
        calibrated: calibrated.map(|m| m.finish(label, CalibrationStatus::Calibrated, mark)),
        summary,
    })
}
