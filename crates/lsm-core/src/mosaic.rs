//! Tile aggregation: per-window results → one multi-band output raster.
//!
//! Every output cell owns a once-only slot. Windows may finish in any order
//! and on any thread; the first (and only legitimate) write to a cell wins and
//! any second write is reported as a `CellConflict` instead of overwriting.
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::error::{LsmError, Result};
use crate::metrics::{Metric, MetricVector};
use crate::partition::Partition;
use crate::raster::{GeoTransform, SpatialRef};

// ── Sentinels ───────────────────────────────────────────────────────────────

/// Metric undefined for the window (no valid cells, no neighbour, ...).
pub const UNDEFINED: f32 = -9999.0;
/// Calibration was requested but no usable fit exists for this metric/scale.
pub const UNCALIBRATED: f32 = -9998.0;
/// No window was processed for this cell (edge exclusion or cancellation).
pub const UNPROCESSED: f32 = -9997.0;

/// Band name of the optional edge-contrast band appended after the 13 metrics.
pub const ECON_BAND: &str = "ECON";

/// Whether output values went through the calibration model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationStatus {
    Observed,
    Calibrated,
}

impl CalibrationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CalibrationStatus::Observed => "observed",
            CalibrationStatus::Calibrated => "calibrated",
        }
    }
}

/// Encode an optional metric value for output.
#[inline]
pub fn encode(value: Option<f64>) -> f32 {
    match value {
        Some(v) if v.is_finite() => v as f32,
        _ => UNDEFINED,
    }
}

/// Band values of an observed metric vector, plus the optional extra band.
pub fn encode_vector(metrics: &MetricVector, econ: Option<Option<f64>>) -> Vec<f32> {
    let mut out: Vec<f32> = metrics.iter().map(|(_, v)| encode(v)).collect();
    if let Some(e) = econ {
        out.push(encode(e));
    }
    out
}

#[derive(Debug)]
struct CellRecord {
    values: Vec<f32>,
    boundary: bool,
}

/// Concurrent, write-once assembly of window results.
#[derive(Debug)]
pub struct Mosaic {
    rows: usize,
    cols: usize,
    transform: GeoTransform,
    spatial_ref: SpatialRef,
    band_names: Vec<String>,
    slots: Vec<OnceLock<CellRecord>>,
}

impl Mosaic {
    /// An empty mosaic over the output grid of `partition`.
    pub fn new(partition: &Partition, with_econ: bool) -> Self {
        let mut band_names: Vec<String> = Metric::ALL.iter().map(|m| m.name().to_string()).collect();
        if with_econ {
            band_names.push(ECON_BAND.to_string());
        }
        let n = partition.grid_rows * partition.grid_cols;
        Self {
            rows: partition.grid_rows,
            cols: partition.grid_cols,
            transform: partition.output_transform,
            spatial_ref: SpatialRef::default(),
            band_names,
            slots: (0..n).map(|_| OnceLock::new()).collect(),
        }
    }

    /// Carry the input raster's spatial reference to the output.
    pub fn with_spatial_ref(mut self, spatial_ref: SpatialRef) -> Self {
        self.spatial_ref = spatial_ref;
        self
    }

    pub fn n_bands(&self) -> usize {
        self.band_names.len()
    }

    /// Output cell nearest to a map coordinate.
    pub fn cell_at(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let t = &self.transform;
        let col = ((x - t.origin_x) / t.cell_size).floor();
        let row = ((t.origin_y - y) / t.cell_size).floor();
        if row < 0.0 || col < 0.0 || row >= self.rows as f64 || col >= self.cols as f64 {
            return None;
        }
        Some((row as usize, col as usize))
    }

    /// Write one window's band values at the output cell nearest its centroid.
    pub fn place(&self, centroid: (f64, f64), values: Vec<f32>, boundary: bool) -> Result<()> {
        if values.len() != self.n_bands() {
            return Err(LsmError::InputData(format!(
                "expected {} band values, got {}",
                self.n_bands(),
                values.len()
            )));
        }
        let (row, col) = self.cell_at(centroid.0, centroid.1).ok_or_else(|| {
            LsmError::InputData(format!("window centroid {centroid:?} lies outside the output grid"))
        })?;
        self.slots[row * self.cols + col]
            .set(CellRecord { values, boundary })
            .map_err(|_| LsmError::CellConflict { row, col })
    }

    /// Number of cells written so far.
    pub fn filled(&self) -> usize {
        self.slots.iter().filter(|s| s.get().is_some()).count()
    }

    /// Finish assembly. Cells never written hold `UNPROCESSED`.
    pub fn finish(self, scale: &str, status: CalibrationStatus, mark_boundary: bool) -> OutputLsmRaster {
        let n = self.rows * self.cols;
        let mut bands = vec![vec![UNPROCESSED; n]; self.band_names.len()];
        let mut mask = mark_boundary.then(|| vec![0u8; n]);
        for (i, slot) in self.slots.into_iter().enumerate() {
            let Some(record) = slot.into_inner() else {
                continue;
            };
            for (band, v) in bands.iter_mut().zip(record.values) {
                band[i] = v;
            }
            if let Some(m) = mask.as_mut() {
                m[i] = record.boundary as u8;
            }
        }
        OutputLsmRaster {
            scale: scale.to_string(),
            status,
            width: self.cols,
            height: self.rows,
            transform: self.transform,
            spatial_ref: self.spatial_ref,
            band_names: self.band_names,
            bands,
            boundary_mask: mask,
        }
    }
}

/// One multi-band LSM raster for one scale and calibration status.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputLsmRaster {
    pub scale: String,
    pub status: CalibrationStatus,
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    pub spatial_ref: SpatialRef,
    /// 13 metric names in band order, optionally followed by `ECON`.
    pub band_names: Vec<String>,
    pub bands: Vec<Vec<f32>>,
    /// 1 where the value came from a clipped boundary window (Mark policy).
    pub boundary_mask: Option<Vec<u8>>,
}

impl OutputLsmRaster {
    pub fn band(&self, metric: Metric) -> &[f32] {
        &self.bands[metric.band()]
    }

    pub fn value(&self, metric: Metric, row: usize, col: usize) -> f32 {
        self.bands[metric.band()][row * self.width + col]
    }

    /// Output file name encoding tile, scale token and calibration status.
    pub fn file_name(&self, tile: &str) -> String {
        output_file_name(tile, &self.scale, self.status)
    }
}

/// `"{tile}_{scale}_{observed|calibrated}.tif"`.
pub fn output_file_name(tile: &str, scale_label: &str, status: CalibrationStatus) -> String {
    format!("{tile}_{scale_label}_{}.tif", status.as_str())
}
