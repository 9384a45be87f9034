//! Run configuration for metric computation, with fail-fast validation.

use serde::{Deserialize, Serialize};

use crate::error::{LsmError, Result};
use crate::raster::CellClass;

/// Square metres in one acre.
pub const SQ_M_PER_ACRE: f64 = 4046.856_422_4;

/// Largest accepted relative difference between the area of a whole-cell
/// window and the area its scale label names.
pub const AREA_TOLERANCE: f64 = 0.05;

/// Analysis scale: the ground area covered by one analysis window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scale {
    /// Token used in output names, e.g. `1_acre`.
    pub label: String,
    pub area_m2: f64,
}

impl Scale {
    pub fn acres(acres: f64) -> Self {
        let label = if acres.fract() == 0.0 {
            format!("{}_acre", acres as u64)
        } else {
            format!("{}_acre", acres.to_string().replace('.', "p"))
        };
        Self { label, area_m2: acres * SQ_M_PER_ACRE }
    }

    /// Side length (m) of the square window of this area.
    pub fn side_m(&self) -> f64 {
        self.area_m2.sqrt()
    }

    /// Window side in cells, rounded to the nearest whole cell.
    pub fn side_cells(&self, cell_size: f64) -> usize {
        (self.side_m() / cell_size).round() as usize
    }

    /// Window side in whole cells at `cell_size`, rejecting a non-positive
    /// area and any window whose realised area misses the labelled area by
    /// more than [`AREA_TOLERANCE`].
    pub fn window_side(&self, cell_size: f64) -> Result<usize> {
        if !(cell_size.is_finite() && cell_size > 0.0) {
            return Err(LsmError::config("cell_size", cell_size, "must be a positive finite length"));
        }
        if !(self.area_m2.is_finite() && self.area_m2 > 0.0) {
            return Err(LsmError::config("scale.area_m2", self.area_m2, "must be a positive area"));
        }
        let side = self.side_cells(cell_size);
        if side == 0 {
            return Err(LsmError::config(
                "scale.area_m2",
                self.area_m2,
                format!("window is smaller than one {cell_size} m cell"),
            ));
        }
        let realised = (side as f64 * cell_size).powi(2);
        let error = (realised - self.area_m2).abs() / self.area_m2;
        if error > AREA_TOLERANCE {
            return Err(LsmError::config(
                "scale.area_m2",
                self.area_m2,
                format!(
                    "a {side}-cell window at {cell_size} m covers {realised:.1} m2 ({:.1}% off {})",
                    error * 100.0,
                    self.label
                ),
            ));
        }
        Ok(side)
    }
}

impl Default for Scale {
    fn default() -> Self {
        Scale::acres(1.0)
    }
}

/// How analysis windows are laid over the raster.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SamplingMode {
    /// Non-overlapping windows; output resolution equals the window size.
    Disjoint,
    /// Block subsampling: windows advance by `step_fraction` of their size.
    Overlapping { step_fraction: f64 },
}

impl SamplingMode {
    pub fn step_fraction(&self) -> f64 {
        match *self {
            SamplingMode::Disjoint => 1.0,
            SamplingMode::Overlapping { step_fraction } => step_fraction,
        }
    }
}

/// Treatment of windows that overhang the raster edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryPolicy {
    /// Only full windows are processed.
    Exclude,
    /// Partial windows are processed on their clipped extent and flagged.
    Mark,
}

/// Neighbourhood rule for patch delineation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Connectivity {
    /// Rook (edge-sharing) neighbours.
    Four,
    /// Queen (edge- or corner-sharing) neighbours.
    Eight,
}

/// Connectivity used by each metric family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityRules {
    /// AREA_MN, AREA_AM, LPI, GYRATE_AM.
    pub area: Connectivity,
    /// SHAPE_*, FRAC_*.
    pub shape: Connectivity,
    /// CORE_AM.
    pub core: Connectivity,
    /// ENN_MN, ENN_CV.
    pub isolation: Connectivity,
}

impl Default for ConnectivityRules {
    fn default() -> Self {
        Self {
            area: Connectivity::Four,
            shape: Connectivity::Four,
            core: Connectivity::Four,
            isolation: Connectivity::Four,
        }
    }
}

/// Which patches enter the metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricScope {
    /// Patches of every valid class.
    Landscape,
    /// Patches of one focal class only.
    Class(CellClass),
}

/// Symmetric edge-contrast weights in [0, 1]. `None` marks a pairing whose
/// contrast is not defined.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ContrastMatrix {
    weights: [[Option<f64>; 3]; 3],
}

impl ContrastMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, a: CellClass, b: CellClass, weight: f64) -> Self {
        self.weights[a.index()][b.index()] = Some(weight);
        self.weights[b.index()][a.index()] = Some(weight);
        self
    }

    pub fn get(&self, a: CellClass, b: CellClass) -> Option<f64> {
        if a == b {
            return Some(0.0);
        }
        self.weights[a.index()][b.index()]
    }

    /// First unlike pairing without a defined weight, if any.
    pub fn undefined_pair(&self) -> Option<(CellClass, CellClass)> {
        for (i, &a) in CellClass::ALL.iter().enumerate() {
            for &b in &CellClass::ALL[i + 1..] {
                if self.get(a, b).is_none() {
                    return Some((a, b));
                }
            }
        }
        None
    }
}

/// Full configuration surface for one production run at one scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LsmConfig {
    pub scale: Scale,
    pub sampling: SamplingMode,
    pub boundary: BoundaryPolicy,
    /// Edge depth in cells for core-area metrics.
    pub edge_depth: usize,
    pub connectivity: ConnectivityRules,
    pub scope: MetricScope,
    pub contrast: Option<ContrastMatrix>,
    /// Also compute the landscape edge contrast index.
    pub edge_contrast: bool,
}

impl Default for LsmConfig {
    fn default() -> Self {
        Self {
            scale: Scale::default(),
            sampling: SamplingMode::Disjoint,
            boundary: BoundaryPolicy::Exclude,
            edge_depth: 1,
            connectivity: ConnectivityRules::default(),
            scope: MetricScope::Landscape,
            contrast: None,
            edge_contrast: false,
        }
    }
}

/// Window geometry in cells, derived from a validated configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowGeometry {
    pub side: usize,
    pub step: usize,
}

impl LsmConfig {
    /// Check the configuration against the raster's cell size and derive the
    /// window geometry. Any failure here is fatal for the run.
    pub fn validate(&self, cell_size: f64) -> Result<WindowGeometry> {
        let side = self.scale.window_side(cell_size)?;

        let fraction = self.sampling.step_fraction();
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(LsmError::config("step_fraction", fraction, "must lie in (0, 1]"));
        }
        let step_exact = side as f64 * fraction;
        let step = step_exact.round();
        if (step_exact - step).abs() > 1e-6 || step < 1.0 {
            return Err(LsmError::config(
                "step_fraction",
                fraction,
                format!("does not give a whole-cell step for a {side}-cell window"),
            ));
        }
        let step = step as usize;
        if side % step != 0 {
            return Err(LsmError::config(
                "step_fraction",
                fraction,
                format!("a {step}-cell step does not divide a {side}-cell window evenly"),
            ));
        }

        if self.edge_depth == 0 {
            return Err(LsmError::config("edge_depth", self.edge_depth, "must be at least one cell"));
        }

        if self.edge_contrast {
            let matrix = self.contrast.as_ref().ok_or_else(|| {
                LsmError::config("contrast", "none", "edge contrast requested without a weight matrix")
            })?;
            if let Some((a, b)) = matrix.undefined_pair() {
                return Err(LsmError::config(
                    "contrast",
                    format!("{a:?}/{b:?}"),
                    "contrast weight is undefined for this class pairing",
                ));
            }
            for &a in &CellClass::ALL {
                for &b in &CellClass::ALL {
                    if let Some(w) = matrix.get(a, b) {
                        if !(0.0..=1.0).contains(&w) {
                            return Err(LsmError::config("contrast", w, "weights must lie in [0, 1]"));
                        }
                    }
                }
            }
        }

        Ok(WindowGeometry { side, step })
    }

    /// The settings that change what a metric value means, at `cell_size`.
    pub fn metric_settings(&self, cell_size: f64) -> MetricSettings {
        MetricSettings {
            cell_size,
            edge_depth: self.edge_depth,
            connectivity: self.connectivity,
            scope: self.scope,
        }
    }
}

/// Metric definitions a calibration model was fitted under. Values computed
/// under different settings are not comparable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSettings {
    pub cell_size: f64,
    pub edge_depth: usize,
    pub connectivity: ConnectivityRules,
    pub scope: MetricScope,
}

impl MetricSettings {
    /// First setting that differs from `other`, as `(name, mine, theirs)`.
    pub fn mismatch(&self, other: &MetricSettings) -> Option<(&'static str, String, String)> {
        if (self.cell_size - other.cell_size).abs() > 1e-9 * self.cell_size.abs().max(1.0) {
            return Some(("cell_size", self.cell_size.to_string(), other.cell_size.to_string()));
        }
        if self.edge_depth != other.edge_depth {
            return Some(("edge_depth", self.edge_depth.to_string(), other.edge_depth.to_string()));
        }
        if self.connectivity != other.connectivity {
            return Some(("connectivity", format!("{:?}", self.connectivity), format!("{:?}", other.connectivity)));
        }
        if self.scope != other.scope {
            return Some(("scope", format!("{:?}", self.scope), format!("{:?}", other.scope)));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acre_labels_encode_scale() {
        assert_eq!(Scale::acres(1.0).label, "1_acre");
        assert_eq!(Scale::acres(0.5).label, "0p5_acre");
        assert!((Scale::acres(2.0).area_m2 - 2.0 * SQ_M_PER_ACRE).abs() < 1e-9);
    }

    #[test]
    fn default_config_validates_at_naip_resolution() {
        let geom = LsmConfig::default().validate(0.6).unwrap();
        // sqrt(4046.86) / 0.6 = 106.02
        assert_eq!(geom.side, 106);
        assert_eq!(geom.step, 106);
    }

    #[test]
    fn half_step_must_split_window_evenly() {
        let mut cfg = LsmConfig {
            scale: Scale { label: "test".into(), area_m2: 100.0 },
            sampling: SamplingMode::Overlapping { step_fraction: 0.5 },
            ..LsmConfig::default()
        };
        assert_eq!(cfg.validate(1.0).unwrap(), WindowGeometry { side: 10, step: 5 });

        cfg.sampling = SamplingMode::Overlapping { step_fraction: 0.3 };
        assert!(matches!(cfg.validate(1.0), Err(LsmError::Config { name: "step_fraction", .. })));
    }

    #[test]
    fn step_that_leaves_a_remainder_is_rejected() {
        let cfg = LsmConfig {
            scale: Scale { label: "test".into(), area_m2: 100.0 },
            sampling: SamplingMode::Overlapping { step_fraction: 0.4 },
            ..LsmConfig::default()
        };
        // 10 x 0.4 = 4 whole cells, but 10 % 4 != 0.
        let err = cfg.validate(1.0).unwrap_err();
        assert!(matches!(err, LsmError::Config { name: "step_fraction", .. }));
        assert!(err.to_string().contains("evenly"));

        let quarter = LsmConfig {
            scale: Scale { label: "test".into(), area_m2: 400.0 },
            sampling: SamplingMode::Overlapping { step_fraction: 0.25 },
            ..LsmConfig::default()
        };
        assert_eq!(quarter.validate(1.0).unwrap(), WindowGeometry { side: 20, step: 5 });
    }

    #[test]
    fn coarse_cells_that_miss_the_scale_area_are_rejected() {
        // sqrt(4046.86) / 30 = 2.12 -> 2 cells = 3600 m2, 11% short.
        let err = LsmConfig::default().validate(30.0).unwrap_err();
        assert!(matches!(err, LsmError::Config { name: "scale.area_m2", .. }));
        // 63.6 m side at 0.6 m is within 0.05% of one acre.
        assert!(LsmConfig::default().validate(0.6).is_ok());
        assert!(Scale { label: "bad".into(), area_m2: f64::NAN }.window_side(1.0).is_err());
        assert!(Scale::default().window_side(0.0).is_err());
    }

    #[test]
    fn metric_settings_report_the_first_difference() {
        let base = LsmConfig::default().metric_settings(0.6);
        assert_eq!(base.mismatch(&base), None);
        let deeper = LsmConfig { edge_depth: 3, ..LsmConfig::default() }.metric_settings(0.6);
        assert_eq!(base.mismatch(&deeper).map(|m| m.0), Some("edge_depth"));
        assert_eq!(base.mismatch(&LsmConfig::default().metric_settings(1.0)).map(|m| m.0), Some("cell_size"));
        let queen = LsmConfig {
            connectivity: ConnectivityRules { isolation: Connectivity::Eight, ..ConnectivityRules::default() },
            ..LsmConfig::default()
        };
        assert_eq!(base.mismatch(&queen.metric_settings(0.6)).map(|m| m.0), Some("connectivity"));
    }

    #[test]
    fn zero_edge_depth_is_rejected() {
        let cfg = LsmConfig { edge_depth: 0, ..LsmConfig::default() };
        assert!(matches!(cfg.validate(1.0), Err(LsmError::Config { name: "edge_depth", .. })));
    }

    #[test]
    fn edge_contrast_with_undefined_pair_fails_fast() {
        let matrix = ContrastMatrix::new()
            .with(CellClass::Canopy, CellClass::Shadow, 0.2)
            .with(CellClass::Shadow, CellClass::Other, 0.8);
        let cfg = LsmConfig {
            contrast: Some(matrix),
            edge_contrast: true,
            ..LsmConfig::default()
        };
        assert!(matches!(cfg.validate(1.0), Err(LsmError::Config { name: "contrast", .. })));

        let full = matrix.with(CellClass::Canopy, CellClass::Other, 1.0);
        let cfg = LsmConfig { contrast: Some(full), ..cfg };
        assert!(cfg.validate(1.0).is_ok());
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = LsmConfig {
            sampling: SamplingMode::Overlapping { step_fraction: 0.5 },
            scope: MetricScope::Class(CellClass::Canopy),
            ..LsmConfig::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: LsmConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }
}
