//! Landscape structure metrics.
//!
//! Thirteen FRAGSTATS-equivalent metrics, computed per analysis window and
//! reported as a `MetricVector` in the fixed output band order.
pub mod aggregation;
pub mod area;
pub mod engine;
pub mod isolation;
pub mod shape;
mod stats;

use serde::{Deserialize, Serialize};

use crate::error::{LsmError, Result};

pub use engine::MetricEngine;

/// The fixed metric set, declared in output band order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Metric {
    #[serde(rename = "AREA_MN")]
    AreaMn,
    #[serde(rename = "AI")]
    Ai,
    #[serde(rename = "ENN_MN")]
    EnnMn,
    #[serde(rename = "SHAPE_MN")]
    ShapeMn,
    #[serde(rename = "FRAC_MN")]
    FracMn,
    #[serde(rename = "FRAC_AM")]
    FracAm,
    #[serde(rename = "FRAC_CV")]
    FracCv,
    #[serde(rename = "ENN_CV")]
    EnnCv,
    #[serde(rename = "LPI")]
    Lpi,
    #[serde(rename = "AREA_AM")]
    AreaAm,
    #[serde(rename = "CORE_AM")]
    CoreAm,
    #[serde(rename = "GYRATE_AM")]
    GyrateAm,
    #[serde(rename = "SHAPE_AM")]
    ShapeAm,
}

pub const N_METRICS: usize = 13;

impl Metric {
    /// All metrics in band order.
    pub const ALL: [Metric; N_METRICS] = [
        Metric::AreaMn,
        Metric::Ai,
        Metric::EnnMn,
        Metric::ShapeMn,
        Metric::FracMn,
        Metric::FracAm,
        Metric::FracCv,
        Metric::EnnCv,
        Metric::Lpi,
        Metric::AreaAm,
        Metric::CoreAm,
        Metric::GyrateAm,
        Metric::ShapeAm,
    ];

    /// Zero-based output band.
    #[inline]
    pub fn band(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Metric::AreaMn => "AREA_MN",
            Metric::Ai => "AI",
            Metric::EnnMn => "ENN_MN",
            Metric::ShapeMn => "SHAPE_MN",
            Metric::FracMn => "FRAC_MN",
            Metric::FracAm => "FRAC_AM",
            Metric::FracCv => "FRAC_CV",
            Metric::EnnCv => "ENN_CV",
            Metric::Lpi => "LPI",
            Metric::AreaAm => "AREA_AM",
            Metric::CoreAm => "CORE_AM",
            Metric::GyrateAm => "GYRATE_AM",
            Metric::ShapeAm => "SHAPE_AM",
        }
    }
}

/// One value per metric for one window. `None` means undefined (no valid
/// cells, no neighbours, too few patches) and is never coerced to zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricVector {
    values: [Option<f64>; N_METRICS],
}

impl MetricVector {
    /// A vector with every metric undefined.
    pub fn undefined() -> Self {
        Self::default()
    }

    #[inline]
    pub fn get(&self, metric: Metric) -> Option<f64> {
        self.values[metric.band()]
    }

    /// The value of `metric`, or `UndefinedMetric` when it has none.
    pub fn require(&self, metric: Metric) -> Result<f64> {
        self.get(metric).ok_or_else(|| LsmError::UndefinedMetric {
            metric: metric.name(),
            reason: "no value for this window".into(),
        })
    }

    /// Store a value; non-finite inputs are recorded as undefined.
    #[inline]
    pub fn set(&mut self, metric: Metric, value: Option<f64>) {
        self.values[metric.band()] = value.filter(|v| v.is_finite());
    }

    pub fn iter(&self) -> impl Iterator<Item = (Metric, Option<f64>)> + '_ {
        Metric::ALL.iter().map(move |&m| (m, self.get(m)))
    }

    pub fn is_all_undefined(&self) -> bool {
        self.values.iter().all(|v| v.is_none())
    }
}
