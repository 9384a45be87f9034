//! Shadow-bias calibration.
//!
//! One ordinary least-squares regression per metric and scale:
//! ```text
//!   y = β₀ + β₁x + β₂c + β₃r + β₄xc + β₅xr + β₆cr
//! ```
//! with `y` the true (shadow-free) value, `x` the observed value, `c` the
//! canopy proportion and `r = shadow / canopy`. Solved by SVD so that a rank
//! deficient design is detected instead of producing wild coefficients.
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use nalgebra::{DMatrix, DVector, SVD};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{LsmConfig, MetricSettings, Scale};
use crate::error::{LsmError, Result};
use crate::metrics::{Metric, MetricEngine, MetricVector, N_METRICS};
use crate::mosaic::{encode, UNCALIBRATED, UNDEFINED};
use crate::raster::{CellClass, ClassifiedRaster};
use crate::simulate::SimulatedStand;

pub const N_COEFFICIENTS: usize = 7;

/// Fits need at least this many usable rows.
pub const MIN_SAMPLES: usize = 2 * N_COEFFICIENTS;

// ── Training data ───────────────────────────────────────────────────────────

/// One training row: a window seen with and without shadows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSample {
    pub observed: MetricVector,
    pub truth: MetricVector,
    /// Canopy proportion of the observed window.
    pub canopy: f64,
    /// Shadow proportion of the observed window.
    pub shadow: f64,
}

/// Canopy and shadow proportions of a window, zero when it has no valid cell.
pub fn cover_proportions(window: &ClassifiedRaster) -> (f64, f64) {
    (
        window.proportion(CellClass::Canopy).unwrap_or(0.0),
        window.proportion(CellClass::Shadow).unwrap_or(0.0),
    )
}

impl CalibrationSample {
    pub fn from_stand(engine: &MetricEngine, stand: &SimulatedStand) -> Self {
        let (canopy, shadow) = cover_proportions(&stand.rasters.observed);
        Self {
            observed: engine.compute(&stand.rasters.observed),
            truth: engine.compute(&stand.rasters.truth),
            canopy,
            shadow,
        }
    }
}

/// Metric both renderings of every stand, in parallel.
pub fn build_samples(engine: &MetricEngine, stands: &[SimulatedStand]) -> Vec<CalibrationSample> {
    stands.par_iter().map(|s| CalibrationSample::from_stand(engine, s)).collect()
}

/// Shadow-to-canopy ratio; undefined without canopy.
pub fn shadow_ratio(canopy: f64, shadow: f64) -> Option<f64> {
    (canopy > 0.0).then(|| shadow / canopy)
}

fn design_row(x: f64, c: f64, r: f64) -> [f64; N_COEFFICIENTS] {
    [1.0, x, c, r, x * c, x * r, c * r]
}

// ── Fitting ─────────────────────────────────────────────────────────────────

/// Outcome of fitting one metric at one scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MetricFit {
    Fitted {
        /// β₀..β₆ in design-row order.
        coefficients: [f64; N_COEFFICIENTS],
        residual_se: f64,
        n: usize,
    },
    Failed {
        reason: String,
    },
}

/// Result of calibrating one value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibratedValue {
    Value(f64),
    /// Undefined upstream; passed through untouched.
    Undefined,
    /// No usable fit, or covariates outside the model's domain.
    Uncalibrated,
}

impl CalibratedValue {
    pub fn encode(self) -> f32 {
        match self {
            CalibratedValue::Value(v) => encode(Some(v)),
            CalibratedValue::Undefined => UNDEFINED,
            CalibratedValue::Uncalibrated => UNCALIBRATED,
        }
    }
}

impl MetricFit {
    pub fn predict(&self, observed: Option<f64>, canopy: f64, shadow: f64) -> CalibratedValue {
        let Some(x) = observed else {
            return CalibratedValue::Undefined;
        };
        let MetricFit::Fitted { coefficients, .. } = self else {
            return CalibratedValue::Uncalibrated;
        };
        let Some(r) = shadow_ratio(canopy, shadow) else {
            return CalibratedValue::Uncalibrated;
        };
        let y: f64 = design_row(x, canopy, r).iter().zip(coefficients).map(|(a, b)| a * b).sum();
        if y.is_finite() {
            CalibratedValue::Value(y)
        } else {
            CalibratedValue::Uncalibrated
        }
    }

    pub fn is_fitted(&self) -> bool {
        matches!(self, MetricFit::Fitted { .. })
    }
}

/// Least-squares fit of one metric. Rows with an undefined observed or true
/// value, or without canopy, are skipped.
pub fn fit_metric(metric: Metric, scale: &Scale, samples: &[CalibrationSample]) -> Result<MetricFit> {
    let fail = |reason: String| LsmError::ModelFit { metric: metric.name(), scale: scale.label.clone(), reason };

    let rows: Vec<([f64; N_COEFFICIENTS], f64)> = samples
        .iter()
        .filter_map(|s| {
            let x = s.observed.get(metric)?;
            let y = s.truth.get(metric)?;
            let r = shadow_ratio(s.canopy, s.shadow)?;
            Some((design_row(x, s.canopy, r), y))
        })
        .collect();
    let n = rows.len();
    if n < MIN_SAMPLES {
        return Err(fail(format!("insufficient samples: {n} usable rows, need {MIN_SAMPLES}")));
    }

    let x = DMatrix::from_fn(n, N_COEFFICIENTS, |i, j| rows[i].0[j]);
    let y = DVector::from_fn(n, |i, _| rows[i].1);

    let svd = SVD::new(x.clone(), true, true);
    let max_sv = svd.singular_values.max();
    let eps = max_sv * 1e-10;
    let rank = svd.rank(eps);
    if rank < N_COEFFICIENTS {
        return Err(fail(format!("design matrix is singular (rank {rank} of {N_COEFFICIENTS})")));
    }
    let beta = svd.solve(&y, eps).map_err(|e| fail(e.to_string()))?;

    let residuals = &y - &x * &beta;
    let residual_se = (residuals.norm_squared() / (n - N_COEFFICIENTS) as f64).sqrt();
    let mut coefficients = [0.0; N_COEFFICIENTS];
    for (c, b) in coefficients.iter_mut().zip(beta.iter()) {
        *c = *b;
    }
    if coefficients.iter().any(|c| !c.is_finite()) {
        return Err(fail("non-finite coefficients".into()));
    }
    Ok(MetricFit::Fitted { coefficients, residual_se, n })
}

// ── Models ──────────────────────────────────────────────────────────────────

/// The calibrated values of one window, in band order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibratedVector {
    pub values: [CalibratedValue; N_METRICS],
}

impl CalibratedVector {
    pub fn get(&self, metric: Metric) -> CalibratedValue {
        self.values[metric.band()]
    }

    /// Output band values; `econ` is passed through uncalibrated.
    pub fn encode(&self, econ: Option<Option<f64>>) -> Vec<f32> {
        let mut out: Vec<f32> = self.values.iter().map(|v| v.encode()).collect();
        if let Some(e) = econ {
            out.push(encode(e));
        }
        out
    }
}

/// Thirteen independent fits for one scale, valid only for metrics computed
/// under the same settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationModel {
    pub scale: Scale,
    pub settings: MetricSettings,
    pub fits: BTreeMap<Metric, MetricFit>,
}

impl CalibrationModel {
    /// Fit every metric. A failure is recorded for its metric only.
    pub fn fit(scale: &Scale, settings: MetricSettings, samples: &[CalibrationSample]) -> Self {
        let fits = Metric::ALL
            .iter()
            .map(|&m| {
                let fit = fit_metric(m, scale, samples).unwrap_or_else(|e| {
                    warn!("{e}");
                    MetricFit::Failed { reason: e.to_string() }
                });
                (m, fit)
            })
            .collect::<BTreeMap<_, _>>();
        let fitted = fits.values().filter(|f| f.is_fitted()).count();
        info!(scale = %scale.label, fitted, samples = samples.len(), "Calibration model fitted");
        Self { scale: scale.clone(), settings, fits }
    }

    /// Reject a production run whose scale or metric settings differ from
    /// the ones this model was fitted under.
    pub fn check_compatible(&self, config: &LsmConfig, cell_size: f64) -> Result<()> {
        if self.scale.label != config.scale.label {
            return Err(LsmError::config(
                "calibration",
                &self.scale.label,
                format!("model was fitted for another scale than {}", config.scale.label),
            ));
        }
        if let Some((name, fitted, run)) = self.settings.mismatch(&config.metric_settings(cell_size)) {
            return Err(LsmError::config(
                "calibration",
                format!("{name}={fitted}"),
                format!("model was fitted with {name} {fitted}, run uses {run}"),
            ));
        }
        Ok(())
    }

    pub fn fit_for(&self, metric: Metric) -> Option<&MetricFit> {
        self.fits.get(&metric)
    }

    /// Calibrate one observed vector given the window's cover proportions.
    pub fn apply(&self, observed: &MetricVector, canopy: f64, shadow: f64) -> CalibratedVector {
        let mut values = [CalibratedValue::Uncalibrated; Metric::ALL.len()];
        for (metric, x) in observed.iter() {
            values[metric.band()] = match self.fits.get(&metric) {
                Some(fit) => fit.predict(x, canopy, shadow),
                None if x.is_none() => CalibratedValue::Undefined,
                None => CalibratedValue::Uncalibrated,
            };
        }
        CalibratedVector { values }
    }
}

/// Fitted models for several scales, persisted as JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSet {
    pub models: Vec<CalibrationModel>,
}

impl CalibrationSet {
    /// Model whose scale label matches.
    pub fn for_scale(&self, label: &str) -> Option<&CalibrationModel> {
        self.models.iter().find(|m| m.scale.label == label)
    }

    /// Insert or replace the model for its scale.
    pub fn insert(&mut self, model: CalibrationModel) {
        self.models.retain(|m| m.scale.label != model.scale.label);
        self.models.push(model);
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn settings() -> MetricSettings {
        LsmConfig::default().metric_settings(0.6)
    }

    const BETA: [f64; N_COEFFICIENTS] = [2.0, 0.9, -1.5, 3.0, 0.25, -0.4, 1.2];

    fn row(i: usize) -> (f64, f64, f64) {
        let x = 5.0 + (i * 7 % 23) as f64;
        let c = 0.1 + (i * 5 % 17) as f64 / 40.0;
        let s = 0.02 + (i * 3 % 11) as f64 / 60.0;
        (x, c, s)
    }

    fn truth(x: f64, c: f64, s: f64) -> f64 {
        design_row(x, c, s / c).iter().zip(BETA).map(|(a, b)| a * b).sum()
    }

    fn samples(n: usize, noise: f64) -> Vec<CalibrationSample> {
        (0..n)
            .map(|i| {
                let (x, c, s) = row(i);
                let wobble = if i % 2 == 0 { noise } else { -noise };
                let mut observed = MetricVector::undefined();
                let mut t = MetricVector::undefined();
                for &m in &Metric::ALL {
                    observed.set(m, Some(x));
                    t.set(m, Some(truth(x, c, s) + wobble));
                }
                CalibrationSample { observed, truth: t, canopy: c, shadow: s }
            })
            .collect()
    }

    #[test]
    fn exact_data_recovers_coefficients() {
        let fit = fit_metric(Metric::AreaMn, &Scale::default(), &samples(60, 0.0)).unwrap();
        let MetricFit::Fitted { coefficients, residual_se, n } = fit else {
            panic!("expected a fit");
        };
        assert_eq!(n, 60);
        assert!(residual_se < 1e-8);
        for (b, e) in coefficients.iter().zip(BETA) {
            assert_relative_eq!(*b, e, epsilon = 1e-6);
        }
    }

    #[test]
    fn applying_to_training_rows_stays_within_residual_tolerance() {
        let data = samples(80, 0.05);
        let model = CalibrationModel::fit(&Scale::default(), settings(), &data);
        let Some(MetricFit::Fitted { residual_se, .. }) = model.fit_for(Metric::Ai) else {
            panic!("AI should be fitted");
        };
        for s in &data {
            let CalibratedValue::Value(v) = model.apply(&s.observed, s.canopy, s.shadow).get(Metric::Ai) else {
                panic!("expected a calibrated value");
            };
            assert!((v - s.truth.get(Metric::Ai).unwrap()).abs() < 4.0 * residual_se + 1e-9);
        }
        // Deterministic given the same fit.
        let a = model.apply(&data[3].observed, data[3].canopy, data[3].shadow);
        let b = model.apply(&data[3].observed, data[3].canopy, data[3].shadow);
        assert_eq!(a, b);
    }

    #[test]
    fn too_few_samples_is_a_model_fit_error() {
        let err = fit_metric(Metric::Lpi, &Scale::default(), &samples(MIN_SAMPLES - 1, 0.0)).unwrap_err();
        assert!(matches!(err, LsmError::ModelFit { metric: "LPI", .. }));
        let model = CalibrationModel::fit(&Scale::default(), settings(), &samples(5, 0.0));
        assert!(model.fits.values().all(|f| !f.is_fitted()));
        let out = model.apply(&samples(1, 0.0)[0].observed, 0.3, 0.1);
        assert_eq!(out.get(Metric::Lpi), CalibratedValue::Uncalibrated);
        assert_eq!(out.get(Metric::Lpi).encode(), UNCALIBRATED);
    }

    #[test]
    fn constant_covariates_make_a_singular_design() {
        let data: Vec<CalibrationSample> = samples(30, 0.0)
            .into_iter()
            .map(|s| CalibrationSample { canopy: 0.5, shadow: 0.1, ..s })
            .collect();
        let err = fit_metric(Metric::ShapeMn, &Scale::default(), &data).unwrap_err();
        assert!(err.to_string().contains("singular"));
    }

    #[test]
    fn undefined_values_pass_through() {
        let model = CalibrationModel::fit(&Scale::default(), settings(), &samples(40, 0.0));
        let mut observed = MetricVector::undefined();
        observed.set(Metric::AreaMn, Some(10.0));
        let out = model.apply(&observed, 0.4, 0.1);
        assert_eq!(out.get(Metric::EnnMn), CalibratedValue::Undefined);
        assert!(matches!(out.get(Metric::AreaMn), CalibratedValue::Value(_)));
        // No canopy: the ratio covariate is undefined.
        assert_eq!(model.apply(&observed, 0.0, 0.1).get(Metric::AreaMn), CalibratedValue::Uncalibrated);
    }

    #[test]
    fn model_rejects_runs_under_other_metric_settings() {
        let model = CalibrationModel::fit(&Scale::default(), settings(), &samples(20, 0.0));
        assert!(model.check_compatible(&LsmConfig::default(), 0.6).is_ok());

        let deeper = LsmConfig { edge_depth: 3, ..LsmConfig::default() };
        let err = model.check_compatible(&deeper, 0.6).unwrap_err();
        assert!(matches!(err, LsmError::Config { name: "calibration", .. }));
        assert!(err.to_string().contains("edge_depth"));
        assert!(model.check_compatible(&LsmConfig::default(), 2.0).is_err());
        let half = LsmConfig { scale: Scale::acres(0.5), ..LsmConfig::default() };
        assert!(model.check_compatible(&half, 0.6).is_err());
    }

    #[test]
    fn model_set_round_trips_through_json() {
        let mut set = CalibrationSet::default();
        set.insert(CalibrationModel::fit(&Scale::acres(1.0), settings(), &samples(40, 0.01)));
        set.insert(CalibrationModel::fit(&Scale::acres(0.5), settings(), &samples(10, 0.0)));
        let json = serde_json::to_string(&set).unwrap();
        let back: CalibrationSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back.models.len(), 2);
        for (a, b) in back.models.iter().zip(&set.models) {
            assert_eq!(a.scale.label, b.scale.label);
            for (fa, fb) in a.fits.values().zip(b.fits.values()) {
                match (fa, fb) {
                    (
                        MetricFit::Fitted { coefficients: ca, .. },
                        MetricFit::Fitted { coefficients: cb, .. },
                    ) => {
                        for (x, y) in ca.iter().zip(cb) {
                            assert_relative_eq!(*x, *y, max_relative = 1e-12);
                        }
                    }
                    (MetricFit::Failed { reason: ra }, MetricFit::Failed { reason: rb }) => assert_eq!(ra, rb),
                    _ => panic!("fit status changed in round trip"),
                }
            }
        }
        assert_eq!(back.models[0].settings, settings());
        assert!(back.for_scale("0p5_acre").is_some());
        assert!(back.for_scale("2_acre").is_none());
    }
}
