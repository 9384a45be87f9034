//! Field inventory records and the stand-distribution fits that feed the
//! simulator.
//!
//! Stem counts: negative binomial by method of moments on per-acre counts,
//! `k = μ² / (s² − μ)`. Diameters: OLS of `ln(dbh)` on stand density (stems
//! per acre), with σ the residual standard error.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{LsmError, Result};
use crate::simulate::{DiameterModel, StemCountModel};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotRecord {
    pub plot_id: String,
    pub year: u32,
    pub field_visited: bool,
    /// Sampled area of the plot in acres.
    pub area_acres: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeRecord {
    pub plot_id: String,
    pub year: u32,
    pub live: bool,
    pub species: u32,
    pub dbh_cm: f64,
}

/// Plot/tree selection applied before fitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotFilter {
    pub field_visited_only: bool,
    pub live_only: bool,
    pub min_dbh_cm: f64,
    /// Keep only the most recent inventory year of each plot, chosen among
    /// the visits that pass the other plot filters. A plot whose newest visit
    /// was not field-visited falls back to its latest field-visited year.
    pub latest_year_only: bool,
    pub species: Option<u32>,
}

impl Default for PlotFilter {
    fn default() -> Self {
        Self {
            field_visited_only: true,
            live_only: true,
            min_dbh_cm: 12.7,
            latest_year_only: true,
            species: None,
        }
    }
}

/// One plot visit after filtering, with its qualifying trees.
#[derive(Debug, Clone, PartialEq)]
pub struct PlotSample {
    pub plot_id: String,
    pub year: u32,
    pub area_acres: f64,
    pub dbh_cm: Vec<f64>,
}

impl PlotSample {
    pub fn stems_per_acre(&self) -> f64 {
        self.dbh_cm.len() as f64 / self.area_acres
    }
}

impl PlotFilter {
    /// Select plot visits and their trees. Plots with no qualifying tree are
    /// kept (they are zero counts).
    pub fn apply(&self, plots: &[PlotRecord], trees: &[TreeRecord]) -> Vec<PlotSample> {
        let eligible: Vec<&PlotRecord> = plots
            .iter()
            .filter(|p| p.field_visited || !self.field_visited_only)
            .filter(|p| p.area_acres > 0.0)
            .collect();

        let mut latest: BTreeMap<&str, u32> = BTreeMap::new();
        for &p in &eligible {
            let year = latest.entry(p.plot_id.as_str()).or_insert(p.year);
            *year = (*year).max(p.year);
        }

        let mut kept: BTreeMap<(&str, u32), PlotSample> = BTreeMap::new();
        for p in eligible {
            if self.latest_year_only && latest.get(p.plot_id.as_str()) != Some(&p.year) {
                continue;
            }
            kept.insert(
                (p.plot_id.as_str(), p.year),
                PlotSample { plot_id: p.plot_id.clone(), year: p.year, area_acres: p.area_acres, dbh_cm: Vec::new() },
            );
        }

        for t in trees {
            if self.live_only && !t.live {
                continue;
            }
            if t.dbh_cm < self.min_dbh_cm {
                continue;
            }
            if self.species.is_some_and(|s| s != t.species) {
                continue;
            }
            if let Some(sample) = kept.get_mut(&(t.plot_id.as_str(), t.year)) {
                sample.dbh_cm.push(t.dbh_cm);
            }
        }

        let samples: Vec<PlotSample> = kept.into_values().collect();
        let stems: usize = samples.iter().map(|s| s.dbh_cm.len()).sum();
        debug!(plots = samples.len(), stems, "Inventory filtered");
        samples
    }
}

/// Negative binomial stem-count model by method of moments.
pub fn fit_stem_count(samples: &[PlotSample]) -> Result<StemCountModel> {
    if samples.len() < 2 {
        return Err(LsmError::InputData(format!(
            "stem-count fit needs at least 2 plots, got {}",
            samples.len()
        )));
    }
    let counts: Vec<f64> = samples.iter().map(PlotSample::stems_per_acre).collect();
    let n = counts.len() as f64;
    let mean = counts.iter().sum::<f64>() / n;
    let var = counts.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / (n - 1.0);
    if var <= mean {
        return Err(LsmError::InputData(format!(
            "stem counts are not overdispersed (mean {mean:.2}, variance {var:.2})"
        )));
    }
    Ok(StemCountModel { mean_per_acre: mean, size: mean * mean / (var - mean) })
}

/// Log-normal diameter model, `ln D = a + b · density + σε`.
pub fn fit_diameter(samples: &[PlotSample], min_dbh_cm: f64) -> Result<DiameterModel> {
    let points: Vec<(f64, f64)> = samples
        .iter()
        .flat_map(|s| {
            let density = s.stems_per_acre();
            s.dbh_cm.iter().filter(|&&d| d > 0.0).map(move |&d| (density, d.ln()))
        })
        .collect();
    if points.len() < 3 {
        return Err(LsmError::InputData(format!(
            "diameter fit needs at least 3 trees, got {}",
            points.len()
        )));
    }
    let n = points.len() as f64;
    let mx = points.iter().map(|p| p.0).sum::<f64>() / n;
    let my = points.iter().map(|p| p.1).sum::<f64>() / n;
    let sxx: f64 = points.iter().map(|p| (p.0 - mx).powi(2)).sum();
    let sxy: f64 = points.iter().map(|p| (p.0 - mx) * (p.1 - my)).sum();
    // A single density level leaves the slope unidentified; fall back to the
    // marginal log-normal.
    let slope = if sxx > 1e-12 { sxy / sxx } else { 0.0 };
    let intercept = my - slope * mx;
    let sse: f64 = points.iter().map(|p| (p.1 - intercept - slope * p.0).powi(2)).sum();
    let sigma = (sse / (n - 2.0)).sqrt();
    Ok(DiameterModel { intercept, slope, sigma, min_dbh_cm })
}
