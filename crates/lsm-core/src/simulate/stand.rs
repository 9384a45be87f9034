//! Synthetic stand generation: stem counts, diameters, allometry, positions.
use rand::Rng;
use rand_distr::{Distribution, Gamma, LogNormal, Poisson};
use serde::{Deserialize, Serialize};

use crate::config::SQ_M_PER_ACRE;
use crate::error::{LsmError, Result};

/// Redraws allowed per stem before it is dropped (separation) or clamped
/// (diameter truncation).
const MAX_ATTEMPTS: usize = 100;

// ── Distributions ───────────────────────────────────────────────────────────

/// Negative binomial stem count, parameterised by its mean per acre and size
/// (dispersion) `k`: `var = μ + μ²/k`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StemCountModel {
    pub mean_per_acre: f64,
    pub size: f64,
}

impl StemCountModel {
    pub fn validate(&self) -> Result<()> {
        if !(self.mean_per_acre.is_finite() && self.mean_per_acre >= 0.0) {
            return Err(LsmError::config("stem_count.mean_per_acre", self.mean_per_acre, "must be ≥ 0"));
        }
        if !(self.size.is_finite() && self.size > 0.0) {
            return Err(LsmError::config("stem_count.size", self.size, "must be positive"));
        }
        Ok(())
    }

    /// Draw a count for a stand of `acres` via the gamma–Poisson mixture
    /// `λ ~ Γ(k, μ/k)`, `N ~ Poisson(λ)`.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, acres: f64) -> Result<usize> {
        let mean = self.mean_per_acre * acres;
        if mean <= 0.0 {
            return Ok(0);
        }
        let gamma = Gamma::new(self.size, mean / self.size)
            .map_err(|e| LsmError::config("stem_count", format!("{self:?}"), e.to_string()))?;
        let lambda: f64 = gamma.sample(rng);
        if lambda <= 0.0 {
            return Ok(0);
        }
        let poisson =
            Poisson::new(lambda).map_err(|e| LsmError::config("stem_count", lambda, e.to_string()))?;
        let n: f64 = poisson.sample(rng);
        Ok(n as usize)
    }
}

/// Log-normal DBH conditioned on stand density:
/// `ln D = intercept + slope · stems_per_acre + σ·ε`, truncated below at
/// `min_dbh_cm`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiameterModel {
    pub intercept: f64,
    pub slope: f64,
    pub sigma: f64,
    pub min_dbh_cm: f64,
}

impl DiameterModel {
    pub fn validate(&self) -> Result<()> {
        if !(self.sigma.is_finite() && self.sigma >= 0.0) {
            return Err(LsmError::config("diameter.sigma", self.sigma, "must be ≥ 0"));
        }
        if !(self.intercept.is_finite() && self.slope.is_finite()) {
            return Err(LsmError::config("diameter", format!("{self:?}"), "coefficients must be finite"));
        }
        if !(self.min_dbh_cm.is_finite() && self.min_dbh_cm >= 0.0) {
            return Err(LsmError::config("diameter.min_dbh_cm", self.min_dbh_cm, "must be ≥ 0"));
        }
        Ok(())
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, stems_per_acre: f64) -> Result<f64> {
        let mu = self.intercept + self.slope * stems_per_acre;
        let dist = LogNormal::new(mu, self.sigma)
            .map_err(|e| LsmError::config("diameter", format!("{self:?}"), e.to_string()))?;
        for _ in 0..MAX_ATTEMPTS {
            let d: f64 = dist.sample(rng);
            if d >= self.min_dbh_cm {
                return Ok(d);
            }
        }
        Ok(self.min_dbh_cm)
    }
}

/// Deterministic crown-width and height allometry from DBH (cm).
///
/// ```text
///   CW = b0 + b1·D + b2·D²                (m)
///   H  = 1.37 + a·(1 − e^(−b·D))^c        (m, Chapman–Richards)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Allometry {
    pub crown: [f64; 3],
    pub height: [f64; 3],
}

impl Default for Allometry {
    fn default() -> Self {
        Self { crown: [1.0, 0.17, 0.0], height: [30.0, 0.04, 1.2] }
    }
}

impl Allometry {
    pub fn crown_width(&self, dbh_cm: f64) -> f64 {
        let [b0, b1, b2] = self.crown;
        (b0 + b1 * dbh_cm + b2 * dbh_cm * dbh_cm).max(0.0)
    }

    pub fn height(&self, dbh_cm: f64) -> f64 {
        let [a, b, c] = self.height;
        1.37 + a * (1.0 - (-b * dbh_cm).exp()).powf(c)
    }
}

// ── Stands ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stem {
    /// Position in metres from the stand's west edge.
    pub x: f64,
    /// Position in metres from the stand's south edge.
    pub y: f64,
    pub dbh_cm: f64,
    pub crown_width_m: f64,
    pub height_m: f64,
}

/// Stem list of one synthetic square stand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandStems {
    pub side_m: f64,
    pub stems: Vec<Stem>,
    /// Stems dropped for lack of a position meeting the separation rule.
    pub dropped: usize,
}

/// Draw the stems of one square stand of side `side_m`.
pub fn generate_stems<R: Rng + ?Sized>(
    rng: &mut R,
    side_m: f64,
    count: &StemCountModel,
    diameter: &DiameterModel,
    allometry: &Allometry,
    min_separation_m: Option<f64>,
) -> Result<StandStems> {
    let acres = side_m * side_m / SQ_M_PER_ACRE;
    let n = count.sample(rng, acres)?;
    let density = if acres > 0.0 { n as f64 / acres } else { 0.0 };

    let mut stems: Vec<Stem> = Vec::with_capacity(n);
    let mut dropped = 0;
    for _ in 0..n {
        let dbh_cm = diameter.sample(rng, density)?;
        let position = match min_separation_m {
            None => Some((rng.gen_range(0.0..side_m), rng.gen_range(0.0..side_m))),
            Some(sep) => (0..MAX_ATTEMPTS)
                .map(|_| (rng.gen_range(0.0..side_m), rng.gen_range(0.0..side_m)))
                .find(|&(x, y)| {
                    stems.iter().all(|s| (s.x - x).powi(2) + (s.y - y).powi(2) >= sep * sep)
                }),
        };
        let Some((x, y)) = position else {
            dropped += 1;
            continue;
        };
        stems.push(Stem {
            x,
            y,
            dbh_cm,
            crown_width_m: allometry.crown_width(dbh_cm),
            height_m: allometry.height(dbh_cm),
        });
    }
    Ok(StandStems { side_m, stems, dropped })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn diameter() -> DiameterModel {
        DiameterModel { intercept: 25f64.ln(), slope: 0.0, sigma: 0.3, min_dbh_cm: 12.7 }
    }

    #[test]
    fn stem_count_mean_matches_model() {
        let model = StemCountModel { mean_per_acre: 120.0, size: 3.0 };
        let mut rng = StdRng::seed_from_u64(11);
        let n = 4000;
        let draws: Vec<f64> = (0..n).map(|_| model.sample(&mut rng, 1.0).unwrap() as f64).collect();
        let mean = draws.iter().sum::<f64>() / n as f64;
        let var = draws.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
        assert!((mean - 120.0).abs() < 5.0, "mean {mean}");
        // Overdispersed: var = μ + μ²/k = 4920.
        assert!(var > 3000.0 && var < 7000.0, "var {var}");
    }

    #[test]
    fn zero_mean_gives_empty_stand() {
        let model = StemCountModel { mean_per_acre: 0.0, size: 1.0 };
        assert_eq!(model.sample(&mut StdRng::seed_from_u64(0), 1.0).unwrap(), 0);
    }

    #[test]
    fn diameters_respect_truncation() {
        let mut rng = StdRng::seed_from_u64(5);
        let d = diameter();
        for _ in 0..500 {
            assert!(d.sample(&mut rng, 100.0).unwrap() >= 12.7);
        }
    }

    #[test]
    fn allometry_is_deterministic_and_increasing() {
        let a = Allometry::default();
        assert_relative_eq!(a.crown_width(20.0), 1.0 + 0.17 * 20.0, epsilon = 1e-12);
        assert_eq!(a.height(30.0), a.height(30.0));
        assert!(a.height(40.0) > a.height(20.0));
        assert!(a.height(0.0) - 1.37 < 1e-12);
    }

    #[test]
    fn stems_stay_inside_and_respect_separation() {
        let mut rng = StdRng::seed_from_u64(9);
        let count = StemCountModel { mean_per_acre: 200.0, size: 5.0 };
        let stand = generate_stems(&mut rng, 63.6, &count, &diameter(), &Allometry::default(), Some(2.0)).unwrap();
        for (i, a) in stand.stems.iter().enumerate() {
            assert!((0.0..63.6).contains(&a.x) && (0.0..63.6).contains(&a.y));
            for b in &stand.stems[i + 1..] {
                assert!(((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt() >= 2.0);
            }
        }
    }

    #[test]
    fn invalid_models_are_rejected() {
        assert!(StemCountModel { mean_per_acre: 10.0, size: 0.0 }.validate().is_err());
        assert!(DiameterModel { sigma: -1.0, ..diameter() }.validate().is_err());
    }
}
