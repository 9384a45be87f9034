//! Sun positions at image acquisition time.
//!
//! Azimuth is measured clockwise from north, altitude above the horizon, both
//! in degrees. On the ground plane (x east, y north) the horizontal direction
//! towards the sun is `(sin az, cos az)`; shadows fall the opposite way and
//! reach `h / tan(alt)` from an object of height `h`.
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{LsmError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SunPosition {
    pub altitude_deg: f64,
    pub azimuth_deg: f64,
}

impl SunPosition {
    pub fn new(altitude_deg: f64, azimuth_deg: f64) -> Self {
        Self { altitude_deg, azimuth_deg }
    }

    /// Unit vector (east, north) along which shadows are cast.
    pub fn shadow_direction(&self) -> (f64, f64) {
        let az = self.azimuth_deg.to_radians();
        (-az.sin(), -az.cos())
    }

    /// Ground length of the shadow cast by an object of `height` metres.
    /// Zero with the sun at or beyond the zenith.
    pub fn shadow_length(&self, height: f64) -> f64 {
        if self.altitude_deg >= 90.0 {
            return 0.0;
        }
        height / self.altitude_deg.to_radians().tan()
    }
}

/// Empirical distribution: observed acquisition-time sun positions, each
/// equally likely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SunDistribution {
    pub observations: Vec<SunPosition>,
}

impl SunDistribution {
    pub fn validate(&self) -> Result<()> {
        if self.observations.is_empty() {
            return Err(LsmError::config("sun.observations", "[]", "at least one sun position is required"));
        }
        for s in &self.observations {
            if !(s.altitude_deg > 0.0 && s.altitude_deg <= 90.0) {
                return Err(LsmError::config("sun.altitude_deg", s.altitude_deg, "must lie in (0, 90]"));
            }
            if !s.azimuth_deg.is_finite() {
                return Err(LsmError::config("sun.azimuth_deg", s.azimuth_deg, "must be finite"));
            }
        }
        Ok(())
    }

    /// Draw one observation uniformly. The list must be non-empty.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<SunPosition> {
        if self.observations.is_empty() {
            return Err(LsmError::config("sun.observations", "[]", "at least one sun position is required"));
        }
        Ok(self.observations[rng.gen_range(0..self.observations.len())])
    }
}

impl Default for SunDistribution {
    /// Late-morning to early-afternoon summer positions at mid latitudes.
    fn default() -> Self {
        Self {
            observations: vec![
                SunPosition::new(55.0, 135.0),
                SunPosition::new(60.0, 150.0),
                SunPosition::new(65.0, 165.0),
                SunPosition::new(68.0, 180.0),
                SunPosition::new(64.0, 200.0),
                SunPosition::new(58.0, 220.0),
            ],
        }
    }
}
