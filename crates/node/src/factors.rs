// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared factor board: the adaptive layer's outputs, readable by anyone,
//! each field written by exactly one component.
//!
//! Load and circadian are node-global; novelty, predictive, and competitive
//! are per sensor. Readers take a consistent snapshot per sensor via
//! [`FactorBoard::resolve`].

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::RwLock;

/// All multiplicative window factors for one sensor at one moment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedFactors {
    pub load_multiplier: f64,
    /// True while a novelty boost is active for the sensor.
    pub novelty_boost: bool,
    pub predictive: f64,
    pub competitive: f64,
    pub circadian: f64,
}

impl ResolvedFactors {
    pub fn neutral() -> Self {
        Self {
            load_multiplier: 1.0,
            novelty_boost: false,
            predictive: 1.0,
            competitive: 1.0,
            circadian: 1.0,
        }
    }

    /// Back-pressure multiplier contributed by the novelty detector.
    pub fn novelty_factor(&self) -> f64 {
        if self.novelty_boost {
            0.5
        } else {
            1.0
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SensorFactors {
    boost_until: Option<Instant>,
    novelty_score: f64,
    predictive: f64,
    competitive: f64,
}

impl Default for SensorFactors {
    fn default() -> Self {
        Self { boost_until: None, novelty_score: 0.0, predictive: 1.0, competitive: 1.0 }
    }
}

/// Single-writer-per-field shared table.
pub struct FactorBoard {
    load_multiplier: RwLock<f64>,
    circadian: RwLock<f64>,
    sensors: RwLock<HashMap<String, SensorFactors>>,
}

impl Default for FactorBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl FactorBoard {
    pub fn new() -> Self {
        Self {
            load_multiplier: RwLock::new(1.0),
            circadian: RwLock::new(1.0),
            sensors: RwLock::new(HashMap::new()),
        }
    }

    /// Writer: load monitor.
    pub fn set_load_multiplier(&self, multiplier: f64) {
        *self.load_multiplier.write() = multiplier;
    }

    /// Writer: circadian scheduler.
    pub fn set_circadian(&self, factor: f64) {
        *self.circadian.write() = factor.clamp(0.85, 1.2);
    }

    /// Writer: novelty detector.
    pub fn set_novelty_boost(&self, sensor_id: &str, score: f64, until: Instant) {
        let mut sensors = self.sensors.write();
        let entry = sensors.entry(sensor_id.to_owned()).or_default();
        entry.boost_until = Some(until);
        entry.novelty_score = score.clamp(0.0, 1.0);
    }

    /// Writer: predictive balancer.
    pub fn set_predictive(&self, sensor_id: &str, factor: f64) {
        let mut sensors = self.sensors.write();
        sensors.entry(sensor_id.to_owned()).or_default().predictive = factor.clamp(0.75, 1.2);
    }

    /// Writer: resource arbiter.
    pub fn set_competitive(&self, sensor_id: &str, factor: f64) {
        let mut sensors = self.sensors.write();
        sensors.entry(sensor_id.to_owned()).or_default().competitive = factor.clamp(0.5, 5.0);
    }

    /// Drop per-sensor state when a sensor worker is torn down.
    pub fn clear_sensor(&self, sensor_id: &str) {
        self.sensors.write().remove(sensor_id);
    }

    /// Consistent per-sensor snapshot.
    pub fn resolve(&self, sensor_id: &str, now: Instant) -> ResolvedFactors {
        let (novelty_boost, predictive, competitive) = {
            let sensors = self.sensors.read();
            match sensors.get(sensor_id) {
                Some(f) => {
                    (f.boost_until.is_some_and(|until| now < until), f.predictive, f.competitive)
                }
                None => (false, 1.0, 1.0),
            }
        };
        ResolvedFactors {
            load_multiplier: *self.load_multiplier.read(),
            novelty_boost,
            predictive,
            competitive,
            circadian: *self.circadian.read(),
        }
    }

    /// Most recent novelty score, or zero once its boost has lapsed.
    /// Consumed by the resource arbiter's priority vector.
    pub fn novelty_score(&self, sensor_id: &str, now: Instant) -> f64 {
        let sensors = self.sensors.read();
        sensors
            .get(sensor_id)
            .filter(|f| f.boost_until.is_some_and(|until| now < until))
            .map(|f| f.novelty_score)
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
#[path = "factors_tests.rs"]
mod tests;
