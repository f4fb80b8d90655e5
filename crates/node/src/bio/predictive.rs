// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Predictive load balancer: learns hourly attention patterns per sensor
//! and pre-adjusts batch windows around predicted transitions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{hour_of_day, weekday};
use crate::attention::AttentionTable;
use crate::factors::FactorBoard;
use crate::measurement::epoch_ms;

/// Sample-count cap for the confidence metric.
const CONFIDENCE_CAP: u32 = 50;

/// Committed hourly observations required before predictions apply
/// (one per day, so two weeks of history).
const MIN_HISTORY: u32 = 14;

/// Mean-attention gap that marks a predicted transition.
const TRANSITION_GAP: f64 = 0.3;

/// Confidence floor for acting on a prediction.
const CONFIDENCE_FLOOR: f64 = 0.7;

/// Running statistics for one (sensor, hour) cell.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternSlot {
    count: u32,
    mean: f64,
    m2: f64,
}

impl PatternSlot {
    pub fn add(&mut self, score: f64) {
        self.count += 1;
        let delta = score - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (score - self.mean);
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    /// Confidence from sample count (capped) damped by variance. Two weeks
    /// of clean history clears the action floor; noise pushes it back down.
    pub fn confidence(&self) -> f64 {
        let capped = f64::from(self.count.min(CONFIDENCE_CAP));
        let count_part = capped / (capped + 5.0);
        count_part / (1.0 + self.variance())
    }
}

/// The per-sensor prediction emitted each minute.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Prediction {
    /// Attention is about to rise; shrink windows ahead of it.
    PreBoost { seconds_until_next_hour: u32 },
    /// The peak has passed; relax windows across the hour.
    PostPeak { seconds_since_hour_start: u32 },
    Steady,
}

impl Prediction {
    pub fn factor(&self) -> f64 {
        match self {
            Self::PreBoost { seconds_until_next_hour } => {
                let s = f64::from(*seconds_until_next_hour);
                if s >= 600.0 {
                    0.95
                } else if s <= 60.0 {
                    0.75
                } else {
                    // Linear ramp from 0.95 at 10 min out to 0.75 at 1 min out.
                    0.75 + (s - 60.0) / 540.0 * 0.2
                }
            }
            Self::PostPeak { seconds_since_hour_start } => {
                1.0 + 0.2 * (f64::from(*seconds_since_hour_start) / 3_600.0).min(1.0)
            }
            Self::Steady => 1.0,
        }
    }
}

/// Hour-of-day (and weekday-refined) attention patterns for all sensors.
#[derive(Debug, Default)]
pub struct PatternTable {
    hourly: HashMap<(String, u8), PatternSlot>,
    weekday: HashMap<(String, u8, u8), PatternSlot>,
}

impl PatternTable {
    /// Commit one hourly mean observation for a sensor.
    pub fn commit(&mut self, sensor: &str, hour: u8, day: u8, mean_score: f64) {
        self.hourly.entry((sensor.to_owned(), hour)).or_default().add(mean_score);
        self.weekday.entry((sensor.to_owned(), hour, day)).or_default().add(mean_score);
    }

    pub fn slot(&self, sensor: &str, hour: u8) -> Option<&PatternSlot> {
        self.hourly.get(&(sensor.to_owned(), hour))
    }

    /// Weekday-refined slot when it has enough history, hourly otherwise.
    pub fn refined_slot(&self, sensor: &str, hour: u8, day: u8) -> Option<&PatternSlot> {
        self.weekday
            .get(&(sensor.to_owned(), hour, day))
            .filter(|slot| slot.count() >= MIN_HISTORY)
            .or_else(|| self.slot(sensor, hour))
    }

    /// Predict the transition for a sensor at a moment within the hour.
    pub fn predict(
        &self,
        sensor: &str,
        hour: u8,
        day: u8,
        seconds_into_hour: u32,
    ) -> Prediction {
        let next_hour = (hour + 1) % 24;
        let next_day = if next_hour == 0 { (day + 1) % 7 } else { day };
        let (Some(current), Some(next)) = (
            self.refined_slot(sensor, hour, day),
            self.refined_slot(sensor, next_hour, next_day),
        ) else {
            return Prediction::Steady;
        };

        if current.count() < MIN_HISTORY || next.count() < MIN_HISTORY {
            return Prediction::Steady;
        }
        let confidence = current.confidence().min(next.confidence());
        if confidence < CONFIDENCE_FLOOR {
            return Prediction::Steady;
        }

        if next.mean() > current.mean() + TRANSITION_GAP {
            Prediction::PreBoost { seconds_until_next_hour: 3_600 - seconds_into_hour.min(3_600) }
        } else if current.mean() > next.mean() + TRANSITION_GAP {
            Prediction::PostPeak { seconds_since_hour_start: seconds_into_hour }
        } else {
            Prediction::Steady
        }
    }
}

/// Accumulates the current hour's attention scores until rollover.
#[derive(Debug, Default)]
struct HourAccumulator {
    hour: u8,
    day: u8,
    sums: HashMap<String, (f64, u32)>,
}

impl HourAccumulator {
    fn record(&mut self, sensor: &str, score: f64) {
        let entry = self.sums.entry(sensor.to_owned()).or_insert((0.0, 0));
        entry.0 += score;
        entry.1 += 1;
    }

    fn drain_into(&mut self, table: &mut PatternTable) {
        for (sensor, (sum, count)) in self.sums.drain() {
            if count > 0 {
                table.commit(&sensor, self.hour, self.day, sum / f64::from(count));
            }
        }
    }
}

/// The learning/prediction worker.
pub struct PredictiveBalancer {
    table: PatternTable,
    accumulator: HourAccumulator,
    attention: Arc<AttentionTable>,
    factors: Arc<FactorBoard>,
    tick: Duration,
}

impl PredictiveBalancer {
    pub fn new(attention: Arc<AttentionTable>, factors: Arc<FactorBoard>) -> Self {
        Self {
            table: PatternTable::default(),
            accumulator: HourAccumulator::default(),
            attention,
            factors,
            tick: Duration::from_secs(60),
        }
    }

    #[cfg(test)]
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub async fn run(mut self, cancel: CancellationToken) -> anyhow::Result<()> {
        let mut tick = tokio::time::interval(self.tick);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tick.tick() => self.step(epoch_ms()),
            }
        }
    }

    /// One minute tick: sample attention, roll the hour, refresh factors.
    fn step(&mut self, now_ms: i64) {
        let hour = hour_of_day(now_ms);
        let day = weekday(now_ms);
        if hour != self.accumulator.hour || day != self.accumulator.day {
            self.accumulator.drain_into(&mut self.table);
            self.accumulator.hour = hour;
            self.accumulator.day = day;
        }

        let seconds = super::seconds_into_hour(now_ms);
        for (sensor, score) in self.sensor_scores() {
            self.accumulator.record(&sensor, score);
            let prediction = self.table.predict(&sensor, hour, day, seconds);
            if prediction != Prediction::Steady {
                debug!(sensor_id = %sensor, ?prediction, "predictive adjustment");
            }
            self.factors.set_predictive(&sensor, prediction.factor());
        }
    }

    fn sensor_scores(&self) -> Vec<(String, f64)> {
        self.attention.sensor_scores()
    }
}

#[cfg(test)]
#[path = "predictive_tests.rs"]
mod tests;
