// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Online statistical novelty detection per attribute stream.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::bus::{topic, Bus, BusEvent};
use crate::factors::FactorBoard;
use crate::measurement::epoch_ms;

/// Default z-score gate (≈ 99.7th percentile).
pub const Z_THRESHOLD: f64 = 3.0;

/// Minimum samples before the gate opens.
pub const WARMUP: u64 = 10;

/// Suppression window per attribute pair.
pub const DEBOUNCE: Duration = Duration::from_secs(10);

const BOOST_MIN_MS: u64 = 10_000;
const BOOST_MAX_MS: u64 = 60_000;
/// Boost milliseconds granted per unit of excess z.
const BOOST_MS_PER_Z: f64 = 5_000.0;

/// Welford running statistics: mean and sum of squared deviations.
#[derive(Debug, Clone, Copy, Default)]
pub struct Welford {
    count: u64,
    mean: f64,
    m2: f64,
}

impl Welford {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> u64 {
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

    pub fn stddev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Z-score of `value` against the current statistics. A zero-variance
    /// baseline scores any deviation as effectively unbounded.
    pub fn z_score(&self, value: f64) -> f64 {
        let stddev = self.stddev();
        let delta = (value - self.mean).abs();
        if stddev <= f64::EPSILON {
            if delta <= f64::EPSILON {
                0.0
            } else {
                1.0e6
            }
        } else {
            delta / stddev
        }
    }
}

/// A fired novelty event.
#[derive(Debug, Clone, PartialEq)]
pub struct NoveltyEvent {
    pub z_score: f64,
    pub novelty_score: f64,
    pub boost_duration_ms: u64,
}

#[derive(Debug, Default)]
struct PairStats {
    welford: Welford,
    last_fired: Option<Instant>,
}

/// The detection gate: per-pair statistics, warmup, threshold, debounce.
#[derive(Debug)]
pub struct NoveltyGate {
    threshold: f64,
    pairs: HashMap<(String, String), PairStats>,
}

impl Default for NoveltyGate {
    fn default() -> Self {
        Self::new(Z_THRESHOLD)
    }
}

impl NoveltyGate {
    pub fn new(threshold: f64) -> Self {
        Self { threshold, pairs: HashMap::new() }
    }

    /// Feed one value. The z-score is taken against the statistics *before*
    /// this value updates them.
    pub fn observe(
        &mut self,
        sensor: &str,
        attr: &str,
        value: f64,
        now: Instant,
    ) -> Option<NoveltyEvent> {
        let stats = self.pairs.entry((sensor.to_owned(), attr.to_owned())).or_default();
        let warm = stats.welford.count() >= WARMUP;
        let z = stats.welford.z_score(value);
        stats.welford.push(value);

        if !warm || z <= self.threshold {
            return None;
        }
        if stats.last_fired.is_some_and(|at| now.duration_since(at) < DEBOUNCE) {
            return None;
        }
        stats.last_fired = Some(now);

        let excess = z - self.threshold;
        let boost_duration_ms =
            ((BOOST_MIN_MS as f64 + excess * BOOST_MS_PER_Z) as u64).clamp(BOOST_MIN_MS, BOOST_MAX_MS);
        // Approaches 1.0 as z leaves the threshold behind.
        let novelty_score = 1.0 - (self.threshold / z).clamp(0.0, 1.0);
        Some(NoveltyEvent { z_score: z, novelty_score, boost_duration_ms })
    }

    /// Baseline sample count for one pair (observability).
    pub fn sample_count(&self, sensor: &str, attr: &str) -> u64 {
        self.pairs
            .get(&(sensor.to_owned(), attr.to_owned()))
            .map(|stats| stats.welford.count())
            .unwrap_or(0)
    }
}

/// A value extracted from an admitted measurement, queued for detection.
#[derive(Debug, Clone)]
pub struct NoveltySample {
    pub sensor_id: String,
    pub attribute_id: String,
    pub value: f64,
}

/// The detection worker: consumes samples, publishes events, arms boosts.
pub struct NoveltyDetector {
    gate: NoveltyGate,
    rx: mpsc::Receiver<NoveltySample>,
    bus: Arc<Bus>,
    factors: Arc<FactorBoard>,
}

impl NoveltyDetector {
    pub fn new(
        rx: mpsc::Receiver<NoveltySample>,
        bus: Arc<Bus>,
        factors: Arc<FactorBoard>,
    ) -> Self {
        Self { gate: NoveltyGate::default(), rx, bus, factors }
    }

    pub async fn run(mut self, cancel: CancellationToken) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                sample = self.rx.recv() => {
                    let Some(sample) = sample else { return Ok(()) };
                    let now = Instant::now();
                    let Some(event) =
                        self.gate.observe(&sample.sensor_id, &sample.attribute_id, sample.value, now)
                    else {
                        continue;
                    };
                    debug!(
                        sensor_id = %sample.sensor_id,
                        attribute_id = %sample.attribute_id,
                        z = event.z_score,
                        "novelty detected"
                    );
                    self.factors.set_novelty_boost(
                        &sample.sensor_id,
                        event.novelty_score,
                        now + Duration::from_millis(event.boost_duration_ms),
                    );
                    self.bus.publish(
                        &topic::novelty(&sample.sensor_id),
                        BusEvent::Novelty {
                            sensor_id: sample.sensor_id,
                            attribute_id: sample.attribute_id,
                            z_score: event.z_score,
                            novelty_score: event.novelty_score,
                            boost_duration_ms: event.boost_duration_ms,
                            timestamp_ms: epoch_ms(),
                        },
                    );
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "novelty_tests.rs"]
mod tests;
