// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resource arbiter: lateral-inhibition allocation across the active
//! sensor set. High-priority sensors get fast (low) multipliers and push
//! everyone else toward slow (high) ones.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::attention::AttentionTable;
use crate::factors::FactorBoard;

/// Power-law exponent; > 1 concentrates resources on the leaders.
const EXPONENT: f64 = 1.3;

/// Baseline share of the priority vector independent of activity.
const BASELINE: f64 = 0.2 * 0.5;

/// Allocation cadence.
const CADENCE: Duration = Duration::from_secs(5);

/// Priority for one sensor from its attention and novelty scores.
pub fn priority(attention_score: f64, novelty_score: f64) -> f64 {
    0.5 * attention_score + 0.3 * novelty_score + BASELINE
}

/// Competitive multipliers for the whole sensor set.
///
/// `fraction = (p / Σp)^1.3`, `multiplier = clamp(5 − 4.5·fraction, 0.5, 5)`.
pub fn allocate(priorities: &[(String, f64)]) -> Vec<(String, f64)> {
    let total: f64 = priorities.iter().map(|(_, p)| p.max(0.0)).sum();
    priorities
        .iter()
        .map(|(sensor, p)| {
            let fraction = if total > 0.0 { (p.max(0.0) / total).powf(EXPONENT) } else { 0.0 };
            (sensor.clone(), (5.0 - 4.5 * fraction).clamp(0.5, 5.0))
        })
        .collect()
}

/// The allocation worker.
pub struct Arbiter {
    attention: Arc<AttentionTable>,
    factors: Arc<FactorBoard>,
    cadence: Duration,
}

impl Arbiter {
    pub fn new(attention: Arc<AttentionTable>, factors: Arc<FactorBoard>) -> Self {
        Self { attention, factors, cadence: CADENCE }
    }

    #[cfg(test)]
    pub fn with_cadence(mut self, cadence: Duration) -> Self {
        self.cadence = cadence;
        self
    }

    pub async fn run(self, cancel: CancellationToken) -> anyhow::Result<()> {
        let mut tick = tokio::time::interval(self.cadence);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tick.tick() => self.step(Instant::now()),
            }
        }
    }

    fn step(&self, now: Instant) {
        let priorities: Vec<(String, f64)> = self
            .attention
            .sensor_scores()
            .into_iter()
            .map(|(sensor, attention_score)| {
                let novelty_score = self.factors.novelty_score(&sensor, now);
                let p = priority(attention_score, novelty_score);
                (sensor, p)
            })
            .collect();

        for (sensor, multiplier) in allocate(&priorities) {
            self.factors.set_competitive(&sensor, multiplier);
        }
    }
}

#[cfg(test)]
#[path = "arbiter_tests.rs"]
mod tests;
