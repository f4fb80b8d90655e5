// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Homeostatic tuner: keeps the observed load-level distribution near a
//! fixed target by nudging the classification thresholds.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::bus::{topic, Bus, BusEvent};
use crate::load::{LoadLevel, LoadSample};

/// Target share of time per level: normal/elevated/high/critical.
pub const TARGET: [f64; 4] = [0.70, 0.20, 0.08, 0.02];

/// Adjustment applied per adaptation cycle.
const STEP: f64 = 0.005;

/// Total offset clamp.
const OFFSET_LIMIT: f64 = 0.1;

/// Distribution error small enough to count as on-target.
const DEADBAND: f64 = 0.01;

/// Sample buffer size (one sample per second for an hour).
const BUFFER: usize = 3_600;

/// Additive shifts applied to the load classification thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ThresholdOffsets {
    pub elevated: f64,
    pub high: f64,
    pub critical: f64,
}

/// Shared cell: the tuner writes, the load monitor reads.
#[derive(Default)]
pub struct OffsetsCell(RwLock<ThresholdOffsets>);

impl OffsetsCell {
    pub fn get(&self) -> ThresholdOffsets {
        *self.0.read()
    }

    fn set(&self, offsets: ThresholdOffsets) {
        *self.0.write() = offsets;
    }
}

/// The adaptation core: a bounded sample buffer and the offset state.
#[derive(Debug)]
pub struct HomeostaticTuner {
    buffer: VecDeque<LoadLevel>,
    offsets: ThresholdOffsets,
}

impl Default for HomeostaticTuner {
    fn default() -> Self {
        Self::new()
    }
}

impl HomeostaticTuner {
    pub fn new() -> Self {
        Self { buffer: VecDeque::with_capacity(BUFFER), offsets: ThresholdOffsets::default() }
    }

    pub fn observe(&mut self, level: LoadLevel) {
        if self.buffer.len() == BUFFER {
            self.buffer.pop_front();
        }
        self.buffer.push_back(level);
    }

    /// Observed share of time per level.
    pub fn distribution(&self) -> [f64; 4] {
        let mut counts = [0usize; 4];
        for level in &self.buffer {
            counts[match level {
                LoadLevel::Normal => 0,
                LoadLevel::Elevated => 1,
                LoadLevel::High => 2,
                LoadLevel::Critical => 3,
            }] += 1;
        }
        let total = self.buffer.len().max(1) as f64;
        [
            counts[0] as f64 / total,
            counts[1] as f64 / total,
            counts[2] as f64 / total,
            counts[3] as f64 / total,
        ]
    }

    pub fn offsets(&self) -> ThresholdOffsets {
        self.offsets
    }

    /// One adaptation cycle. Each boundary compares the observed share of
    /// time spent at-or-above it against the target share; an overshoot
    /// raises the boundary, an undershoot lowers it, on-target decays the
    /// offset back toward zero.
    pub fn adapt(&mut self) -> ThresholdOffsets {
        if self.buffer.is_empty() {
            return self.offsets;
        }
        let observed = self.distribution();

        let above_elevated = observed[1] + observed[2] + observed[3];
        let above_high = observed[2] + observed[3];
        let above_critical = observed[3];

        self.offsets.elevated =
            step_offset(self.offsets.elevated, above_elevated, TARGET[1] + TARGET[2] + TARGET[3]);
        self.offsets.high = step_offset(self.offsets.high, above_high, TARGET[2] + TARGET[3]);
        self.offsets.critical = step_offset(self.offsets.critical, above_critical, TARGET[3]);
        self.offsets
    }
}

fn step_offset(current: f64, observed: f64, target: f64) -> f64 {
    let next = if observed > target + DEADBAND {
        current + STEP
    } else if observed < target - DEADBAND {
        current - STEP
    } else if current.abs() <= STEP {
        0.0
    } else {
        current - STEP * current.signum()
    };
    next.clamp(-OFFSET_LIMIT, OFFSET_LIMIT)
}

/// The adaptation worker: buffers load samples and runs hourly cycles.
pub struct Homeostat {
    tuner: HomeostaticTuner,
    rx: mpsc::Receiver<LoadSample>,
    cell: Arc<OffsetsCell>,
    bus: Arc<Bus>,
    cycle: Duration,
}

impl Homeostat {
    pub fn new(rx: mpsc::Receiver<LoadSample>, cell: Arc<OffsetsCell>, bus: Arc<Bus>) -> Self {
        Self { tuner: HomeostaticTuner::new(), rx, cell, bus, cycle: Duration::from_secs(3_600) }
    }

    #[cfg(test)]
    pub fn with_cycle(mut self, cycle: Duration) -> Self {
        self.cycle = cycle;
        self
    }

    pub async fn run(mut self, cancel: CancellationToken) -> anyhow::Result<()> {
        let mut cycle = tokio::time::interval(self.cycle);
        cycle.tick().await; // burn the immediate first tick

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                sample = self.rx.recv() => {
                    let Some(sample) = sample else { return Ok(()) };
                    self.tuner.observe(sample.level);
                }
                _ = cycle.tick() => {
                    let offsets = self.tuner.adapt();
                    self.cell.set(offsets);
                    debug!(?offsets, "homeostatic adaptation cycle");
                    self.bus.publish(topic::SYSTEM_HOMEOSTASIS, BusEvent::Homeostasis { offsets });
                }
            }
        }
    }

    /// Observed distribution (observability, exposed through node status).
    pub fn distribution(&self) -> [f64; 4] {
        self.tuner.distribution()
    }
}

#[cfg(test)]
#[path = "homeostat_tests.rs"]
mod tests;
