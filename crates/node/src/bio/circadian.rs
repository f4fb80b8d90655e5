// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Circadian scheduler: phase-adjusts batch windows against the learned
//! daily load profile.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::hour_of_day;
use crate::bus::{topic, Bus, BusEvent};
use crate::factors::FactorBoard;
use crate::load::LoadSample;
use crate::measurement::epoch_ms;

/// Phase evaluation cadence.
const CADENCE: Duration = Duration::from_secs(600);

/// Load considered a peak.
const PEAK: f64 = 0.7;

/// Load considered off-peak.
const OFF_PEAK: f64 = 0.3;

/// Daily phase relative to the learned load profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircadianPhase {
    ApproachingPeak,
    Peak,
    ApproachingOffPeak,
    OffPeak,
    Normal,
}

impl CircadianPhase {
    pub fn factor(&self) -> f64 {
        match self {
            Self::ApproachingPeak => 1.15,
            Self::Peak => 1.2,
            Self::ApproachingOffPeak => 0.9,
            Self::OffPeak => 0.85,
            Self::Normal => 1.0,
        }
    }
}

/// Phase from the current and next-hour predicted load. The present state
/// outranks the forecast on overlap.
pub fn phase_for(current: f64, next: f64) -> CircadianPhase {
    if current > PEAK {
        CircadianPhase::Peak
    } else if next > PEAK {
        CircadianPhase::ApproachingPeak
    } else if current < OFF_PEAK {
        CircadianPhase::OffPeak
    } else if next < OFF_PEAK {
        CircadianPhase::ApproachingOffPeak
    } else {
        CircadianPhase::Normal
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct HourStat {
    sum: f64,
    count: u64,
}

/// 24-slot running profile of hourly load pressure.
#[derive(Debug, Default)]
pub struct CircadianProfile {
    hours: [HourStat; 24],
}

impl CircadianProfile {
    pub fn observe(&mut self, hour: u8, pressure: f64) {
        let slot = &mut self.hours[(hour % 24) as usize];
        slot.sum += pressure;
        slot.count += 1;
    }

    /// Learned mean pressure for an hour, if any history exists.
    pub fn predicted(&self, hour: u8) -> Option<f64> {
        let slot = self.hours[(hour % 24) as usize];
        (slot.count > 0).then(|| slot.sum / slot.count as f64)
    }

    /// Phase at the given hour, `Normal` until both slots have history.
    pub fn phase_at(&self, hour: u8) -> CircadianPhase {
        match (self.predicted(hour), self.predicted((hour + 1) % 24)) {
            (Some(current), Some(next)) => phase_for(current, next),
            _ => CircadianPhase::Normal,
        }
    }
}

/// The scheduling worker: learns from load samples, emits phase factors.
pub struct CircadianScheduler {
    profile: CircadianProfile,
    rx: mpsc::Receiver<LoadSample>,
    bus: Arc<Bus>,
    factors: Arc<FactorBoard>,
    cadence: Duration,
}

impl CircadianScheduler {
    pub fn new(rx: mpsc::Receiver<LoadSample>, bus: Arc<Bus>, factors: Arc<FactorBoard>) -> Self {
        Self { profile: CircadianProfile::default(), rx, bus, factors, cadence: CADENCE }
    }

    #[cfg(test)]
    pub fn with_cadence(mut self, cadence: Duration) -> Self {
        self.cadence = cadence;
        self
    }

    pub async fn run(mut self, cancel: CancellationToken) -> anyhow::Result<()> {
        let mut tick = tokio::time::interval(self.cadence);
        let mut last_phase: Option<CircadianPhase> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                sample = self.rx.recv() => {
                    let Some(sample) = sample else { return Ok(()) };
                    self.profile.observe(hour_of_day(epoch_ms()), sample.pressure);
                }
                _ = tick.tick() => {
                    let phase = self.profile.phase_at(hour_of_day(epoch_ms()));
                    self.factors.set_circadian(phase.factor());
                    if last_phase != Some(phase) {
                        info!(?phase, factor = phase.factor(), "circadian phase transition");
                        self.bus.publish(
                            topic::SYSTEM_CIRCADIAN,
                            BusEvent::Circadian { phase, factor: phase.factor() },
                        );
                        last_phase = Some(phase);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "circadian_tests.rs"]
mod tests;
