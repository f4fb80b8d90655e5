// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! System load monitor: periodic pressure sampling mapped to a discrete
//! level and a global throttling multiplier.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::bio::homeostat::{OffsetsCell, ThresholdOffsets};
use crate::bus::{topic, Bus, BusEvent};
use crate::factors::FactorBoard;

/// Discrete load level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadLevel {
    Normal,
    Elevated,
    High,
    Critical,
}

impl LoadLevel {
    pub fn multiplier(&self) -> f64 {
        match self {
            Self::Normal => 1.0,
            Self::Elevated => 1.5,
            Self::High => 3.0,
            Self::Critical => 6.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Elevated => "elevated",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// One pressure sample with its derived level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadSample {
    pub level: LoadLevel,
    pub multiplier: f64,
    pub pressure: f64,
}

impl LoadSample {
    pub fn idle() -> Self {
        Self { level: LoadLevel::Normal, multiplier: 1.0, pressure: 0.0 }
    }
}

/// Map pressure to a level using homeostatic-shifted thresholds.
pub fn classify(pressure: f64, offsets: ThresholdOffsets) -> LoadLevel {
    if pressure >= 0.75 + offsets.critical {
        LoadLevel::Critical
    } else if pressure >= 0.5 + offsets.high {
        LoadLevel::High
    } else if pressure >= 0.3 + offsets.elevated {
        LoadLevel::Elevated
    } else {
        LoadLevel::Normal
    }
}

/// Raw inputs for one sample.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawLoad {
    /// Run-queue pressure, normalized by core count, in [0, 1].
    pub cpu: f64,
    /// Deepest worker mailbox on the node.
    pub mailbox_depth: usize,
    /// Resident-set fraction of total memory, in [0, 1].
    pub memory: f64,
}

/// Blend raw inputs into a single pressure value.
///
/// A mailbox past the high-water mark forces the sample to critical no
/// matter what the thresholds say.
pub fn blend(raw: RawLoad, high_water: usize) -> f64 {
    let mailbox = if high_water == 0 {
        0.0
    } else {
        (raw.mailbox_depth as f64 / high_water as f64).min(1.0)
    };
    let base = 0.5 * raw.cpu.clamp(0.0, 1.0) + 0.3 * mailbox + 0.2 * raw.memory.clamp(0.0, 1.0);
    if raw.mailbox_depth >= high_water && high_water > 0 {
        1.0
    } else {
        base.clamp(0.0, 1.0)
    }
}

/// Source of raw samples.
pub trait LoadProbe: Send {
    fn sample(&mut self) -> RawLoad;
}

/// Probe reading the host: loadavg, registered mailboxes, resident set.
pub struct SystemProbe {
    cores: f64,
    mailbox_depth: Box<dyn Fn() -> usize + Send + Sync>,
}

impl SystemProbe {
    pub fn new(mailbox_depth: Box<dyn Fn() -> usize + Send + Sync>) -> Self {
        Self { cores: num_cpus::get().max(1) as f64, mailbox_depth }
    }
}

impl LoadProbe for SystemProbe {
    fn sample(&mut self) -> RawLoad {
        RawLoad {
            cpu: (read_loadavg().unwrap_or(0.0) / self.cores).clamp(0.0, 1.0),
            mailbox_depth: (self.mailbox_depth)(),
            memory: read_memory_fraction().unwrap_or(0.0),
        }
    }
}

#[cfg(target_os = "linux")]
fn read_loadavg() -> Option<f64> {
    let contents = std::fs::read_to_string("/proc/loadavg").ok()?;
    contents.split_whitespace().next()?.parse().ok()
}

#[cfg(not(target_os = "linux"))]
fn read_loadavg() -> Option<f64> {
    None
}

#[cfg(target_os = "linux")]
fn read_memory_fraction() -> Option<f64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let rss_pages: f64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    let total_kb: f64 = meminfo
        .lines()
        .find(|line| line.starts_with("MemTotal:"))?
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()?;
    if total_kb <= 0.0 {
        return None;
    }
    Some((rss_pages * 4.0 / total_kb).clamp(0.0, 1.0))
}

#[cfg(not(target_os = "linux"))]
fn read_memory_fraction() -> Option<f64> {
    None
}

/// Shared view of the monitor's latest sample plus per-level counts.
#[derive(Default)]
pub struct LoadStatus {
    current: RwLock<Option<LoadSample>>,
    counts: RwLock<HashMap<LoadLevel, u64>>,
}

impl LoadStatus {
    pub fn current(&self) -> LoadSample {
        self.current.read().unwrap_or_else(LoadSample::idle)
    }

    pub fn level_counts(&self) -> HashMap<LoadLevel, u64> {
        self.counts.read().clone()
    }

    fn record(&self, sample: LoadSample) {
        *self.current.write() = Some(sample);
        *self.counts.write().entry(sample.level).or_insert(0) += 1;
    }
}

/// The sampling worker.
pub struct LoadMonitor {
    probe: Box<dyn LoadProbe>,
    interval: Duration,
    high_water: usize,
    offsets: Arc<OffsetsCell>,
    bus: Arc<Bus>,
    factors: Arc<FactorBoard>,
    status: Arc<LoadStatus>,
    /// Every sample is forwarded here (homeostat, circadian).
    sample_txs: Vec<mpsc::Sender<LoadSample>>,
}

impl LoadMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        probe: Box<dyn LoadProbe>,
        interval: Duration,
        high_water: usize,
        offsets: Arc<OffsetsCell>,
        bus: Arc<Bus>,
        factors: Arc<FactorBoard>,
        sample_txs: Vec<mpsc::Sender<LoadSample>>,
    ) -> (Arc<LoadStatus>, Self) {
        let status = Arc::new(LoadStatus::default());
        let monitor = Self {
            probe,
            interval,
            high_water,
            offsets,
            bus,
            factors,
            status: Arc::clone(&status),
            sample_txs,
        };
        (status, monitor)
    }

    pub async fn run(mut self, cancel: CancellationToken) -> anyhow::Result<()> {
        let mut tick = tokio::time::interval(self.interval);
        let mut last_level: Option<LoadLevel> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tick.tick() => {
                    let raw = self.probe.sample();
                    let pressure = blend(raw, self.high_water);
                    let level = classify(pressure, self.offsets.get());
                    let sample = LoadSample { level, multiplier: level.multiplier(), pressure };

                    self.status.record(sample);
                    self.factors.set_load_multiplier(sample.multiplier);
                    for tx in &self.sample_txs {
                        let _ = tx.try_send(sample);
                    }

                    if last_level != Some(level) {
                        info!(level = %level.as_str(), pressure, "load level transition");
                        self.bus.publish(
                            topic::SYSTEM_LOAD,
                            BusEvent::Load {
                                level,
                                multiplier: sample.multiplier,
                                pressure: sample.pressure,
                            },
                        );
                        last_level = Some(level);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "load_tests.rs"]
mod tests;
