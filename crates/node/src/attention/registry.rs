// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Attention registry coordinator: serializes all writes through one task,
//! materializes effective levels into a shared read table, and publishes
//! change notifications.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::book::AttentionBook;
use super::{batch, AttentionLevel, BatteryReport};
use crate::bus::{topic, Bus, BusEvent};
use crate::factors::FactorBoard;

/// How often expired hover boosts are collected.
const BOOST_SWEEP: Duration = Duration::from_millis(250);

/// How often stale observer-free entries are collected.
const CLEANUP_SWEEP: Duration = Duration::from_secs(30);

/// Shared read table: effective levels per attribute and per sensor.
/// Readers never block on the coordinator.
#[derive(Default)]
pub struct AttentionTable {
    pairs: RwLock<HashMap<(String, String), AttentionLevel>>,
    sensors: RwLock<HashMap<String, AttentionLevel>>,
}

impl AttentionTable {
    pub fn attribute_level(&self, sensor: &str, attr: &str) -> AttentionLevel {
        self.pairs
            .read()
            .get(&(sensor.to_owned(), attr.to_owned()))
            .copied()
            .unwrap_or(AttentionLevel::None)
    }

    pub fn sensor_level(&self, sensor: &str) -> AttentionLevel {
        self.sensors.read().get(sensor).copied().unwrap_or(AttentionLevel::None)
    }

    /// Sensor-level attention scores for every tracked sensor.
    pub fn sensor_scores(&self) -> Vec<(String, f64)> {
        self.sensors
            .read()
            .iter()
            .map(|(sensor, level)| (sensor.clone(), level.score()))
            .collect()
    }

    /// Per-level counts across all tracked attributes (observability).
    pub fn level_counts(&self) -> HashMap<AttentionLevel, usize> {
        let mut counts = HashMap::new();
        for level in self.pairs.read().values() {
            *counts.entry(*level).or_insert(0) += 1;
        }
        counts
    }

    fn store_pair(&self, sensor: &str, attr: &str, level: AttentionLevel) -> bool {
        let mut pairs = self.pairs.write();
        let key = (sensor.to_owned(), attr.to_owned());
        if level == AttentionLevel::None {
            return pairs.remove(&key).is_some_and(|old| old != level);
        }
        pairs.insert(key, level) != Some(level)
    }

    fn store_sensor(&self, sensor: &str, level: AttentionLevel) -> bool {
        let mut sensors = self.sensors.write();
        if level == AttentionLevel::None {
            return sensors.remove(sensor).is_some_and(|old| old != level);
        }
        sensors.insert(sensor.to_owned(), level) != Some(level)
    }
}

/// Write operations accepted by the coordinator.
#[derive(Debug)]
pub enum AttentionCmd {
    RegisterAttribute { sensor: String, attr: String },
    View { sensor: String, attr: String, user: String, on: bool },
    Hover { sensor: String, attr: String, user: String, on: bool },
    Focus { sensor: String, attr: String, user: String, on: bool },
    Pin { sensor: String, user: String, on: bool },
    Battery { user: String, report: BatteryReport },
    UnregisterAll { user: String },
}

/// Cloneable handle: non-blocking writes, lock-free-read cached levels, and
/// the batch-window derivation.
#[derive(Clone)]
pub struct AttentionHandle {
    tx: mpsc::UnboundedSender<AttentionCmd>,
    table: Arc<AttentionTable>,
    factors: Arc<FactorBoard>,
}

impl AttentionHandle {
    pub fn register_attribute(&self, sensor: &str, attr: &str) {
        self.send(AttentionCmd::RegisterAttribute {
            sensor: sensor.to_owned(),
            attr: attr.to_owned(),
        });
    }

    pub fn register_view(&self, sensor: &str, attr: &str, user: &str) {
        self.view(sensor, attr, user, true);
    }

    pub fn unregister_view(&self, sensor: &str, attr: &str, user: &str) {
        self.view(sensor, attr, user, false);
    }

    pub fn register_hover(&self, sensor: &str, attr: &str, user: &str) {
        self.hover(sensor, attr, user, true);
    }

    pub fn unregister_hover(&self, sensor: &str, attr: &str, user: &str) {
        self.hover(sensor, attr, user, false);
    }

    pub fn register_focus(&self, sensor: &str, attr: &str, user: &str) {
        self.focus(sensor, attr, user, true);
    }

    pub fn unregister_focus(&self, sensor: &str, attr: &str, user: &str) {
        self.focus(sensor, attr, user, false);
    }

    pub fn pin_sensor(&self, sensor: &str, user: &str) {
        self.send(AttentionCmd::Pin { sensor: sensor.to_owned(), user: user.to_owned(), on: true });
    }

    pub fn unpin_sensor(&self, sensor: &str, user: &str) {
        self.send(AttentionCmd::Pin {
            sensor: sensor.to_owned(),
            user: user.to_owned(),
            on: false,
        });
    }

    pub fn report_battery_state(&self, user: &str, report: BatteryReport) {
        self.send(AttentionCmd::Battery { user: user.to_owned(), report });
    }

    pub fn unregister_all(&self, user: &str) {
        self.send(AttentionCmd::UnregisterAll { user: user.to_owned() });
    }

    pub fn get_attention_level(&self, sensor: &str, attr: &str) -> AttentionLevel {
        self.table.attribute_level(sensor, attr)
    }

    pub fn get_sensor_attention_level(&self, sensor: &str) -> AttentionLevel {
        self.table.sensor_level(sensor)
    }

    /// Current batch window for one attribute, all factors applied.
    pub fn calculate_batch_window(&self, base_ms: u64, sensor: &str, attr: &str) -> u64 {
        let level = self.table.attribute_level(sensor, attr);
        let factors = self.factors.resolve(sensor, Instant::now());
        batch::calculate_batch_window(base_ms, level, &factors)
    }

    pub fn table(&self) -> &Arc<AttentionTable> {
        &self.table
    }

    pub fn factors(&self) -> &Arc<FactorBoard> {
        &self.factors
    }

    fn view(&self, sensor: &str, attr: &str, user: &str, on: bool) {
        self.send(AttentionCmd::View {
            sensor: sensor.to_owned(),
            attr: attr.to_owned(),
            user: user.to_owned(),
            on,
        });
    }

    fn hover(&self, sensor: &str, attr: &str, user: &str, on: bool) {
        self.send(AttentionCmd::Hover {
            sensor: sensor.to_owned(),
            attr: attr.to_owned(),
            user: user.to_owned(),
            on,
        });
    }

    fn focus(&self, sensor: &str, attr: &str, user: &str, on: bool) {
        self.send(AttentionCmd::Focus {
            sensor: sensor.to_owned(),
            attr: attr.to_owned(),
            user: user.to_owned(),
            on,
        });
    }

    fn send(&self, cmd: AttentionCmd) {
        let _ = self.tx.send(cmd);
    }
}

/// The coordinator worker. Run it under the registries supervision domain.
pub struct AttentionRegistry {
    book: AttentionBook,
    table: Arc<AttentionTable>,
    bus: Arc<Bus>,
    rx: mpsc::UnboundedReceiver<AttentionCmd>,
}

/// Build the coordinator and its handle.
pub fn channel(bus: Arc<Bus>, factors: Arc<FactorBoard>) -> (AttentionHandle, AttentionRegistry) {
    let (tx, rx) = mpsc::unbounded_channel();
    let table = Arc::new(AttentionTable::default());
    let handle = AttentionHandle { tx, table: Arc::clone(&table), factors };
    let registry = AttentionRegistry { book: AttentionBook::new(), table, bus, rx };
    (handle, registry)
}

impl AttentionRegistry {
    pub async fn run(mut self, cancel: CancellationToken) -> anyhow::Result<()> {
        let mut boost_sweep = tokio::time::interval(BOOST_SWEEP);
        let mut cleanup_sweep = tokio::time::interval(CLEANUP_SWEEP);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                cmd = self.rx.recv() => {
                    let Some(cmd) = cmd else { return Ok(()) };
                    self.apply(cmd);
                }
                _ = boost_sweep.tick() => {
                    let now = Instant::now();
                    if self.book.next_boost_expiry().is_some_and(|at| at <= now) {
                        for sensor in self.book.expire_boosts(now) {
                            self.recompute(&sensor, now);
                        }
                    }
                }
                _ = cleanup_sweep.tick() => self.cleanup(Instant::now()),
            }
        }
    }

    fn apply(&mut self, cmd: AttentionCmd) {
        let now = Instant::now();
        match cmd {
            AttentionCmd::RegisterAttribute { sensor, attr } => {
                self.book.register_attribute(&sensor, &attr, now);
                self.recompute(&sensor, now);
            }
            AttentionCmd::View { sensor, attr, user, on } => {
                self.book.set_view(&sensor, &attr, &user, on, now);
                self.recompute(&sensor, now);
            }
            AttentionCmd::Hover { sensor, attr, user, on } => {
                self.book.set_hover(&sensor, &attr, &user, on, now);
                self.recompute(&sensor, now);
            }
            AttentionCmd::Focus { sensor, attr, user, on } => {
                self.book.set_focus(&sensor, &attr, &user, on, now);
                self.recompute(&sensor, now);
            }
            AttentionCmd::Pin { sensor, user, on } => {
                self.book.set_pin(&sensor, &user, on);
                self.recompute(&sensor, now);
            }
            AttentionCmd::Battery { user, report } => {
                self.book.report_battery(&user, report);
                self.recompute_all(now);
            }
            AttentionCmd::UnregisterAll { user } => {
                self.book.unregister_all(&user, now);
                self.recompute_all(now);
            }
        }
    }

    fn recompute_all(&mut self, now: Instant) {
        for sensor in self.book.sensors() {
            self.recompute(&sensor, now);
        }
    }

    /// Re-derive every cached level for one sensor and publish the changes.
    fn recompute(&mut self, sensor: &str, now: Instant) {
        for attr in self.book.attributes_of(sensor) {
            let level = self.book.attribute_level(sensor, &attr, now);
            if self.table.store_pair(sensor, &attr, level) {
                debug!(sensor, attr = %attr, level = %level, "attribute attention changed");
                self.publish_pair(sensor, &attr, level);
            }
        }
        let aggregate = self.book.sensor_level(sensor, now);
        if self.table.store_sensor(sensor, aggregate) {
            self.bus.publish(
                &topic::attention_sensor(sensor),
                BusEvent::AttentionChanged {
                    sensor_id: sensor.to_owned(),
                    attribute_id: None,
                    level: aggregate,
                },
            );
        }
    }

    fn publish_pair(&self, sensor: &str, attr: &str, level: AttentionLevel) {
        let event = Arc::new(BusEvent::AttentionChanged {
            sensor_id: sensor.to_owned(),
            attribute_id: Some(attr.to_owned()),
            level,
        });
        self.bus.publish_shared(&topic::attention_attr(sensor, attr), Arc::clone(&event));
        self.bus.publish_shared(&topic::attention_sensor(sensor), event);
    }

    fn cleanup(&mut self, now: Instant) {
        let removed = self.book.cleanup(now);
        if removed.is_empty() {
            return;
        }
        let mut sensors: Vec<String> = Vec::new();
        for (sensor, attr) in removed {
            if self.table.store_pair(&sensor, &attr, AttentionLevel::None) {
                self.publish_pair(&sensor, &attr, AttentionLevel::None);
            }
            sensors.push(sensor);
        }
        sensors.sort();
        sensors.dedup();
        for sensor in sensors {
            self.recompute(&sensor, now);
        }
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
