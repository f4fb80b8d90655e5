// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The attention book: single-owner state behind the registry coordinator.
//!
//! All methods take an explicit `now` so expiry and staleness are
//! deterministic under test.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use super::{AttentionLevel, BatteryReport};

/// Hover retention after unhover.
pub const HOVER_BOOST: Duration = Duration::from_millis(2_000);

/// A registered attribute goes stale after this long with no observers.
pub const STALE_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct PairState {
    viewers: HashSet<String>,
    hovered: HashSet<String>,
    /// Users retained in the hovered set until boost expiry.
    hover_boosts: HashMap<String, Instant>,
    focused: HashSet<String>,
    last_updated: Option<Instant>,
}

impl PairState {
    fn observers(&self) -> impl Iterator<Item = &String> {
        self.viewers
            .iter()
            .chain(self.hovered.iter())
            .chain(self.hover_boosts.keys())
            .chain(self.focused.iter())
    }

    fn has_observers(&self) -> bool {
        self.observers().next().is_some()
    }

    fn raw_level(&self, now: Instant) -> AttentionLevel {
        let boosted = self.hover_boosts.values().any(|expiry| now < *expiry);
        if !self.focused.is_empty() || !self.hovered.is_empty() || boosted {
            AttentionLevel::High
        } else if !self.viewers.is_empty() {
            AttentionLevel::Medium
        } else if self.last_updated.is_some_and(|t| now.duration_since(t) <= STALE_AFTER) {
            AttentionLevel::Low
        } else {
            AttentionLevel::None
        }
    }
}

/// Per-observer intents for every `(sensor, attribute)` pair, plus pins and
/// battery reports.
#[derive(Debug, Default)]
pub struct AttentionBook {
    pairs: HashMap<(String, String), PairState>,
    pins: HashMap<String, HashSet<String>>,
    battery: HashMap<String, BatteryReport>,
}

impl AttentionBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an attribute so it idles at `low` rather than `none`.
    pub fn register_attribute(&mut self, sensor: &str, attr: &str, now: Instant) {
        let state = self.pairs.entry((sensor.to_owned(), attr.to_owned())).or_default();
        state.last_updated = Some(now);
    }

    pub fn set_view(&mut self, sensor: &str, attr: &str, user: &str, on: bool, now: Instant) {
        let state = self.pairs.entry((sensor.to_owned(), attr.to_owned())).or_default();
        if on {
            state.viewers.insert(user.to_owned());
        } else {
            state.viewers.remove(user);
        }
        state.last_updated = Some(now);
    }

    pub fn set_hover(&mut self, sensor: &str, attr: &str, user: &str, on: bool, now: Instant) {
        let state = self.pairs.entry((sensor.to_owned(), attr.to_owned())).or_default();
        if on {
            state.hovered.insert(user.to_owned());
            state.hover_boosts.remove(user);
        } else if state.hovered.remove(user) {
            // Retain in the hovered set until boost expiry.
            state.hover_boosts.insert(user.to_owned(), now + HOVER_BOOST);
        }
        state.last_updated = Some(now);
    }

    pub fn set_focus(&mut self, sensor: &str, attr: &str, user: &str, on: bool, now: Instant) {
        let state = self.pairs.entry((sensor.to_owned(), attr.to_owned())).or_default();
        if on {
            state.focused.insert(user.to_owned());
        } else {
            state.focused.remove(user);
        }
        state.last_updated = Some(now);
    }

    pub fn set_pin(&mut self, sensor: &str, user: &str, on: bool) {
        if on {
            self.pins.entry(sensor.to_owned()).or_default().insert(user.to_owned());
        } else if let Some(users) = self.pins.get_mut(sensor) {
            users.remove(user);
            if users.is_empty() {
                self.pins.remove(sensor);
            }
        }
    }

    pub fn report_battery(&mut self, user: &str, report: BatteryReport) {
        self.battery.insert(user.to_owned(), report);
    }

    /// Remove every intent a user holds. Called on session end.
    pub fn unregister_all(&mut self, user: &str, now: Instant) {
        for state in self.pairs.values_mut() {
            let held = state.viewers.remove(user)
                | state.hovered.remove(user)
                | state.hover_boosts.remove(user).is_some()
                | state.focused.remove(user);
            if held {
                state.last_updated = Some(now);
            }
        }
        self.pins.retain(|_, users| {
            users.remove(user);
            !users.is_empty()
        });
        self.battery.remove(user);
    }

    /// Effective level for one attribute: raw level capped by the worst
    /// battery among the sensor's observers.
    pub fn attribute_level(&self, sensor: &str, attr: &str, now: Instant) -> AttentionLevel {
        let raw = self
            .pairs
            .get(&(sensor.to_owned(), attr.to_owned()))
            .map(|state| state.raw_level(now))
            .unwrap_or(AttentionLevel::None);
        raw.min(self.battery_cap(sensor))
    }

    /// Sensor aggregate: max across attributes, forced to high by pins,
    /// capped by the worst observer battery.
    pub fn sensor_level(&self, sensor: &str, now: Instant) -> AttentionLevel {
        let mut level = self
            .pairs
            .iter()
            .filter(|((s, _), _)| s == sensor)
            .map(|(_, state)| state.raw_level(now))
            .max()
            .unwrap_or(AttentionLevel::None);
        if self.pins.get(sensor).is_some_and(|users| !users.is_empty()) {
            level = AttentionLevel::High;
        }
        level.min(self.battery_cap(sensor))
    }

    /// Worst-case battery cap among everyone observing this sensor.
    fn battery_cap(&self, sensor: &str) -> AttentionLevel {
        self.pairs
            .iter()
            .filter(|((s, _), _)| s == sensor)
            .flat_map(|(_, state)| state.observers())
            .filter_map(|user| self.battery.get(user))
            .map(|report| report.state.attention_cap())
            .min()
            .unwrap_or(AttentionLevel::High)
    }

    /// Attribute keys currently known for a sensor.
    pub fn attributes_of(&self, sensor: &str) -> Vec<String> {
        let mut attrs: Vec<String> = self
            .pairs
            .keys()
            .filter(|(s, _)| s == sensor)
            .map(|(_, a)| a.clone())
            .collect();
        attrs.sort();
        attrs
    }

    /// All sensors with any registered attribute or pin.
    pub fn sensors(&self) -> Vec<String> {
        let mut out: HashSet<String> = self.pairs.keys().map(|(s, _)| s.clone()).collect();
        out.extend(self.pins.keys().cloned());
        let mut sensors: Vec<String> = out.into_iter().collect();
        sensors.sort();
        sensors
    }

    /// Earliest pending hover-boost expiry, if any.
    pub fn next_boost_expiry(&self) -> Option<Instant> {
        self.pairs
            .values()
            .flat_map(|state| state.hover_boosts.values())
            .min()
            .copied()
    }

    /// Drop expired hover boosts; returns the sensors whose levels may have
    /// changed.
    pub fn expire_boosts(&mut self, now: Instant) -> Vec<String> {
        let mut touched = Vec::new();
        for ((sensor, _), state) in self.pairs.iter_mut() {
            let before = state.hover_boosts.len();
            state.hover_boosts.retain(|_, expiry| now < *expiry);
            if state.hover_boosts.len() != before {
                touched.push(sensor.clone());
            }
        }
        touched.sort();
        touched.dedup();
        touched
    }

    /// Remove stale observer-free pairs. Returns the removed keys so the
    /// coordinator can transition their cached level to `none`.
    pub fn cleanup(&mut self, now: Instant) -> Vec<(String, String)> {
        let mut removed = Vec::new();
        self.pairs.retain(|key, state| {
            let stale = !state.has_observers()
                && state
                    .last_updated
                    .is_none_or(|t| now.duration_since(t) > STALE_AFTER);
            if stale {
                removed.push(key.clone());
            }
            !stale
        });
        removed.sort();
        removed
    }
}

#[cfg(test)]
#[path = "book_tests.rs"]
mod tests;
