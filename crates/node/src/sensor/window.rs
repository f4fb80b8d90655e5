// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::VecDeque;

use crate::measurement::{Measurement, SemanticType};

/// Bounded, timestamp-sorted window of recent measurements for one
/// attribute.
///
/// Insertion keeps ascending timestamp order; when full, the oldest
/// measurement is discarded. Out-of-window admission (clock tolerance) is
/// the worker's job, ordering is this type's.
#[derive(Debug)]
pub struct AttributeWindow {
    semantic_type: SemanticType,
    capacity: usize,
    items: VecDeque<Measurement>,
}

impl AttributeWindow {
    pub fn new(semantic_type: SemanticType, capacity: usize) -> Self {
        Self { semantic_type, capacity: capacity.max(1), items: VecDeque::new() }
    }

    pub fn semantic_type(&self) -> SemanticType {
        self.semantic_type
    }

    /// Insert preserving sort order. Late arrivals land at their timestamp
    /// position; overflow discards from the old end.
    pub fn insert(&mut self, measurement: Measurement) {
        let at = self.items.partition_point(|m| m.timestamp_ms <= measurement.timestamp_ms);
        self.items.insert(at, measurement);
        while self.items.len() > self.capacity {
            self.items.pop_front();
        }
    }

    pub fn latest(&self) -> Option<&Measurement> {
        self.items.back()
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.items.back().map(|m| m.timestamp_ms)
    }

    /// Copy out a sub-window: inclusive timestamp bounds, keeping the most
    /// recent `limit` entries of the range, ascending.
    pub fn seed(&self, from: Option<i64>, to: Option<i64>, limit: Option<usize>) -> Vec<Measurement> {
        let mut out: Vec<Measurement> = self
            .items
            .iter()
            .filter(|m| from.is_none_or(|f| m.timestamp_ms >= f))
            .filter(|m| to.is_none_or(|t| m.timestamp_ms <= t))
            .cloned()
            .collect();
        if let Some(limit) = limit {
            if out.len() > limit {
                out.drain(..out.len() - limit);
            }
        }
        out
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Ordering invariant check, used by tests.
    pub fn is_sorted(&self) -> bool {
        self.items.iter().zip(self.items.iter().skip(1)).all(|(a, b)| {
            a.timestamp_ms <= b.timestamp_ms
        })
    }
}

#[cfg(test)]
#[path = "window_tests.rs"]
mod tests;
