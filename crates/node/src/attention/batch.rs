// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Batch-window derivation: attention level × adaptive factors, clamped to
//! the level's configured range.

use super::AttentionLevel;
use crate::factors::ResolvedFactors;

/// Per-level scaling and clamp range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelConfig {
    pub multiplier: f64,
    pub min_ms: u64,
    pub max_ms: u64,
}

impl AttentionLevel {
    pub fn config(&self) -> LevelConfig {
        match self {
            Self::High => LevelConfig { multiplier: 0.2, min_ms: 100, max_ms: 500 },
            Self::Medium => LevelConfig { multiplier: 1.0, min_ms: 500, max_ms: 2_000 },
            Self::Low => LevelConfig { multiplier: 4.0, min_ms: 2_000, max_ms: 10_000 },
            Self::None => LevelConfig { multiplier: 10.0, min_ms: 5_000, max_ms: 30_000 },
        }
    }
}

/// Derive the recommended batch window in milliseconds.
///
/// An active novelty boost raises the level to high before scaling; the
/// clamp always applies last, so the result stays inside the (possibly
/// boosted) level's range.
pub fn calculate_batch_window(
    base_ms: u64,
    level: AttentionLevel,
    factors: &ResolvedFactors,
) -> u64 {
    let level = if factors.novelty_boost { AttentionLevel::High } else { level };
    let config = level.config();
    let window = base_ms as f64
        * config.multiplier
        * factors.load_multiplier
        * factors.novelty_factor()
        * factors.predictive
        * factors.competitive
        * factors.circadian;
    (window.round().max(0.0) as u64).clamp(config.min_ms, config.max_ms)
}

/// Recommended batch size for a window: enough samples to fill it at the
/// producer's declared rate, bounded to keep frames small.
pub fn recommended_batch_size(window_ms: u64, delay_seconds: f64) -> u32 {
    if delay_seconds <= 0.0 {
        return 1;
    }
    let per_window = window_ms as f64 / (delay_seconds * 1_000.0);
    (per_window.ceil() as u32).clamp(1, 1_000)
}

#[cfg(test)]
#[path = "batch_tests.rs"]
mod tests;
