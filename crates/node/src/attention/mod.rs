// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Attention registry: per-observer intents aggregated into effective
//! attention levels, with battery caps, pins, hover boosts, and the derived
//! batch-window calculation.

pub mod batch;
pub mod book;
pub mod registry;

pub use batch::{calculate_batch_window, LevelConfig};
pub use book::AttentionBook;
pub use registry::{AttentionHandle, AttentionTable};

use serde::{Deserialize, Serialize};

/// Discrete observation intensity. Ordered ascending so aggregation is `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttentionLevel {
    None,
    Low,
    Medium,
    High,
}

impl AttentionLevel {
    /// Encoding used by the predictive layer and the resource arbiter.
    pub fn score(&self) -> f64 {
        match self {
            Self::High => 1.0,
            Self::Medium => 0.6,
            Self::Low => 0.3,
            Self::None => 0.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::None => "none",
        }
    }
}

impl std::fmt::Display for AttentionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reported battery condition of an observer's device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatteryCondition {
    Normal,
    Low,
    Critical,
}

impl BatteryCondition {
    /// Ceiling this condition places on effective attention.
    pub fn attention_cap(&self) -> AttentionLevel {
        match self {
            Self::Normal => AttentionLevel::High,
            Self::Low => AttentionLevel::Medium,
            Self::Critical => AttentionLevel::Low,
        }
    }
}

/// A battery report for one observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryReport {
    pub state: BatteryCondition,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level_percent: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charging: Option<bool>,
    pub reported_at: i64,
}
