// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::attention::AttentionHandle;
use crate::bus::Bus;
use crate::catalog::CatalogClient;
use crate::config::NodeConfig;
use crate::fabric::Registry;
use crate::load::LoadStatus;
use crate::room::{RoomDeps, RoomHandle};
use crate::sensor::{SensorDeps, SensorHandle};

/// Shared node state threaded through the transport layer.
pub struct NodeState {
    pub config: NodeConfig,
    pub shutdown: CancellationToken,
    pub bus: Arc<Bus>,
    pub attention: AttentionHandle,
    pub sensors: Arc<Registry<SensorHandle>>,
    pub rooms: Arc<Registry<RoomHandle>>,
    pub sensor_deps: SensorDeps,
    pub room_deps: RoomDeps,
    pub load_status: Arc<LoadStatus>,
    pub catalog: Option<CatalogClient>,
    draining: std::sync::atomic::AtomicBool,
    active_connections: AtomicI64,
    #[cfg(feature = "cluster")]
    bridge: parking_lot::RwLock<Option<Arc<crate::bus::nats::NatsBridge>>>,
}

impl NodeState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: NodeConfig,
        shutdown: CancellationToken,
        bus: Arc<Bus>,
        attention: AttentionHandle,
        sensors: Arc<Registry<SensorHandle>>,
        rooms: Arc<Registry<RoomHandle>>,
        sensor_deps: SensorDeps,
        room_deps: RoomDeps,
        load_status: Arc<LoadStatus>,
        catalog: Option<CatalogClient>,
    ) -> Self {
        Self {
            config,
            shutdown,
            bus,
            attention,
            sensors,
            rooms,
            sensor_deps,
            room_deps,
            load_status,
            catalog,
            draining: std::sync::atomic::AtomicBool::new(false),
            active_connections: AtomicI64::new(0),
            #[cfg(feature = "cluster")]
            bridge: parking_lot::RwLock::new(None),
        }
    }

    #[cfg(feature = "cluster")]
    pub fn set_bridge(&self, bridge: Arc<crate::bus::nats::NatsBridge>) {
        *self.bridge.write() = Some(bridge);
    }

    #[cfg(feature = "cluster")]
    pub fn bridge(&self) -> Option<Arc<crate::bus::nats::NatsBridge>> {
        self.bridge.read().clone()
    }

    pub fn begin_drain(&self) {
        self.draining.store(true, Ordering::Release);
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::AcqRel);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn active_connections(&self) -> i64 {
        self.active_connections.load(Ordering::Acquire)
    }

    /// Operational snapshot served by `/api/v1/status`.
    pub fn status(&self) -> StatusSnapshot {
        let load = self.load_status.current();
        let load_counts = self.load_status.level_counts();
        let attention_counts = self.attention.table().level_counts();

        let count_load = |level: crate::load::LoadLevel| -> u64 {
            load_counts.get(&level).copied().unwrap_or(0)
        };
        let count_attention = |level: crate::attention::AttentionLevel| -> usize {
            attention_counts.get(&level).copied().unwrap_or(0)
        };

        StatusSnapshot {
            node: self.config.node_name.clone(),
            draining: self.is_draining(),
            active_sensors: self.sensors.len(),
            active_rooms: self.rooms.len(),
            active_connections: self.active_connections(),
            load_level: load.level,
            load_pressure: load.pressure,
            load_counts: LevelCounts {
                normal: count_load(crate::load::LoadLevel::Normal),
                elevated: count_load(crate::load::LoadLevel::Elevated),
                high: count_load(crate::load::LoadLevel::High),
                critical: count_load(crate::load::LoadLevel::Critical),
            },
            attention_counts: AttentionCounts {
                high: count_attention(crate::attention::AttentionLevel::High),
                medium: count_attention(crate::attention::AttentionLevel::Medium),
                low: count_attention(crate::attention::AttentionLevel::Low),
                none: count_attention(crate::attention::AttentionLevel::None),
            },
            bus_published: self.bus.published_total(),
            bus_dropped: self.bus.dropped_total(),
            measurements_ingested: self
                .sensor_deps
                .counters
                .ingested
                .load(Ordering::Relaxed),
            invalid_payloads: self
                .sensor_deps
                .counters
                .invalid_payloads
                .load(Ordering::Relaxed),
            out_of_tolerance: self
                .sensor_deps
                .counters
                .out_of_tolerance
                .load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub node: String,
    pub draining: bool,
    pub active_sensors: usize,
    pub active_rooms: usize,
    pub active_connections: i64,
    pub load_level: crate::load::LoadLevel,
    pub load_pressure: f64,
    pub load_counts: LevelCounts,
    pub attention_counts: AttentionCounts,
    pub bus_published: u64,
    pub bus_dropped: u64,
    pub measurements_ingested: u64,
    pub invalid_payloads: u64,
    pub out_of_tolerance: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelCounts {
    pub normal: u64,
    pub elevated: u64,
    pub high: u64,
    pub critical: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttentionCounts {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub none: usize,
}
