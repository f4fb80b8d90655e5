// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Topic-scoped, best-effort, at-most-once fan-out bus.
//!
//! Topics are opaque strings. Each subscriber gets a bounded queue; on
//! overflow the oldest messages are dropped and counted. Publishers never
//! block. Subscriptions close when dropped, so a worker's subscriptions die
//! with the worker.

#[cfg(feature = "cluster")]
pub mod nats;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::attention::AttentionLevel;
use crate::bio::circadian::CircadianPhase;
use crate::bio::homeostat::ThresholdOffsets;
use crate::load::LoadLevel;
use crate::measurement::Measurement;
use crate::room::crdt::RoomDoc;

/// Messages carried on the bus. Shared by reference so fan-out to many
/// subscribers never copies payloads.
pub type BusMessage = Arc<BusEvent>;

/// Every event kind the node publishes, in wire form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusEvent {
    /// A new measurement was admitted into a sensor's window.
    Measurement { sensor_id: String, attribute_id: String, measurement: Measurement },
    /// An attribute window was cleared upstream.
    ClearAttribute { sensor_id: String, attribute_id: String },
    /// Effective attention changed for an attribute (or the sensor aggregate
    /// when `attribute_id` is absent).
    AttentionChanged {
        sensor_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        attribute_id: Option<String>,
        level: AttentionLevel,
    },
    /// System load level transition.
    Load { level: LoadLevel, multiplier: f64, pressure: f64 },
    /// Statistical novelty detected on an attribute stream.
    Novelty {
        sensor_id: String,
        attribute_id: String,
        z_score: f64,
        novelty_score: f64,
        boost_duration_ms: u64,
        timestamp_ms: i64,
    },
    /// Homeostatic adaptation cycle completed.
    Homeostasis { offsets: ThresholdOffsets },
    /// Circadian phase transition.
    Circadian { phase: CircadianPhase, factor: f64 },
    /// Full-state CRDT gossip for a room.
    RoomSync { room_id: String, origin: String, state: RoomDoc },
    /// A sensor worker (re)announced itself; producers should re-seed.
    Presence { sensor_id: String },
}

/// Well-known topic names.
pub mod topic {
    pub fn sensor_data(sensor_id: &str) -> String {
        format!("sensor:{sensor_id}:data")
    }

    pub fn attention_sensor(sensor_id: &str) -> String {
        format!("attention:{sensor_id}")
    }

    pub fn attention_attr(sensor_id: &str, attribute_id: &str) -> String {
        format!("attention:{sensor_id}:{attribute_id}")
    }

    pub fn novelty(sensor_id: &str) -> String {
        format!("bio:novelty:{sensor_id}")
    }

    pub fn room_crdt(room_id: &str) -> String {
        format!("room:{room_id}:crdt")
    }

    pub const SYSTEM_LOAD: &str = "system:load";
    pub const SYSTEM_HOMEOSTASIS: &str = "system:homeostasis";
    pub const SYSTEM_CIRCADIAN: &str = "system:circadian";
    pub const PRESENCE: &str = "presence:announce";
}

/// In-process topic bus.
pub struct Bus {
    capacity: usize,
    topics: RwLock<HashMap<String, broadcast::Sender<BusMessage>>>,
    dropped: Arc<AtomicU64>,
    published: AtomicU64,
}

impl Bus {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            topics: RwLock::new(HashMap::new()),
            dropped: Arc::new(AtomicU64::new(0)),
            published: AtomicU64::new(0),
        })
    }

    /// Publish to a topic. Never blocks; a topic with no subscribers is a
    /// no-op.
    pub fn publish(&self, topic: &str, event: BusEvent) {
        self.publish_shared(topic, Arc::new(event));
    }

    /// Publish an already-shared message (used when fanning the same event to
    /// several topics).
    pub fn publish_shared(&self, topic: &str, message: BusMessage) {
        self.published.fetch_add(1, Ordering::Relaxed);
        let stale = {
            let topics = self.topics.read();
            match topics.get(topic) {
                Some(tx) => tx.send(message).is_err(),
                None => return,
            }
        };
        // Last subscriber is gone; drop the topic entry.
        if stale {
            let mut topics = self.topics.write();
            if topics.get(topic).is_some_and(|tx| tx.receiver_count() == 0) {
                topics.remove(topic);
            }
        }
    }

    /// Subscribe to a topic. The subscription ends when the returned handle
    /// is dropped.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        let rx = {
            let mut topics = self.topics.write();
            topics
                .entry(topic.to_owned())
                .or_insert_with(|| broadcast::channel(self.capacity).0)
                .subscribe()
        };
        Subscription {
            topic: topic.to_owned(),
            rx,
            dropped: Arc::clone(&self.dropped),
            overflow: 0,
        }
    }

    /// Total messages dropped across all subscribers since startup.
    pub fn dropped_total(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Total messages published since startup.
    pub fn published_total(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Number of live topics (observability).
    pub fn topic_count(&self) -> usize {
        self.topics.read().len()
    }
}

/// A bounded per-subscriber stream over one topic.
pub struct Subscription {
    topic: String,
    rx: broadcast::Receiver<BusMessage>,
    dropped: Arc<AtomicU64>,
    overflow: u64,
}

impl Subscription {
    /// Receive the next message, skipping over any dropped backlog.
    /// Returns `None` once the topic is closed.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.rx.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.overflow += n;
                    self.dropped.fetch_add(n, Ordering::Relaxed);
                    tracing::debug!(topic = %self.topic, dropped = n, "slow subscriber dropped messages");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`].
    pub fn try_recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.rx.try_recv() {
                Ok(message) => return Some(message),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    self.overflow += n;
                    self.dropped.fetch_add(n, Ordering::Relaxed);
                }
                Err(_) => return None,
            }
        }
    }

    /// Messages this subscriber lost to overflow.
    pub fn overflow(&self) -> u64 {
        self.overflow
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
