// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! NATS bridge for the cluster variant: mirrors selected bus topics onto
//! NATS subjects and re-publishes remote frames locally.
//!
//! Topic `room:{id}:crdt` becomes subject `{prefix}.room.{id}.crdt`; the
//! presence and system topics map the same way. Measurement fan-out stays
//! node-local; only coordination topics cross the wire.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Bus, BusEvent};

/// Bridged frame: the originating node plus the event, so a node can drop
/// its own echoes.
#[derive(Debug, Serialize, Deserialize)]
struct BridgeFrame {
    origin: String,
    topic: String,
    event: BusEvent,
}

/// Connection settings for the bridge.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub url: String,
    pub prefix: String,
    pub node_name: String,
}

/// Bridge worker: one inbound loop plus one outbound loop per mirrored
/// topic.
pub struct NatsBridge {
    client: async_nats::Client,
    config: BridgeConfig,
    bus: Arc<Bus>,
    mirrored: Mutex<HashSet<String>>,
}

impl NatsBridge {
    pub async fn connect(config: BridgeConfig, bus: Arc<Bus>) -> anyhow::Result<Self> {
        info!(url = %config.url, "connecting cluster bridge");
        let client = async_nats::ConnectOptions::new()
            .retry_on_initial_connect()
            .connect(&config.url)
            .await?;
        info!("cluster bridge connected");
        Ok(Self { client, config, bus, mirrored: Mutex::new(HashSet::new()) })
    }

    /// Start mirroring a topic outbound exactly once.
    pub fn ensure_outbound(self: &Arc<Self>, local_topic: &str, cancel: CancellationToken) {
        if !self.mirrored.lock().insert(local_topic.to_owned()) {
            return;
        }
        let bridge = Arc::clone(self);
        let topic = local_topic.to_owned();
        tokio::spawn(async move {
            if let Err(e) = bridge.run_outbound(&topic, cancel).await {
                warn!(topic = %topic, err = %e, "bridge outbound loop failed");
            }
        });
    }

    /// Mirror one local topic out to the cluster until shutdown.
    pub async fn run_outbound(
        &self,
        local_topic: &str,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        let mut sub = self.bus.subscribe(local_topic);
        let subject = self.subject_for(local_topic);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                message = sub.recv() => {
                    let Some(message) = message else { return Ok(()) };
                    // Locally re-published remote frames carry a foreign
                    // origin already; skip them to avoid loops.
                    if let BusEvent::RoomSync { origin, .. } = message.as_ref() {
                        if *origin != self.config.node_name {
                            continue;
                        }
                    }
                    let frame = BridgeFrame {
                        origin: self.config.node_name.clone(),
                        topic: local_topic.to_owned(),
                        event: message.as_ref().clone(),
                    };
                    let Ok(body) = serde_json::to_vec(&frame) else { continue };
                    if let Err(e) = self.client.publish(subject.clone(), body.into()).await {
                        warn!(subject = %subject, err = %e, "bridge publish failed");
                    }
                }
            }
        }
    }

    /// Receive cluster frames for a subject pattern and re-publish locally.
    pub async fn run_inbound(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        use futures_util::StreamExt;

        let pattern = format!("{}.>", self.config.prefix);
        let mut subscription = self.client.subscribe(pattern).await?;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                message = subscription.next() => {
                    let Some(message) = message else { return Ok(()) };
                    let Ok(frame) = serde_json::from_slice::<BridgeFrame>(&message.payload) else {
                        continue;
                    };
                    if frame.origin == self.config.node_name {
                        continue;
                    }
                    debug!(topic = %frame.topic, origin = %frame.origin, "bridged frame in");
                    self.bus.publish(&frame.topic, frame.event);
                }
            }
        }
    }

    fn subject_for(&self, local_topic: &str) -> String {
        format!("{}.{}", self.config.prefix, local_topic.replace(':', "."))
    }
}
