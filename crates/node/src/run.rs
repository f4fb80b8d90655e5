// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Node assembly: dependency-ordered construction and the supervision tree.
//!
//! Build order follows the dependency chain: bus, registries, pipeline
//! scaffolding, attention and load, adaptive layer, rooms, transport.
//! Sensor and room workers supervise themselves with in-place restart
//! budgets; the coordinator workers run under blast-radius domains whose
//! escalation stops the node (the process supervisor restarts it, which is
//! the restart-all-downstream path).

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::attention;
use crate::bio::arbiter::Arbiter;
use crate::bio::circadian::CircadianScheduler;
use crate::bio::homeostat::{Homeostat, OffsetsCell};
use crate::bio::novelty::NoveltyDetector;
use crate::bio::predictive::PredictiveBalancer;
use crate::bus::Bus;
use crate::catalog::CatalogClient;
use crate::config::NodeConfig;
use crate::fabric::{ChildSpec, Domain, Registry, RestartPolicy};
use crate::factors::FactorBoard;
use crate::load::{LoadMonitor, SystemProbe};
use crate::room::{RoomDeps, SnapshotStore};
use crate::sensor::{PipelineCounters, SensorDeps, SensorHandle};
use crate::state::NodeState;
use crate::transport::build_router;

/// A fully wired node ready to serve.
pub struct Node {
    pub state: Arc<NodeState>,
    escalation_rx: mpsc::Receiver<&'static str>,
}

/// Construct every component in dependency order and start the supervision
/// domains. The transport is the caller's to bind.
pub fn build(config: NodeConfig, catalog: Option<CatalogClient>) -> Node {
    let shutdown = CancellationToken::new();

    // Leaves first: the bus, then shared read tables.
    let bus = Bus::new(config.subscriber_queue);
    let factors = Arc::new(FactorBoard::new());
    let offsets = Arc::new(OffsetsCell::default());

    let (attention_handle, attention_registry) =
        attention::registry::channel(Arc::clone(&bus), Arc::clone(&factors));

    let sensors: Arc<Registry<SensorHandle>> =
        Arc::new(Registry::new("sensor", Some(config.max_sensors)));
    let rooms = Arc::new(Registry::new("room", None));

    let (novelty_tx, novelty_rx) = mpsc::channel(4_096);
    let (homeostat_tx, homeostat_rx) = mpsc::channel(64);
    let (circadian_tx, circadian_rx) = mpsc::channel(64);

    let sensor_deps = SensorDeps {
        bus: Arc::clone(&bus),
        attention: attention_handle.clone(),
        novelty_tx,
        counters: Arc::new(PipelineCounters::default()),
        window_len: config.window_len,
        base_batch_window_ms: config.base_batch_window_ms,
        offline_grace: config.offline_grace(),
        idle_ttl: config.sensor_idle_ttl(),
        mailbox_capacity: config.mailbox_high_water,
    };
    let room_deps = RoomDeps {
        bus: Arc::clone(&bus),
        store: Arc::new(SnapshotStore::new(config.bucket.clone())),
        node_name: config.node_name.clone(),
        idle_after: config.room_idle(),
    };

    let gauge_registry = Arc::clone(&sensors);
    let probe = SystemProbe::new(Box::new(move || gauge_registry.max_mailbox_depth()));
    let (load_status, load_monitor) = LoadMonitor::new(
        Box::new(probe),
        config.load_sample_interval(),
        config.mailbox_high_water,
        Arc::clone(&offsets),
        Arc::clone(&bus),
        Arc::clone(&factors),
        vec![homeostat_tx, circadian_tx],
    );

    let homeostat = Homeostat::new(homeostat_rx, offsets, Arc::clone(&bus));
    let novelty = NoveltyDetector::new(novelty_rx, Arc::clone(&bus), Arc::clone(&factors));
    let predictive =
        PredictiveBalancer::new(Arc::clone(attention_handle.table()), Arc::clone(&factors));
    let circadian = CircadianScheduler::new(circadian_rx, Arc::clone(&bus), Arc::clone(&factors));

    let (escalation_tx, escalation_rx) = mpsc::channel(8);

    // Registries: independent peers.
    let _registries = Domain::new("registries", RestartPolicy::OneForOne)
        .child(ChildSpec::once("attention-registry", move |token| attention_registry.run(token)))
        .spawn(shutdown.clone(), escalation_tx.clone());

    // Monitors feed the adaptive layer.
    let _monitors = Domain::new("monitors", RestartPolicy::OneForOne)
        .child(ChildSpec::once("load-monitor", move |token| load_monitor.run(token)))
        .child(ChildSpec::once("homeostat", move |token| homeostat.run(token)))
        .spawn(shutdown.clone(), escalation_tx.clone());

    // Adaptive layer: losing one only loses its factor until restart.
    let arbiter_table = Arc::clone(attention_handle.table());
    let arbiter_factors = Arc::clone(&factors);
    let _adaptive = Domain::new("adaptive", RestartPolicy::OneForOne)
        .child(ChildSpec::once("novelty-detector", move |token| novelty.run(token)))
        .child(ChildSpec::once("predictive-balancer", move |token| predictive.run(token)))
        .child(ChildSpec::new("resource-arbiter", move |token| {
            Arbiter::new(Arc::clone(&arbiter_table), Arc::clone(&arbiter_factors)).run(token)
        }))
        .child(ChildSpec::once("circadian-scheduler", move |token| circadian.run(token)))
        .spawn(shutdown.clone(), escalation_tx);

    let state = Arc::new(NodeState::new(
        config,
        shutdown,
        bus,
        attention_handle,
        sensors,
        rooms,
        sensor_deps,
        room_deps,
        load_status,
        catalog,
    ));

    Node { state, escalation_rx }
}

/// Run the node until shutdown.
pub async fn run(config: NodeConfig) -> anyhow::Result<()> {
    config.validate().map_err(|e| anyhow::anyhow!(e))?;

    let catalog = match &config.catalog_url {
        Some(url) => {
            let client = CatalogClient::new(url);
            client.ping().await.context("catalog unreachable")?;
            Some(client)
        }
        None => None,
    };

    let addr = format!("{}:{}", config.host, config.port);
    let mut node = build(config, catalog);
    let state = Arc::clone(&node.state);
    let shutdown = state.shutdown.clone();

    #[cfg(feature = "cluster")]
    spawn_cluster_bridge(&state).await?;

    // Domain escalations are fatal: the process supervisor owns the
    // restart-everything path.
    let watcher_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Some(domain) = node.escalation_rx.recv().await {
            error!(domain, "supervision domain escalated, stopping node");
            watcher_shutdown.cancel();
        }
    });

    let listener = TcpListener::bind(&addr).await.context("bind failed")?;
    info!(
        addr = %addr,
        node = %state.config.node_name,
        "roost node listening"
    );
    let router = build_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

#[cfg(feature = "cluster")]
async fn spawn_cluster_bridge(state: &Arc<NodeState>) -> anyhow::Result<()> {
    use crate::bus::nats::{BridgeConfig, NatsBridge};
    use crate::bus::topic;

    let Some(url) = state.config.cluster_url.clone() else { return Ok(()) };
    let bridge = Arc::new(
        NatsBridge::connect(
            BridgeConfig {
                url,
                prefix: "roost".to_owned(),
                node_name: state.config.node_name.clone(),
            },
            Arc::clone(&state.bus),
        )
        .await?,
    );

    bridge.ensure_outbound(topic::PRESENCE, state.shutdown.clone());
    bridge.ensure_outbound(topic::SYSTEM_LOAD, state.shutdown.clone());
    let inbound = Arc::clone(&bridge);
    let cancel = state.shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = inbound.run_inbound(cancel).await {
            error!(err = %e, "cluster bridge inbound loop failed");
        }
    });
    state.set_bridge(bridge);
    Ok(())
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
