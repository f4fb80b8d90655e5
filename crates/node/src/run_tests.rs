// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use super::*;
use crate::measurement::{epoch_ms, Measurement, Payload};
use crate::sensor::spawn_sensor;

#[tokio::test]
async fn build_wires_the_pipeline_end_to_end() -> anyhow::Result<()> {
    let node = build(NodeConfig::for_tests(), None);
    let state = Arc::clone(&node.state);

    let handle = spawn_sensor(&state.sensors, &state.sensor_deps, "s1", &state.shutdown)
        .map_err(|code| anyhow::anyhow!(code))?;
    handle
        .ingest(
            "hr",
            Measurement {
                timestamp_ms: epoch_ms(),
                delay_seconds: 1.0,
                payload: Payload::Heartrate { bpm: 64 },
            },
        )
        .await
        .map_err(|code| anyhow::anyhow!(code))?;

    // Attention registry picked up the attribute registration.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        state.attention.get_attention_level("s1", "hr"),
        crate::attention::AttentionLevel::Low
    );

    let status = state.status();
    assert_eq!(status.active_sensors, 1);
    assert_eq!(status.measurements_ingested, 1);
    assert_eq!(status.active_rooms, 0);
    assert!(!status.draining);

    state.shutdown.cancel();
    Ok(())
}

#[tokio::test]
async fn drain_flag_flips_status() {
    let node = build(NodeConfig::for_tests(), None);
    assert!(!node.state.is_draining());
    node.state.begin_drain();
    assert!(node.state.status().draining);
    node.state.shutdown.cancel();
}

#[tokio::test]
async fn load_monitor_reports_within_a_tick() {
    let mut config = NodeConfig::for_tests();
    config.load_sample_ms = 20;
    let node = build(config, None);

    tokio::time::sleep(Duration::from_millis(120)).await;
    let counts = node.state.load_status.level_counts();
    assert!(counts.values().sum::<u64>() >= 1, "no load samples recorded");
    node.state.shutdown.cancel();
}
