// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum_test::TestServer;

use crate::config::NodeConfig;
use crate::run::build;
use crate::state::StatusSnapshot;
use crate::transport::build_router;

fn server(config: NodeConfig) -> anyhow::Result<(TestServer, std::sync::Arc<crate::state::NodeState>)> {
    let node = build(config, None);
    let state = std::sync::Arc::clone(&node.state);
    let server = TestServer::new(build_router(std::sync::Arc::clone(&state)))
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    Ok((server, state))
}

#[tokio::test]
async fn health_is_open() -> anyhow::Result<()> {
    let (server, state) = server(NodeConfig::for_tests())?;
    let response = server.get("/api/v1/health").await;
    response.assert_status_ok();
    assert_eq!(response.json::<serde_json::Value>()["status"], "running");
    state.shutdown.cancel();
    Ok(())
}

#[tokio::test]
async fn status_reports_counts() -> anyhow::Result<()> {
    let (server, state) = server(NodeConfig::for_tests())?;
    let response = server.get("/api/v1/status").await;
    response.assert_status_ok();

    let snapshot: StatusSnapshot = response.json();
    assert_eq!(snapshot.active_sensors, 0);
    assert_eq!(snapshot.node, "test-node");
    state.shutdown.cancel();
    Ok(())
}

#[tokio::test]
async fn api_requires_bearer_when_configured() -> anyhow::Result<()> {
    let mut config = NodeConfig::for_tests();
    config.auth_token = Some("sekrit".to_owned());
    let (server, state) = server(config)?;

    let denied = server.get("/api/v1/status").await;
    denied.assert_status_unauthorized();

    let allowed =
        server.get("/api/v1/status").authorization_bearer("sekrit").await;
    allowed.assert_status_ok();

    // Health stays open for probes.
    server.get("/api/v1/health").await.assert_status_ok();
    state.shutdown.cancel();
    Ok(())
}

#[tokio::test]
async fn drain_with_no_sessions_finishes_immediately() -> anyhow::Result<()> {
    let (server, state) = server(NodeConfig::for_tests())?;
    let response = server.post("/api/v1/drain").await;
    response.assert_status_ok();

    let body: super::DrainResponse = response.json();
    assert!(body.drained);
    assert!(state.is_draining());
    state.shutdown.cancel();
    Ok(())
}

#[tokio::test]
async fn drain_times_out_with_active_sessions() -> anyhow::Result<()> {
    let mut config = NodeConfig::for_tests();
    config.drain_deadline_ms = 300;
    let (server, state) = server(config)?;

    state.connection_opened();
    let response = server.post("/api/v1/drain").await;
    let body: super::DrainResponse = response.json();
    assert!(!body.drained);
    assert_eq!(body.active_connections, 1);
    state.shutdown.cancel();
    Ok(())
}

#[tokio::test]
async fn shutdown_cancels_the_node() -> anyhow::Result<()> {
    let (server, state) = server(NodeConfig::for_tests())?;
    server.post("/api/v1/shutdown").await.assert_status_ok();

    tokio::time::timeout(std::time::Duration::from_secs(2), state.shutdown.cancelled())
        .await
        .map_err(|_| anyhow::anyhow!("shutdown never fired"))?;
    Ok(())
}
