// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operational HTTP handlers: health, status, drain, shutdown.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::state::NodeState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub node: String,
}

/// `GET /api/v1/health`
pub async fn health(State(state): State<Arc<NodeState>>) -> Json<HealthResponse> {
    Json(HealthResponse { status: "running".to_owned(), node: state.config.node_name.clone() })
}

/// `GET /api/v1/status` — the operational snapshot.
pub async fn status(State(state): State<Arc<NodeState>>) -> Json<crate::state::StatusSnapshot> {
    Json(state.status())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DrainResponse {
    pub drained: bool,
    pub active_connections: i64,
}

/// `POST /api/v1/drain` — refuse new joins, wait for sessions to end.
pub async fn drain(State(state): State<Arc<NodeState>>) -> Json<DrainResponse> {
    info!("drain requested");
    state.begin_drain();

    let deadline = tokio::time::Instant::now() + state.config.drain_deadline();
    while state.active_connections() > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    let active = state.active_connections();
    Json(DrainResponse { drained: active == 0, active_connections: active })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ShutdownResponse {
    pub stopping: bool,
}

/// `POST /api/v1/shutdown`
pub async fn shutdown(State(state): State<Arc<NodeState>>) -> Json<ShutdownResponse> {
    info!("shutdown requested");
    let shutdown = state.shutdown.clone();
    // Let the response flush before the listener dies.
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();
    });
    Json(ShutdownResponse { stopping: true })
}

#[cfg(test)]
#[path = "api_tests.rs"]
mod tests;
