// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end scenario tests.
//!
//! Binds a real node on an ephemeral port and exercises it over HTTP and
//! WebSocket, exactly as connectors and observers would.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use roost::config::NodeConfig;
use roost::run::build;
use roost::state::NodeState;
use roost::transport::build_router;

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A node bound on an ephemeral port for one test.
pub struct TestNode {
    pub state: Arc<NodeState>,
    pub addr: SocketAddr,
}

impl TestNode {
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_with(NodeConfig::for_tests()).await
    }

    pub async fn start_with(config: NodeConfig) -> anyhow::Result<Self> {
        let node = build(config, None);
        let state = Arc::clone(&node.state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let router = build_router(Arc::clone(&state));
        let shutdown = state.shutdown.clone();
        tokio::spawn(async move {
            let _ = axum_serve(listener, router, shutdown).await;
        });
        Ok(Self { state, addr })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Open a raw protocol socket.
    pub async fn connect_ws(&self) -> anyhow::Result<WsClient> {
        let (socket, _) = tokio_tungstenite::connect_async(self.ws_url()).await?;
        Ok(socket)
    }

    pub fn stop(&self) {
        self.state.shutdown.cancel();
    }
}

async fn axum_serve(
    listener: tokio::net::TcpListener,
    router: axum::Router,
    shutdown: tokio_util::sync::CancellationToken,
) -> anyhow::Result<()> {
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

/// Send one JSON frame.
pub async fn send_json(ws: &mut WsClient, frame: serde_json::Value) -> anyhow::Result<()> {
    ws.send(Message::Text(frame.to_string().into())).await?;
    Ok(())
}

/// Receive the next JSON frame within the deadline.
pub async fn recv_json(ws: &mut WsClient, deadline: Duration) -> anyhow::Result<serde_json::Value> {
    let frame = tokio::time::timeout(deadline, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return Ok(serde_json::from_str(&text)?),
                Some(Ok(Message::Close(_))) | None => anyhow::bail!("socket closed"),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            }
        }
    })
    .await
    .map_err(|_| anyhow::anyhow!("no frame within {deadline:?}"))??;
    Ok(frame)
}

/// Receive frames until one matches the predicate, within the deadline.
pub async fn recv_until(
    ws: &mut WsClient,
    deadline: Duration,
    mut predicate: impl FnMut(&serde_json::Value) -> bool,
) -> anyhow::Result<serde_json::Value> {
    let step = Duration::from_millis(200);
    let started = tokio::time::Instant::now();
    loop {
        if started.elapsed() > deadline {
            anyhow::bail!("no matching frame within {deadline:?}");
        }
        if let Ok(frame) = recv_json(ws, step).await {
            if predicate(&frame) {
                return Ok(frame);
            }
        }
    }
}

/// The next `backpressure_config` frame.
pub async fn next_backpressure(
    ws: &mut WsClient,
    deadline: Duration,
) -> anyhow::Result<serde_json::Value> {
    recv_until(ws, deadline, |frame| frame["type"] == "backpressure_config").await
}
