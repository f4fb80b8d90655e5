// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The connector/observer WebSocket protocol.
//!
//! One socket serves both roles: producers join `sensor:{id}` with
//! `params.role = "connector"`, stream measurements, and receive
//! back-pressure hints; observers join the same topics to receive the
//! broadcast, declare attention intents, and collaborate in rooms.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{RawQuery, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::attention::BatteryCondition;
use crate::bus::BusEvent;
use crate::catalog::SensorRecord;
use crate::error::FaultCode;
use crate::measurement::{epoch_ms, Measurement, Payload};
use crate::room::{spawn_room, RoomChange, RoomDoc, RoomHandle};
use crate::sensor::{spawn_sensor, BatchItem, ConnectorPush, SensorHandle};
use crate::state::NodeState;
use crate::transport::auth;

/// Per-connection outbound queue depth.
const OUT_QUEUE: usize = 256;

// -- Wire messages ------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct JoinParams {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default, rename = "type")]
    pub sensor_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttentionAction {
    View,
    Unview,
    Hover,
    Unhover,
    Focus,
    Unfocus,
    Pin,
    Unpin,
}

#[derive(Debug, Deserialize)]
pub struct BatchAttribute {
    pub attribute_id: String,
    pub timestamp_ms: i64,
    #[serde(default)]
    pub delay_seconds: f64,
    pub payload: Payload,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMsg {
    #[serde(rename = "join")]
    Join {
        topic: String,
        #[serde(default)]
        params: Option<JoinParams>,
    },
    #[serde(rename = "leave")]
    Leave { topic: String },
    #[serde(rename = "measurement")]
    Measurement {
        sensor_id: String,
        attribute_id: String,
        timestamp_ms: i64,
        #[serde(default)]
        delay_seconds: f64,
        payload: Payload,
    },
    #[serde(rename = "measurements_batch")]
    MeasurementsBatch { sensor_id: String, attributes: Vec<BatchAttribute> },
    #[serde(rename = "request-seed-data")]
    RequestSeedData {
        sensor_id: String,
        attribute_id: String,
        #[serde(default)]
        from: Option<i64>,
        #[serde(default)]
        to: Option<i64>,
        #[serde(default)]
        limit: Option<usize>,
    },
    #[serde(rename = "attention")]
    Attention {
        action: AttentionAction,
        sensor_id: String,
        #[serde(default)]
        attribute_id: Option<String>,
    },
    #[serde(rename = "battery")]
    Battery {
        state: BatteryCondition,
        source: String,
        #[serde(default)]
        level: Option<f32>,
        #[serde(default)]
        charging: Option<bool>,
    },
    #[serde(rename = "clear-attribute")]
    ClearAttribute { sensor_id: String, attribute_id: String },
    #[serde(rename = "room-change")]
    RoomChange { room_id: String, change: RoomChange },
    #[serde(rename = "room-state-request")]
    RoomStateRequest { room_id: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMsg {
    #[serde(rename = "seeddata")]
    SeedData { sensor_id: String, attribute_id: String, data: Vec<Measurement> },
    #[serde(rename = "measurement")]
    Measurement { sensor_id: String, attribute_id: String, measurement: Measurement },
    #[serde(rename = "backpressure_config")]
    BackpressureConfig {
        attention_level: crate::attention::AttentionLevel,
        recommended_batch_window_ms: u64,
        recommended_batch_size: u32,
        timestamp_ms: i64,
    },
    #[serde(rename = "clear-attribute")]
    ClearAttribute { sensor_id: String, attribute_id: String },
    #[serde(rename = "room-state")]
    RoomState { room_id: String, state: RoomDoc },
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl ServerMsg {
    fn fault(code: FaultCode, message: impl Into<String>) -> Self {
        Self::Error { code: code.as_str().to_owned(), message: message.into() }
    }
}

// -- Handler ------------------------------------------------------------------

/// `GET /ws` — the connector/observer socket.
pub async fn ws_handler(
    State(state): State<Arc<NodeState>>,
    RawQuery(query): RawQuery,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let query = query.unwrap_or_default();
    if auth::validate_ws_query(&query, state.config.auth_token.as_deref()).is_err() {
        return FaultCode::Unauthorized.to_http_response("invalid token").into_response();
    }
    if state.is_draining() {
        return FaultCode::Draining.to_http_response("node is draining").into_response();
    }
    ws.on_upgrade(move |socket| handle_connection(state, socket)).into_response()
}

struct JoinedSensor {
    handle: SensorHandle,
    connector: bool,
    forwarders: Vec<JoinHandle<()>>,
}

struct JoinedRoom {
    handle: RoomHandle,
    forwarder: JoinHandle<()>,
}

struct Conn {
    state: Arc<NodeState>,
    out_tx: mpsc::Sender<ServerMsg>,
    user_id: String,
    sensors: HashMap<String, JoinedSensor>,
    rooms: HashMap<String, JoinedRoom>,
}

async fn handle_connection(state: Arc<NodeState>, socket: WebSocket) {
    state.connection_opened();
    let (ws_tx, ws_rx) = socket.split();
    let (out_tx, out_rx) = mpsc::channel(OUT_QUEUE);

    let mut conn = Conn {
        state: Arc::clone(&state),
        out_tx,
        user_id: format!("guest-{}", uuid::Uuid::new_v4()),
        sensors: HashMap::new(),
        rooms: HashMap::new(),
    };

    conn.serve(ws_tx, ws_rx, out_rx).await;
    conn.teardown();
    state.connection_closed();
}

impl Conn {
    async fn serve(
        &mut self,
        mut ws_tx: SplitSink<WebSocket, Message>,
        mut ws_rx: SplitStream<WebSocket>,
        mut out_rx: mpsc::Receiver<ServerMsg>,
    ) {
        loop {
            tokio::select! {
                outbound = out_rx.recv() => {
                    let Some(msg) = outbound else { break };
                    let Ok(json) = serde_json::to_string(&msg) else { continue };
                    if ws_tx.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                inbound = ws_rx.next() => {
                    match inbound {
                        Some(Ok(Message::Text(text))) => {
                            if self.dispatch(&text).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                        _ => {}
                    }
                }
                _ = self.state.shutdown.cancelled() => break,
            }
        }
    }

    /// Handle one client frame. `Err` closes the connection.
    async fn dispatch(&mut self, text: &str) -> Result<(), FaultCode> {
        let msg: ClientMsg = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(err = %e, "unparseable client frame");
                self.send(ServerMsg::fault(FaultCode::BadRequest, "unparseable frame")).await;
                return Ok(());
            }
        };

        match msg {
            ClientMsg::Join { topic, params } => self.join(&topic, params.unwrap_or_default()).await,
            ClientMsg::Leave { topic } => {
                self.leave(&topic);
                Ok(())
            }
            ClientMsg::Measurement { sensor_id, attribute_id, timestamp_ms, delay_seconds, payload } => {
                let measurement = Measurement { timestamp_ms, delay_seconds, payload };
                self.ingest(&sensor_id, &attribute_id, measurement).await;
                Ok(())
            }
            ClientMsg::MeasurementsBatch { sensor_id, attributes } => {
                let Some(handle) = self.sensor_handle(&sensor_id) else {
                    self.send(ServerMsg::fault(FaultCode::UnknownSensor, &sensor_id)).await;
                    return Ok(());
                };
                let items = attributes
                    .into_iter()
                    .map(|a| BatchItem {
                        attribute_id: a.attribute_id,
                        measurement: Measurement {
                            timestamp_ms: a.timestamp_ms,
                            delay_seconds: a.delay_seconds,
                            payload: a.payload,
                        },
                    })
                    .collect();
                match handle.ingest_batch(items).await {
                    Ok(outcome) if outcome.rejected > 0 => {
                        debug!(sensor_id, rejected = outcome.rejected, "batch partially rejected");
                    }
                    Ok(_) => {}
                    Err(code) => self.send(ServerMsg::fault(code, "batch failed")).await,
                }
                Ok(())
            }
            ClientMsg::RequestSeedData { sensor_id, attribute_id, from, to, limit } => {
                let Some(handle) = self.sensor_handle(&sensor_id) else {
                    self.send(ServerMsg::fault(FaultCode::UnknownSensor, &sensor_id)).await;
                    return Ok(());
                };
                match handle.seed(&attribute_id, from, to, limit).await {
                    Ok(data) => {
                        self.send(ServerMsg::SeedData { sensor_id, attribute_id, data }).await;
                    }
                    Err(code) => self.send(ServerMsg::fault(code, "seed failed")).await,
                }
                Ok(())
            }
            ClientMsg::Attention { action, sensor_id, attribute_id } => {
                self.attention(action, &sensor_id, attribute_id.as_deref()).await;
                Ok(())
            }
            ClientMsg::Battery { state, source, level, charging } => {
                self.state.attention.report_battery_state(
                    &self.user_id,
                    crate::attention::BatteryReport {
                        state,
                        source,
                        level_percent: level,
                        charging,
                        reported_at: epoch_ms(),
                    },
                );
                Ok(())
            }
            ClientMsg::ClearAttribute { sensor_id, attribute_id } => {
                if let Some(handle) = self.sensor_handle(&sensor_id) {
                    handle.clear_attribute(&attribute_id);
                }
                Ok(())
            }
            ClientMsg::RoomChange { room_id, change } => {
                let Some(handle) = self.room_handle(&room_id) else {
                    self.send(ServerMsg::fault(FaultCode::BadRequest, "join the room first")).await;
                    return Ok(());
                };
                if let Err(code) = handle.apply_change(change).await {
                    self.send(ServerMsg::fault(code, "change rejected")).await;
                }
                Ok(())
            }
            ClientMsg::RoomStateRequest { room_id } => {
                let Some(handle) = self.room_handle(&room_id) else {
                    self.send(ServerMsg::fault(FaultCode::BadRequest, "join the room first")).await;
                    return Ok(());
                };
                match handle.get_state().await {
                    Ok(state) => self.send(ServerMsg::RoomState { room_id, state }).await,
                    Err(code) => self.send(ServerMsg::fault(code, "state unavailable")).await,
                }
                Ok(())
            }
        }
    }

    async fn join(&mut self, topic: &str, params: JoinParams) -> Result<(), FaultCode> {
        if self.state.is_draining() {
            self.send(ServerMsg::fault(FaultCode::Draining, "node is draining")).await;
            return Err(FaultCode::Draining);
        }
        if let Some(user_id) = &params.user_id {
            self.user_id = user_id.clone();
        }

        if let Some(sensor_id) = topic.strip_prefix("sensor:") {
            return self.join_sensor(sensor_id, &params).await;
        }
        if let Some(room_id) = topic.strip_prefix("room:") {
            return self.join_room(room_id).await;
        }
        self.send(ServerMsg::fault(FaultCode::BadRequest, format!("unknown topic {topic}"))).await;
        Ok(())
    }

    async fn join_sensor(&mut self, sensor_id: &str, params: &JoinParams) -> Result<(), FaultCode> {
        let connector = params.role.as_deref() == Some("connector");

        // The catalog is authoritative for identity: connectors register
        // first-seen sensors, observers of unknown sensors are refused.
        if let Some(catalog) = &self.state.catalog {
            match catalog.get_sensor(sensor_id).await {
                Ok(Some(_)) => {}
                Ok(None) if connector => {
                    let record = SensorRecord {
                        sensor_id: sensor_id.to_owned(),
                        sensor_type: params.sensor_type.clone().unwrap_or_else(|| "generic".to_owned()),
                        owner: params.owner.clone().unwrap_or_else(|| self.user_id.clone()),
                    };
                    if let Err(code) = catalog.upsert_sensor(&record).await {
                        self.send(ServerMsg::fault(code, "catalog upsert failed")).await;
                        return Ok(());
                    }
                }
                Ok(None) => {
                    self.send(ServerMsg::fault(FaultCode::UnknownSensor, sensor_id)).await;
                    return Ok(());
                }
                Err(code) => {
                    self.send(ServerMsg::fault(code, "catalog unavailable")).await;
                    return Ok(());
                }
            }
        }

        let handle = match spawn_sensor(
            &self.state.sensors,
            &self.state.sensor_deps,
            sensor_id,
            &self.state.shutdown,
        ) {
            Ok(handle) => handle,
            Err(code) => {
                // Capacity refusals close the connection with a reason.
                self.send(ServerMsg::fault(code, "sensor capacity exhausted")).await;
                return Err(code);
            }
        };

        let mut forwarders = Vec::new();
        let data_sub = self.state.bus.subscribe(&crate::bus::topic::sensor_data(sensor_id));
        forwarders.push(spawn_data_forwarder(data_sub, self.out_tx.clone()));

        if connector {
            let (push_tx, push_rx) = mpsc::channel(16);
            handle.attach_connector(push_tx);
            forwarders.push(spawn_push_forwarder(push_rx, self.out_tx.clone()));
        }

        self.sensors.insert(
            sensor_id.to_owned(),
            JoinedSensor { handle, connector, forwarders },
        );
        debug!(sensor_id, connector, user_id = %self.user_id, "joined sensor topic");
        Ok(())
    }

    async fn join_room(&mut self, room_id: &str) -> Result<(), FaultCode> {
        let handle = match spawn_room(
            &self.state.rooms,
            &self.state.room_deps,
            room_id,
            &self.state.shutdown,
        ) {
            Ok(handle) => handle,
            Err(code) => {
                self.send(ServerMsg::fault(code, "room unavailable")).await;
                return Ok(());
            }
        };
        handle.member_join(&self.user_id, serde_json::json!({}));

        // Rooms are cluster-wide: gossip crosses nodes when bridged.
        #[cfg(feature = "cluster")]
        if let Some(bridge) = self.state.bridge() {
            bridge.ensure_outbound(
                &crate::bus::topic::room_crdt(room_id),
                self.state.shutdown.clone(),
            );
        }

        let sub = self.state.bus.subscribe(&crate::bus::topic::room_crdt(room_id));
        let forwarder = spawn_room_forwarder(sub, self.out_tx.clone());

        // Current state straight away, then deltas via gossip frames.
        if let Ok(state) = handle.get_state().await {
            self.send(ServerMsg::RoomState { room_id: room_id.to_owned(), state }).await;
        }

        self.rooms.insert(room_id.to_owned(), JoinedRoom { handle, forwarder });
        Ok(())
    }

    fn leave(&mut self, topic: &str) {
        if let Some(sensor_id) = topic.strip_prefix("sensor:") {
            if let Some(joined) = self.sensors.remove(sensor_id) {
                if joined.connector {
                    joined.handle.detach_connector();
                }
                for task in joined.forwarders {
                    task.abort();
                }
            }
        } else if let Some(room_id) = topic.strip_prefix("room:") {
            if let Some(joined) = self.rooms.remove(room_id) {
                joined.handle.member_leave(&self.user_id);
                joined.forwarder.abort();
            }
        }
    }

    async fn ingest(&mut self, sensor_id: &str, attribute_id: &str, measurement: Measurement) {
        let Some(handle) = self.sensor_handle(sensor_id) else {
            self.send(ServerMsg::fault(FaultCode::UnknownSensor, sensor_id)).await;
            return;
        };
        match handle.ingest(attribute_id, measurement).await {
            Ok(()) => {}
            Err(code) => {
                // Validation faults never kill the stream.
                self.send(ServerMsg::fault(code, format!("{attribute_id} rejected"))).await;
            }
        }
    }

    async fn attention(
        &mut self,
        action: AttentionAction,
        sensor_id: &str,
        attribute_id: Option<&str>,
    ) {
        let attention = &self.state.attention;
        let user = self.user_id.clone();
        match (action, attribute_id) {
            (AttentionAction::Pin, _) => attention.pin_sensor(sensor_id, &user),
            (AttentionAction::Unpin, _) => attention.unpin_sensor(sensor_id, &user),
            (AttentionAction::View, Some(attr)) => attention.register_view(sensor_id, attr, &user),
            (AttentionAction::Unview, Some(attr)) => {
                attention.unregister_view(sensor_id, attr, &user);
            }
            (AttentionAction::Hover, Some(attr)) => {
                attention.register_hover(sensor_id, attr, &user);
            }
            (AttentionAction::Unhover, Some(attr)) => {
                attention.unregister_hover(sensor_id, attr, &user);
            }
            (AttentionAction::Focus, Some(attr)) => {
                attention.register_focus(sensor_id, attr, &user);
            }
            (AttentionAction::Unfocus, Some(attr)) => {
                attention.unregister_focus(sensor_id, attr, &user);
            }
            _ => {
                self.send(ServerMsg::fault(FaultCode::BadRequest, "attribute_id required")).await;
            }
        }
    }

    fn sensor_handle(&self, sensor_id: &str) -> Option<SensorHandle> {
        self.sensors
            .get(sensor_id)
            .map(|joined| joined.handle.clone())
            .or_else(|| self.state.sensors.resolve(sensor_id))
    }

    fn room_handle(&self, room_id: &str) -> Option<RoomHandle> {
        self.rooms.get(room_id).map(|joined| joined.handle.clone())
    }

    async fn send(&self, msg: ServerMsg) {
        if self.out_tx.send(msg).await.is_err() {
            warn!("outbound queue closed");
        }
    }

    /// Session end: release every intent and attachment this socket held.
    fn teardown(&mut self) {
        for (_, joined) in self.sensors.drain() {
            if joined.connector {
                joined.handle.detach_connector();
            }
            for task in joined.forwarders {
                task.abort();
            }
        }
        for (_, joined) in self.rooms.drain() {
            joined.handle.member_leave(&self.user_id);
            joined.forwarder.abort();
        }
        self.state.attention.unregister_all(&self.user_id);
    }
}

// -- Forwarders ---------------------------------------------------------------

fn spawn_data_forwarder(
    mut sub: crate::bus::Subscription,
    out_tx: mpsc::Sender<ServerMsg>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = sub.recv().await {
            let msg = match event.as_ref() {
                BusEvent::Measurement { sensor_id, attribute_id, measurement } => {
                    ServerMsg::Measurement {
                        sensor_id: sensor_id.clone(),
                        attribute_id: attribute_id.clone(),
                        measurement: measurement.clone(),
                    }
                }
                BusEvent::ClearAttribute { sensor_id, attribute_id } => ServerMsg::ClearAttribute {
                    sensor_id: sensor_id.clone(),
                    attribute_id: attribute_id.clone(),
                },
                _ => continue,
            };
            if out_tx.send(msg).await.is_err() {
                return;
            }
        }
    })
}

fn spawn_push_forwarder(
    mut push_rx: mpsc::Receiver<ConnectorPush>,
    out_tx: mpsc::Sender<ServerMsg>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(push) = push_rx.recv().await {
            let ConnectorPush::Backpressure(config) = push;
            let msg = ServerMsg::BackpressureConfig {
                attention_level: config.attention_level,
                recommended_batch_window_ms: config.recommended_batch_window_ms,
                recommended_batch_size: config.recommended_batch_size,
                timestamp_ms: config.timestamp_ms,
            };
            if out_tx.send(msg).await.is_err() {
                return;
            }
        }
    })
}

fn spawn_room_forwarder(
    mut sub: crate::bus::Subscription,
    out_tx: mpsc::Sender<ServerMsg>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = sub.recv().await {
            if let BusEvent::RoomSync { room_id, state, .. } = event.as_ref() {
                let msg = ServerMsg::RoomState { room_id: room_id.clone(), state: state.clone() };
                if out_tx.send(msg).await.is_err() {
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
#[path = "ws_tests.rs"]
mod tests;
