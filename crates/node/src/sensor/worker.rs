// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-sensor worker: mailbox actor owning the attribute windows.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::window::AttributeWindow;
use crate::attention::{batch, AttentionHandle, AttentionLevel};
use crate::bio::novelty::NoveltySample;
use crate::bus::{topic, Bus, BusEvent};
use crate::error::FaultCode;
use crate::fabric::{MailboxProbe, Registry, RestartBudget};
use crate::measurement::{admit, epoch_ms, Measurement, Rejection, SemanticType};

/// Local request/reply deadline.
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Relative window change that triggers a fresh back-pressure push.
const PUSH_THRESHOLD: f64 = 0.10;

/// Advisory rate hint pushed upstream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackpressureConfig {
    pub attention_level: AttentionLevel,
    pub recommended_batch_window_ms: u64,
    pub recommended_batch_size: u32,
    pub timestamp_ms: i64,
}

/// Messages the worker pushes to its attached connector.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectorPush {
    Backpressure(BackpressureConfig),
}

/// One element of a batched ingest.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub attribute_id: String,
    pub measurement: Measurement,
}

/// Per-element outcome of a batched ingest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub accepted: u32,
    pub rejected: u32,
}

/// Validation and drop counters shared across the pipeline.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    pub ingested: AtomicU64,
    pub invalid_payloads: AtomicU64,
    pub out_of_tolerance: AtomicU64,
}

/// Worker mailbox commands.
pub enum SensorCmd {
    Ingest {
        attribute_id: String,
        measurement: Measurement,
        reply: Option<oneshot::Sender<Result<(), FaultCode>>>,
    },
    IngestBatch {
        items: Vec<BatchItem>,
        reply: Option<oneshot::Sender<BatchOutcome>>,
    },
    Seed {
        attribute_id: String,
        from: Option<i64>,
        to: Option<i64>,
        limit: Option<usize>,
        reply: oneshot::Sender<Vec<Measurement>>,
    },
    GetLatest {
        attribute_id: String,
        reply: oneshot::Sender<Option<Measurement>>,
    },
    LastTimestamp {
        reply: oneshot::Sender<Option<i64>>,
    },
    ClearAttribute {
        attribute_id: String,
    },
    ConnectorAttached {
        push_tx: mpsc::Sender<ConnectorPush>,
    },
    ConnectorDetached,
    Shutdown,
}

/// Everything a sensor worker needs besides its identity.
#[derive(Clone)]
pub struct SensorDeps {
    pub bus: Arc<Bus>,
    pub attention: AttentionHandle,
    pub novelty_tx: mpsc::Sender<NoveltySample>,
    pub counters: Arc<PipelineCounters>,
    pub window_len: usize,
    pub base_batch_window_ms: u64,
    pub offline_grace: Duration,
    pub idle_ttl: Duration,
    pub mailbox_capacity: usize,
}

/// Cloneable address of a live sensor worker.
#[derive(Clone)]
pub struct SensorHandle {
    pub sensor_id: String,
    tx: mpsc::Sender<SensorCmd>,
    cancel: CancellationToken,
    online: Arc<AtomicBool>,
}

impl SensorHandle {
    pub async fn ingest(
        &self,
        attribute_id: &str,
        measurement: Measurement,
    ) -> Result<(), FaultCode> {
        let (reply, rx) = oneshot::channel();
        self.send(SensorCmd::Ingest {
            attribute_id: attribute_id.to_owned(),
            measurement,
            reply: Some(reply),
        })
        .await?;
        await_reply(rx).await?
    }

    pub async fn ingest_batch(&self, items: Vec<BatchItem>) -> Result<BatchOutcome, FaultCode> {
        let (reply, rx) = oneshot::channel();
        self.send(SensorCmd::IngestBatch { items, reply: Some(reply) }).await?;
        await_reply(rx).await
    }

    pub async fn seed(
        &self,
        attribute_id: &str,
        from: Option<i64>,
        to: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<Measurement>, FaultCode> {
        let (reply, rx) = oneshot::channel();
        self.send(SensorCmd::Seed {
            attribute_id: attribute_id.to_owned(),
            from,
            to,
            limit,
            reply,
        })
        .await?;
        await_reply(rx).await
    }

    pub async fn get_latest(&self, attribute_id: &str) -> Result<Option<Measurement>, FaultCode> {
        let (reply, rx) = oneshot::channel();
        self.send(SensorCmd::GetLatest { attribute_id: attribute_id.to_owned(), reply }).await?;
        await_reply(rx).await
    }

    /// Newest timestamp the worker holds, for connector re-seed.
    pub async fn last_timestamp(&self) -> Result<Option<i64>, FaultCode> {
        let (reply, rx) = oneshot::channel();
        self.send(SensorCmd::LastTimestamp { reply }).await?;
        await_reply(rx).await
    }

    pub fn attach_connector(&self, push_tx: mpsc::Sender<ConnectorPush>) {
        let _ = self.tx.try_send(SensorCmd::ConnectorAttached { push_tx });
    }

    pub fn detach_connector(&self) {
        let _ = self.tx.try_send(SensorCmd::ConnectorDetached);
    }

    pub fn clear_attribute(&self, attribute_id: &str) {
        let _ = self.tx.try_send(SensorCmd::ClearAttribute {
            attribute_id: attribute_id.to_owned(),
        });
    }

    /// Graceful stop: the shutdown command lands behind any queued work, so
    /// the mailbox drains first; the token forces termination past the
    /// drain budget.
    pub fn shutdown(&self) {
        let _ = self.tx.try_send(SensorCmd::Shutdown);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            cancel.cancel();
        });
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    async fn send(&self, cmd: SensorCmd) -> Result<(), FaultCode> {
        self.tx.send(cmd).await.map_err(|_| FaultCode::WorkerCrash)
    }
}

async fn await_reply<T>(rx: oneshot::Receiver<T>) -> Result<T, FaultCode> {
    match tokio::time::timeout(REPLY_TIMEOUT, rx).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(_)) => Err(FaultCode::WorkerCrash),
        Err(_) => Err(FaultCode::Timeout),
    }
}

impl MailboxProbe for SensorHandle {
    fn mailbox_depth(&self) -> usize {
        self.tx.max_capacity().saturating_sub(self.tx.capacity())
    }
}

/// Idempotently spawn the worker for a sensor. The second spawn for the
/// same ID returns the existing handle.
pub fn spawn_sensor(
    registry: &Arc<Registry<SensorHandle>>,
    deps: &SensorDeps,
    sensor_id: &str,
    parent: &CancellationToken,
) -> Result<SensorHandle, FaultCode> {
    let (handle, created) = registry.get_or_register(sensor_id, || {
        let (tx, rx) = mpsc::channel(deps.mailbox_capacity);
        let cancel = parent.child_token();
        let online = Arc::new(AtomicBool::new(false));
        let worker = SensorWorker::new(sensor_id.to_owned(), deps.clone(), Arc::clone(&online));
        let handle = SensorHandle { sensor_id: sensor_id.to_owned(), tx, cancel: cancel.clone(), online };

        let registry = Arc::clone(registry);
        let factors = Arc::clone(deps.attention.factors());
        let id = sensor_id.to_owned();
        tokio::spawn(async move {
            worker.run(rx, cancel).await;
            registry.deregister(&id);
            factors.clear_sensor(&id);
        });
        handle
    })?;
    if created {
        info!(sensor_id, "sensor worker spawned");
    }
    Ok(handle)
}

struct SensorWorker {
    sensor_id: String,
    deps: SensorDeps,
    windows: HashMap<String, AttributeWindow>,
    connector: Option<mpsc::Sender<ConnectorPush>>,
    online: Arc<AtomicBool>,
    last_delay_seconds: f64,
    last_push: Option<(AttentionLevel, u64)>,
    disconnected_at: Option<Instant>,
    idle_since: Instant,
}

impl SensorWorker {
    fn new(sensor_id: String, deps: SensorDeps, online: Arc<AtomicBool>) -> Self {
        Self {
            sensor_id,
            deps,
            windows: HashMap::new(),
            connector: None,
            online,
            last_delay_seconds: 1.0,
            last_push: None,
            disconnected_at: None,
            idle_since: Instant::now(),
        }
    }

    /// Run until shutdown, restarting in place on internal faults. Restarts
    /// start with empty windows; the presence announcement asks producers
    /// to re-seed.
    async fn run(mut self, mut rx: mpsc::Receiver<SensorCmd>, cancel: CancellationToken) {
        let mut budget = RestartBudget::standard();
        loop {
            match self.serve(&mut rx, &cancel).await {
                Ok(()) => return,
                Err(e) => {
                    warn!(sensor_id = %self.sensor_id, err = %e, "sensor worker crashed");
                    if !budget.record(Instant::now()) {
                        error!(
                            sensor_id = %self.sensor_id,
                            fault = %FaultCode::SupervisorRestartStorm,
                            "restart budget exhausted, dropping sensor"
                        );
                        self.online.store(false, Ordering::Release);
                        return;
                    }
                    self.reset();
                }
            }
        }
    }

    fn reset(&mut self) {
        self.windows.clear();
        self.last_push = None;
    }

    async fn serve(
        &mut self,
        rx: &mut mpsc::Receiver<SensorCmd>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        // Announce so reconnecting producers re-seed from scratch.
        self.deps.bus.publish(
            topic::PRESENCE,
            BusEvent::Presence { sensor_id: self.sensor_id.clone() },
        );

        let mut attention_sub = self.deps.bus.subscribe(&topic::attention_sensor(&self.sensor_id));
        let mut novelty_sub = self.deps.bus.subscribe(&topic::novelty(&self.sensor_id));
        let mut load_sub = self.deps.bus.subscribe(topic::SYSTEM_LOAD);
        let mut tick = tokio::time::interval(Duration::from_secs(1));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                cmd = rx.recv() => {
                    match cmd {
                        Some(SensorCmd::Shutdown) | None => return Ok(()),
                        Some(cmd) => self.handle(cmd),
                    }
                }
                event = attention_sub.recv() => {
                    if event.is_none() {
                        return Ok(());
                    }
                    self.push_backpressure(false);
                }
                event = novelty_sub.recv() => {
                    if event.is_none() {
                        return Ok(());
                    }
                    self.push_backpressure(false);
                }
                event = load_sub.recv() => {
                    if event.is_none() {
                        return Ok(());
                    }
                    self.push_backpressure(false);
                }
                _ = tick.tick() => {
                    if self.lifecycle_expired() {
                        return Ok(());
                    }
                    self.push_backpressure(false);
                }
            }
        }
    }

    fn handle(&mut self, cmd: SensorCmd) {
        match cmd {
            SensorCmd::Ingest { attribute_id, measurement, reply } => {
                let result = self.ingest(&attribute_id, measurement);
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            SensorCmd::IngestBatch { items, reply } => {
                let mut outcome = BatchOutcome::default();
                for item in items {
                    match self.ingest(&item.attribute_id, item.measurement) {
                        Ok(()) => outcome.accepted += 1,
                        Err(_) => outcome.rejected += 1,
                    }
                }
                if let Some(reply) = reply {
                    let _ = reply.send(outcome);
                }
            }
            SensorCmd::Seed { attribute_id, from, to, limit, reply } => {
                let data = self
                    .windows
                    .get(&attribute_id)
                    .map(|w| w.seed(from, to, limit))
                    .unwrap_or_default();
                let _ = reply.send(data);
            }
            SensorCmd::GetLatest { attribute_id, reply } => {
                let latest = self.windows.get(&attribute_id).and_then(|w| w.latest().cloned());
                let _ = reply.send(latest);
            }
            SensorCmd::LastTimestamp { reply } => {
                let last = self.windows.values().filter_map(AttributeWindow::last_timestamp).max();
                let _ = reply.send(last);
            }
            SensorCmd::ClearAttribute { attribute_id } => {
                if let Some(window) = self.windows.get_mut(&attribute_id) {
                    window.clear();
                }
                self.deps.bus.publish(
                    &topic::sensor_data(&self.sensor_id),
                    BusEvent::ClearAttribute {
                        sensor_id: self.sensor_id.clone(),
                        attribute_id,
                    },
                );
            }
            SensorCmd::ConnectorAttached { push_tx } => {
                self.connector = Some(push_tx);
                self.online.store(true, Ordering::Release);
                self.disconnected_at = None;
                self.idle_since = Instant::now();
                // Fresh connectors always get the current contract.
                self.push_backpressure(true);
            }
            SensorCmd::ConnectorDetached => {
                self.connector = None;
                self.disconnected_at = Some(Instant::now());
            }
            SensorCmd::Shutdown => {}
        }
    }

    fn ingest(&mut self, attribute_id: &str, measurement: Measurement) -> Result<(), FaultCode> {
        let declared = match self.windows.get(attribute_id) {
            Some(window) => window.semantic_type(),
            None => {
                // First sight of this attribute fixes its type for good.
                let semantic_type = measurement.payload.semantic_type();
                self.declare(attribute_id, semantic_type);
                semantic_type
            }
        };

        if let Err(rejection) = admit(declared, &measurement, epoch_ms()) {
            return Err(self.reject(attribute_id, rejection));
        }

        if measurement.delay_seconds > 0.0 {
            self.last_delay_seconds = measurement.delay_seconds;
        }
        let scalar = measurement.payload.novelty_scalar();

        if let Some(window) = self.windows.get_mut(attribute_id) {
            window.insert(measurement.clone());
        }
        self.idle_since = Instant::now();
        self.deps.counters.ingested.fetch_add(1, Ordering::Relaxed);

        self.deps.bus.publish(
            &topic::sensor_data(&self.sensor_id),
            BusEvent::Measurement {
                sensor_id: self.sensor_id.clone(),
                attribute_id: attribute_id.to_owned(),
                measurement,
            },
        );

        if let Some(value) = scalar {
            let _ = self.deps.novelty_tx.try_send(NoveltySample {
                sensor_id: self.sensor_id.clone(),
                attribute_id: attribute_id.to_owned(),
                value,
            });
        }
        Ok(())
    }

    fn declare(&mut self, attribute_id: &str, semantic_type: SemanticType) {
        self.windows.insert(
            attribute_id.to_owned(),
            AttributeWindow::new(semantic_type, self.deps.window_len),
        );
        self.deps.attention.register_attribute(&self.sensor_id, attribute_id);
    }

    fn reject(&self, attribute_id: &str, rejection: Rejection) -> FaultCode {
        match rejection {
            Rejection::TypeMismatch | Rejection::Invalid => {
                self.deps.counters.invalid_payloads.fetch_add(1, Ordering::Relaxed);
                debug!(
                    sensor_id = %self.sensor_id,
                    attribute_id,
                    ?rejection,
                    "measurement rejected"
                );
            }
            Rejection::TooOld | Rejection::TooNew => {
                self.deps.counters.out_of_tolerance.fetch_add(1, Ordering::Relaxed);
                warn!(
                    sensor_id = %self.sensor_id,
                    attribute_id,
                    ?rejection,
                    "measurement outside clock tolerance"
                );
            }
        }
        FaultCode::InvalidPayload
    }

    /// Recompute the contract; push when the level changed, the window moved
    /// by ten percent, or `force`.
    fn push_backpressure(&mut self, force: bool) {
        let Some(connector) = self.connector.clone() else { return };

        let level = self.deps.attention.get_sensor_attention_level(&self.sensor_id);
        let factors = self.deps.attention.factors().resolve(&self.sensor_id, Instant::now());
        let window_ms =
            batch::calculate_batch_window(self.deps.base_batch_window_ms, level, &factors);
        let reported = if factors.novelty_boost { AttentionLevel::High } else { level };

        let changed = match self.last_push {
            None => true,
            Some((last_level, last_window)) => {
                reported != last_level
                    || relative_change(last_window, window_ms) >= PUSH_THRESHOLD
            }
        };
        if !changed && !force {
            return;
        }
        self.last_push = Some((reported, window_ms));

        let config = BackpressureConfig {
            attention_level: reported,
            recommended_batch_window_ms: window_ms,
            recommended_batch_size: batch::recommended_batch_size(
                window_ms,
                self.last_delay_seconds,
            ),
            timestamp_ms: epoch_ms(),
        };
        let _ = connector.try_send(ConnectorPush::Backpressure(config));
    }

    /// Offline grace and idle TTL checks. Returns true when the worker
    /// should stop.
    fn lifecycle_expired(&mut self) -> bool {
        if let Some(at) = self.disconnected_at {
            if at.elapsed() >= self.deps.offline_grace && self.online.load(Ordering::Acquire) {
                info!(sensor_id = %self.sensor_id, "connector grace expired, sensor offline");
                self.online.store(false, Ordering::Release);
            }
        }
        self.connector.is_none() && self.idle_since.elapsed() >= self.deps.idle_ttl
    }
}

fn relative_change(previous: u64, current: u64) -> f64 {
    if previous == 0 {
        return 1.0;
    }
    (current as f64 - previous as f64).abs() / previous as f64
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
