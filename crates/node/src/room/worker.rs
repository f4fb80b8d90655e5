// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Room workers: one actor per active room hosting the CRDT document,
//! gossiping state on the bus, and snapshotting on idle shutdown.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::crdt::{RoomChange, RoomDoc};
use super::snapshot::SnapshotStore;
use crate::bus::{topic, Bus, BusEvent};
use crate::error::FaultCode;
use crate::fabric::Registry;
use crate::measurement::epoch_ms;

/// Debounce for locally issued changes, per field.
const GOSSIP_DEBOUNCE: Duration = Duration::from_millis(100);

/// Local request/reply deadline.
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

pub enum RoomCmd {
    Apply { change: RoomChange, reply: Option<oneshot::Sender<()>> },
    GetState { reply: oneshot::Sender<RoomDoc> },
    MemberJoin { user: String, info: serde_json::Value },
    MemberLeave { user: String },
    Shutdown,
}

/// Cloneable address of a live room worker.
#[derive(Clone)]
pub struct RoomHandle {
    pub room_id: String,
    tx: mpsc::Sender<RoomCmd>,
    cancel: CancellationToken,
}

impl RoomHandle {
    pub async fn apply_change(&self, change: RoomChange) -> Result<(), FaultCode> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RoomCmd::Apply { change, reply: Some(reply) })
            .await
            .map_err(|_| FaultCode::WorkerCrash)?;
        match tokio::time::timeout(REPLY_TIMEOUT, rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(FaultCode::WorkerCrash),
            Err(_) => Err(FaultCode::Timeout),
        }
    }

    pub async fn get_state(&self) -> Result<RoomDoc, FaultCode> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RoomCmd::GetState { reply }).await.map_err(|_| FaultCode::WorkerCrash)?;
        match tokio::time::timeout(REPLY_TIMEOUT, rx).await {
            Ok(Ok(doc)) => Ok(doc),
            Ok(Err(_)) => Err(FaultCode::WorkerCrash),
            Err(_) => Err(FaultCode::Timeout),
        }
    }

    pub fn member_join(&self, user: &str, info: serde_json::Value) {
        let _ = self.tx.try_send(RoomCmd::MemberJoin { user: user.to_owned(), info });
    }

    pub fn member_leave(&self, user: &str) {
        let _ = self.tx.try_send(RoomCmd::MemberLeave { user: user.to_owned() });
    }

    /// Graceful stop: queued changes drain before the final snapshot; the
    /// token forces termination past the drain budget.
    pub fn shutdown(&self) {
        let _ = self.tx.try_send(RoomCmd::Shutdown);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            cancel.cancel();
        });
    }
}

/// Everything a room worker needs besides its identity.
#[derive(Clone)]
pub struct RoomDeps {
    pub bus: Arc<Bus>,
    pub store: Arc<SnapshotStore>,
    pub node_name: String,
    pub idle_after: Duration,
}

/// Spawn (or return) the worker for a room, restoring the latest snapshot.
pub fn spawn_room(
    registry: &Arc<Registry<RoomHandle>>,
    deps: &RoomDeps,
    room_id: &str,
    parent: &CancellationToken,
) -> Result<RoomHandle, FaultCode> {
    let (handle, created) = registry.get_or_register(room_id, || {
        let (tx, rx) = mpsc::channel(1024);
        let cancel = parent.child_token();
        let handle = RoomHandle { room_id: room_id.to_owned(), tx, cancel: cancel.clone() };

        let doc = deps
            .store
            .load_latest(room_id)
            .unwrap_or_else(|| RoomDoc::new(room_id));
        let worker = RoomWorker { room_id: room_id.to_owned(), deps: deps.clone(), doc };

        let registry = Arc::clone(registry);
        let id = room_id.to_owned();
        tokio::spawn(async move {
            if let Err(e) = worker.run(rx, cancel).await {
                warn!(room_id = %id, err = %e, "room worker failed");
            }
            registry.deregister(&id);
        });
        handle
    })?;
    if created {
        info!(room_id, "room worker started");
    }
    Ok(handle)
}

struct RoomWorker {
    room_id: String,
    deps: RoomDeps,
    doc: RoomDoc,
}

impl RoomWorker {
    async fn run(
        mut self,
        mut rx: mpsc::Receiver<RoomCmd>,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        let mut gossip_sub = self.deps.bus.subscribe(&topic::room_crdt(&self.room_id));
        let mut tick = tokio::time::interval(Duration::from_secs(5));
        let mut dirty_fields: HashSet<String> = HashSet::new();
        let mut gossip_due: Option<Instant> = None;
        let mut idle_since: Option<Instant> = self.idle_start();

        loop {
            let due = gossip_due;
            let debounce = async move {
                match due {
                    Some(due) => tokio::time::sleep_until(due.into()).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                cmd = rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    match cmd {
                        RoomCmd::Apply { change, reply } => {
                            dirty_fields.insert(change.field());
                            self.doc.apply(change, &self.deps.node_name, epoch_ms(), Instant::now());
                            gossip_due.get_or_insert(Instant::now() + GOSSIP_DEBOUNCE);
                            if let Some(reply) = reply {
                                let _ = reply.send(());
                            }
                        }
                        RoomCmd::GetState { reply } => {
                            let _ = reply.send(self.doc.clone());
                        }
                        RoomCmd::MemberJoin { user, info } => {
                            dirty_fields.insert("members".to_owned());
                            self.doc.apply(
                                RoomChange::MemberJoin { user, info },
                                &self.deps.node_name,
                                epoch_ms(),
                                Instant::now(),
                            );
                            gossip_due.get_or_insert(Instant::now() + GOSSIP_DEBOUNCE);
                            idle_since = None;
                        }
                        RoomCmd::MemberLeave { user } => {
                            dirty_fields.insert("members".to_owned());
                            self.doc.apply(
                                RoomChange::MemberLeave { user },
                                &self.deps.node_name,
                                epoch_ms(),
                                Instant::now(),
                            );
                            gossip_due.get_or_insert(Instant::now() + GOSSIP_DEBOUNCE);
                            idle_since = self.idle_start();
                        }
                        RoomCmd::Shutdown => break,
                    }
                }
                event = gossip_sub.recv() => {
                    let Some(event) = event else { break };
                    if let BusEvent::RoomSync { origin, state, .. } = event.as_ref() {
                        // Remote merges apply immediately, own echoes drop.
                        if *origin != self.deps.node_name {
                            self.doc.merge(state, Instant::now());
                        }
                    }
                }
                _ = debounce => {
                    gossip_due = None;
                    if !dirty_fields.is_empty() {
                        debug!(room_id = %self.room_id, fields = dirty_fields.len(), "gossiping room state");
                        dirty_fields.clear();
                        self.gossip();
                    }
                }
                _ = tick.tick() => {
                    if idle_since.is_none() && self.doc.members.is_empty() {
                        idle_since = Some(Instant::now());
                    }
                    if idle_since.is_some_and(|at| at.elapsed() >= self.deps.idle_after) {
                        info!(room_id = %self.room_id, "room idle, snapshotting and stopping");
                        break;
                    }
                }
            }
        }

        if let Err(e) = self.deps.store.store(&self.doc) {
            warn!(room_id = %self.room_id, err = %e, "room snapshot failed");
        }
        Ok(())
    }

    fn idle_start(&self) -> Option<Instant> {
        self.doc.members.is_empty().then(Instant::now)
    }

    fn gossip(&self) {
        self.deps.bus.publish(
            &topic::room_crdt(&self.room_id),
            BusEvent::RoomSync {
                room_id: self.room_id.clone(),
                origin: self.deps.node_name.clone(),
                state: self.doc.clone(),
            },
        );
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
