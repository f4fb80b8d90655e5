// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed CRDT document for room state.
//!
//! Every field merges independently; the document merge is the product of
//! per-field joins, so it is commutative, associative, and idempotent as a
//! whole. Scalars are last-writer-wins with a node-id tiebreak; sets carry
//! vector-clock tombstones with remove-wins concurrency; the annotation log
//! is an append-only union ordered by (timestamp, author, id); presence
//! expires on local receipt time, immune to producer clock skew.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Presence entries die this long after the last locally observed heartbeat.
pub const PRESENCE_TTL: Duration = Duration::from_secs(30);

// -- Vector clock -------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorClock(BTreeMap<String, u64>);

impl VectorClock {
    pub fn tick(&mut self, node: &str) {
        *self.0.entry(node.to_owned()).or_insert(0) += 1;
    }

    pub fn merge(&mut self, other: &VectorClock) {
        for (node, counter) in &other.0 {
            let entry = self.0.entry(node.clone()).or_insert(0);
            *entry = (*entry).max(*counter);
        }
    }

    /// True when every component of `self` is ≥ the matching component of
    /// `other` and at least one is strictly greater.
    pub fn dominates(&self, other: &VectorClock) -> bool {
        let geq = other.0.iter().all(|(node, counter)| {
            self.0.get(node).copied().unwrap_or(0) >= *counter
        });
        geq && *self != *other
    }

    pub fn concurrent_with(&self, other: &VectorClock) -> bool {
        !self.dominates(other) && !other.dominates(self) && self != other
    }
}

// -- LWW register and map -----------------------------------------------------

/// Last-writer-wins scalar: wall-clock ordering, node id as final tiebreak.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LwwRegister {
    pub value: Value,
    pub timestamp_ms: i64,
    pub node: String,
}

impl LwwRegister {
    fn wins_over(&self, other: &LwwRegister) -> bool {
        (self.timestamp_ms, self.node.as_str()) > (other.timestamp_ms, other.node.as_str())
    }

    pub fn merge(&mut self, other: &LwwRegister) {
        if other.wins_over(self) {
            *self = other.clone();
        }
    }
}

/// Keyed LWW registers (metadata, media playback, 3-D viewer state).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LwwMap(BTreeMap<String, LwwRegister>);

impl LwwMap {
    pub fn set(&mut self, key: &str, value: Value, timestamp_ms: i64, node: &str) {
        let incoming = LwwRegister { value, timestamp_ms, node: node.to_owned() };
        match self.0.entry(key.to_owned()) {
            Entry::Occupied(mut existing) => existing.get_mut().merge(&incoming),
            Entry::Vacant(slot) => {
                slot.insert(incoming);
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).map(|register| &register.value)
    }

    pub fn merge(&mut self, other: &LwwMap) {
        for (key, register) in &other.0 {
            match self.0.entry(key.clone()) {
                Entry::Occupied(mut existing) => existing.get_mut().merge(register),
                Entry::Vacant(slot) => {
                    slot.insert(register.clone());
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// -- Observed-remove set ------------------------------------------------------

/// Set with vector-clock causality on adds and removes.
///
/// A removal that happens-after an add tombstones it for good; a concurrent
/// add cannot resurrect the element (remove wins on concurrency).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrSet {
    adds: BTreeMap<String, VectorClock>,
    removes: BTreeMap<String, VectorClock>,
}

impl OrSet {
    pub fn add(&mut self, element: &str, clock: &VectorClock) {
        self.adds.entry(element.to_owned()).or_default().merge(clock);
    }

    pub fn remove(&mut self, element: &str, clock: &VectorClock) {
        self.removes.entry(element.to_owned()).or_default().merge(clock);
    }

    pub fn contains(&self, element: &str) -> bool {
        let Some(add) = self.adds.get(element) else { return false };
        match self.removes.get(element) {
            None => true,
            Some(remove) => add.dominates(remove),
        }
    }

    pub fn elements(&self) -> Vec<&str> {
        self.adds
            .keys()
            .filter(|element| self.contains(element))
            .map(String::as_str)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.elements().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn merge(&mut self, other: &OrSet) {
        for (element, clock) in &other.adds {
            self.adds.entry(element.clone()).or_default().merge(clock);
        }
        for (element, clock) in &other.removes {
            self.removes.entry(element.clone()).or_default().merge(clock);
        }
    }
}

// -- Annotation log -----------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: String,
    pub author: String,
    pub timestamp_ms: i64,
    pub body: Value,
}

/// Append-only, union-merged, ordered by (timestamp, author, id).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotationLog(Vec<Annotation>);

impl AnnotationLog {
    pub fn append(&mut self, annotation: Annotation) {
        if self.0.iter().any(|existing| existing.id == annotation.id) {
            return;
        }
        self.0.push(annotation);
        self.sort();
    }

    pub fn merge(&mut self, other: &AnnotationLog) {
        for annotation in &other.0 {
            if !self.0.iter().any(|existing| existing.id == annotation.id) {
                self.0.push(annotation.clone());
            }
        }
        self.sort();
    }

    pub fn entries(&self) -> &[Annotation] {
        &self.0
    }

    fn sort(&mut self) {
        self.0.sort_by(|a, b| {
            (a.timestamp_ms, &a.author, &a.id).cmp(&(b.timestamp_ms, &b.author, &b.id))
        });
    }
}

// -- Expiring presence --------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub data: Value,
    pub heartbeat_ms: i64,
    /// Local receipt time; never replicated, so expiry ignores clock skew.
    #[serde(skip)]
    received_at: Option<Instant>,
}

impl PartialEq for PresenceEntry {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data && self.heartbeat_ms == other.heartbeat_ms
    }
}

fn beats(incoming: &PresenceEntry, existing: &PresenceEntry) -> bool {
    if incoming.heartbeat_ms != existing.heartbeat_ms {
        return incoming.heartbeat_ms > existing.heartbeat_ms;
    }
    incoming.data.to_string() > existing.data.to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresenceMap(BTreeMap<String, PresenceEntry>);

impl PresenceMap {
    pub fn heartbeat(&mut self, user: &str, data: Value, heartbeat_ms: i64, now: Instant) {
        let fresh = PresenceEntry { data, heartbeat_ms, received_at: Some(now) };
        match self.0.entry(user.to_owned()) {
            // Total order on (heartbeat, payload) keeps the join commutative
            // when two nodes report the same heartbeat instant.
            Entry::Occupied(mut existing) => {
                if beats(&fresh, existing.get()) {
                    *existing.get_mut() = fresh;
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(fresh);
            }
        }
    }

    pub fn merge(&mut self, other: &PresenceMap, now: Instant) {
        for (user, entry) in &other.0 {
            self.heartbeat(user, entry.data.clone(), entry.heartbeat_ms, now);
        }
    }

    /// Users with a heartbeat observed locally within the TTL.
    pub fn live(&self, now: Instant) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(_, entry)| {
                entry
                    .received_at
                    .is_some_and(|at| now.duration_since(at) < PRESENCE_TTL)
            })
            .map(|(user, _)| user.as_str())
            .collect()
    }
}

// -- The document -------------------------------------------------------------

/// Local mutations accepted by [`RoomDoc::apply`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RoomChange {
    SetMetadata { key: String, value: Value },
    MemberJoin { user: String, info: Value },
    MemberLeave { user: String },
    BindSensor { sensor_id: String },
    UnbindSensor { sensor_id: String },
    SetMedia { key: String, value: Value },
    SetViewer { key: String, value: Value },
    Heartbeat { user: String, data: Value },
    Annotate { id: String, author: String, timestamp_ms: i64, body: Value },
}

impl RoomChange {
    /// Debounce key: concurrent local edits to the same field coalesce.
    pub fn field(&self) -> String {
        match self {
            Self::SetMetadata { key, .. } => format!("metadata.{key}"),
            Self::MemberJoin { .. } | Self::MemberLeave { .. } => "members".to_owned(),
            Self::BindSensor { .. } | Self::UnbindSensor { .. } => "bindings".to_owned(),
            Self::SetMedia { key, .. } => format!("media.{key}"),
            Self::SetViewer { key, .. } => format!("viewer.{key}"),
            Self::Heartbeat { .. } => "presence".to_owned(),
            Self::Annotate { .. } => "annotations".to_owned(),
        }
    }
}

/// The collaborative room document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomDoc {
    pub room_id: String,
    pub clock: VectorClock,
    pub metadata: LwwMap,
    pub members: OrSet,
    pub member_info: LwwMap,
    pub sensor_bindings: OrSet,
    pub media: LwwMap,
    pub viewer: LwwMap,
    pub presence: PresenceMap,
    pub annotations: AnnotationLog,
}

impl RoomDoc {
    pub fn new(room_id: &str) -> Self {
        Self {
            room_id: room_id.to_owned(),
            clock: VectorClock::default(),
            metadata: LwwMap::default(),
            members: OrSet::default(),
            member_info: LwwMap::default(),
            sensor_bindings: OrSet::default(),
            media: LwwMap::default(),
            viewer: LwwMap::default(),
            presence: PresenceMap::default(),
            annotations: AnnotationLog::default(),
        }
    }

    /// Apply a locally issued change, advancing the document clock.
    pub fn apply(&mut self, change: RoomChange, node: &str, timestamp_ms: i64, now: Instant) {
        self.clock.tick(node);
        match change {
            RoomChange::SetMetadata { key, value } => {
                self.metadata.set(&key, value, timestamp_ms, node);
            }
            RoomChange::MemberJoin { user, info } => {
                let clock = self.clock.clone();
                self.members.add(&user, &clock);
                self.member_info.set(&user, info, timestamp_ms, node);
            }
            RoomChange::MemberLeave { user } => {
                let clock = self.clock.clone();
                self.members.remove(&user, &clock);
            }
            RoomChange::BindSensor { sensor_id } => {
                let clock = self.clock.clone();
                self.sensor_bindings.add(&sensor_id, &clock);
            }
            RoomChange::UnbindSensor { sensor_id } => {
                let clock = self.clock.clone();
                self.sensor_bindings.remove(&sensor_id, &clock);
            }
            RoomChange::SetMedia { key, value } => {
                self.media.set(&key, value, timestamp_ms, node);
            }
            RoomChange::SetViewer { key, value } => {
                self.viewer.set(&key, value, timestamp_ms, node);
            }
            RoomChange::Heartbeat { user, data } => {
                self.presence.heartbeat(&user, data, timestamp_ms, now);
            }
            RoomChange::Annotate { id, author, timestamp_ms, body } => {
                self.annotations.append(Annotation { id, author, timestamp_ms, body });
            }
        }
    }

    /// Join with another observed state. The result is the least upper bound
    /// of both in the document lattice.
    pub fn merge(&mut self, other: &RoomDoc, now: Instant) {
        self.clock.merge(&other.clock);
        self.metadata.merge(&other.metadata);
        self.members.merge(&other.members);
        self.member_info.merge(&other.member_info);
        self.sensor_bindings.merge(&other.sensor_bindings);
        self.media.merge(&other.media);
        self.viewer.merge(&other.viewer);
        self.presence.merge(&other.presence, now);
        self.annotations.merge(&other.annotations);
    }
}

#[cfg(test)]
#[path = "crdt_tests.rs"]
mod tests;
