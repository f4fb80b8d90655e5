// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Partition-tolerant room state: CRDT documents hosted by per-room
//! workers, gossiped over the bus, snapshotted to a content-addressed
//! store.

pub mod crdt;
pub mod snapshot;
pub mod worker;

pub use crdt::{RoomChange, RoomDoc};
pub use snapshot::SnapshotStore;
pub use worker::{spawn_room, RoomDeps, RoomHandle};
