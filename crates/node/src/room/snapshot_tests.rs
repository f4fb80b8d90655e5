// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Instant;

use serde_json::json;

use super::*;
use crate::room::crdt::RoomChange;

fn sample_doc() -> RoomDoc {
    let mut doc = RoomDoc::new("room-1");
    let now = Instant::now();
    doc.apply(
        RoomChange::SetMetadata { key: "title".to_owned(), value: json!("ward 3") },
        "n1",
        10,
        now,
    );
    doc.apply(RoomChange::MemberJoin { user: "u1".to_owned(), info: json!({}) }, "n1", 11, now);
    doc
}

#[test]
fn store_and_load_roundtrip() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = SnapshotStore::new(dir.path());

    let doc = sample_doc();
    let hash = store.store(&doc)?;
    assert_eq!(hash.len(), 64);

    let by_hash = store.load(&hash);
    assert_eq!(by_hash, Some(doc.clone()));
    let latest = store.load_latest("room-1");
    assert_eq!(latest, Some(doc));
    Ok(())
}

#[test]
fn identical_content_hashes_identically() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = SnapshotStore::new(dir.path());

    let doc = sample_doc();
    let first = store.store(&doc)?;
    let second = store.store(&doc)?;
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn pointer_tracks_newest_rollup() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = SnapshotStore::new(dir.path());

    let mut doc = sample_doc();
    store.store(&doc)?;
    doc.apply(
        RoomChange::SetMedia { key: "position".to_owned(), value: json!(42) },
        "n1",
        20,
        Instant::now(),
    );
    store.store(&doc)?;

    let latest = store.load_latest("room-1");
    assert_eq!(latest.and_then(|d| d.media.get("position").cloned()), Some(json!(42)));
    Ok(())
}

#[test]
fn missing_room_loads_nothing() {
    let store = SnapshotStore::new(std::env::temp_dir().join("roost-missing"));
    assert!(store.load_latest("nope").is_none());
}
