// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::bus::Bus;

struct Rig {
    registry: Arc<Registry<RoomHandle>>,
    deps: RoomDeps,
    bus: Arc<Bus>,
    cancel: CancellationToken,
    _dir: tempfile::TempDir,
}

fn rig(node_name: &str) -> anyhow::Result<Rig> {
    let dir = tempfile::tempdir()?;
    let bus = Bus::new(256);
    let deps = RoomDeps {
        bus: Arc::clone(&bus),
        store: Arc::new(SnapshotStore::new(dir.path())),
        node_name: node_name.to_owned(),
        idle_after: Duration::from_secs(300),
    };
    Ok(Rig {
        registry: Arc::new(Registry::new("room", None)),
        deps,
        bus,
        cancel: CancellationToken::new(),
        _dir: dir,
    })
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn apply_then_get_state() -> anyhow::Result<()> {
    let rig = rig("n1")?;
    let handle = spawn_room(&rig.registry, &rig.deps, "r1", &rig.cancel)?;

    handle
        .apply_change(RoomChange::SetMetadata { key: "title".to_owned(), value: json!("icu") })
        .await?;
    let state = handle.get_state().await?;
    assert_eq!(state.metadata.get("title"), Some(&json!("icu")));
    rig.cancel.cancel();
    Ok(())
}

#[tokio::test]
async fn spawn_is_idempotent() -> anyhow::Result<()> {
    let rig = rig("n1")?;
    let first = spawn_room(&rig.registry, &rig.deps, "r1", &rig.cancel)?;
    let second = spawn_room(&rig.registry, &rig.deps, "r1", &rig.cancel)?;
    assert_eq!(first.room_id, second.room_id);
    assert_eq!(rig.registry.len(), 1);
    rig.cancel.cancel();
    Ok(())
}

#[tokio::test]
async fn local_changes_gossip_after_debounce() -> anyhow::Result<()> {
    let rig = rig("n1")?;
    let mut sub = rig.bus.subscribe(&crate::bus::topic::room_crdt("r1"));
    let handle = spawn_room(&rig.registry, &rig.deps, "r1", &rig.cancel)?;

    // A burst of edits coalesces into one gossip frame.
    for i in 0..5 {
        handle
            .apply_change(RoomChange::SetMedia { key: "position".to_owned(), value: json!(i) })
            .await?;
    }
    tokio::time::sleep(Duration::from_millis(250)).await;

    let mut frames = 0;
    while let Some(event) = sub.try_recv() {
        if matches!(event.as_ref(), crate::bus::BusEvent::RoomSync { .. }) {
            frames += 1;
        }
    }
    assert_eq!(frames, 1);
    rig.cancel.cancel();
    Ok(())
}

#[tokio::test]
async fn remote_sync_merges_immediately() -> anyhow::Result<()> {
    let rig = rig("n1")?;
    let handle = spawn_room(&rig.registry, &rig.deps, "r1", &rig.cancel)?;
    settle().await;

    // A remote replica advances media later in wall-clock time.
    let mut remote = RoomDoc::new("r1");
    remote.apply(
        RoomChange::SetMedia { key: "position".to_owned(), value: json!(150) },
        "n2",
        i64::MAX - 1,
        std::time::Instant::now(),
    );
    rig.bus.publish(
        &crate::bus::topic::room_crdt("r1"),
        crate::bus::BusEvent::RoomSync {
            room_id: "r1".to_owned(),
            origin: "n2".to_owned(),
            state: remote,
        },
    );
    settle().await;

    let state = handle.get_state().await?;
    assert_eq!(state.media.get("position"), Some(&json!(150)));
    rig.cancel.cancel();
    Ok(())
}

#[tokio::test]
async fn own_gossip_echo_is_ignored() -> anyhow::Result<()> {
    let rig = rig("n1")?;
    let handle = spawn_room(&rig.registry, &rig.deps, "r1", &rig.cancel)?;
    settle().await;

    let mut echo = RoomDoc::new("r1");
    echo.apply(
        RoomChange::SetMetadata { key: "title".to_owned(), value: json!("spoofed") },
        "n1",
        i64::MAX - 1,
        std::time::Instant::now(),
    );
    rig.bus.publish(
        &crate::bus::topic::room_crdt("r1"),
        crate::bus::BusEvent::RoomSync {
            room_id: "r1".to_owned(),
            origin: "n1".to_owned(),
            state: echo,
        },
    );
    settle().await;

    let state = handle.get_state().await?;
    assert_eq!(state.metadata.get("title"), None);
    rig.cancel.cancel();
    Ok(())
}

#[tokio::test]
async fn shutdown_snapshots_and_restart_restores() -> anyhow::Result<()> {
    let rig = rig("n1")?;
    let handle = spawn_room(&rig.registry, &rig.deps, "r1", &rig.cancel)?;

    handle
        .apply_change(RoomChange::SetMetadata { key: "title".to_owned(), value: json!("ward") })
        .await?;
    handle.member_join("u1", json!({}));
    settle().await;

    handle.shutdown();
    settle().await;
    assert_eq!(rig.registry.len(), 0);

    // A later join restarts the worker from the snapshot.
    let restarted = spawn_room(&rig.registry, &rig.deps, "r1", &rig.cancel)?;
    let state = restarted.get_state().await?;
    assert_eq!(state.metadata.get("title"), Some(&json!("ward")));
    assert!(state.members.contains("u1"));
    rig.cancel.cancel();
    Ok(())
}
