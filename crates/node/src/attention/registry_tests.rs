// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::*;
use crate::bus::{topic, Bus, BusEvent};
use crate::factors::FactorBoard;

async fn started() -> (AttentionHandle, Arc<Bus>, CancellationToken) {
    let bus = Bus::new(64);
    let factors = Arc::new(FactorBoard::new());
    let (handle, registry) = channel(Arc::clone(&bus), factors);
    let cancel = CancellationToken::new();
    tokio::spawn(registry.run(cancel.clone()));
    (handle, bus, cancel)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}

#[tokio::test]
async fn writes_become_visible_to_readers() {
    let (handle, _bus, cancel) = started().await;

    handle.register_view("s1", "hr", "alice");
    settle().await;
    assert_eq!(handle.get_attention_level("s1", "hr"), AttentionLevel::Medium);
    assert_eq!(handle.get_sensor_attention_level("s1"), AttentionLevel::Medium);

    handle.unregister_view("s1", "hr", "alice");
    settle().await;
    assert_eq!(handle.get_attention_level("s1", "hr"), AttentionLevel::Low);

    cancel.cancel();
}

#[tokio::test]
async fn level_changes_publish_on_both_topics() {
    let (handle, bus, cancel) = started().await;
    let mut attr_sub = bus.subscribe(&topic::attention_attr("s1", "hr"));
    let mut sensor_sub = bus.subscribe(&topic::attention_sensor("s1"));

    handle.register_focus("s1", "hr", "alice");
    settle().await;

    let attr_event = attr_sub.try_recv();
    assert!(matches!(
        attr_event.as_deref(),
        Some(BusEvent::AttentionChanged { level: AttentionLevel::High, .. })
    ));
    assert!(sensor_sub.try_recv().is_some());

    cancel.cancel();
}

#[tokio::test]
async fn idempotent_writes_publish_once() {
    let (handle, bus, cancel) = started().await;
    let mut sub = bus.subscribe(&topic::attention_attr("s1", "hr"));

    handle.register_view("s1", "hr", "alice");
    handle.register_view("s1", "hr", "alice");
    handle.register_view("s1", "hr", "alice");
    settle().await;

    assert!(sub.try_recv().is_some());
    // Repeated registrations produced no further transitions.
    assert!(sub.try_recv().is_none());

    cancel.cancel();
}

#[tokio::test]
async fn unregister_all_contributes_to_zero_sets() {
    let (handle, _bus, cancel) = started().await;

    handle.register_view("s1", "hr", "alice");
    handle.register_focus("s2", "temp", "alice");
    handle.pin_sensor("s3", "alice");
    settle().await;
    assert_eq!(handle.get_sensor_attention_level("s3"), AttentionLevel::High);

    handle.unregister_all("alice");
    settle().await;
    assert_eq!(handle.get_attention_level("s1", "hr"), AttentionLevel::Low);
    assert_eq!(handle.get_attention_level("s2", "temp"), AttentionLevel::Low);
    assert_eq!(handle.get_sensor_attention_level("s3"), AttentionLevel::None);

    cancel.cancel();
}

#[tokio::test]
async fn batch_window_tracks_level() {
    let (handle, _bus, cancel) = started().await;

    // Unknown pair: level none.
    assert_eq!(handle.calculate_batch_window(2_000, "s1", "hr"), 20_000);

    handle.register_view("s1", "hr", "alice");
    settle().await;
    assert_eq!(handle.calculate_batch_window(2_000, "s1", "hr"), 2_000);

    handle.register_focus("s1", "hr", "alice");
    settle().await;
    assert_eq!(handle.calculate_batch_window(2_000, "s1", "hr"), 400);

    cancel.cancel();
}

#[tokio::test]
async fn hover_boost_expires_and_republishes() {
    let (handle, bus, cancel) = started().await;
    let mut sub = bus.subscribe(&topic::attention_attr("s1", "hr"));

    handle.register_hover("s1", "hr", "alice");
    settle().await;
    handle.unregister_hover("s1", "hr", "alice");
    settle().await;
    // Boost holds the level at high immediately after unhover.
    assert_eq!(handle.get_attention_level("s1", "hr"), AttentionLevel::High);
    assert!(sub.try_recv().is_some());

    // After expiry the sweep downgrades and republishes.
    tokio::time::sleep(Duration::from_millis(2_400)).await;
    assert_eq!(handle.get_attention_level("s1", "hr"), AttentionLevel::Low);
    let last = std::iter::from_fn(|| sub.try_recv()).last();
    assert!(matches!(
        last.as_deref(),
        Some(BusEvent::AttentionChanged { level: AttentionLevel::Low, .. })
    ));

    cancel.cancel();
}
