// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn presence(id: &str) -> BusEvent {
    BusEvent::Presence { sensor_id: id.to_owned() }
}

fn sensor_of(message: &BusMessage) -> String {
    match message.as_ref() {
        BusEvent::Presence { sensor_id } => sensor_id.clone(),
        other => format!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn publish_reaches_subscriber_in_order() {
    let bus = Bus::new(16);
    let mut sub = bus.subscribe("t");

    bus.publish("t", presence("a"));
    bus.publish("t", presence("b"));
    bus.publish("t", presence("c"));

    for expected in ["a", "b", "c"] {
        let message = sub.recv().await;
        assert_eq!(message.map(|m| sensor_of(&m)).as_deref(), Some(expected));
    }
}

#[tokio::test]
async fn publish_without_subscribers_is_noop() {
    let bus = Bus::new(16);
    bus.publish("nobody", presence("a"));
    assert_eq!(bus.dropped_total(), 0);
    assert_eq!(bus.published_total(), 1);
}

#[tokio::test]
async fn topics_are_isolated() {
    let bus = Bus::new(16);
    let mut sub_a = bus.subscribe("a");
    let mut sub_b = bus.subscribe("b");

    bus.publish("a", presence("only-a"));
    let got = sub_a.recv().await;
    assert_eq!(got.map(|m| sensor_of(&m)).as_deref(), Some("only-a"));
    assert!(sub_b.try_recv().is_none());
}

#[tokio::test]
async fn slow_subscriber_drops_oldest_and_counts() {
    let bus = Bus::new(1024);
    let mut sub = bus.subscribe("t");

    for i in 0..2000 {
        bus.publish("t", presence(&i.to_string()));
    }

    // The first recv crosses the lag gap: 976 dropped, oldest survivor is 976.
    let first = sub.recv().await;
    assert_eq!(first.map(|m| sensor_of(&m)).as_deref(), Some("976"));
    assert_eq!(sub.overflow(), 976);
    assert_eq!(bus.dropped_total(), 976);

    // Remaining 1023 messages are intact.
    let mut last = String::new();
    while let Some(m) = sub.try_recv() {
        last = sensor_of(&m);
    }
    assert_eq!(last, "1999");
}

#[tokio::test]
async fn boundary_single_overflow() {
    let bus = Bus::new(1024);
    let mut sub = bus.subscribe("t");

    for i in 0..1025 {
        bus.publish("t", presence(&i.to_string()));
    }

    let first = sub.recv().await;
    assert_eq!(first.map(|m| sensor_of(&m)).as_deref(), Some("1"));
    assert_eq!(sub.overflow(), 1);
}

#[tokio::test]
async fn dropped_subscription_releases_topic() {
    let bus = Bus::new(16);
    let sub = bus.subscribe("t");
    assert_eq!(bus.topic_count(), 1);
    drop(sub);

    // Next publish observes the dead topic and garbage-collects it.
    bus.publish("t", presence("x"));
    assert_eq!(bus.topic_count(), 0);
}

#[tokio::test]
async fn two_subscribers_both_receive() {
    let bus = Bus::new(16);
    let mut sub1 = bus.subscribe("t");
    let mut sub2 = bus.subscribe("t");

    bus.publish("t", presence("x"));
    assert!(sub1.recv().await.is_some());
    assert!(sub2.recv().await.is_some());
}

#[test]
fn topic_names() {
    assert_eq!(topic::sensor_data("s1"), "sensor:s1:data");
    assert_eq!(topic::attention_sensor("s1"), "attention:s1");
    assert_eq!(topic::attention_attr("s1", "hr"), "attention:s1:hr");
    assert_eq!(topic::novelty("s1"), "bio:novelty:s1");
    assert_eq!(topic::room_crdt("r1"), "room:r1:crdt");
}
