// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

/// Feed a synthetic distribution: (normal, elevated, high, critical) counts.
fn feed(tuner: &mut HomeostaticTuner, counts: [usize; 4]) {
    let levels =
        [LoadLevel::Normal, LoadLevel::Elevated, LoadLevel::High, LoadLevel::Critical];
    for (level, count) in levels.iter().zip(counts) {
        for _ in 0..count {
            tuner.observe(*level);
        }
    }
}

#[test]
fn empty_buffer_holds_offsets() {
    let mut tuner = HomeostaticTuner::new();
    assert_eq!(tuner.adapt(), ThresholdOffsets::default());
}

#[test]
fn on_target_distribution_keeps_zero_offsets() {
    let mut tuner = HomeostaticTuner::new();
    feed(&mut tuner, [70, 20, 8, 2]);
    for _ in 0..24 {
        tuner.adapt();
    }
    assert_eq!(tuner.offsets(), ThresholdOffsets::default());
}

#[test]
fn offsets_decay_to_zero_on_target() {
    let mut tuner = HomeostaticTuner::new();
    // Start displaced: a run of hot samples pushes the offsets up.
    feed(&mut tuner, [0, 0, 50, 50]);
    for _ in 0..10 {
        tuner.adapt();
    }
    assert!(tuner.offsets().critical > 0.0);

    // Same offsets, but the window now matches the target.
    let mut tuner2 = HomeostaticTuner::new();
    tuner2.offsets = tuner.offsets;
    feed(&mut tuner2, [70, 20, 8, 2]);
    for _ in 0..24 {
        tuner2.adapt();
    }
    assert_eq!(tuner2.offsets(), ThresholdOffsets::default());
}

#[test]
fn hot_distribution_raises_thresholds() {
    let mut tuner = HomeostaticTuner::new();
    feed(&mut tuner, [10, 10, 40, 40]);
    let offsets = tuner.adapt();
    assert_eq!(offsets.elevated, 0.005);
    assert_eq!(offsets.high, 0.005);
    assert_eq!(offsets.critical, 0.005);
}

#[test]
fn cold_distribution_lowers_thresholds() {
    let mut tuner = HomeostaticTuner::new();
    feed(&mut tuner, [100, 0, 0, 0]);
    let offsets = tuner.adapt();
    assert_eq!(offsets.elevated, -0.005);
    assert_eq!(offsets.high, -0.005);
    assert_eq!(offsets.critical, -0.005);
}

#[test]
fn offsets_clamp_at_limit() {
    let mut tuner = HomeostaticTuner::new();
    feed(&mut tuner, [0, 0, 0, 100]);
    for _ in 0..50 {
        tuner.adapt();
    }
    let offsets = tuner.offsets();
    assert_eq!(offsets.elevated, 0.1);
    assert_eq!(offsets.high, 0.1);
    assert_eq!(offsets.critical, 0.1);
}

#[test]
fn buffer_is_bounded() {
    let mut tuner = HomeostaticTuner::new();
    for _ in 0..5_000 {
        tuner.observe(LoadLevel::Critical);
    }
    // Early samples aged out; the distribution is all critical.
    assert_eq!(tuner.distribution()[3], 1.0);
}

#[tokio::test]
async fn worker_publishes_each_cycle() {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use crate::bus::Bus;

    let bus = Bus::new(16);
    let mut sub = bus.subscribe(topic::SYSTEM_HOMEOSTASIS);
    let cell = Arc::new(OffsetsCell::default());
    let (tx, rx) = mpsc::channel(16);

    let homeostat = Homeostat::new(rx, Arc::clone(&cell), Arc::clone(&bus))
        .with_cycle(Duration::from_millis(30));
    let cancel = CancellationToken::new();
    tokio::spawn(homeostat.run(cancel.clone()));

    for _ in 0..20 {
        let _ = tx
            .send(LoadSample { level: LoadLevel::Critical, multiplier: 6.0, pressure: 0.9 })
            .await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();

    assert!(matches!(
        sub.try_recv().as_deref(),
        Some(crate::bus::BusEvent::Homeostasis { .. })
    ));
    // All-critical samples push the critical threshold up.
    assert!(cell.get().critical > 0.0);
}
