// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn at(timestamp_ms: i64, payload: Payload) -> Measurement {
    Measurement { timestamp_ms, delay_seconds: 1.0, payload }
}

#[test]
fn wire_format_is_snake_case_tagged() -> anyhow::Result<()> {
    let json = serde_json::to_value(&Payload::Heartrate { bpm: 72 })?;
    assert_eq!(json, serde_json::json!({ "type": "heartrate", "bpm": 72 }));

    let geo: Payload = serde_json::from_value(serde_json::json!({
        "type": "geolocation", "latitude": 52.5, "longitude": 13.4
    }))?;
    assert_eq!(geo.semantic_type(), SemanticType::Geolocation);
    Ok(())
}

#[test]
fn missing_fields_fail_deserialization() {
    let result: Result<Payload, _> =
        serde_json::from_value(serde_json::json!({ "type": "accelerometer", "x": 0.1, "y": 0.2 }));
    assert!(result.is_err());
}

#[test]
fn unknown_tag_fails_deserialization() {
    let result: Result<Payload, _> =
        serde_json::from_value(serde_json::json!({ "type": "barometer", "value": 1013.0 }));
    assert!(result.is_err());
}

#[yare::parameterized(
    spo2_over = { Payload::Spo2 { value: 101.0 } },
    spo2_under = { Payload::Spo2 { value: -0.5 } },
    battery_over = { Payload::Battery { level: 120.0, charging: false } },
    bpm_negative = { Payload::Heartrate { bpm: -10 } },
    latitude_over = { Payload::Geolocation { latitude: 91.0, longitude: 0.0, altitude: None, speed: None, heading: None, accuracy: None } },
    empty_ecg = { Payload::Ecg { values: vec![] } },
)]
fn out_of_range_payloads_rejected(payload: Payload) {
    assert!(payload.validate().is_err());
}

#[test]
fn in_range_payloads_accepted() {
    assert!(Payload::Spo2 { value: 98.2 }.validate().is_ok());
    assert!(Payload::Heartrate { bpm: 72 }.validate().is_ok());
    assert!(Payload::Button { pressed: true }.validate().is_ok());
}

#[test]
fn novelty_scalar_policy() {
    let imu = Payload::Accelerometer { x: 3.0, y: 4.0, z: 0.0 };
    assert_eq!(imu.novelty_scalar(), Some(5.0));

    let ecg = Payload::Ecg { values: vec![0.1, 0.2, 0.9] };
    assert!((ecg.novelty_scalar().unwrap_or_default() - 0.9).abs() < 1e-6);

    assert_eq!(Payload::Temperature { value: 22.5 }.novelty_scalar(), Some(22.5));
    assert_eq!(Payload::Button { pressed: true }.novelty_scalar(), None);
    assert_eq!(
        Payload::Geolocation {
            latitude: 0.0,
            longitude: 0.0,
            altitude: None,
            speed: None,
            heading: None,
            accuracy: None
        }
        .novelty_scalar(),
        None
    );
}

#[test]
fn admit_applies_clock_tolerances() {
    let now = 1_000_000;
    let temp = |ts| at(ts, Payload::Temperature { value: 20.0 });

    // Exactly at the future edge: accepted.
    assert!(admit(SemanticType::Temperature, &temp(now + 2_000), now).is_ok());
    // One past the edge: rejected.
    assert_eq!(admit(SemanticType::Temperature, &temp(now + 2_001), now), Err(Rejection::TooNew));
    // Within the 10 s late window: accepted.
    assert!(admit(SemanticType::Temperature, &temp(now - 10_000), now).is_ok());
    assert_eq!(admit(SemanticType::Temperature, &temp(now - 10_001), now), Err(Rejection::TooOld));
}

#[test]
fn admit_uses_per_type_late_tolerance() {
    let now = 1_000_000;
    let ecg = at(now - 5_000, Payload::Ecg { values: vec![0.3] });
    assert_eq!(admit(SemanticType::Ecg, &ecg, now), Err(Rejection::TooOld));

    let battery = at(now - 30_000, Payload::Battery { level: 80.0, charging: true });
    assert!(admit(SemanticType::Battery, &battery, now).is_ok());
}

#[test]
fn admit_rejects_type_mismatch() {
    let now = 1_000_000;
    let m = at(now, Payload::Heartrate { bpm: 70 });
    assert_eq!(admit(SemanticType::Temperature, &m, now), Err(Rejection::TypeMismatch));
}
