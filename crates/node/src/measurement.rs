// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Measurement wire model: the closed set of attribute payload variants,
//! per-type validation, and timestamp tolerance rules.

use serde::{Deserialize, Serialize};

use crate::error::FaultCode;

/// Semantic type of a sensor attribute. Immutable for the life of the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    Ecg,
    Heartrate,
    Hrv,
    Spo2,
    Accelerometer,
    Gyroscope,
    Quaternion,
    Geolocation,
    Temperature,
    Battery,
    Button,
}

impl SemanticType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ecg => "ecg",
            Self::Heartrate => "heartrate",
            Self::Hrv => "hrv",
            Self::Spo2 => "spo2",
            Self::Accelerometer => "accelerometer",
            Self::Gyroscope => "gyroscope",
            Self::Quaternion => "quaternion",
            Self::Geolocation => "geolocation",
            Self::Temperature => "temperature",
            Self::Battery => "battery",
            Self::Button => "button",
        }
    }

    /// How far behind the newest accepted timestamp a late arrival may be.
    ///
    /// High-rate waveforms tolerate less skew than slow-moving attributes.
    pub fn late_tolerance_ms(&self) -> i64 {
        match self {
            Self::Ecg => 2_000,
            Self::Battery => 60_000,
            _ => 10_000,
        }
    }
}

/// Attribute payload — a closed tagged union. The tag must match the
/// attribute's declared semantic type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Ecg { values: Vec<f32> },
    Heartrate { bpm: i64 },
    Hrv { rmssd: f32, sdnn: f32 },
    Spo2 { value: f32 },
    Accelerometer { x: f32, y: f32, z: f32 },
    Gyroscope { x: f32, y: f32, z: f32 },
    Quaternion { w: f32, x: f32, y: f32, z: f32 },
    Geolocation {
        latitude: f64,
        longitude: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        altitude: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        speed: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        heading: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        accuracy: Option<f64>,
    },
    Temperature { value: f32 },
    Battery { level: f32, charging: bool },
    Button { pressed: bool },
}

impl Payload {
    pub fn semantic_type(&self) -> SemanticType {
        match self {
            Self::Ecg { .. } => SemanticType::Ecg,
            Self::Heartrate { .. } => SemanticType::Heartrate,
            Self::Hrv { .. } => SemanticType::Hrv,
            Self::Spo2 { .. } => SemanticType::Spo2,
            Self::Accelerometer { .. } => SemanticType::Accelerometer,
            Self::Gyroscope { .. } => SemanticType::Gyroscope,
            Self::Quaternion { .. } => SemanticType::Quaternion,
            Self::Geolocation { .. } => SemanticType::Geolocation,
            Self::Temperature { .. } => SemanticType::Temperature,
            Self::Battery { .. } => SemanticType::Battery,
            Self::Button { .. } => SemanticType::Button,
        }
    }

    /// Range checks beyond what the tagged deserialization already enforces.
    pub fn validate(&self) -> Result<(), FaultCode> {
        match self {
            Self::Ecg { values } if values.is_empty() => Err(FaultCode::InvalidPayload),
            Self::Heartrate { bpm } if !(0..=500).contains(bpm) => Err(FaultCode::InvalidPayload),
            Self::Spo2 { value } if !(0.0..=100.0).contains(value) => {
                Err(FaultCode::InvalidPayload)
            }
            Self::Geolocation { latitude, longitude, .. }
                if !(-90.0..=90.0).contains(latitude) || !(-180.0..=180.0).contains(longitude) =>
            {
                Err(FaultCode::InvalidPayload)
            }
            Self::Battery { level, .. } if !(0.0..=100.0).contains(level) => {
                Err(FaultCode::InvalidPayload)
            }
            _ => Ok(()),
        }
    }

    /// Scalar fed to the novelty detector, or `None` for attributes with no
    /// meaningful one-dimensional reading.
    ///
    /// Vector payloads reduce to their Euclidean norm; waveforms report the
    /// most recent sample.
    pub fn novelty_scalar(&self) -> Option<f64> {
        match self {
            Self::Ecg { values } => values.last().map(|v| f64::from(*v)),
            Self::Heartrate { bpm } => Some(*bpm as f64),
            Self::Hrv { rmssd, .. } => Some(f64::from(*rmssd)),
            Self::Spo2 { value } => Some(f64::from(*value)),
            Self::Accelerometer { x, y, z } | Self::Gyroscope { x, y, z } => {
                Some(f64::from(x * x + y * y + z * z).sqrt())
            }
            Self::Quaternion { w, x, y, z } => {
                Some(f64::from(w * w + x * x + y * y + z * z).sqrt())
            }
            Self::Temperature { value } => Some(f64::from(*value)),
            Self::Battery { level, .. } => Some(f64::from(*level)),
            Self::Geolocation { .. } | Self::Button { .. } => None,
        }
    }
}

/// A single timestamped reading for one attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Producer-authoritative Unix milliseconds.
    pub timestamp_ms: i64,
    /// Producer-declared inter-sample interval (1 / sampling rate).
    #[serde(default)]
    pub delay_seconds: f64,
    pub payload: Payload,
}

/// Why a measurement was not admitted into the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Payload tag does not match the attribute's declared semantic type.
    TypeMismatch,
    /// Payload failed range validation.
    Invalid,
    /// Timestamp older than the late-arrival tolerance.
    TooOld,
    /// Timestamp further in the future than the clock tolerance.
    TooNew,
}

/// Forward clock tolerance: measurements up to this far ahead of the node
/// clock are accepted.
pub const FUTURE_TOLERANCE_MS: i64 = 2_000;

/// Admission check against the node clock and the attribute's declared type.
pub fn admit(
    declared: SemanticType,
    measurement: &Measurement,
    now_ms: i64,
) -> Result<(), Rejection> {
    if measurement.payload.semantic_type() != declared {
        return Err(Rejection::TypeMismatch);
    }
    if measurement.payload.validate().is_err() {
        return Err(Rejection::Invalid);
    }
    if measurement.timestamp_ms < now_ms - declared.late_tolerance_ms() {
        return Err(Rejection::TooOld);
    }
    if measurement.timestamp_ms > now_ms + FUTURE_TOLERANCE_MS {
        return Err(Rejection::TooNew);
    }
    Ok(())
}

/// Current epoch milliseconds.
pub fn epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
#[path = "measurement_tests.rs"]
mod tests;
