// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured fault codes shared across the WebSocket and HTTP surfaces.
///
/// Faults surface at the nearest worker boundary as typed values; workers
/// never unwind to their callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultCode {
    InvalidPayload,
    SensorCapacityExhausted,
    UnknownSensor,
    Timeout,
    WorkerCrash,
    SupervisorRestartStorm,
    PartitionDivergence,
    SubscriberOverflow,
    Draining,
    Unauthorized,
    BadRequest,
    Internal,
}

impl FaultCode {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidPayload => 422,
            Self::SensorCapacityExhausted => 429,
            Self::UnknownSensor => 404,
            Self::Timeout => 504,
            Self::WorkerCrash => 503,
            Self::SupervisorRestartStorm => 503,
            Self::PartitionDivergence => 409,
            Self::SubscriberOverflow => 429,
            Self::Draining => 503,
            Self::Unauthorized => 401,
            Self::BadRequest => 400,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidPayload => "INVALID_PAYLOAD",
            Self::SensorCapacityExhausted => "SENSOR_CAPACITY_EXHAUSTED",
            Self::UnknownSensor => "UNKNOWN_SENSOR",
            Self::Timeout => "TIMEOUT",
            Self::WorkerCrash => "WORKER_CRASH",
            Self::SupervisorRestartStorm => "SUPERVISOR_RESTART_STORM",
            Self::PartitionDivergence => "PARTITION_DIVERGENCE",
            Self::SubscriberOverflow => "SUBSCRIBER_OVERFLOW",
            Self::Draining => "DRAINING",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::BadRequest => "BAD_REQUEST",
            Self::Internal => "INTERNAL",
        }
    }

    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: message.into() }
    }

    pub fn to_http_response(
        &self,
        message: impl Into<String>,
    ) -> (StatusCode, Json<ErrorResponse>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse { error: self.to_error_body(message) };
        (status, Json(body))
    }
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for FaultCode {}

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
