// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Catalog client: the external store that is authoritative for sensor
//! identity and nothing else. Live state never touches it.

use std::sync::Once;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::FaultCode;

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times; only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// A sensor identity row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorRecord {
    pub sensor_id: String,
    #[serde(rename = "type")]
    pub sensor_type: String,
    pub owner: String,
}

/// A declared attribute row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeRecord {
    pub attribute_id: String,
    #[serde(rename = "type")]
    pub semantic_type: String,
}

/// Thin HTTP client over the catalog API.
#[derive(Clone)]
pub struct CatalogClient {
    base_url: String,
    client: reqwest::Client,
}

impl CatalogClient {
    pub fn new(base_url: &str) -> Self {
        ensure_crypto();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { base_url: base_url.trim_end_matches('/').to_owned(), client }
    }

    /// Startup reachability check.
    pub async fn ping(&self) -> anyhow::Result<()> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await?;
        anyhow::ensure!(response.status().is_success(), "catalog health returned {}", response.status());
        Ok(())
    }

    pub async fn list_sensors(&self, owner: &str) -> Result<Vec<SensorRecord>, FaultCode> {
        let url = format!("{}/sensors?owner={owner}", self.base_url);
        let response = self.client.get(&url).send().await.map_err(transport_fault)?;
        response.json().await.map_err(transport_fault)
    }

    pub async fn get_sensor(&self, sensor_id: &str) -> Result<Option<SensorRecord>, FaultCode> {
        let url = format!("{}/sensors/{sensor_id}", self.base_url);
        let response = self.client.get(&url).send().await.map_err(transport_fault)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(FaultCode::Internal);
        }
        response.json().await.map(Some).map_err(transport_fault)
    }

    pub async fn get_attributes(
        &self,
        sensor_id: &str,
    ) -> Result<Vec<AttributeRecord>, FaultCode> {
        let url = format!("{}/sensors/{sensor_id}/attributes", self.base_url);
        let response = self.client.get(&url).send().await.map_err(transport_fault)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        response.json().await.map_err(transport_fault)
    }

    /// Register a first-seen sensor.
    pub async fn upsert_sensor(&self, record: &SensorRecord) -> Result<(), FaultCode> {
        let url = format!("{}/sensors", self.base_url);
        let response =
            self.client.put(&url).json(record).send().await.map_err(transport_fault)?;
        if !response.status().is_success() {
            warn!(sensor_id = %record.sensor_id, status = %response.status(), "catalog upsert failed");
            return Err(FaultCode::Internal);
        }
        Ok(())
    }
}

fn transport_fault(e: reqwest::Error) -> FaultCode {
    if e.is_timeout() {
        FaultCode::Timeout
    } else {
        FaultCode::Internal
    }
}
