// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

/// Configuration for a roost node.
#[derive(Debug, Clone, clap::Args)]
pub struct NodeConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "ROOST_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 9600, env = "ROOST_PORT")]
    pub port: u16,

    /// Logical node name used for CRDT tiebreaks and cluster subjects.
    #[arg(long, default_value = "node-0", env = "NODE_NAME")]
    pub node_name: String,

    /// Bearer token for API and WebSocket auth. If unset, auth is disabled.
    #[arg(long, env = "ROOST_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Catalog base URL. If unset, the node runs standalone and accepts any
    /// sensor identity.
    #[arg(long, env = "CATALOG_URL")]
    pub catalog_url: Option<String>,

    /// Directory for content-addressed room snapshots.
    #[arg(long, default_value = "./snapshots", env = "BUCKET_NAME")]
    pub bucket: std::path::PathBuf,

    /// Node-local sensor worker limit.
    #[arg(long, default_value_t = 10_000, env = "MAX_SENSORS_PER_NODE")]
    pub max_sensors: usize,

    /// Mailbox depth that forces the load level to critical.
    #[arg(long, default_value_t = 10_000, env = "MAILBOX_HIGH_WATER")]
    pub mailbox_high_water: usize,

    /// Bounded queue size for each bus subscriber.
    #[arg(long, default_value_t = 1024, env = "ROOST_SUBSCRIBER_QUEUE")]
    pub subscriber_queue: usize,

    /// Default bounded window length per attribute.
    #[arg(long, default_value_t = 10_000, env = "ROOST_WINDOW_LEN")]
    pub window_len: usize,

    /// Base batch window in milliseconds before attention scaling.
    #[arg(long, default_value_t = 2_000, env = "ROOST_BASE_BATCH_WINDOW_MS")]
    pub base_batch_window_ms: u64,

    /// Grace period before a detached connector marks its sensor offline.
    #[arg(long, default_value_t = 60_000, env = "ROOST_OFFLINE_GRACE_MS")]
    pub offline_grace_ms: u64,

    /// Idle TTL after which an offline sensor worker is dropped.
    #[arg(long, default_value_t = 600_000, env = "ROOST_SENSOR_IDLE_TTL_MS")]
    pub sensor_idle_ttl_ms: u64,

    /// Load sampling interval in milliseconds.
    #[arg(long, default_value_t = 2_000, env = "ROOST_LOAD_SAMPLE_MS")]
    pub load_sample_ms: u64,

    /// Room idle timeout before snapshot-and-stop, in milliseconds.
    #[arg(long, default_value_t = 300_000, env = "ROOST_ROOM_IDLE_MS")]
    pub room_idle_ms: u64,

    /// Drain deadline for `node drain`, in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "ROOST_DRAIN_DEADLINE_MS")]
    pub drain_deadline_ms: u64,

    /// NATS URL for the cluster bus bridge (requires the `cluster` feature).
    #[arg(long, env = "CLUSTER_TOPOLOGY_QUERY")]
    pub cluster_url: Option<String>,
}

impl NodeConfig {
    /// Defaults suitable for library-level tests: ephemeral port, standalone.
    pub fn for_tests() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 0,
            node_name: "test-node".to_owned(),
            auth_token: None,
            catalog_url: None,
            bucket: std::env::temp_dir().join("roost-snapshots"),
            max_sensors: 64,
            mailbox_high_water: 10_000,
            subscriber_queue: 1024,
            window_len: 10_000,
            base_batch_window_ms: 2_000,
            offline_grace_ms: 60_000,
            sensor_idle_ttl_ms: 600_000,
            load_sample_ms: 2_000,
            room_idle_ms: 300_000,
            drain_deadline_ms: 30_000,
            cluster_url: None,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.subscriber_queue == 0 {
            return Err("subscriber queue must be at least 1".to_owned());
        }
        if self.window_len == 0 {
            return Err("window length must be at least 1".to_owned());
        }
        if self.max_sensors == 0 {
            return Err("sensor limit must be at least 1".to_owned());
        }
        Ok(())
    }

    pub fn load_sample_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.load_sample_ms)
    }

    pub fn offline_grace(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.offline_grace_ms)
    }

    pub fn sensor_idle_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.sensor_idle_ttl_ms)
    }

    pub fn room_idle(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.room_idle_ms)
    }

    pub fn drain_deadline(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.drain_deadline_ms)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
