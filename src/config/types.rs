use serde::{Deserialize, Serialize};

/// Top-level route-emitter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmitterConfig {
    /// Restrict the emitter to instances on one cell. Empty means the whole
    /// cluster.
    #[serde(default)]
    pub cell_id: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit registrations sourced from the container address instead of the
    /// host-side NATed address.
    #[serde(default)]
    pub use_direct_instance_routes: bool,

    /// Emit service-discovery registrations with per-index URIs.
    #[serde(default)]
    pub use_internal_address_builder: bool,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub bbs: BbsConfig,

    #[serde(default)]
    pub nats: NatsConfig,

    #[serde(default)]
    pub routing_api: RoutingApiConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Seconds between full reconciliations against the workload store.
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,

    /// Seconds between heartbeat re-registrations of the whole table.
    #[serde(default = "default_emit_interval")]
    pub emit_interval_secs: u64,

    /// TTL attached to TCP route mappings and advertised as the router's
    /// prune threshold.
    #[serde(default = "default_route_ttl")]
    pub route_ttl_seconds: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: default_sync_interval(),
            emit_interval_secs: default_emit_interval(),
            route_ttl_seconds: default_route_ttl(),
        }
    }
}

fn default_sync_interval() -> u64 {
    60
}

fn default_emit_interval() -> u64 {
    20
}

fn default_route_ttl() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BbsConfig {
    #[serde(default = "default_bbs_address")]
    pub address: String,

    /// Per-call timeout for snapshot reads (seconds). A timed-out read
    /// cancels the whole sync round.
    #[serde(default = "default_bbs_timeout")]
    pub client_timeout_secs: u64,
}

impl Default for BbsConfig {
    fn default() -> Self {
        Self {
            address: default_bbs_address(),
            client_timeout_secs: default_bbs_timeout(),
        }
    }
}

fn default_bbs_address() -> String {
    "http://127.0.0.1:8889".to_string()
}

fn default_bbs_timeout() -> u64 {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsConfig {
    #[serde(default = "default_nats_servers")]
    pub servers: Vec<String>,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            servers: default_nats_servers(),
        }
    }
}

fn default_nats_servers() -> Vec<String> {
    vec!["nats://127.0.0.1:4222".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingApiConfig {
    /// Base URL of the TCP routing API. Empty disables the TCP sink.
    #[serde(default)]
    pub url: String,
}

impl Default for RoutingApiConfig {
    fn default() -> Self {
        Self { url: String::new() }
    }
}
