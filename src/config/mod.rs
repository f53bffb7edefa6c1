pub mod types;

#[cfg(test)]
mod tests;

pub use types::*;

use crate::error::EmitterError;
use anyhow::Result;
use std::path::Path;

impl EmitterConfig {
    /// Load configuration from a file (if it exists) and apply environment
    /// variable overrides for infrastructure settings. When the file does not
    /// exist, built-in defaults are used so the emitter can start with zero
    /// configuration for local development.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: EmitterConfig = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            match path.extension().and_then(|e| e.to_str()) {
                Some("toml") => toml::from_str(&content)?,
                Some("json") => serde_json::from_str(&content)?,
                Some(ext) => anyhow::bail!("unsupported config format: .{ext}, use .toml or .json"),
                None => anyhow::bail!("config file has no extension, use .toml or .json"),
            }
        } else {
            tracing::info!(
                "config file not found at {}, using defaults",
                path.display()
            );
            EmitterConfig::default()
        };

        config.apply_env_overrides();

        config.validate()?;
        tracing::info!("loaded route-emitter configuration");
        Ok(config)
    }

    /// Apply environment variable overrides for connection settings.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("ROUTE_EMITTER_CELL_ID") {
            self.cell_id = v;
        }
        if let Ok(v) = std::env::var("ROUTE_EMITTER_BBS_ADDRESS") {
            self.bbs.address = v;
        }
        if let Ok(v) = std::env::var("ROUTE_EMITTER_NATS_SERVERS") {
            self.nats.servers = v.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(v) = std::env::var("ROUTE_EMITTER_ROUTING_API_URL") {
            self.routing_api.url = v;
        }
        if let Ok(v) = std::env::var("ROUTE_EMITTER_SYNC_INTERVAL") {
            if let Ok(n) = v.parse::<u64>() {
                self.sync.sync_interval_secs = n;
            }
        }
        if let Ok(v) = std::env::var("ROUTE_EMITTER_EMIT_INTERVAL") {
            if let Ok(n) = v.parse::<u64>() {
                self.sync.emit_interval_secs = n;
            }
        }
        if let Ok(v) = std::env::var("ROUTE_EMITTER_LOG_LEVEL") {
            self.log_level = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.bbs.address.is_empty() {
            return Err(EmitterError::Config("bbs address cannot be empty".into()).into());
        }
        if self.nats.servers.is_empty() {
            return Err(EmitterError::Config("at least one nats server is required".into()).into());
        }
        for server in &self.nats.servers {
            if server.is_empty() {
                return Err(EmitterError::Config("nats server cannot be empty".into()).into());
            }
        }
        if self.sync.sync_interval_secs == 0 {
            return Err(EmitterError::Config("sync interval must be positive".into()).into());
        }
        if self.sync.emit_interval_secs == 0 {
            return Err(EmitterError::Config("emit interval must be positive".into()).into());
        }
        Ok(())
    }
}
