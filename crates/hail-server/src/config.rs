//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the coordinator can start with
//! zero configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use hail_core::{CallConfig, CoordinatorConfig, RegistryConfig};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Filesystem path of the call-history database.
    /// Env: `HISTORY_DB_PATH`
    /// Default: platform data directory (see `hail_store::Database::new`).
    pub history_db_path: Option<PathBuf>,

    /// How long an unanswered call rings before it fails as missed.
    /// Env: `RING_TIMEOUT_SECS`
    /// Default: `30`
    pub ring_timeout: Duration,

    /// Heartbeat age beyond which an endpoint is evicted.
    /// Env: `HEARTBEAT_TIMEOUT_SECS`
    /// Default: `30`
    pub heartbeat_timeout: Duration,

    /// Interval between eviction sweeps.
    /// Env: `SWEEP_INTERVAL_SECS`
    /// Default: `10`
    pub sweep_interval: Duration,

    /// Whether one user may register several endpoints at once.
    /// Env: `MULTI_DEVICE` (true/false)
    /// Default: `true`
    pub multi_device: bool,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Hail Node"`
    pub instance_name: String,

    /// Sustained per-IP request rate.
    /// Env: `RATE_LIMIT_PER_SEC`
    /// Default: `25`
    pub rate_limit_per_sec: f64,

    /// Per-IP burst allowance.
    /// Env: `RATE_LIMIT_BURST`
    /// Default: `50`
    pub rate_limit_burst: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 8080).into(),
            history_db_path: None,
            ring_timeout: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(10),
            multi_device: true,
            instance_name: "Hail Node".to_string(),
            rate_limit_per_sec: 25.0,
            rate_limit_burst: 50.0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(path) = std::env::var("HISTORY_DB_PATH") {
            config.history_db_path = Some(PathBuf::from(path));
        }

        if let Some(secs) = parse_secs("RING_TIMEOUT_SECS") {
            config.ring_timeout = secs;
        }

        if let Some(secs) = parse_secs("HEARTBEAT_TIMEOUT_SECS") {
            config.heartbeat_timeout = secs;
        }

        if let Some(secs) = parse_secs("SWEEP_INTERVAL_SECS") {
            config.sweep_interval = secs;
        }

        if let Ok(val) = std::env::var("MULTI_DEVICE") {
            config.multi_device = val != "false" && val != "0";
        }

        if let Ok(name) = std::env::var("INSTANCE_NAME") {
            config.instance_name = name;
        }

        if let Ok(val) = std::env::var("RATE_LIMIT_PER_SEC") {
            if let Ok(rate) = val.parse::<f64>() {
                config.rate_limit_per_sec = rate;
            }
        }

        if let Ok(val) = std::env::var("RATE_LIMIT_BURST") {
            if let Ok(burst) = val.parse::<f64>() {
                config.rate_limit_burst = burst;
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }

    /// The knobs the coordinator core cares about.
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            registry: RegistryConfig {
                heartbeat_timeout: self.heartbeat_timeout,
                multi_device: self.multi_device,
                ..RegistryConfig::default()
            },
            call: CallConfig {
                ring_timeout: self.ring_timeout,
            },
        }
    }
}

fn parse_secs(var: &str) -> Option<Duration> {
    let val = std::env::var(var).ok()?;
    match val.parse::<u64>() {
        Ok(secs) if secs > 0 => Some(Duration::from_secs(secs)),
        _ => {
            tracing::warn!(var, value = %val, "Invalid duration, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.ring_timeout, Duration::from_secs(30));
        assert!(config.multi_device);
    }

    #[test]
    fn coordinator_config_mirrors_server_settings() {
        let config = ServerConfig {
            ring_timeout: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(7),
            multi_device: false,
            ..ServerConfig::default()
        };

        let core = config.coordinator_config();
        assert_eq!(core.call.ring_timeout, Duration::from_secs(5));
        assert_eq!(core.registry.heartbeat_timeout, Duration::from_secs(7));
        assert!(!core.registry.multi_device);
    }
}
