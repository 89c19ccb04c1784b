use std::time::Duration;

use reqscope_core::{Level, LogConfig};

/// Server-level configuration for the request pipeline.
///
/// Controls the per-request timeout, the simulated storage latency and the
/// default log level.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Timeout applied to every request in milliseconds. A deadline already
    /// present on the incoming context is never extended.
    pub default_operation_timeout_ms: u64,
    /// Artificial delay of each storage call in milliseconds, standing in for
    /// database latency.
    pub store_latency_ms: u64,
    /// Minimum log level when `RUST_LOG` is not set.
    pub log_level: Level,
}

impl ServerConfig {
    #[must_use]
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.default_operation_timeout_ms)
    }

    #[must_use]
    pub fn store_latency(&self) -> Duration {
        Duration::from_millis(self.store_latency_ms)
    }

    #[must_use]
    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.log_level,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            default_operation_timeout_ms: 5_000,
            store_latency_ms: 0,
            log_level: Level::Info,
        }
    }
}
