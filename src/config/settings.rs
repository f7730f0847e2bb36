use std::env;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::dispatch::{DispatcherConfig, RetryPolicy};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum accepted request body in bytes
    #[serde(default = "default_body_limit")]
    pub body_limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Upper bound on workers spawned per request
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Retries allowed per subscriber delivery point
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backoff of the first retry, doubled on each following one
    #[serde(default = "default_initial_backoff_secs")]
    pub initial_backoff_secs: u64,
    /// Capacity of the shared ingress channel
    #[serde(default = "default_ingress_capacity")]
    pub ingress_capacity: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8090
}

fn default_body_limit() -> usize {
    1024 * 1024 // 1 MiB
}

fn default_max_workers() -> usize {
    1024
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_secs() -> u64 {
    3
}

fn default_ingress_capacity() -> usize {
    1024
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .set_default("dispatch.max_workers", default_max_workers() as i64)?
            .set_default("dispatch.max_retries", default_max_retries() as i64)?
            .set_default("dispatch.initial_backoff_secs", default_initial_backoff_secs() as i64)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // SERVER__PORT, DISPATCH__MAX_WORKERS, DISPATCH__MAX_RETRIES, etc.
            .add_source(
                Environment::default()
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl DispatchConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_backoff: Duration::from_secs(self.initial_backoff_secs),
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            max_workers: self.max_workers.max(1),
            retry: self.retry_policy(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit: default_body_limit(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            max_retries: default_max_retries(),
            initial_backoff_secs: default_initial_backoff_secs(),
            ingress_capacity: default_ingress_capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let server = ServerConfig::default();
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 8090);

        let dispatch = DispatchConfig::default();
        assert_eq!(dispatch.max_workers, 1024);
        assert_eq!(dispatch.max_retries, 3);
    }

    #[test]
    fn test_dispatch_config_conversion() {
        let dispatch = DispatchConfig {
            max_workers: 0,
            max_retries: 5,
            initial_backoff_secs: 2,
            ingress_capacity: 16,
        };

        let config = dispatch.dispatcher_config();
        assert_eq!(config.max_workers, 1);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.initial_backoff, Duration::from_secs(2));
    }

    #[test]
    fn test_deserialize_partial_config() {
        let settings: Settings = Config::builder()
            .set_override("dispatch.max_retries", 7i64)
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.dispatch.max_retries, 7);
        assert_eq!(settings.dispatch.initial_backoff_secs, 3);
        assert_eq!(settings.server.port, 8090);
    }
}
