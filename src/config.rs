//! Typed configuration for the client and server sides (§3, §4.9).
//!
//! Both structs derive [`serde::Deserialize`] so they can be loaded from a
//! TOML file, and offer `with_*` builder methods for programmatic,
//! chained construction.

use std::{path::Path, time::Duration};

use serde::Deserialize;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    Gzip,
    Snappy,
    Lz4,
    Zstd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Acknowledgements {
    None,
    Leader,
    All,
}

/// Transport-tuning knobs common to the producer side of both the client and
/// server configurations (§6's "Configuration (producer side)" table).
#[derive(Debug, Clone, Deserialize)]
pub struct TransportTuning {
    pub hosts: Vec<String>,
    pub port: u16,
    pub retries: u32,
    pub batch_size: usize,
    pub linger_millis: u64,
    pub max_request_size: usize,
    pub request_timeout_millis: u64,
    pub max_block_millis: u64,
    pub send_buffer: usize,
    pub compression: Compression,
    pub acknowledgements: Acknowledgements,
}

impl Default for TransportTuning {
    fn default() -> Self {
        Self {
            hosts: vec!["localhost".to_owned()],
            port: 9092,
            retries: 3,
            batch_size: 16_384,
            linger_millis: 0,
            max_request_size: 1_048_576,
            request_timeout_millis: 30_000,
            max_block_millis: 60_000,
            send_buffer: 131_072,
            compression: Compression::None,
            acknowledgements: Acknowledgements::Leader,
        }
    }
}

/// Client-side tuning (§3).
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Prefix used when naming the client's shared reply destination.
    pub reply_destination_prefix: String,
    pub reaper_tick_interval_millis: u64,
    pub default_max_wait_millis: u64,
    pub max_reconnect_millis: u64,
    pub failback_interval_millis: u64,
    pub transport: TransportTuning,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reply_destination_prefix: "argus-client-reply".to_owned(),
            reaper_tick_interval_millis: 1_000,
            default_max_wait_millis: 30_000,
            max_reconnect_millis: 60_000,
            failback_interval_millis: 0,
            transport: TransportTuning::default(),
        }
    }
}

impl ClientConfig {
    pub fn with_reply_destination_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.reply_destination_prefix = prefix.into();
        self
    }

    pub fn with_default_max_wait(mut self, duration: Duration) -> Self {
        self.default_max_wait_millis = duration.as_millis() as u64;
        self
    }

    pub fn with_failback_interval(mut self, duration: Duration) -> Self {
        self.failback_interval_millis = duration.as_millis() as u64;
        self
    }

    pub fn failback_interval(&self) -> Duration {
        Duration::from_millis(self.failback_interval_millis)
    }

    pub fn reaper_tick_interval(&self) -> Duration {
        Duration::from_millis(self.reaper_tick_interval_millis)
    }

    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml)?)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }
}

/// Server-side tuning (§3, §4.6).
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub worker_pool_size: usize,
    pub keep_alive_interval_millis: u64,
    pub channel_inactivity_timeout_millis: u64,
    pub max_message_size: usize,
    pub transport: TransportTuning,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 16,
            keep_alive_interval_millis: 10_000,
            channel_inactivity_timeout_millis: 30_000,
            max_message_size: 1_048_576,
            transport: TransportTuning::default(),
        }
    }
}

impl ServerConfig {
    pub fn with_worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size;
        self
    }

    pub fn with_keep_alive_interval(mut self, duration: Duration) -> Self {
        self.keep_alive_interval_millis = duration.as_millis() as u64;
        self
    }

    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_interval_millis)
    }

    pub fn channel_inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.channel_inactivity_timeout_millis)
    }

    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml)?)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_config_default_is_sane() {
        let config = ClientConfig::default();
        assert_eq!(config.transport.port, 9092);
        assert_eq!(config.failback_interval(), Duration::ZERO);
    }

    #[test]
    fn builder_chaining_overrides_defaults() {
        let config = ServerConfig::default()
            .with_worker_pool_size(4)
            .with_max_message_size(2048);
        assert_eq!(config.worker_pool_size, 4);
        assert_eq!(config.max_message_size, 2048);
    }

    #[test]
    fn deserializes_from_toml() {
        let toml = r#"
            worker_pool_size = 8
            keep_alive_interval_millis = 5000
            channel_inactivity_timeout_millis = 15000
            max_message_size = 4096

            [transport]
            hosts = ["broker-a", "broker-b"]
            port = 61616
            retries = 5
            batch_size = 8192
            linger_millis = 10
            max_request_size = 65536
            request_timeout_millis = 10000
            max_block_millis = 20000
            send_buffer = 65536
            compression = "zstd"
            acknowledgements = "all"
        "#;
        let config = ServerConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.transport.hosts, vec!["broker-a", "broker-b"]);
        assert_eq!(config.transport.compression, Compression::Zstd);
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = ServerConfig::from_toml_str("not = [valid").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_config_file_is_a_read_error() {
        let err = ClientConfig::from_toml_file("/nonexistent/argus.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
