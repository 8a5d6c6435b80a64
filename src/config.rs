//! Configuration management for the txwatch daemon.
//!
//! A TOML file is the base layer. On first run, if no config exists, one is
//! written with defaults. Environment variables (`JSON_RPC_URL`,
//! `BEGINNING_HEIGHTS`, `API_PORT`) override the file, and command-line flags
//! override both.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::pipeline::ScanPolicy;

pub const ENV_JSON_RPC_URL: &str = "JSON_RPC_URL";
pub const ENV_BEGINNING_HEIGHTS: &str = "BEGINNING_HEIGHTS";
pub const ENV_API_PORT: &str = "API_PORT";

pub const DEFAULT_API_PORT: u16 = 8000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// JSON-RPC endpoint of the upstream node
    pub json_rpc_url: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            json_rpc_url: "http://127.0.0.1:8545".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// First height to index; the chain tip when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beginning_height: Option<u64>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_poll_interval_secs() -> u64 {
    12
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            beginning_height: None,
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl PipelineConfig {
    pub fn scan_policy(&self) -> ScanPolicy {
        ScanPolicy {
            max_attempts: self.max_attempts,
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    pub listen_address: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_address: format!("0.0.0.0:{}", DEFAULT_API_PORT),
        }
    }
}

impl ApiConfig {
    /// Listen address with the port filled in when only a host is configured
    pub fn full_listen_address(&self) -> String {
        if self.listen_address.contains(':') {
            self.listen_address.clone()
        } else {
            format!("{}:{}", self.listen_address, DEFAULT_API_PORT)
        }
    }

    /// Replace the port, keeping the configured host
    pub fn set_port(&mut self, port: u16) {
        let host = self
            .listen_address
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or(&self.listen_address)
            .to_string();
        self.listen_address = format!("{}:{}", host, port);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// "pretty" or "json"
    pub format: String,
    /// "stdout" or "file"
    pub output: String,
    pub file_path: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            output: "stdout".to_string(),
            file_path: "./logs/txwatch.log".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Deadline shared by all services when the process stops
    pub timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

impl ShutdownConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&contents)?)
    }

    /// Load the config at `path`, writing defaults there first if it is missing
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load_from_file(path);
        }

        let config = Config::default();
        config.save_to_file(path)?;
        tracing::info!("📝 Wrote default config to {}", path.display());
        Ok(config)
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.display().to_string(),
                source,
            })?;
        }
        fs::write(path, contents).map_err(|source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        })
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any key lookup (the environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_JSON_RPC_URL).filter(|v| !v.trim().is_empty()) {
            self.node.json_rpc_url = url.trim().to_string();
        }

        if let Some(raw) = lookup(ENV_BEGINNING_HEIGHTS).filter(|v| !v.trim().is_empty()) {
            let height = parse_height(raw.trim()).ok_or_else(|| ConfigError::InvalidEnv {
                name: ENV_BEGINNING_HEIGHTS,
                value: raw.clone(),
                reason: "expected a decimal or 0x-prefixed hex height".to_string(),
            })?;
            self.pipeline.beginning_height = Some(height);
        }

        if let Some(raw) = lookup(ENV_API_PORT).filter(|v| !v.trim().is_empty()) {
            let port: u16 = raw.trim().parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::InvalidEnv {
                    name: ENV_API_PORT,
                    value: raw.clone(),
                    reason: e.to_string(),
                }
            })?;
            self.api.set_port(port);
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.node.json_rpc_url.trim();
        if url.is_empty() {
            return Err(ConfigError::Invalid {
                field: "node.json_rpc_url",
                reason: "must not be empty".to_string(),
            });
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                field: "node.json_rpc_url",
                reason: format!("{} is not an http(s) URL", url),
            });
        }
        if self.pipeline.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "pipeline.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.pipeline.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "pipeline.request_timeout_secs",
                reason: "must be positive".to_string(),
            });
        }
        if self.pipeline.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "pipeline.poll_interval_secs",
                reason: "must be positive".to_string(),
            });
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(ConfigError::Invalid {
                field: "logging.format",
                reason: format!("unknown format {:?}", self.logging.format),
            });
        }
        if !matches!(self.logging.output.as_str(), "stdout" | "file") {
            return Err(ConfigError::Invalid {
                field: "logging.output",
                reason: format!("unknown output {:?}", self.logging.output),
            });
        }
        Ok(())
    }
}

/// Accepts `19000000` or `0x121eac0`
pub fn parse_height(raw: &str) -> Option<u64> {
    if raw.starts_with("0x") || raw.starts_with("0X") {
        crate::types::parse_quantity(raw).ok()
    } else {
        raw.parse().ok()
    }
}
