// src/config.rs

//! Manages gateway configuration: loading, resolving size values, and validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use tracing::{info, warn};

/// Settings for the embedded engine every session opens.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EngineConfig {
    /// Database path handed to the engine. `:memory:` gives each session a private database.
    #[serde(default = "default_engine_path")]
    pub path: String,
    #[serde(default)]
    pub read_only: bool,
    /// Statements run on every freshly opened session, in order.
    #[serde(default)]
    pub init_sql: Vec<String>,
    /// How long the engine waits on a locked database file before failing.
    #[serde(default, with = "humantime_serde")]
    pub busy_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            path: default_engine_path(),
            read_only: false,
            init_sql: Vec::new(),
            busy_timeout: None,
        }
    }
}

fn default_engine_path() -> String {
    ":memory:".to_string()
}

/// Session lifecycle settings.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SessionConfig {
    /// How many random candidates are tried before an id reservation gives up.
    #[serde(default = "default_id_retry_limit")]
    pub id_retry_limit: usize,
    /// Queries running longer than this are interrupted. Unset disables the limit.
    #[serde(default, with = "humantime_serde")]
    pub query_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            id_retry_limit: default_id_retry_limit(),
            query_timeout: None,
        }
    }
}

fn default_id_retry_limit() -> usize {
    64
}

/// A size given either as a plain byte count or as a string with a unit.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
enum ByteSizeConfig {
    Bytes(usize),
    String(String),
}

#[derive(Deserialize, Debug, Clone)]
struct RawOutputConfig {
    #[serde(default = "default_null_marker")]
    null_marker: String,
    #[serde(default = "default_result_set_separator")]
    result_set_separator: bool,
    #[serde(default = "default_chunk_size")]
    chunk_size: ByteSizeConfig,
    #[serde(default = "default_max_query_size")]
    max_query_size: ByteSizeConfig,
}

impl Default for RawOutputConfig {
    fn default() -> Self {
        Self {
            null_marker: default_null_marker(),
            result_set_separator: default_result_set_separator(),
            chunk_size: default_chunk_size(),
            max_query_size: default_max_query_size(),
        }
    }
}

fn default_null_marker() -> String {
    "\\N".to_string()
}
fn default_result_set_separator() -> bool {
    true
}
fn default_chunk_size() -> ByteSizeConfig {
    ByteSizeConfig::Bytes(8 * 1024)
}
fn default_max_query_size() -> ByteSizeConfig {
    ByteSizeConfig::Bytes(1024 * 1024)
}

/// Resolved response-format settings.
#[derive(Serialize, Debug, Clone)]
pub struct OutputConfig {
    /// Written, unquoted, in place of NULL values.
    pub null_marker: String,
    /// Whether consecutive result sets are separated by an empty line.
    pub result_set_separator: bool,
    /// Encoded output is sent to the client in chunks of roughly this many bytes.
    pub chunk_size: usize,
    /// Request bodies larger than this are rejected.
    pub max_query_size: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            null_marker: default_null_marker(),
            result_set_separator: default_result_set_separator(),
            chunk_size: 8 * 1024,
            max_query_size: 1024 * 1024,
        }
    }
}

/// Configuration for TLS encryption.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_cert_path")]
    pub cert_path: String,
    #[serde(default = "default_key_path")]
    pub key_path: String,
}

fn default_cert_path() -> String {
    "sqlgate.crt".to_string()
}
fn default_key_path() -> String {
    "sqlgate.key".to_string()
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MetricsConfig {
    /// If true, an HTTP server will be started to expose Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,
    /// The port for the Prometheus metrics server.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_port() -> u16 {
    9999
}

/// A raw representation of the config file before validation and resolution.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default = "default_max_clients")]
    max_clients: usize,
    #[serde(default)]
    engine: EngineConfig,
    #[serde(default)]
    session: SessionConfig,
    #[serde(default)]
    output: RawOutputConfig,
    #[serde(default)]
    tls: TlsConfig,
    #[serde(default)]
    metrics: MetricsConfig,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    9998
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_clients() -> usize {
    10000
}

/// Represents the final, validated, and resolved gateway configuration.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub max_clients: usize,
    pub engine: EngineConfig,
    pub session: SessionConfig,
    pub output: OutputConfig,
    pub tls: TlsConfig,
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            max_clients: default_max_clients(),
            engine: EngineConfig::default(),
            session: SessionConfig::default(),
            output: OutputConfig::default(),
            tls: TlsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        Self::from_toml_str(&contents).with_context(|| format!("Invalid config in '{path}'"))
    }

    /// Parses, resolves and validates a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let raw_config: RawConfig =
            toml::from_str(contents).context("Failed to parse TOML configuration")?;

        let output = OutputConfig {
            null_marker: raw_config.output.null_marker,
            result_set_separator: raw_config.output.result_set_separator,
            chunk_size: resolve_byte_size("output.chunk_size", raw_config.output.chunk_size)?,
            max_query_size: resolve_byte_size(
                "output.max_query_size",
                raw_config.output.max_query_size,
            )?,
        };

        let config = Config {
            host: raw_config.host,
            port: raw_config.port,
            log_level: raw_config.log_level,
            max_clients: raw_config.max_clients,
            engine: raw_config.engine,
            session: raw_config.session,
            output,
            tls: raw_config.tls,
            metrics: raw_config.metrics,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the resolved configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.max_clients == 0 {
            return Err(anyhow!("max_clients cannot be 0"));
        }
        if self.engine.path.trim().is_empty() {
            return Err(anyhow!("engine.path cannot be empty"));
        }
        if self.session.id_retry_limit == 0 {
            return Err(anyhow!("session.id_retry_limit cannot be 0"));
        }
        if let Some(timeout) = self.session.query_timeout
            && timeout.is_zero()
        {
            return Err(anyhow!(
                "session.query_timeout cannot be 0; omit it to disable the limit"
            ));
        }

        if self.output.chunk_size == 0 {
            return Err(anyhow!("output.chunk_size cannot be 0"));
        }
        if self.output.max_query_size == 0 {
            return Err(anyhow!("output.max_query_size cannot be 0"));
        }
        if self.output.null_marker.is_empty() {
            return Err(anyhow!(
                "output.null_marker cannot be empty; NULL would be indistinguishable from an empty line"
            ));
        }
        if self
            .output
            .null_marker
            .contains([',', '"', '\r', '\n'])
        {
            return Err(anyhow!(
                "output.null_marker cannot contain a delimiter, quote or line break"
            ));
        }
        if self.output.chunk_size > 16 * 1024 * 1024 {
            warn!(
                "large output.chunk_size: {} bytes. Errors are reported as a status only before the first chunk is sent.",
                self.output.chunk_size
            );
        }

        if self.tls.enabled {
            if self.tls.cert_path.trim().is_empty() {
                return Err(anyhow!("tls.cert_path cannot be empty when TLS is enabled"));
            }
            if self.tls.key_path.trim().is_empty() {
                return Err(anyhow!("tls.key_path cannot be empty when TLS is enabled"));
            }
        }

        if self.metrics.enabled {
            if self.metrics.port == 0 {
                return Err(anyhow!("metrics.port cannot be 0"));
            }
            if self.metrics.port == self.port {
                return Err(anyhow!(
                    "metrics.port cannot be the same as the main server port"
                ));
            }
        }
        Ok(())
    }
}

/// Resolves a `ByteSizeConfig` into a byte count.
fn resolve_byte_size(field: &str, cfg: ByteSizeConfig) -> Result<usize> {
    match cfg {
        ByteSizeConfig::Bytes(b) => Ok(b),
        ByteSizeConfig::String(s) => {
            let s_lower = s.trim().to_lowercase();
            let resolved = if let Some(val_str) = s_lower.strip_suffix("gb") {
                parse_size_string(field, &s, val_str, 1024 * 1024 * 1024)?
            } else if let Some(val_str) = s_lower.strip_suffix('g') {
                parse_size_string(field, &s, val_str, 1024 * 1024 * 1024)?
            } else if let Some(val_str) = s_lower.strip_suffix("mb") {
                parse_size_string(field, &s, val_str, 1024 * 1024)?
            } else if let Some(val_str) = s_lower.strip_suffix('m') {
                parse_size_string(field, &s, val_str, 1024 * 1024)?
            } else if let Some(val_str) = s_lower.strip_suffix("kb") {
                parse_size_string(field, &s, val_str, 1024)?
            } else if let Some(val_str) = s_lower.strip_suffix('k') {
                parse_size_string(field, &s, val_str, 1024)?
            } else {
                s_lower.parse().with_context(|| format!("Invalid {field} value '{s}'. Must be a number (bytes) or have a unit (e.g., '64kb')."))?
            };
            info!("Resolved {} '{}' to {} bytes.", field, s, resolved);
            Ok(resolved)
        }
    }
}

/// Parses a string number with a unit (kb, mb, gb) and applies a multiplier.
fn parse_size_string(
    field: &str,
    original_str: &str,
    value_str: &str,
    multiplier: u64,
) -> Result<usize> {
    let value: u64 = value_str
        .trim()
        .parse()
        .with_context(|| format!("Invalid number in {field}: '{original_str}'"))?;
    let result_u64 = value.saturating_mul(multiplier);
    if result_u64 > (usize::MAX as u64) {
        return Err(anyhow!(
            "{} value '{}' is too large for this system's architecture (max is {} bytes)",
            field,
            original_str,
            usize::MAX
        ));
    }
    Ok(result_u64 as usize)
}
