//! Configuration module for the shedding server.
//!
//! Supports command-line arguments (each also readable from the process
//! environment) and an optional TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Command-line arguments for the server
#[derive(Parser, Debug, Default)]
#[command(name = "shedding-server")]
#[command(author = "shedding-server authors")]
#[command(version = "0.1.0")]
#[command(about = "A load-shedding TCP server with JSON endpoints", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to (e.g., 127.0.0.1)
    #[arg(long, env = "HOST")]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,

    /// Live worker ceiling; the accept loop counts as one worker
    #[arg(short = 'w', long, env = "THREADS_COUNT")]
    pub max_workers: Option<usize>,

    /// Register worker slots before spawning sessions
    #[arg(long)]
    pub strict_admission: bool,

    /// Per-connection idle timeout in seconds
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Read buffer size in bytes
    #[arg(short, long)]
    pub buffer_size: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Also append log events to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub compute: ComputeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener and admission configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default)]
    pub strict_admission: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_workers: default_max_workers(),
            strict_admission: false,
        }
    }
}

/// Per-connection configuration
#[derive(Debug, Deserialize)]
pub struct ConnectionConfig {
    /// Idle timeout for reads and writes, in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Maximum bytes read per request
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Text encoding of requests and responses
    #[serde(default = "default_encoding")]
    pub encoding: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            buffer_size: default_buffer_size(),
            encoding: default_encoding(),
        }
    }
}

/// Bounds of the simulated work done by `/v1/api`
#[derive(Debug, Deserialize)]
pub struct ComputeConfig {
    #[serde(default = "default_min_seconds")]
    pub min_seconds: u64,
    #[serde(default = "default_max_seconds")]
    pub max_seconds: u64,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            min_seconds: default_min_seconds(),
            max_seconds: default_max_seconds(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log file, disabled when unset
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default = "default_file_level")]
    pub file_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
            file_level: default_file_level(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_max_workers() -> usize {
    10
}

fn default_timeout() -> u64 {
    15
}

fn default_buffer_size() -> usize {
    1024
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

fn default_min_seconds() -> u64 {
    1
}

fn default_max_seconds() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_file_level() -> String {
    "debug".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub max_workers: usize,
    pub strict_admission: bool,
    pub timeout: Duration,
    pub buffer_size: usize,
    pub min_seconds: u64,
    pub max_seconds: u64,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub file_log_level: String,
}

#[cfg(test)]
impl Default for Config {
    fn default() -> Self {
        Self::merge(CliArgs::default(), TomlConfig::default()).unwrap()
    }
}

impl Config {
    /// Load configuration from CLI args, environment and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents =
                std::fs::read_to_string(config_path).map_err(|source| ConfigError::FileRead {
                    path: config_path.clone(),
                    source,
                })?;
            toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
                path: config_path.clone(),
                source,
            })?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args over TOML values and validate the result.
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        if !is_utf8_label(&toml_config.connection.encoding) {
            return Err(ConfigError::UnsupportedEncoding(
                toml_config.connection.encoding,
            ));
        }

        let config = Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port: cli.port.unwrap_or(toml_config.server.port),
            max_workers: cli.max_workers.unwrap_or(toml_config.server.max_workers),
            strict_admission: cli.strict_admission || toml_config.server.strict_admission,
            timeout: Duration::from_secs(cli.timeout.unwrap_or(toml_config.connection.timeout)),
            buffer_size: cli
                .buffer_size
                .unwrap_or(toml_config.connection.buffer_size),
            min_seconds: toml_config.compute.min_seconds,
            max_seconds: toml_config.compute.max_seconds,
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
            log_file: cli.log_file.or(toml_config.logging.file),
            file_log_level: toml_config.logging.file_level,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout.is_zero() {
            return Err(ConfigError::Invalid("timeout must be at least 1 second"));
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer_size must be non-zero"));
        }
        if self.min_seconds > self.max_seconds {
            return Err(ConfigError::Invalid(
                "compute.min_seconds must not exceed compute.max_seconds",
            ));
        }
        Ok(())
    }
}

fn is_utf8_label(label: &str) -> bool {
    label.eq_ignore_ascii_case("utf-8") || label.eq_ignore_ascii_case("utf8")
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{}': {source}", .path.display())]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Unsupported encoding '{0}': only utf-8 is supported")]
    UnsupportedEncoding(String),

    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
