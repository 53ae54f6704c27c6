//! Configuration module for the edge-echo server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the echo server
#[derive(Parser, Debug)]
#[command(name = "edge-echo")]
#[command(author = "edge-echo authors")]
#[command(version = "0.1.0")]
#[command(about = "A single-threaded, edge-triggered TCP echo server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (wildcard by default)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Listen backlog
    #[arg(long)]
    pub backlog: Option<i32>,

    /// Size of the per-read scratch buffer in bytes
    #[arg(long)]
    pub buffer_size: Option<usize>,

    /// Maximum number of readiness events handled per wait
    #[arg(long)]
    pub max_events: Option<usize>,

    /// Unflushed echo bytes per connection before reads are paused
    #[arg(long)]
    pub max_pending_bytes: Option<usize>,

    /// Readiness wait timeout in milliseconds (blocks indefinitely if unset)
    #[arg(long)]
    pub wait_timeout_ms: Option<u64>,

    /// Set TCP_NODELAY on accepted connections
    #[arg(long)]
    pub nodelay: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_max_events")]
    pub max_events: usize,
    #[serde(default = "default_max_pending_bytes")]
    pub max_pending_bytes: usize,
    pub wait_timeout_ms: Option<u64>,
    #[serde(default)]
    pub nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            backlog: default_backlog(),
            buffer_size: default_buffer_size(),
            max_events: default_max_events(),
            max_pending_bytes: default_max_pending_bytes(),
            wait_timeout_ms: None,
            nodelay: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_backlog() -> i32 {
    128
}

fn default_buffer_size() -> usize {
    4096
}

fn default_max_events() -> usize {
    1024
}

fn default_max_pending_bytes() -> usize {
    1024 * 1024 // 1 MiB
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub backlog: i32,
    pub buffer_size: usize,
    pub max_events: usize,
    pub max_pending_bytes: usize,
    pub wait_timeout: Option<Duration>,
    pub nodelay: bool,
    pub log_level: String,
}

#[cfg(test)]
impl Default for Config {
    fn default() -> Self {
        let server = ServerConfig::default();
        Config {
            host: IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
            port: server.port,
            backlog: server.backlog,
            buffer_size: server.buffer_size,
            max_events: server.max_events,
            max_pending_bytes: server.max_pending_bytes,
            wait_timeout: None,
            nodelay: server.nodelay,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    /// Build configuration from already-parsed CLI arguments.
    pub fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::resolve(cli, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence) and validate.
    fn resolve(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let server = toml_config.server;

        let host_str = cli.host.unwrap_or(server.host);
        let host = host_str
            .parse::<IpAddr>()
            .map_err(|_| ConfigError::InvalidValue("host", host_str.clone()))?;

        let config = Config {
            host,
            port: cli.port.unwrap_or(server.port),
            backlog: cli.backlog.unwrap_or(server.backlog),
            buffer_size: cli.buffer_size.unwrap_or(server.buffer_size),
            max_events: cli.max_events.unwrap_or(server.max_events),
            max_pending_bytes: cli.max_pending_bytes.unwrap_or(server.max_pending_bytes),
            wait_timeout: cli
                .wait_timeout_ms
                .or(server.wait_timeout_ms)
                .map(Duration::from_millis),
            nodelay: cli.nodelay || server.nodelay,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.backlog <= 0 {
            return Err(ConfigError::InvalidValue("backlog", self.backlog.to_string()));
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::InvalidValue("buffer_size", "0".to_string()));
        }
        if self.max_events == 0 {
            return Err(ConfigError::InvalidValue("max_events", "0".to_string()));
        }
        if self.max_pending_bytes == 0 {
            return Err(ConfigError::InvalidValue("max_pending_bytes", "0".to_string()));
        }
        Ok(())
    }

    /// Socket address the listener binds to.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

#[cfg(test)]
impl CliArgs {
    fn default_args() -> Self {
        CliArgs {
            config: None,
            host: None,
            port: None,
            backlog: None,
            buffer_size: None,
            max_events: None,
            max_pending_bytes: None,
            wait_timeout_ms: None,
            nodelay: false,
            log_level: default_log_level(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidValue(&'static str, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidValue(field, value) => {
                write!(f, "Invalid value for '{}': {}", field, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
