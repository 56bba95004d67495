//! Configuration module for the identd server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the ident server
#[derive(Parser, Debug)]
#[command(name = "identd")]
#[command(author = "identd authors")]
#[command(version = "0.1.0")]
#[command(about = "A minimal RFC 1413 ident server", long_about = None)]
pub struct CliArgs {
    /// Identity returned for every well-formed query (omit for NO-USER)
    pub identity: Option<String>,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:113)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Seconds to wait for a query before closing the connection
    #[arg(short = 't', long)]
    pub timeout: Option<u64>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Maximum number of concurrent connections (unlimited if unset)
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Terminate ERROR replies with CRLF as well
    #[arg(long)]
    pub crlf_all: bool,

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
    pub ident: IdentConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Query timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Number of worker threads
    pub workers: Option<usize>,
    /// Concurrent connection cap
    pub max_connections: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            timeout: default_timeout(),
            workers: None,
            max_connections: None,
        }
    }
}

/// Reply-related configuration
#[derive(Debug, Deserialize, Default)]
pub struct IdentConfig {
    #[serde(default)]
    pub identity: String,
    #[serde(default)]
    pub crlf_all_responses: bool,
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

fn default_listen() -> String {
    "0.0.0.0:113".to_string()
}

fn default_timeout() -> u64 {
    10 // 10 seconds
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub identity: String,
    pub timeout: Duration,
    pub workers: Option<usize>,
    pub max_connections: Option<usize>,
    pub crlf_all: bool,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence)
    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let listen = cli.listen.unwrap_or(toml_config.server.listen);
        let listen = listen
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(listen))?;

        Ok(Config {
            listen,
            identity: cli.identity.unwrap_or(toml_config.ident.identity),
            timeout: Duration::from_secs(cli.timeout.unwrap_or(toml_config.server.timeout)),
            workers: cli.workers.or(toml_config.server.workers),
            max_connections: cli.max_connections.or(toml_config.server.max_connections),
            crlf_all: cli.crlf_all || toml_config.ident.crlf_all_responses,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidAddress(String),
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
            ConfigError::InvalidAddress(addr) => {
                write!(f, "Invalid listen address '{}'", addr)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
