//! Configuration module for send-code.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::client::DEFAULT_PORT;
use crate::protocol::DEFAULT_ENCODING;

/// Command-line arguments for send-code
#[derive(Parser, Debug)]
#[command(name = "send-code")]
#[command(version = "0.1.0")]
#[command(
    about = "Sends source code to a remote code executor running at the specified location",
    long_about = None
)]
pub struct CliArgs {
    /// Source file to send
    #[arg(short, long)]
    pub file: PathBuf,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host of the code receiver
    #[arg(long)]
    pub host: Option<String>,

    /// Port of the code receiver
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Shared password (empty string sends no password)
    #[arg(long)]
    pub password: Option<String>,

    /// Name of the application sending the code
    #[arg(long)]
    pub origin: Option<String>,

    /// Encoding declared for the payload
    #[arg(long)]
    pub encoding: Option<String>,

    /// Seconds to wait for the connection (0 = no limit)
    #[arg(long)]
    pub connect_timeout: Option<u64>,

    /// Seconds to wait on each send and receive (0 = no limit)
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where and as whom to send
#[derive(Debug, Deserialize)]
pub struct TargetConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_password")]
    pub password: String,
    #[serde(default = "default_origin")]
    pub origin: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            password: default_password(),
            origin: default_origin(),
        }
    }
}

/// Request and connection settings
#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_encoding")]
    pub encoding: String,
    /// Connect timeout in seconds (0 = no limit)
    #[serde(default)]
    pub connect_timeout: u64,
    /// Send/receive timeout in seconds (0 = no limit)
    #[serde(default)]
    pub io_timeout: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            encoding: default_encoding(),
            connect_timeout: 0,
            io_timeout: 0,
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
    "localhost".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

// The code receiver plugin ships with this password preset.
fn default_password() -> String {
    "alpine".to_string()
}

fn default_origin() -> String {
    "PythonEditor".to_string()
}

fn default_encoding() -> String {
    DEFAULT_ENCODING.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub file: PathBuf,
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub origin: String,
    pub encoding: String,
    pub connect_timeout: Option<Duration>,
    pub io_timeout: Option<Duration>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Self::merge(cli, toml_config))
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        let password = cli.password.unwrap_or(toml_config.target.password);

        Config {
            file: cli.file,
            host: cli.host.unwrap_or(toml_config.target.host),
            port: cli.port.unwrap_or(toml_config.target.port),
            password: (!password.is_empty()).then_some(password),
            origin: cli.origin.unwrap_or(toml_config.target.origin),
            encoding: cli.encoding.unwrap_or(toml_config.client.encoding),
            connect_timeout: seconds(
                cli.connect_timeout
                    .unwrap_or(toml_config.client.connect_timeout),
            ),
            io_timeout: seconds(cli.timeout.unwrap_or(toml_config.client.io_timeout)),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        }
    }
}

fn seconds(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
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
        }
    }
}

impl std::error::Error for ConfigError {}
