//! Configuration module for the bind receiver.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::runner::ExternalCommand;
use clap::Parser;
use serde::Deserialize;
use std::ffi::OsString;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the bind receiver
#[derive(Parser, Debug)]
#[command(name = "bind-receiver")]
#[command(version)]
#[command(about = "Receives a bind bundle during the provisioning window", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    pub ip: Option<String>,

    /// Port to listen on
    #[arg(long)]
    pub port: Option<u16>,

    /// Seconds to listen before giving up
    #[arg(long)]
    pub listen_duration: Option<u64>,

    /// Keep listening after a successful BIND
    #[arg(long)]
    pub force_listen: bool,

    /// Enable verbose diagnostics on stderr
    #[arg(long)]
    pub debug: bool,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub bundle: BundleConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener and lifecycle configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_ip")]
    pub ip: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Listen window in seconds
    #[serde(default = "default_listen_duration")]
    pub listen_duration: u64,
    #[serde(default)]
    pub force_listen: bool,
    /// Longest request line accepted, in bytes
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ip: default_ip(),
            port: default_port(),
            listen_duration: default_listen_duration(),
            force_listen: false,
            max_line_length: default_max_line_length(),
        }
    }
}

/// Where the decoded bundle lands
#[derive(Debug, Deserialize)]
pub struct BundleConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_file_name")]
    pub file_name: String,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            file_name: default_file_name(),
        }
    }
}

/// External programs invoked by UNBIND and INFO
#[derive(Debug, Deserialize)]
pub struct CommandsConfig {
    #[serde(default = "default_factory_reset")]
    pub factory_reset: ExternalCommand,
    #[serde(default = "default_info")]
    pub info: Vec<ExternalCommand>,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            factory_reset: default_factory_reset(),
            info: default_info(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub debug: bool,
}

fn default_ip() -> String {
    "10.5.99.2".to_string()
}

fn default_port() -> u16 {
    5555
}

fn default_listen_duration() -> u64 {
    10
}

fn default_max_line_length() -> usize {
    64 * 1024 * 1024 // 64 MB
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("/tmp/bind")
}

fn default_file_name() -> String {
    "bind.tar.gz".to_string()
}

fn default_factory_reset() -> ExternalCommand {
    ExternalCommand::new("firstboot", &[])
}

fn default_info() -> Vec<ExternalCommand> {
    vec![
        ExternalCommand::new("ipcinfo", &["--long"]),
        ExternalCommand::new("cat", &["/etc/os-release"]),
    ]
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub ip: IpAddr,
    pub port: u16,
    pub listen_duration: Duration,
    pub force_listen: bool,
    pub debug: bool,
    pub max_line_length: usize,
    pub output_dir: PathBuf,
    pub bundle_file: String,
    pub factory_reset: ExternalCommand,
    pub info: Vec<ExternalCommand>,
}

impl Default for Config {
    fn default() -> Self {
        let toml_config = TomlConfig::default();
        Self {
            ip: IpAddr::from([10, 5, 99, 2]),
            port: toml_config.server.port,
            listen_duration: Duration::from_secs(toml_config.server.listen_duration),
            force_listen: false,
            debug: false,
            max_line_length: toml_config.server.max_line_length,
            output_dir: toml_config.bundle.output_dir,
            bundle_file: toml_config.bundle.file_name,
            factory_reset: toml_config.commands.factory_reset,
            info: toml_config.commands.info,
        }
    }
}

impl Config {
    /// Load configuration from the process arguments and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(std::env::args_os())
    }

    /// Load configuration from an explicit argument list.
    /// CLI arguments take precedence over TOML file values.
    pub fn load_from<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let cli = CliArgs::try_parse_from(args).map_err(ConfigError::Cli)?;

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

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let ip_str = cli.ip.unwrap_or(toml_config.server.ip);
        let ip: IpAddr = ip_str
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(ip_str.clone()))?;

        let listen_duration = cli
            .listen_duration
            .unwrap_or(toml_config.server.listen_duration);
        if listen_duration == 0 {
            return Err(ConfigError::InvalidDuration);
        }

        // Lines are read through a byte budget of max + 1.
        let max_line_length = toml_config.server.max_line_length;
        if max_line_length == 0 || max_line_length as u64 >= u64::MAX {
            return Err(ConfigError::InvalidLineLength(max_line_length));
        }

        Ok(Config {
            ip,
            port: cli.port.unwrap_or(toml_config.server.port),
            listen_duration: Duration::from_secs(listen_duration),
            force_listen: cli.force_listen || toml_config.server.force_listen,
            debug: cli.debug || toml_config.logging.debug,
            max_line_length,
            output_dir: toml_config.bundle.output_dir,
            bundle_file: toml_config.bundle.file_name,
            factory_reset: toml_config.commands.factory_reset,
            info: toml_config.commands.info,
        })
    }

    /// Socket address the listener binds to.
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// Full path of the decoded bundle.
    pub fn bundle_path(&self) -> PathBuf {
        self.output_dir.join(&self.bundle_file)
    }

    /// Default tracing filter when `RUST_LOG` is not set.
    pub fn log_filter(&self) -> &'static str {
        if self.debug {
            "debug"
        } else {
            "info"
        }
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    Cli(clap::Error),
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidAddress(String),
    InvalidDuration,
    InvalidLineLength(usize),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Cli(e) => write!(f, "{}", e),
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidAddress(addr) => write!(f, "Invalid listen address: {}", addr),
            ConfigError::InvalidDuration => write!(f, "Invalid listen duration"),
            ConfigError::InvalidLineLength(max) => write!(f, "Invalid max line length: {}", max),
        }
    }
}

impl std::error::Error for ConfigError {}
