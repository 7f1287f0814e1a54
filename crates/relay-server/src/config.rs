//! Server configuration.
//!
//! Configuration is layered, lowest precedence first:
//! - Built-in defaults
//! - TOML configuration file
//! - Environment variables (DNDEX_RELAY_*, nested keys separated by `__`)
//! - Command line arguments (`PORT` is read as the positional port)

use anyhow::{bail, Context, Result};
use clap::Parser;
use dndex_relay_core::RelayConfig;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "DNDEX_RELAY";

/// Files searched when no `--config` is given.
const CONFIG_PATHS: [&str; 3] = [
    "dndex-relay.toml",
    "/etc/dndex-relay/dndex-relay.toml",
    "~/.config/dndex-relay/dndex-relay.toml",
];

/// Command line arguments.
#[derive(Debug, Default, Parser)]
#[command(name = "dndex-relay", version, about = "Room relay for DnDex collaborative sessions")]
pub struct Cli {
    /// Port to listen on.
    #[arg(env = "PORT")]
    pub port: Option<u16>,

    /// Host to bind to.
    #[arg(long)]
    pub host: Option<String>,

    /// Path to a TOML configuration file.
    #[arg(long, short)]
    pub config: Option<PathBuf>,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Relay behaviour switches.
    #[serde(default)]
    pub relay: RelayOptions,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Relay behaviour switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayOptions {
    /// Send `{"type":"joined"}` after a join.
    #[serde(default = "default_true")]
    pub join_ack: bool,

    /// Probe connections and evict the ones that stop answering.
    #[serde(default = "default_true")]
    pub heartbeat: bool,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Probe period in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Frames larger than this many bytes are dropped.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter.
    #[serde(default)]
    pub enabled: bool,

    /// Exporter port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8787
}

fn default_true() -> bool {
    true
}

fn default_heartbeat_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_max_message_size() -> usize {
    1024 * 1024 // 1 MiB
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            relay: RelayOptions::default(),
            heartbeat: HeartbeatConfig::default(),
            limits: LimitsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            join_ack: true,
            heartbeat: true,
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration for the given command line.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit config file is missing, or if any
    /// source cannot be parsed.
    pub fn load(cli: &Cli) -> Result<Self> {
        let file = match &cli.config {
            Some(path) if !path.exists() => {
                bail!("Config file not found: {}", path.display())
            }
            Some(path) => Some(path.clone()),
            None => find_config_file(),
        };

        let mut config = Self::from_sources(file.as_deref())?;
        config.apply_cli(cli);
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the relay cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error if the heartbeat is enabled with a zero period, or
    /// if the message size limit is zero.
    pub fn validate(&self) -> Result<()> {
        if self.relay.heartbeat && self.heartbeat.interval_ms == 0 {
            bail!("heartbeat.interval_ms must be greater than zero (set relay.heartbeat = false to disable)");
        }
        if self.limits.max_message_size == 0 {
            bail!("limits.max_message_size must be greater than zero");
        }
        Ok(())
    }

    /// Build configuration from an optional TOML file and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or an environment value cannot be parsed.
    pub fn from_sources(file: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = file {
            builder = builder.add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Toml)
                    .required(true),
            );
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let source = match file {
            Some(path) => path.display().to_string(),
            None => "environment".to_string(),
        };

        builder
            .build()
            .with_context(|| format!("Failed to load configuration from {source}"))?
            .try_deserialize()
            .with_context(|| format!("Failed to parse configuration from {source}"))
    }

    /// Apply command line overrides.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(host) = &cli.host {
            self.host = host.clone();
        }
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host` is not an IP address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .with_context(|| format!("Invalid host address: {}", self.host))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Get the relay settings for the hub.
    #[must_use]
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            join_ack: self.relay.join_ack,
            heartbeat_interval: self
                .relay
                .heartbeat
                .then(|| Duration::from_millis(self.heartbeat.interval_ms)),
            max_message_size: self.limits.max_message_size,
        }
    }
}

fn find_config_file() -> Option<PathBuf> {
    CONFIG_PATHS
        .iter()
        .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
        .find(|path| path.exists())
}
