//! Configuration loading

use anyhow::{Context, Result};
use camtopo_discovery::{
    load_fixture, AdapterPolicy, HostTransport, RegistryOptions, TopologyRegistry, Transport,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "CAMTOPO_CONFIG";

pub const DEFAULT_CONFIG_PATH: &str = "camtopo.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "warn".to_string()
}

/// Where topology comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Host network adapters
    #[default]
    Host,
    /// A TOML fixture, for running without hardware
    Simulated,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub kind: TransportKind,
    /// Fixture file for the simulated transport, relative to the config file
    #[serde(default)]
    pub fixture: Option<PathBuf>,
    /// How often host adapters are polled for changes
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub adapter_policy: AdapterPolicy,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            fixture: None,
            poll_interval_ms: default_poll_interval(),
            adapter_policy: AdapterPolicy::default(),
        }
    }
}

fn default_poll_interval() -> u64 {
    2000
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    /// Capacity of the async event broadcast channel
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
    /// Stop waiting for Enter after this many seconds
    #[serde(default)]
    pub wait_secs: Option<u64>,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: default_broadcast_capacity(),
            wait_secs: None,
        }
    }
}

fn default_broadcast_capacity() -> usize {
    100
}

impl Config {
    /// Build the configured transport
    pub fn transport(&self) -> Result<Arc<dyn Transport>> {
        match self.transport.kind {
            TransportKind::Host => Ok(Arc::new(HostTransport::with_policy(
                self.transport.adapter_policy,
                Duration::from_millis(self.transport.poll_interval_ms),
            ))),
            TransportKind::Simulated => {
                let path = self
                    .transport
                    .fixture
                    .as_deref()
                    .context("transport.fixture is required for the simulated transport")?;
                Ok(Arc::new(load_fixture(path)?))
            }
        }
    }

    /// Install the process-wide registry over the configured transport
    pub fn open_registry(&self) -> Result<TopologyRegistry> {
        let options = RegistryOptions {
            broadcast_capacity: self.events.broadcast_capacity,
        };
        let registry = TopologyRegistry::initialize_with(self.transport()?, options)?;
        info!(transport = registry.transport_name(), "Registry ready");
        Ok(registry)
    }
}

/// Load configuration from file, falling back to defaults when it is missing
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        if let (Some(fixture), Some(base)) = (&config.transport.fixture, path.parent()) {
            if fixture.is_relative() {
                config.transport.fixture = Some(base.join(fixture));
            }
        }
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}
