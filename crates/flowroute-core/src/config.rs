//! TOML configuration parsing for flowroute.
//!
//! Defines the configuration schema for a controller run: which strategy and
//! metric route new flows, how the telemetry monitor polls port counters,
//! where the topology description lives, and where measurements go.

use flowroute_algorithms::{DataRate, Selection, SelectionError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Validation(String),
    #[error("Invalid strategy selection: {0}")]
    Selection(#[from] SelectionError),
}

/// Top-level controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    pub controller: ControllerSection,
    #[serde(default)]
    pub monitor: MonitorSection,
    pub topology: TopologySection,
    #[serde(default)]
    pub export: ExportSection,
}

/// Flow forwarding parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSection {
    /// Human-readable name for this run.
    #[serde(default = "default_controller_name")]
    pub name: String,
    /// Flow forwarding strategy, e.g. "ecmp".
    pub strategy: String,
    /// Metric of the strategy, e.g. "round_robin".
    pub metric: String,
    /// Seed for random ECMP.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Flows remembered for deduplication. Unbounded when absent.
    #[serde(default)]
    pub seen_capacity: Option<usize>,
    /// Record per-stage timings for every routed flow.
    #[serde(default)]
    pub time_measurement: bool,
}

fn default_controller_name() -> String {
    "flowroute".to_string()
}

fn default_seed() -> u64 {
    42
}

/// Which side of a link the port counter is read on.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterDirection {
    Rx,
    #[default]
    Tx,
}

/// Port-counter telemetry parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Polling period in milliseconds.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default)]
    pub counter_direction: CounterDirection,
    #[serde(default = "default_rx_counter")]
    pub rx_counter: String,
    #[serde(default = "default_tx_counter")]
    pub tx_counter: String,
    /// Unit of link bandwidth in the topology description.
    #[serde(default)]
    pub data_rate: DataRate,
}

fn default_true() -> bool {
    true
}
fn default_interval_ms() -> u64 {
    10_000
}
fn default_rx_counter() -> String {
    "rx_port_counter".to_string()
}
fn default_tx_counter() -> String {
    "tx_port_counter".to_string()
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: default_interval_ms(),
            counter_direction: CounterDirection::default(),
            rx_counter: default_rx_counter(),
            tx_counter: default_tx_counter(),
            data_rate: DataRate::default(),
        }
    }
}

/// Topology description source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologySection {
    /// Path to the JSON topology description.
    pub path: PathBuf,
}

/// Measurement export.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportSection {
    /// Directory for per-link load and stage timing CSV files.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl RouterConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, ConfigError> {
        let config: RouterConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration consistency. Resolves the strategy selection
    /// so mismatched and unimplemented pairings fail here.
    fn validate(&self) -> Result<(), ConfigError> {
        let selection = self.selection()?;
        selection.resolve(self.controller.seed)?;

        if self.monitor.interval_ms == 0 {
            return Err(ConfigError::Validation(
                "monitor interval_ms must be > 0".to_string(),
            ));
        }
        if self.monitor.rx_counter.is_empty() || self.monitor.tx_counter.is_empty() {
            return Err(ConfigError::Validation(
                "monitor counter names must not be empty".to_string(),
            ));
        }
        if self.controller.seen_capacity == Some(0) {
            return Err(ConfigError::Validation(
                "seen_capacity must be > 0 when set".to_string(),
            ));
        }
        Ok(())
    }

    /// The configured strategy/metric pairing.
    pub fn selection(&self) -> Result<Selection, SelectionError> {
        Selection::parse(&self.controller.strategy, &self.controller.metric)
    }

    /// Counter read for the configured direction.
    pub fn counter_name(&self) -> &str {
        match self.monitor.counter_direction {
            CounterDirection::Rx => &self.monitor.rx_counter,
            CounterDirection::Tx => &self.monitor.tx_counter,
        }
    }
}
