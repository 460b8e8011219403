//! Controller configuration.
//!
//! Loaded from a TOML file. Every key is optional; a missing file yields the
//! defaults.

use crate::error::{ControllerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;
use tracing::info;
use vrn_types::MacAddress;

/// Identity of this controller instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Datapath managed by this instance
    #[serde(default)]
    pub datapath_id: u64,

    /// This host's control address. Excluded from portset fan-out.
    #[serde(default = "default_local_address")]
    pub local_address: Ipv4Addr,
}

/// Flow installation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Idle timeout of forwarding flows, in seconds
    #[serde(default = "default_idle_expire")]
    pub idle_expire_secs: u16,

    /// Idle timeout of temporary drop flows, in seconds
    #[serde(default)]
    pub blackhole_idle_secs: u16,

    /// Hard timeout of temporary drop flows, in seconds
    #[serde(default = "default_blackhole_hard")]
    pub blackhole_hard_secs: u16,

    /// Install network-layer wildcard flows instead of exact matches
    #[serde(default)]
    pub wildcard_flows: bool,
}

/// A statically known neighbor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticNeighbor {
    pub address: Ipv4Addr,
    pub mac: MacAddress,
}

/// Address resolution parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionConfig {
    /// Time to wait for an answer before reporting failure, in milliseconds
    #[serde(default = "default_resolution_timeout")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub static_neighbors: Vec<StaticNeighbor>,
}

/// Event loop parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Bound of the event channel
    #[serde(default = "default_event_queue_depth")]
    pub event_queue_depth: usize,
}

/// Complete controller configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default)]
    pub controller: NodeConfig,

    #[serde(default)]
    pub flows: FlowConfig,

    #[serde(default)]
    pub resolution: ResolutionConfig,

    #[serde(default)]
    pub daemon: DaemonConfig,
}

fn default_local_address() -> Ipv4Addr {
    Ipv4Addr::LOCALHOST
}

fn default_idle_expire() -> u16 {
    60
}

fn default_blackhole_hard() -> u16 {
    5
}

fn default_resolution_timeout() -> u64 {
    3000
}

fn default_event_queue_depth() -> usize {
    1024
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            datapath_id: 0,
            local_address: default_local_address(),
        }
    }
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            idle_expire_secs: default_idle_expire(),
            blackhole_idle_secs: 0,
            blackhole_hard_secs: default_blackhole_hard(),
            wildcard_flows: false,
        }
    }
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_resolution_timeout(),
            static_neighbors: Vec::new(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            event_queue_depth: default_event_queue_depth(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                ControllerError::Config(format!(
                    "failed to parse config file {}: {}",
                    path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(ControllerError::Io(e)),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ControllerError::Config(format!("failed to serialize config: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn resolution_timeout(&self) -> Duration {
        Duration::from_millis(self.resolution.timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.flows.blackhole_idle_secs == 0 && self.flows.blackhole_hard_secs == 0 {
            return Err(ControllerError::Config(
                "blackhole flows need an idle or hard timeout".to_string(),
            ));
        }

        if self.resolution.timeout_ms == 0 {
            return Err(ControllerError::Config(
                "resolution timeout_ms must be > 0".to_string(),
            ));
        }

        if self.daemon.event_queue_depth == 0 {
            return Err(ControllerError::Config(
                "event_queue_depth must be > 0".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for neighbor in &self.resolution.static_neighbors {
            if !seen.insert(neighbor.address) {
                return Err(ControllerError::Config(format!(
                    "duplicate static neighbor {}",
                    neighbor.address
                )));
            }
        }

        Ok(())
    }
}
