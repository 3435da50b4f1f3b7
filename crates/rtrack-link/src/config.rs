//! Tracker configuration.
//!
//! Loaded from YAML. Every section and field has a default, so an empty
//! document is a valid configuration:
//!
//! ```yaml
//! link:
//!   supervision:
//!     fast_ms: 100
//!     slow_ms: 1000
//!     steady_ms: 5000
//!   discovery_timeout_ms: 5000
//!   pair_retry_backoff_ms: 5000
//!   reconnect_backoff_ms: 1000
//! device:
//!   address: "192.168.4.1:8080"
//!   name: Kestrel
//!   auto_confirm_prefix: RL-
//! commands:
//!   ack_timeout_ms: 5000
//!   queue_depth: 8
//! framing:
//!   header_scan: sliding
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use rtrack_protocol::HeaderScan;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors loading a configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

// ============================================================================
// Sections
// ============================================================================

/// Supervision tick intervals, by phase group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisionConfig {
    /// While enabling the adapter, selecting a device or bonding.
    pub fast_ms: u64,
    /// While idle, unavailable or backing off after a failure.
    pub slow_ms: u64,
    /// While paired, connected or disconnected.
    pub steady_ms: u64,
}

impl Default for SupervisionConfig {
    fn default() -> Self {
        SupervisionConfig {
            fast_ms: 100,
            slow_ms: 1000,
            steady_ms: 5000,
        }
    }
}

/// Connection state machine timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub supervision: SupervisionConfig,
    /// How long device selection may run before it counts as failed.
    pub discovery_timeout_ms: u64,
    /// Wait in PairFailed before retrying.
    pub pair_retry_backoff_ms: u64,
    /// Wait after a failed socket connect before the next attempt.
    pub reconnect_backoff_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            supervision: SupervisionConfig::default(),
            discovery_timeout_ms: 5000,
            pair_retry_backoff_ms: 5000,
            reconnect_backoff_ms: 1000,
        }
    }
}

impl LinkConfig {
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn pair_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.pair_retry_backoff_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }
}

/// The remembered device and device selection policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Address of the remembered device. Without one the tracker starts
    /// with device discovery.
    pub address: Option<String>,
    /// Advertised name of the remembered device.
    pub name: Option<String>,
    /// Discovered devices whose name starts with this prefix are confirmed
    /// without asking.
    pub auto_confirm_prefix: Option<String>,
}

/// Command channel settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    /// How long a command may wait for its acknowledgement.
    pub ack_timeout_ms: u64,
    /// Depth of the outbound queue to the session task.
    pub queue_depth: usize,
}

impl Default for CommandConfig {
    fn default() -> Self {
        CommandConfig {
            ack_timeout_ms: 5000,
            queue_depth: 8,
        }
    }
}

impl CommandConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

/// Framing settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FramingConfig {
    pub header_scan: HeaderScan,
}

// ============================================================================
// Top Level
// ============================================================================

/// Complete tracker configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub link: LinkConfig,
    pub device: DeviceConfig,
    pub commands: CommandConfig,
    pub framing: FramingConfig,
}

impl TrackerConfig {
    /// Parse a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(TrackerConfig::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load a YAML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_default() {
        let config = TrackerConfig::from_yaml_str("").unwrap();
        assert_eq!(config, TrackerConfig::default());
        assert_eq!(config.link.discovery_timeout(), Duration::from_secs(5));
        assert_eq!(config.link.pair_retry_backoff(), Duration::from_secs(5));
        assert_eq!(config.commands.ack_timeout(), Duration::from_secs(5));
        assert_eq!(config.framing.header_scan, HeaderScan::Sliding);
    }

    #[test]
    fn test_partial_document() {
        let yaml = r#"
link:
  supervision:
    fast_ms: 50
device:
  address: "10.0.0.7:4000"
framing:
  header_scan: anchored
"#;
        let config = TrackerConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.link.supervision.fast_ms, 50);
        assert_eq!(config.link.supervision.steady_ms, 5000);
        assert_eq!(config.device.address.as_deref(), Some("10.0.0.7:4000"));
        assert_eq!(config.framing.header_scan, HeaderScan::Anchored);
        assert_eq!(config.commands.queue_depth, 8);
    }

    #[test]
    fn test_invalid_document() {
        let err = TrackerConfig::from_yaml_str("framing:\n  header_scan: diagonal\n").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = TrackerConfig::from_path("/nonexistent/rtrack.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
