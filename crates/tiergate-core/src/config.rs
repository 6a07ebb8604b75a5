//! tiergate.toml configuration parser.
//!
//! Every section and field is optional; a missing file section falls back
//! to the defaults below. CLI flags in `tiergated` override the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tier::Tier;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TiergateConfig {
    pub server: ServerConfig,
    pub labels: LabelConfig,
    pub registry: RegistryConfig,
    pub patch: PatchConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    /// Per-request timeout for the admission endpoint, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8443,
            cert_file: PathBuf::from("/tmp/webhook/certs/tls.crt"),
            key_file: PathBuf::from("/tmp/webhook/certs/tls.key"),
            request_timeout_secs: 10,
        }
    }
}

/// Label and annotation vocabulary shared by the webhook and the watchers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelConfig {
    /// Node label the scheduler matches on; also stamped on admitted pods.
    pub capacity_key: String,
    pub guaranteed_value: String,
    pub preemptible_value: String,
    /// Workload label that opts a workload into capping (`"true"`).
    pub enable_key: String,
    /// Workload label holding the guaranteed-tier cap.
    pub max_guaranteed_key: String,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            capacity_key: "node.kubernetes.io/capacity".to_string(),
            guaranteed_value: "guaranteed".to_string(),
            preemptible_value: "preemptible".to_string(),
            enable_key: "tiergate.io/enabled".to_string(),
            max_guaranteed_key: "tiergate.io/max-guaranteed".to_string(),
        }
    }
}

impl LabelConfig {
    /// Label value for a tier.
    pub fn tier_value(&self, tier: Tier) -> &str {
        match tier {
            Tier::Guaranteed => &self.guaranteed_value,
            Tier::Preemptible => &self.preemptible_value,
        }
    }

    /// Parse a capacity label value. Unknown values yield `None`.
    pub fn parse_tier(&self, value: &str) -> Option<Tier> {
        if value == self.guaranteed_value {
            Some(Tier::Guaranteed)
        } else if value == self.preemptible_value {
            Some(Tier::Preemptible)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// How long an admission-time reservation waits for the watcher to
    /// observe the pod before it is released.
    pub reservation_ttl_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            reservation_ttl_secs: 300,
        }
    }
}

impl RegistryConfig {
    pub fn reservation_ttl(&self) -> Duration {
        Duration::from_secs(self.reservation_ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchConfig {
    /// Stamp `controller.kubernetes.io/pod-deletion-cost` on admitted pods.
    pub deletion_cost: bool,
    pub guaranteed_deletion_cost: i32,
    pub preemptible_deletion_cost: i32,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            deletion_cost: true,
            guaranteed_deletion_cost: 100,
            preemptible_deletion_cost: 1,
        }
    }
}

impl PatchConfig {
    pub fn deletion_cost_for(&self, tier: Tier) -> i32 {
        match tier {
            Tier::Guaranteed => self.guaranteed_deletion_cost,
            Tier::Preemptible => self.preemptible_deletion_cost,
        }
    }
}

impl TiergateConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: TiergateConfig =
            toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configs the watchers could not interpret unambiguously.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let labels = &self.labels;
        if labels.capacity_key.is_empty() {
            return Err(ConfigError::Invalid("labels.capacity_key is empty".into()));
        }
        if labels.guaranteed_value == labels.preemptible_value {
            return Err(ConfigError::Invalid(format!(
                "guaranteed and preemptible label values are both {:?}",
                labels.guaranteed_value
            )));
        }
        Ok(())
    }
}
