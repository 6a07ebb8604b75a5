//! tiergate-core — shared vocabulary for the tiergate admission hook.
//!
//! Every other crate speaks in terms of these types:
//!
//! - **`key`** — `WorkloadKey`, the namespace-qualified workload identity
//! - **`tier`** — `Tier`, the two capacity tiers a pod can be steered to
//! - **`config`** — `tiergate.toml` parsing and the label vocabulary

pub mod config;
pub mod key;
pub mod tier;

pub use config::{
    ConfigError, LabelConfig, PatchConfig, RegistryConfig, ServerConfig, TiergateConfig,
};
pub use key::WorkloadKey;
pub use tier::{Delta, Tier, TierCounts};
