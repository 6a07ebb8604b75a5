//! tiergate-placement — admission-time placement decisions.
//!
//! This crate turns an incoming pod into a tier decision and a JSON
//! patch. It owns no counters itself (that's `tiergate-registry`); it
//! resolves which workload a pod belongs to and encodes the outcome.
//!
//! # Components
//!
//! - **`owner`** — Owner index and owner-reference chain traversal
//! - **`policy`** — Workload policy parsed from workload labels
//! - **`engine`** — Decision engine (resolve owner → reserve a tier)
//! - **`patch`** — Affinity/label/annotation JSON patch generation

pub mod engine;
pub mod owner;
pub mod patch;
pub mod policy;

pub use engine::DecisionEngine;
pub use owner::{OwnerIndex, OwnerLink, controller_of};
pub use patch::{PatchGenerator, PatchOperation};
pub use policy::{Workload, workload_entry};
