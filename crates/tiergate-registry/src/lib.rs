//! tiergate-registry — the single source of truth for tier placement.
//!
//! The registry maps each `WorkloadKey` to its declared policy and the
//! live guaranteed/preemptible pod counts. Two populations of callers
//! share it: admission requests (which reserve a tier) and the cluster
//! watchers (which confirm or correct counts from observed pods).
//!
//! # Architecture
//!
//! ```text
//! WorkloadRegistry (Arc-shared, one Mutex)
//!   ├── entries: WorkloadKey → Entry
//!   │   ├── WorkloadPolicy (cap, replicas, enabled)
//!   │   ├── TierCounts (live, includes provisional)
//!   │   └── Provisional reservations (expire after a TTL)
//!   └── pending: WorkloadKey → TierCounts (pods seen before registration)
//! ```
//!
//! The lock covers map access and counter arithmetic only. Logging
//! happens after the guard is dropped.

pub mod registry;
pub mod state;

pub use registry::WorkloadRegistry;
pub use state::{Decision, WorkloadPolicy, WorkloadState};
