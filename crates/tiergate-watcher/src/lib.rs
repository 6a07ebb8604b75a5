//! tiergate-watcher — keeps the registry in step with the cluster.
//!
//! Admission-time reservations are provisional; these watchers are the
//! authoritative source of pod counts, ReplicaSet ownership, and
//! workload policy.
//!
//! # Components
//!
//! - **`pods`** — Pod ledger: confirms reservations, counts removals, reconciles on re-list
//! - **`replicasets`** — ReplicaSet → Deployment owner index feed
//! - **`workloads`** — Deployment/StatefulSet policy updates and deregistration
//! - **`driver`** — Generic list-watch loop with backoff and shutdown
//!
//! # Architecture
//!
//! ```text
//! kube watcher (per kind, default backoff)
//!   └── driver::run ── WatchHandler::handle(Event)
//!         ├── PodSync        → WorkloadRegistry (observe_created / adjust_count / reconcile_pods)
//!         ├── ReplicaSetSync → OwnerIndex (record / remove / replace_kind)
//!         └── WorkloadSync   → WorkloadRegistry (update_policy / deregister / retain_workloads)
//! ```
//!
//! Handlers are synchronous and own their state; only the driver awaits.

pub mod driver;
pub mod pods;
pub mod replicasets;
pub mod workloads;

pub use driver::{WatchHandler, run};
pub use pods::{PodSync, PodSyncStats};
pub use replicasets::ReplicaSetSync;
pub use workloads::{LiveWorkloads, WorkloadSync};
