//! dynalloc-state — the resource manager behind the broker.
//!
//! The broker never owns node or job state. It talks to a cluster resource
//! manager through the [`ResourceManager`] contract:
//!
//! - `idle_nodes` — snapshot of idle hosts and their CPU counts
//! - `allocate` — blocking allocation of explicit hosts or a node count
//! - `release` — completion of a job allocation
//! - `persist_state` — best-effort save of job/node tables
//!
//! [`InMemoryCluster`] implements the contract over a static node inventory
//! and is what the daemon runs against. Its tables can be persisted to a
//! redb-backed [`StateStore`] so allocations survive a restart.

pub mod cluster;
pub mod error;
pub mod manager;
pub mod store;
pub mod tables;
pub mod types;

pub use cluster::{InMemoryCluster, distribute_tasks};
pub use error::{ManagerError, ManagerResult, StateError, StateResult};
pub use manager::{
    Allocation, AllocationRequest, ManagerFuture, NodeSnapshot, NodeTarget, NodeTotals,
    ResourceManager,
};
pub use store::StateStore;
pub use types::*;
