//! The resource manager contract consumed by the broker.
//!
//! Implementations own their node and job tables and do their own locking:
//! read access for snapshots and queries, write access for allocation and
//! release. Callers must treat every snapshot as advisory and fetch a new
//! one before re-evaluating a selection.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use dynalloc_core::HostSet;

use crate::error::ManagerResult;
use crate::types::JobAllocId;

/// Boxed future returned by every [`ResourceManager`] call.
pub type ManagerFuture<'a, T> = Pin<Box<dyn Future<Output = ManagerResult<T>> + Send + 'a>>;

/// Point-in-time view of idle nodes. Stale as soon as it is returned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeSnapshot {
    /// Idle hosts in inventory order.
    pub idle: HostSet,
    /// CPU count per idle host.
    pub cpus: HashMap<String, u32>,
}

impl NodeSnapshot {
    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    /// Total CPUs across idle hosts.
    pub fn idle_cpus(&self) -> u64 {
        self.idle
            .iter()
            .map(|h| u64::from(self.cpus.get(h).copied().unwrap_or(0)))
            .sum()
    }
}

/// Node and CPU counts for the whole inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeTotals {
    pub nodes: u32,
    pub slots: u64,
}

/// What the manager is asked to allocate.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeTarget {
    /// Exactly these hosts.
    Hosts(HostSet),
    /// Any `n` hosts of the manager's choosing. Zero lets the manager size
    /// the allocation from the task count.
    Count(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AllocationRequest {
    pub target: NodeTarget,
    /// Number of tasks to lay out, inferred from CPUs when absent.
    pub task_count: Option<u32>,
    /// How long the manager may block waiting for resources.
    pub timeout: Duration,
}

/// A granted allocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub alloc_id: JobAllocId,
    pub hosts: HostSet,
    /// Tasks per allocated host, in `hosts` order.
    pub task_layout: Vec<u32>,
}

/// Primitives a cluster resource manager exposes to the broker.
pub trait ResourceManager: Send + Sync {
    /// Idle hosts and their CPU counts.
    fn idle_nodes(&self) -> ManagerFuture<'_, NodeSnapshot>;

    /// Node and CPU counts for the whole inventory.
    fn node_totals(&self) -> ManagerFuture<'_, NodeTotals>;

    /// Create a job allocation, blocking up to `request.timeout`.
    fn allocate<'a>(&'a self, request: &'a AllocationRequest) -> ManagerFuture<'a, Allocation>;

    /// Complete a job allocation and return its hosts to the idle pool.
    fn release(
        &self,
        alloc_id: JobAllocId,
        return_code: Option<u32>,
    ) -> ManagerFuture<'_, ()>;

    /// Save job and node state. Best effort.
    fn persist_state(&self) -> ManagerFuture<'_, ()>;
}
