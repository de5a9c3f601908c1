//! Persisted records of the simulated resource manager.
//!
//! All types are serializable to/from JSON for storage in redb tables.

use serde::{Deserialize, Serialize};

/// Identifier handed back to clients as `slurm_jobid`.
pub type JobAllocId = u32;

// ── Node ──────────────────────────────────────────────────────────

/// A compute node in the inventory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeRecord {
    pub name: String,
    pub cpus: u32,
    pub state: NodeState,
    /// Allocation currently holding this node.
    pub job_id: Option<JobAllocId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Idle,
    Allocated,
    /// Unavailable for allocation (drained or failed).
    Down,
}

impl NodeRecord {
    pub fn idle(name: impl Into<String>, cpus: u32) -> Self {
        Self {
            name: name.into(),
            cpus,
            state: NodeState::Idle,
            job_id: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state == NodeState::Idle
    }
}

// ── Job ───────────────────────────────────────────────────────────

/// A job allocation created on behalf of an app request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub job_id: JobAllocId,
    pub hosts: Vec<String>,
    pub task_layout: Vec<u32>,
    pub state: JobState,
    pub return_code: Option<u32>,
    /// Unix timestamp (seconds) of the allocation.
    pub allocated_at: u64,
    /// Unix timestamp (seconds) of the release.
    pub completed_at: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Running,
    Completed,
}

impl JobRecord {
    /// Build the key for the jobs table.
    pub fn table_key(&self) -> String {
        format!("{:010}", self.job_id)
    }
}
