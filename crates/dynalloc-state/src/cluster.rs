//! InMemoryCluster — a resource manager over a static node inventory.
//!
//! Node and job tables sit behind one `RwLock`: snapshots and queries take
//! the read side, allocation and release take the write side. Allocations
//! that cannot be satisfied yet park on a `Notify` that every release (and
//! every node returning to idle) wakes, until their timeout expires.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{Mutex, Notify, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use dynalloc_core::HostSet;
use dynalloc_core::config::ClusterConfig;

use crate::error::{ManagerError, ManagerResult};
use crate::manager::{
    Allocation, AllocationRequest, ManagerFuture, NodeSnapshot, NodeTarget, NodeTotals,
    ResourceManager,
};
use crate::store::StateStore;
use crate::types::*;

struct ClusterTables {
    /// Inventory order is the iteration order of every snapshot.
    nodes: Vec<NodeRecord>,
    position: HashMap<String, usize>,
    jobs: BTreeMap<JobAllocId, JobRecord>,
    next_job_id: JobAllocId,
}

/// Simulated cluster resource manager.
pub struct InMemoryCluster {
    tables: RwLock<ClusterTables>,
    released: Notify,
    cpus_per_task: u32,
    store: Option<StateStore>,
    /// Held from snapshot to commit so saves land in the order they were taken.
    saving: Mutex<()>,
}

impl InMemoryCluster {
    /// Build a cluster from `(host, cpus)` pairs, all idle.
    pub fn new<I, S>(nodes: I, cpus_per_task: u32) -> Self
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        let mut records: Vec<NodeRecord> = Vec::new();
        let mut position = HashMap::new();
        for (name, cpus) in nodes {
            let name = name.into();
            if position.contains_key(&name) {
                continue;
            }
            position.insert(name.clone(), records.len());
            records.push(NodeRecord::idle(name, cpus));
        }
        Self {
            tables: RwLock::new(ClusterTables {
                nodes: records,
                position,
                jobs: BTreeMap::new(),
                next_job_id: 1,
            }),
            released: Notify::new(),
            cpus_per_task: cpus_per_task.max(1),
            store: None,
            saving: Mutex::new(()),
        }
    }

    /// Build a cluster from the `[cluster]` config section, restoring
    /// running allocations from `state_path` when it is set.
    pub fn from_config(config: &ClusterConfig) -> ManagerResult<Self> {
        let mut nodes = Vec::new();
        for group in &config.nodes {
            let hosts = HostSet::parse(&group.names)
                .map_err(|e| ManagerError::Inventory(e.to_string()))?;
            nodes.extend(hosts.into_vec().into_iter().map(|h| (h, group.cpus)));
        }
        let cluster = Self::new(nodes, config.cpus_per_task);
        match &config.state_path {
            Some(path) => {
                let store = StateStore::open(path)?;
                cluster.restore(store)
            }
            None => Ok(cluster),
        }
    }

    /// Attach a state store and re-apply what it holds: drained or failed
    /// nodes first, then the running jobs, which win over any node state.
    pub fn restore(mut self, store: StateStore) -> ManagerResult<Self> {
        let nodes = store.list_nodes()?;
        let jobs = store.list_jobs()?;
        {
            let tables = self.tables.get_mut();
            for node in nodes {
                match tables.position.get(&node.name) {
                    Some(&i) if node.state == NodeState::Down => {
                        tables.nodes[i].state = NodeState::Down;
                    }
                    Some(_) => {}
                    None => debug!(host = %node.name, "persisted node left the inventory"),
                }
            }
            for job in jobs {
                tables.next_job_id = tables.next_job_id.max(job.job_id + 1);
                if job.state == JobState::Running {
                    for host in &job.hosts {
                        match tables.position.get(host) {
                            Some(&i) => {
                                tables.nodes[i].state = NodeState::Allocated;
                                tables.nodes[i].job_id = Some(job.job_id);
                            }
                            None => warn!(job_id = job.job_id, %host, "restored job names unknown host"),
                        }
                    }
                }
                tables.jobs.insert(job.job_id, job);
            }
            let down = tables
                .nodes
                .iter()
                .filter(|n| n.state == NodeState::Down)
                .count();
            info!(
                jobs = tables.jobs.len(),
                down,
                next_job_id = tables.next_job_id,
                "cluster state restored"
            );
        }
        self.store = Some(store);
        Ok(self)
    }

    /// Change a node's state outside of allocation (drain, failure, return).
    pub async fn set_node_state(&self, host: &str, state: NodeState) -> ManagerResult<()> {
        {
            let mut tables = self.tables.write().await;
            let i = *tables
                .position
                .get(host)
                .ok_or_else(|| ManagerError::UnknownHost(host.to_string()))?;
            tables.nodes[i].state = state;
            if state == NodeState::Idle {
                tables.nodes[i].job_id = None;
            }
        }
        if state == NodeState::Idle {
            self.released.notify_waiters();
        }
        debug!(%host, ?state, "node state changed");
        Ok(())
    }

    /// Job record by allocation id.
    pub async fn job(&self, job_id: JobAllocId) -> Option<JobRecord> {
        self.tables.read().await.jobs.get(&job_id).cloned()
    }

    async fn allocate_blocking(&self, request: &AllocationRequest) -> ManagerResult<Allocation> {
        let deadline = Instant::now() + request.timeout;
        loop {
            // Registered before the check so a release in between still wakes us.
            let released = self.released.notified();
            {
                let mut tables = self.tables.write().await;
                if let Some(allocation) = tables.try_allocate(request, self.cpus_per_task)? {
                    info!(
                        alloc_id = allocation.alloc_id,
                        hosts = %allocation.hosts.to_comma_list(),
                        "allocation granted"
                    );
                    return Ok(allocation);
                }
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(target = ?request.target, "allocation timed out");
                return Err(ManagerError::Timeout);
            }
            if tokio::time::timeout(deadline - now, released).await.is_err() {
                debug!(target = ?request.target, "allocation timed out");
                return Err(ManagerError::Timeout);
            }
        }
    }

    async fn release_job(
        &self,
        alloc_id: JobAllocId,
        return_code: Option<u32>,
    ) -> ManagerResult<()> {
        {
            let mut tables = self.tables.write().await;
            let ClusterTables {
                nodes,
                position,
                jobs,
                ..
            } = &mut *tables;
            let job = jobs
                .get_mut(&alloc_id)
                .ok_or(ManagerError::UnknownJob(alloc_id))?;
            if job.state == JobState::Completed {
                return Err(ManagerError::AlreadyCompleted(alloc_id));
            }
            job.state = JobState::Completed;
            job.return_code = return_code;
            job.completed_at = Some(epoch_secs());
            for host in &job.hosts {
                if let Some(&i) = position.get(host) {
                    if nodes[i].job_id == Some(alloc_id) {
                        nodes[i].state = NodeState::Idle;
                        nodes[i].job_id = None;
                    }
                }
            }
        }
        self.released.notify_waiters();
        info!(alloc_id, ?return_code, "allocation released");
        Ok(())
    }

    async fn save(&self) -> ManagerResult<()> {
        let Some(store) = &self.store else {
            debug!("no state store configured, skipping save");
            return Ok(());
        };
        let _saving = self.saving.lock().await;
        let (nodes, jobs) = {
            let tables = self.tables.read().await;
            let jobs: Vec<JobRecord> = tables.jobs.values().cloned().collect();
            (tables.nodes.clone(), jobs)
        };
        store.save_all(&nodes, &jobs)?;
        Ok(())
    }
}

impl ClusterTables {
    /// Grant the request if the hosts are idle now. `Ok(None)` means wait.
    fn try_allocate(
        &mut self,
        request: &AllocationRequest,
        cpus_per_task: u32,
    ) -> ManagerResult<Option<Allocation>> {
        let chosen: Vec<usize> = match &request.target {
            NodeTarget::Hosts(hosts) => {
                let mut indices = Vec::with_capacity(hosts.len());
                for host in hosts.iter() {
                    let i = *self
                        .position
                        .get(host)
                        .ok_or_else(|| ManagerError::UnknownHost(host.to_string()))?;
                    indices.push(i);
                }
                if !indices.iter().all(|&i| self.nodes[i].is_idle()) {
                    return Ok(None);
                }
                indices
            }
            NodeTarget::Count(0) => match self.size_by_tasks(request.task_count, cpus_per_task)? {
                Some(indices) => indices,
                None => return Ok(None),
            },
            NodeTarget::Count(count) => {
                let count = *count as usize;
                if count > self.nodes.len() {
                    return Err(ManagerError::InsufficientNodes {
                        requested: count as u32,
                        available: self.nodes.len() as u32,
                    });
                }
                let idle: Vec<usize> = self.idle_indices().take(count).collect();
                if idle.len() < count {
                    return Ok(None);
                }
                idle
            }
        };

        let cpus: Vec<u32> = chosen.iter().map(|&i| self.nodes[i].cpus).collect();
        let task_layout = distribute_tasks(request.task_count, &cpus, cpus_per_task);
        let alloc_id = self.next_job_id;
        self.next_job_id += 1;

        let mut hosts = HostSet::new();
        for &i in &chosen {
            self.nodes[i].state = NodeState::Allocated;
            self.nodes[i].job_id = Some(alloc_id);
            hosts.push(self.nodes[i].name.clone());
        }
        self.jobs.insert(
            alloc_id,
            JobRecord {
                job_id: alloc_id,
                hosts: hosts.clone().into_vec(),
                task_layout: task_layout.clone(),
                state: JobState::Running,
                return_code: None,
                allocated_at: epoch_secs(),
                completed_at: None,
            },
        );
        Ok(Some(Allocation {
            alloc_id,
            hosts,
            task_layout,
        }))
    }

    /// Fewest idle nodes (inventory order) whose CPUs cover the task count.
    fn size_by_tasks(
        &self,
        task_count: Option<u32>,
        cpus_per_task: u32,
    ) -> ManagerResult<Option<Vec<usize>>> {
        let Some(tasks) = task_count.filter(|&t| t > 0) else {
            if self.nodes.is_empty() {
                return Err(ManagerError::InsufficientNodes {
                    requested: 1,
                    available: 0,
                });
            }
            return Ok(self.idle_indices().next().map(|i| vec![i]));
        };
        let needed = u64::from(tasks) * u64::from(cpus_per_task);
        let total: u64 = self.nodes.iter().map(|n| u64::from(n.cpus)).sum();
        if needed > total {
            return Err(ManagerError::InsufficientNodes {
                requested: tasks,
                available: (total / u64::from(cpus_per_task)) as u32,
            });
        }
        let mut chosen = Vec::new();
        let mut covered = 0u64;
        for i in self.idle_indices() {
            chosen.push(i);
            covered += u64::from(self.nodes[i].cpus);
            if covered >= needed {
                return Ok(Some(chosen));
            }
        }
        Ok(None)
    }

    fn idle_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_idle())
            .map(|(i, _)| i)
    }
}

/// Lay out tasks over allocated hosts.
///
/// Every host gets one task first, then hosts are filled in order up to
/// their slot count (`cpus / cpus_per_task`), and any remainder is dealt
/// round-robin. Without a task count each host gets its full slot count.
pub fn distribute_tasks(task_count: Option<u32>, cpus: &[u32], cpus_per_task: u32) -> Vec<u32> {
    let cpus_per_task = cpus_per_task.max(1);
    let slots: Vec<u32> = cpus.iter().map(|c| (c / cpus_per_task).max(1)).collect();
    let Some(mut remaining) = task_count else {
        return slots;
    };

    let mut layout = vec![0u32; cpus.len()];
    if layout.is_empty() {
        return layout;
    }
    for count in layout.iter_mut() {
        if remaining == 0 {
            break;
        }
        *count = 1;
        remaining -= 1;
    }
    for (count, &slot) in layout.iter_mut().zip(&slots) {
        if remaining == 0 {
            break;
        }
        let add = slot.saturating_sub(*count).min(remaining);
        *count += add;
        remaining -= add;
    }
    let mut i = 0;
    while remaining > 0 {
        layout[i % cpus.len()] += 1;
        remaining -= 1;
        i += 1;
    }
    layout
}

impl ResourceManager for InMemoryCluster {
    fn idle_nodes(&self) -> ManagerFuture<'_, NodeSnapshot> {
        Box::pin(async move {
            let tables = self.tables.read().await;
            let mut snapshot = NodeSnapshot::default();
            for node in tables.nodes.iter().filter(|n| n.is_idle()) {
                snapshot.idle.push(node.name.clone());
                snapshot.cpus.insert(node.name.clone(), node.cpus);
            }
            Ok(snapshot)
        })
    }

    fn node_totals(&self) -> ManagerFuture<'_, NodeTotals> {
        Box::pin(async move {
            let tables = self.tables.read().await;
            Ok(NodeTotals {
                nodes: tables.nodes.len() as u32,
                slots: tables.nodes.iter().map(|n| u64::from(n.cpus)).sum(),
            })
        })
    }

    fn allocate<'a>(&'a self, request: &'a AllocationRequest) -> ManagerFuture<'a, Allocation> {
        Box::pin(self.allocate_blocking(request))
    }

    fn release(
        &self,
        alloc_id: JobAllocId,
        return_code: Option<u32>,
    ) -> ManagerFuture<'_, ()> {
        Box::pin(self.release_job(alloc_id, return_code))
    }

    fn persist_state(&self) -> ManagerFuture<'_, ()> {
        Box::pin(self.save())
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}
