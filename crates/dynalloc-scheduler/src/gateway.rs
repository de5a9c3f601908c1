//! AllocationGateway — the only path from the protocol into the manager.
//!
//! Selection results become allocation requests here, and completion
//! commands become releases. A successful release schedules a state save on
//! a detached task; the response never waits for it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use dynalloc_placement::{Selection, SelectionRequest, SelectionResult};
use dynalloc_state::{
    Allocation, AllocationRequest, JobAllocId, ManagerResult, NodeSnapshot, NodeTarget,
    NodeTotals, ResourceManager,
};

use crate::error::ProtocolResult;

#[derive(Clone)]
pub struct AllocationGateway {
    manager: Arc<dyn ResourceManager>,
    retry_interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl AllocationGateway {
    pub fn new(
        manager: Arc<dyn ResourceManager>,
        retry_interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            manager,
            retry_interval,
            shutdown,
        }
    }

    /// Run the selector, then ask the manager for the result with whatever
    /// budget the selection left over.
    pub async fn select_and_allocate(
        &self,
        request: &SelectionRequest,
        task_count: Option<u32>,
    ) -> ProtocolResult<Allocation> {
        let started = Instant::now();
        let selection = self.select(request).await?;
        let remaining = request.timeout_budget.saturating_sub(started.elapsed());
        Ok(self
            .resolve_and_request(selection, task_count, remaining)
            .await?)
    }

    pub async fn select(&self, request: &SelectionRequest) -> SelectionResult<Selection> {
        dynalloc_placement::select(
            self.manager.as_ref(),
            request,
            self.retry_interval,
            self.shutdown.clone(),
        )
        .await
    }

    /// Hand a selection to the manager's blocking allocation primitive.
    pub async fn resolve_and_request(
        &self,
        selection: Selection,
        task_count: Option<u32>,
        timeout: Duration,
    ) -> ManagerResult<Allocation> {
        let target = match selection {
            Selection::Resolved(hosts) => NodeTarget::Hosts(hosts),
            Selection::Unresolved(count) => NodeTarget::Count(count),
        };
        debug!(?target, ?task_count, timeout_secs = timeout.as_secs(), "requesting allocation");
        let request = AllocationRequest {
            target,
            task_count,
            timeout,
        };
        self.manager.allocate(&request).await
    }

    /// Complete an allocation. On success a state save runs in the background.
    pub async fn release(
        &self,
        alloc_id: JobAllocId,
        return_code: Option<u32>,
    ) -> ManagerResult<()> {
        self.manager.release(alloc_id, return_code).await?;
        info!(alloc_id, ?return_code, "deallocated");

        let manager = Arc::clone(&self.manager);
        tokio::spawn(async move {
            if let Err(e) = manager.persist_state().await {
                warn!(error = %e, "failed to save state after release");
            }
        });
        Ok(())
    }

    pub async fn node_totals(&self) -> ManagerResult<NodeTotals> {
        self.manager.node_totals().await
    }

    pub async fn idle_nodes(&self) -> ManagerResult<NodeSnapshot> {
        self.manager.idle_nodes().await
    }
}
