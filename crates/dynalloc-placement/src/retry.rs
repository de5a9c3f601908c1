//! The mandatory wait.
//!
//! Each attempt takes a fresh snapshot from the manager; nothing is cached
//! across a sleep. The wait sleeps only while the remaining budget still
//! covers a whole interval and gives up as soon as the shutdown signal
//! flips, so a stopping daemon never sits out a long budget.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use dynalloc_core::SelectionPolicy;
use dynalloc_state::ResourceManager;

use crate::error::{SelectionError, SelectionResult};
use crate::selector::{Selection, SelectionRequest, select_optional, try_select_mandatory};

/// Run the request's policy against the manager's current idle set.
pub async fn select<M>(
    manager: &M,
    request: &SelectionRequest,
    retry_interval: Duration,
    shutdown: watch::Receiver<bool>,
) -> SelectionResult<Selection>
where
    M: ResourceManager + ?Sized,
{
    match request.policy {
        SelectionPolicy::Optional => {
            let snapshot = manager.idle_nodes().await?;
            select_optional(&snapshot, request)
        }
        SelectionPolicy::Mandatory => {
            select_mandatory(manager, request, retry_interval, shutdown).await
        }
    }
}

/// Wait until the requested range holds enough idle hosts, or the budget
/// runs out.
pub async fn select_mandatory<M>(
    manager: &M,
    request: &SelectionRequest,
    retry_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> SelectionResult<Selection>
where
    M: ResourceManager + ?Sized,
{
    let mut remaining = request.timeout_budget;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let snapshot = manager.idle_nodes().await?;
        if let Some(selection) = try_select_mandatory(&snapshot, request) {
            if attempt > 1 {
                info!(attempt, "mandatory selection satisfied after waiting");
            }
            return Ok(selection);
        }

        let available = request.requested_range.intersection(&snapshot.idle).len() as u32;
        if retry_interval.is_zero() || remaining < retry_interval {
            info!(
                requested = request.requested_count,
                available,
                attempt,
                "mandatory selection timed out"
            );
            return Err(SelectionError::TimeoutExhausted {
                requested: request.requested_count,
                available,
            });
        }

        debug!(
            requested = request.requested_count,
            available,
            attempt,
            remaining_secs = remaining.as_secs(),
            "range short of idle nodes, retrying"
        );
        tokio::select! {
            _ = tokio::time::sleep(retry_interval) => {}
            stopped = async { shutdown.wait_for(|stop| *stop).await.is_ok() } => {
                if stopped {
                    debug!(attempt, "mandatory selection cancelled");
                    return Err(SelectionError::Cancelled);
                }
                // Sender gone: nobody can stop us any more, just sleep.
                tokio::time::sleep(retry_interval).await;
            }
        }
        remaining -= retry_interval;
    }
}
