//! Selection policies over an idle-node snapshot.
//!
//! Iteration order matters: the requested range is walked in the order the
//! client wrote it, the system idle set in inventory order. Ties between
//! equally idle hosts are broken by that order and nothing else.

use std::time::Duration;

use tracing::debug;

use dynalloc_core::{HostSet, SelectionPolicy};
use dynalloc_state::NodeSnapshot;

use crate::error::{SelectionError, SelectionResult};

/// What one app asks the selector for.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionRequest {
    /// Number of nodes wanted. Zero with a non-empty range means "exactly
    /// the range".
    pub requested_count: u32,
    pub requested_range: HostSet,
    pub policy: SelectionPolicy,
    /// Upper bound on the mandatory wait.
    pub timeout_budget: Duration,
}

impl SelectionRequest {
    /// A request that bypasses selection and names its hosts verbatim.
    fn is_verbatim(&self) -> bool {
        self.requested_count == 0 && !self.requested_range.is_empty()
    }
}

/// Outcome of a successful selection.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// Ask the manager for exactly these hosts.
    Resolved(HostSet),
    /// Let the manager pick this many hosts from its whole pool.
    /// Zero lets the manager size the allocation from the task count.
    Unresolved(u32),
}

impl Selection {
    /// Short-circuits shared by both policies: a verbatim range, or no range
    /// at all.
    fn bypass(request: &SelectionRequest) -> Option<Selection> {
        if request.is_verbatim() {
            return Some(Selection::Resolved(request.requested_range.clone()));
        }
        if request.requested_range.is_empty() {
            return Some(Selection::Unresolved(request.requested_count));
        }
        None
    }
}

/// Best effort: prefer the requested range, backfill from any idle host.
pub fn select_optional(
    snapshot: &NodeSnapshot,
    request: &SelectionRequest,
) -> SelectionResult<Selection> {
    if let Some(selection) = Selection::bypass(request) {
        return Ok(selection);
    }

    let wanted = request.requested_count as usize;
    let idle = &snapshot.idle;
    if wanted > idle.len() {
        return Err(SelectionError::InsufficientCapacity {
            requested: request.requested_count,
            idle: idle.len() as u32,
        });
    }

    let pool = request.requested_range.intersection(idle);
    if wanted <= pool.len() {
        let hosts = pool.take(wanted);
        debug!(hosts = %hosts, "optional selection satisfied from range");
        return Ok(Selection::Resolved(hosts));
    }

    let mut hosts = pool;
    let from_range = hosts.len();
    for host in idle.iter() {
        if hosts.len() == wanted {
            break;
        }
        hosts.push(host);
    }
    debug!(
        hosts = %hosts,
        from_range,
        backfilled = hosts.len() - from_range,
        "optional selection backfilled outside range"
    );
    Ok(Selection::Resolved(hosts))
}

/// One mandatory attempt. `None` means the range is short right now.
pub fn try_select_mandatory(
    snapshot: &NodeSnapshot,
    request: &SelectionRequest,
) -> Option<Selection> {
    if let Some(selection) = Selection::bypass(request) {
        return Some(selection);
    }
    let pool = request.requested_range.intersection(&snapshot.idle);
    let wanted = request.requested_count as usize;
    (wanted <= pool.len()).then(|| Selection::Resolved(pool.take(wanted)))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn snapshot(idle: &str) -> NodeSnapshot {
        let idle = HostSet::parse(idle).unwrap();
        let cpus: HashMap<String, u32> = idle.iter().map(|h| (h.to_string(), 2)).collect();
        NodeSnapshot { idle, cpus }
    }

    fn request(count: u32, range: &str, policy: SelectionPolicy) -> SelectionRequest {
        SelectionRequest {
            requested_count: count,
            requested_range: HostSet::parse(range).unwrap(),
            policy,
            timeout_budget: Duration::from_secs(30),
        }
    }

    fn resolved(selection: Selection) -> Vec<String> {
        match selection {
            Selection::Resolved(hosts) => hosts.into_vec(),
            other => panic!("expected resolved selection, got {other:?}"),
        }
    }

    #[test]
    fn zero_count_uses_range_verbatim() {
        let snap = snapshot("h1");
        for policy in [SelectionPolicy::Optional, SelectionPolicy::Mandatory] {
            let req = request(0, "h5,h6", policy);
            assert_eq!(select_optional(&snap, &req).unwrap(), Selection::Resolved(req.requested_range.clone()));
            assert_eq!(try_select_mandatory(&snap, &req), Some(Selection::Resolved(req.requested_range.clone())));
        }
    }

    #[test]
    fn empty_range_is_left_to_the_manager() {
        let snap = snapshot("h1,h2");
        let req = request(3, "", SelectionPolicy::Optional);
        assert_eq!(select_optional(&snap, &req).unwrap(), Selection::Unresolved(3));
        let req = request(0, "", SelectionPolicy::Mandatory);
        assert_eq!(try_select_mandatory(&snap, &req), Some(Selection::Unresolved(0)));
    }

    #[test]
    fn optional_satisfied_inside_range() {
        let snap = snapshot("h1,h3,h4");
        let req = request(2, "h1,h2,h3", SelectionPolicy::Optional);
        assert_eq!(resolved(select_optional(&snap, &req).unwrap()), vec!["h1", "h3"]);
    }

    #[test]
    fn optional_follows_range_order() {
        let snap = snapshot("h1,h2,h3,h4");
        let req = request(2, "h4,h3,h2", SelectionPolicy::Optional);
        assert_eq!(resolved(select_optional(&snap, &req).unwrap()), vec!["h4", "h3"]);
    }

    #[test]
    fn optional_backfills_in_idle_order() {
        let snap = snapshot("h1,h2,h3,h4,h5");
        let req = request(4, "h4,h9", SelectionPolicy::Optional);
        let hosts = resolved(select_optional(&snap, &req).unwrap());
        assert_eq!(hosts, vec!["h4", "h1", "h2", "h3"]);
    }

    #[test]
    fn optional_fails_beyond_system_capacity() {
        let snap = snapshot("h1,h2");
        let req = request(3, "h1,h2,h3", SelectionPolicy::Optional);
        let err = select_optional(&snap, &req).unwrap_err();
        assert!(matches!(err, SelectionError::InsufficientCapacity { requested: 3, idle: 2 }));
    }

    #[test]
    fn optional_result_has_requested_size_for_every_count() {
        let snap = snapshot("n[1-8]");
        for count in 1..=8 {
            let req = request(count, "n[6-10]", SelectionPolicy::Optional);
            let hosts = resolved(select_optional(&snap, &req).unwrap());
            assert_eq!(hosts.len(), count as usize);
            let pool = ["n6", "n7", "n8"];
            let in_pool = hosts.iter().filter(|h| pool.contains(&h.as_str())).count();
            assert_eq!(in_pool, (count as usize).min(pool.len()));
        }
    }

    #[test]
    fn mandatory_only_draws_from_range() {
        let snap = snapshot("h1,h2,h3,h4");
        let req = request(2, "h3,h4,h5", SelectionPolicy::Mandatory);
        assert_eq!(resolved(try_select_mandatory(&snap, &req).unwrap()), vec!["h3", "h4"]);

        let req = request(3, "h3,h4,h5", SelectionPolicy::Mandatory);
        assert_eq!(try_select_mandatory(&snap, &req), None);
    }
}
