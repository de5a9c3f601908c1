//! Release requests.
//!
//! `slurm_jobid=12 job_return_code=0:slurm_jobid=13` releases each job under
//! its own call and answers with one status per segment, in order, joined
//! with `:`.

use tracing::{debug, warn};

use dynalloc_state::JobAllocId;

use crate::command::{Fields, RELEASE, segments};
use crate::error::ProtocolResult;
use crate::gateway::AllocationGateway;

/// One job-completion command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeallocCommand {
    pub alloc_id: JobAllocId,
    /// `None` means a normal completion.
    pub return_code: Option<u32>,
}

impl DeallocCommand {
    pub fn parse(segment: &str) -> ProtocolResult<Self> {
        let fields = Fields::parse(segment, RELEASE);
        Ok(Self {
            alloc_id: fields.require_u32("slurm_jobid")?,
            return_code: fields.get_u32("job_return_code")?,
        })
    }
}

/// Release every job named in `message` and build the combined status line.
pub async fn handle_release(gateway: &AllocationGateway, message: &str) -> String {
    let mut statuses = Vec::new();
    for segment in segments(message) {
        let status = match DeallocCommand::parse(segment) {
            Ok(command) => match gateway.release(command.alloc_id, command.return_code).await {
                Ok(()) => format!("slurm_jobid={} deallocation successful", command.alloc_id),
                Err(e) => {
                    warn!(alloc_id = command.alloc_id, error = %e, "deallocation failed");
                    format!("slurm_jobid={} deallocation failed", command.alloc_id)
                }
            },
            Err(e) => {
                warn!(segment, error = %e, "unparsable release command");
                let fields = Fields::parse(segment, RELEASE);
                let id = fields.get("slurm_jobid").unwrap_or("unknown");
                format!("slurm_jobid={id} deallocation failed")
            }
        };
        debug!(status, "release processed");
        statuses.push(status);
    }
    statuses.join(":")
}
