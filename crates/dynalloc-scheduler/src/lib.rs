//! dynalloc-scheduler — turns broker messages into allocations.
//!
//! Every inbound message passes through [`RequestHandler::handle`], which
//! routes it to one of:
//!
//! - **job requests** — `allocate jobid=.. :app=.. :app=..`, one selection
//!   and allocation per app, answered per app or all at once
//! - **single-line allocate** — `allocate N=.. node_list=.. flag=..`
//! - **release** — `slurm_jobid=.. job_return_code=..[:...]`
//! - **queries** — total and available nodes and slots
//!
//! # Architecture
//!
//! ```text
//! RequestHandler
//!   ├── command grammar (key=value tokens per command kind)
//!   └── AllocationGateway
//!       ├── Node Selector (dynalloc-placement)
//!       └── ResourceManager (dynalloc-state)
//! ```

pub mod command;
pub mod deallocate;
pub mod error;
pub mod gateway;
pub mod protocol;

pub use deallocate::{DeallocCommand, handle_release};
pub use error::{ProtocolError, ProtocolResult};
pub use gateway::AllocationGateway;
pub use protocol::{
    AppOutcome, AppRequest, JobHeader, RequestHandler, RespondFuture, Responder,
};
