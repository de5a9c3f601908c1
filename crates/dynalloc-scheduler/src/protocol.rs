//! Request protocol — job requests, the single-line allocate form, queries,
//! and the top-level dispatch that routes a raw message to one of them.
//!
//! A job request is one header segment followed by app segments:
//!
//! ```text
//! allocate jobid=7 return=all timeout=20:app=0 np=4 N=2 node_list=h[1-3] flag=optional
//! ```
//!
//! Apps are served strictly in message order. With `return=all` the
//! outcomes are gathered into one response; otherwise each outcome is sent
//! the moment its app resolves. A failing app never stops its siblings.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, info, warn};

use dynalloc_core::config::SelectionConfig;
use dynalloc_core::{HostSet, ReturnMode, SelectionPolicy, layout_to_string};
use dynalloc_placement::SelectionRequest;
use dynalloc_state::Allocation;

use crate::command::{ALLOCATE, APP, Fields, JOB_HEADER, segments};
use crate::deallocate::handle_release;
use crate::error::ProtocolResult;
use crate::gateway::AllocationGateway;

pub const NULL_REQUEST: &str = "NULL request, failure";
pub const UNRECOGNIZED_REQUEST: &str = "unrecognized request, failure";
pub const QUERY_FAILURE: &str = "query failure";
pub const ALLOCATE_FAILURE: &str = "allocate failure, timeout or request too many nodes";

const TOTAL_QUERY: &str = "get total nodes and slots";
const AVAILABLE_QUERY: &str = "get available nodes and slots";

/// Boxed future returned by [`Responder::send`].
pub type RespondFuture<'a> = Pin<Box<dyn Future<Output = ProtocolResult<()>> + Send + 'a>>;

/// Where response messages go. The transport writes each one to the
/// connection; tests collect them.
pub trait Responder: Send {
    fn send<'a>(&'a mut self, message: &'a str) -> RespondFuture<'a>;
}

impl Responder for Vec<String> {
    fn send<'a>(&'a mut self, message: &'a str) -> RespondFuture<'a> {
        self.push(message.to_string());
        Box::pin(async { Ok(()) })
    }
}

// ── Parsed requests ────────────────────────────────────────────────

/// First segment of a job request. Never fails to parse: bad or missing
/// values fall back to defaults so the app segments can still be served.
#[derive(Debug, Clone, PartialEq)]
pub struct JobHeader {
    pub job_id: String,
    pub return_mode: ReturnMode,
    pub total_timeout: Duration,
}

impl JobHeader {
    pub fn parse(segment: &str, defaults: &SelectionConfig) -> Self {
        let fields = Fields::parse(segment, JOB_HEADER);
        let job_id = match fields.get("jobid") {
            Some(id) => id.to_string(),
            None => {
                warn!(segment, "job header has no jobid, replying with an empty id");
                String::new()
            }
        };
        let return_mode = fields
            .get("return")
            .map(ReturnMode::from_flag)
            .unwrap_or_default();
        let timeout_secs = match fields.get_u32("timeout") {
            Ok(Some(secs)) => u64::from(secs),
            Ok(None) => defaults.default_job_timeout_secs,
            Err(e) => {
                warn!(error = %e, "using default job timeout");
                defaults.default_job_timeout_secs
            }
        };
        Self {
            job_id,
            return_mode,
            total_timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Each app's share of the job timeout, rounded down to whole seconds.
    pub fn app_timeout(&self, app_count: usize) -> Duration {
        let share = self.total_timeout.as_secs() / app_count.max(1) as u64;
        Duration::from_secs(share)
    }
}

/// One app segment.
#[derive(Debug, Clone, PartialEq)]
pub struct AppRequest {
    pub app_id: String,
    pub task_count: Option<u32>,
    pub selection: SelectionRequest,
}

impl AppRequest {
    pub fn from_fields(
        fields: &Fields<'_>,
        default_flag: SelectionPolicy,
        timeout: Duration,
    ) -> ProtocolResult<Self> {
        let app_id = fields.require("app")?.to_string();
        let task_count = fields.get_u32("np")?;
        let requested_count = fields.get_u32("N")?.unwrap_or(0);
        let requested_range = HostSet::parse(fields.get("node_list").unwrap_or(""))?;
        let policy = fields
            .get("flag")
            .map(SelectionPolicy::from_flag)
            .unwrap_or(default_flag);
        Ok(Self {
            app_id,
            task_count,
            selection: SelectionRequest {
                requested_count,
                requested_range,
                policy,
                timeout_budget: timeout,
            },
        })
    }
}

/// What happened to one app.
#[derive(Debug, Clone, PartialEq)]
pub enum AppOutcome {
    Allocated { app_id: String, allocation: Allocation },
    Failed { app_id: String },
}

impl fmt::Display for AppOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppOutcome::Allocated { app_id, allocation } => write!(
                f,
                "app={app_id} slurm_jobid={} allocated_node_list={} tasks_per_node={}",
                allocation.alloc_id,
                allocation.hosts.to_comma_list(),
                layout_to_string(&allocation.task_layout),
            ),
            AppOutcome::Failed { app_id } => write!(f, "app={app_id} allocate_failure"),
        }
    }
}

// ── Handler ────────────────────────────────────────────────────────

/// Serves one inbound message at a time.
#[derive(Clone)]
pub struct RequestHandler {
    gateway: AllocationGateway,
    defaults: SelectionConfig,
}

impl RequestHandler {
    pub fn new(gateway: AllocationGateway, defaults: SelectionConfig) -> Self {
        Self { gateway, defaults }
    }

    /// Route a raw message and send every response it produces.
    ///
    /// Only a failing responder is returned as an error; everything the
    /// client caused is answered in text.
    pub async fn handle<R>(&self, raw: &str, out: &mut R) -> ProtocolResult<()>
    where
        R: Responder + ?Sized,
    {
        let message = raw.trim_matches(|c: char| c == '\0' || c.is_whitespace());
        debug!(request = message, "received request");

        if message.is_empty() {
            return out.send(NULL_REQUEST).await;
        }
        if let Some(reply) = self.query(message).await {
            return out.send(&reply).await;
        }

        let first = message.split_whitespace().next().unwrap_or("");
        if first.eq_ignore_ascii_case("allocate") || first.starts_with("jobid=") {
            if message.contains(':') || Fields::parse(message, JOB_HEADER).get("jobid").is_some() {
                return self.handle_job(message, out).await;
            }
            let reply = self.handle_allocate(message).await;
            return out.send(&reply).await;
        }
        if first.eq_ignore_ascii_case("deallocate") || first.starts_with("slurm_jobid=") {
            let reply = handle_release(&self.gateway, message).await;
            return out.send(&reply).await;
        }

        warn!(request = message, "unrecognized request");
        out.send(UNRECOGNIZED_REQUEST).await
    }

    /// Serve a job request: header, then each app in order.
    pub async fn handle_job<R>(&self, message: &str, out: &mut R) -> ProtocolResult<()>
    where
        R: Responder + ?Sized,
    {
        let mut parts = segments(message);
        let header = JobHeader::parse(parts.next().unwrap_or(""), &self.defaults);
        let apps: Vec<&str> = parts.collect();
        if apps.is_empty() {
            warn!(job_id = %header.job_id, "job request has no app segments");
            return out
                .send(&format!("jobid={} malformed request, failure", header.job_id))
                .await;
        }

        let app_timeout = header.app_timeout(apps.len());
        info!(
            job_id = %header.job_id,
            apps = apps.len(),
            return_mode = ?header.return_mode,
            app_timeout_secs = app_timeout.as_secs(),
            "serving job request"
        );

        let mut gathered = Vec::with_capacity(apps.len());
        for (index, segment) in apps.iter().enumerate() {
            let outcome = self.serve_app(segment, index, app_timeout).await;
            match header.return_mode {
                ReturnMode::All => gathered.push(outcome.to_string()),
                ReturnMode::PerApp => {
                    out.send(&format!("jobid={}:{outcome}", header.job_id)).await?;
                }
            }
        }

        if header.return_mode == ReturnMode::All {
            let mut response = format!("jobid={}", header.job_id);
            for outcome in &gathered {
                response.push(':');
                response.push_str(outcome);
            }
            out.send(&response).await?;
        }
        Ok(())
    }

    async fn serve_app(&self, segment: &str, index: usize, timeout: Duration) -> AppOutcome {
        let fields = Fields::parse(segment, APP);
        let app_id = fields
            .get("app")
            .map(str::to_string)
            .unwrap_or_else(|| index.to_string());

        let result = match AppRequest::from_fields(&fields, self.defaults.default_app_flag, timeout) {
            Ok(app) => self
                .gateway
                .select_and_allocate(&app.selection, app.task_count)
                .await
                .map(|allocation| (app, allocation)),
            Err(e) => Err(e),
        };

        match result {
            Ok((app, allocation)) => {
                info!(
                    app = %app.app_id,
                    alloc_id = allocation.alloc_id,
                    hosts = %allocation.hosts.to_comma_list(),
                    policy = %app.selection.policy,
                    "app allocated"
                );
                AppOutcome::Allocated {
                    app_id: app.app_id,
                    allocation,
                }
            }
            Err(e) => {
                warn!(app = %app_id, error = %e, "app allocation failed");
                AppOutcome::Failed { app_id }
            }
        }
    }

    /// The single-line form: `allocate N=2 node_list=h[1-4] flag=mandatory timeout=30`.
    pub async fn handle_allocate(&self, message: &str) -> String {
        match self.allocate_single(message).await {
            Ok(allocation) => {
                info!(
                    alloc_id = allocation.alloc_id,
                    hosts = %allocation.hosts.to_comma_list(),
                    "allocated"
                );
                format!(
                    "slurm_jobid={} allocated_node_list={}",
                    allocation.alloc_id,
                    allocation.hosts.to_comma_list()
                )
            }
            Err(e) => {
                warn!(error = %e, "allocate failed");
                ALLOCATE_FAILURE.to_string()
            }
        }
    }

    async fn allocate_single(&self, message: &str) -> ProtocolResult<Allocation> {
        let fields = Fields::parse(message, ALLOCATE);
        let timeout_secs = fields
            .get_u32("timeout")?
            .map(u64::from)
            .unwrap_or(self.defaults.default_job_timeout_secs);
        let request = SelectionRequest {
            requested_count: fields.get_u32("N")?.unwrap_or(0),
            requested_range: HostSet::parse(fields.get("node_list").unwrap_or(""))?,
            policy: fields
                .get("flag")
                .map(SelectionPolicy::from_flag)
                .unwrap_or(self.defaults.default_allocate_flag),
            timeout_budget: Duration::from_secs(timeout_secs),
        };
        self.gateway.select_and_allocate(&request, None).await
    }

    /// Answer a node/slot query, or `None` if the message is not one.
    pub async fn query(&self, message: &str) -> Option<String> {
        if message.eq_ignore_ascii_case(TOTAL_QUERY) {
            let reply = match self.gateway.node_totals().await {
                Ok(totals) => format!("total_nodes={} total_slots={}", totals.nodes, totals.slots),
                Err(e) => {
                    warn!(error = %e, "total nodes query failed");
                    QUERY_FAILURE.to_string()
                }
            };
            return Some(reply);
        }
        if message.eq_ignore_ascii_case(AVAILABLE_QUERY) {
            let reply = match self.gateway.idle_nodes().await {
                Ok(snapshot) => format!(
                    "avail_nodes={} avail_slots={}",
                    snapshot.idle_count(),
                    snapshot.idle_cpus()
                ),
                Err(e) => {
                    warn!(error = %e, "available nodes query failed");
                    QUERY_FAILURE.to_string()
                }
            };
            return Some(reply);
        }
        None
    }
}
