//! Request handling against the in-memory cluster, end to end.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use dynalloc_core::config::SelectionConfig;
use dynalloc_scheduler::{
    AllocationGateway, ProtocolResult, RequestHandler, RespondFuture, Responder,
};
use dynalloc_state::{InMemoryCluster, NodeState, ResourceManager};

struct Harness {
    cluster: Arc<InMemoryCluster>,
    handler: RequestHandler,
    _shutdown: watch::Sender<bool>,
}

fn harness(nodes: &[(&str, u32)]) -> Harness {
    let cluster = Arc::new(InMemoryCluster::new(nodes.iter().copied(), 1));
    let (tx, rx) = watch::channel(false);
    let defaults = SelectionConfig::default();
    let gateway = AllocationGateway::new(cluster.clone(), defaults.retry_interval(), rx);
    Harness {
        cluster,
        handler: RequestHandler::new(gateway, defaults),
        _shutdown: tx,
    }
}

fn four_nodes() -> Harness {
    harness(&[("h1", 2), ("h2", 2), ("h3", 2), ("h4", 2)])
}

async fn request(h: &Harness, message: &str) -> Vec<String> {
    let mut out = Vec::new();
    h.handler.handle(message, &mut out).await.unwrap();
    out
}

/// Records how many hosts were idle when each message went out.
struct IdleAtSend {
    cluster: Arc<InMemoryCluster>,
    sent: Vec<(String, usize)>,
}

impl Responder for IdleAtSend {
    fn send<'a>(&'a mut self, message: &'a str) -> RespondFuture<'a> {
        Box::pin(async move {
            let idle = self.cluster.idle_nodes().await.unwrap().idle_count();
            self.sent.push((message.to_string(), idle));
            ProtocolResult::Ok(())
        })
    }
}

#[tokio::test]
async fn optional_job_request_end_to_end() {
    let h = four_nodes();
    h.cluster.set_node_state("h2", NodeState::Down).await.unwrap();

    let out = request(
        &h,
        "allocate jobid=7 return=all timeout=20:app=0 np=4 N=2 node_list=h1,h2,h3 flag=optional",
    )
    .await;

    assert_eq!(
        out,
        vec!["jobid=7:app=0 slurm_jobid=1 allocated_node_list=h1,h3 tasks_per_node=2(x2)"]
    );
}

#[tokio::test]
async fn return_all_sends_one_message_in_input_order() {
    let h = four_nodes();
    let out = request(
        &h,
        "allocate jobid=3 return=all:app=a N=1 node_list=h4 flag=mandatory:app=b N=9 flag=optional",
    )
    .await;

    assert_eq!(out.len(), 1);
    assert_eq!(
        out[0],
        "jobid=3:app=a slurm_jobid=1 allocated_node_list=h4 tasks_per_node=2:app=b allocate_failure"
    );
}

#[tokio::test]
async fn per_app_sends_each_outcome_as_it_resolves() {
    let h = four_nodes();
    let mut out = IdleAtSend {
        cluster: h.cluster.clone(),
        sent: Vec::new(),
    };
    h.handler
        .handle(
            "allocate jobid=5 return=individual:app=0 N=1 node_list=h1:app=1 N=2 node_list=h2,h3",
            &mut out,
        )
        .await
        .unwrap();

    assert_eq!(out.sent.len(), 2);
    assert_eq!(
        out.sent[0],
        ("jobid=5:app=0 slurm_jobid=1 allocated_node_list=h1 tasks_per_node=2".to_string(), 3)
    );
    assert_eq!(
        out.sent[1],
        ("jobid=5:app=1 slurm_jobid=2 allocated_node_list=h2,h3 tasks_per_node=2(x2)".to_string(), 1)
    );
}

#[tokio::test]
async fn failing_app_does_not_stop_siblings() {
    let h = four_nodes();
    let out = request(
        &h,
        "allocate jobid=1:app=0 N=2 node_list=h[1-2] flag=optional:np=2:app=2 node_list=h[3-4]",
    )
    .await;

    assert_eq!(
        out,
        vec![
            "jobid=1:app=0 slurm_jobid=1 allocated_node_list=h1,h2 tasks_per_node=2(x2)",
            "jobid=1:app=1 allocate_failure",
            "jobid=1:app=2 slurm_jobid=2 allocated_node_list=h3,h4 tasks_per_node=2(x2)",
        ]
    );
}

#[tokio::test]
async fn app_without_selection_is_sized_from_tasks() {
    let h = four_nodes();
    let out = request(&h, "allocate jobid=2 return=all:app=0 np=3").await;
    assert_eq!(
        out,
        vec!["jobid=2:app=0 slurm_jobid=1 allocated_node_list=h1,h2 tasks_per_node=2,1"]
    );
}

#[tokio::test(start_paused = true)]
async fn mandatory_app_waits_for_release() {
    let h = four_nodes();
    let first = request(&h, "allocate jobid=1 return=all:app=0 N=2 node_list=h[1-2]").await;
    assert!(first[0].contains("slurm_jobid=1"));

    let releaser = {
        let cluster = h.cluster.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(8)).await;
            cluster.release(1, None).await.unwrap();
        })
    };

    let start = tokio::time::Instant::now();
    let out = request(
        &h,
        "allocate jobid=2 return=all timeout=30:app=0 N=1 node_list=h[1-2] flag=mandatory",
    )
    .await;

    assert_eq!(
        out,
        vec!["jobid=2:app=0 slurm_jobid=2 allocated_node_list=h1 tasks_per_node=2"]
    );
    assert_eq!(start.elapsed(), Duration::from_secs(10));
    releaser.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn timeout_is_split_across_apps() {
    let h = four_nodes();
    h.cluster.set_node_state("h1", NodeState::Down).await.unwrap();

    // 25s over two apps leaves 12s each: one retry interval, then give up.
    let start = tokio::time::Instant::now();
    let out = request(
        &h,
        "allocate jobid=4 return=all timeout=25:app=0 N=1 node_list=h1:app=1 N=1 node_list=h1",
    )
    .await;

    assert_eq!(out, vec!["jobid=4:app=0 allocate_failure:app=1 allocate_failure"]);
    assert_eq!(start.elapsed(), Duration::from_secs(20));
}

#[tokio::test]
async fn job_without_apps_is_malformed() {
    let h = four_nodes();
    let out = request(&h, "allocate jobid=8 return=all:").await;
    assert_eq!(out, vec!["jobid=8 malformed request, failure"]);
}

#[tokio::test]
async fn deallocation_reports_each_job_in_order() {
    let h = four_nodes();
    request(&h, "allocate jobid=1 return=all:app=0 N=1:app=1 N=1").await;

    let out = request(
        &h,
        "slurm_jobid=1 job_return_code=0:slurm_jobid=99:slurm_jobid=2 job_return_code=3",
    )
    .await;

    assert_eq!(
        out,
        vec![
            "slurm_jobid=1 deallocation successful:slurm_jobid=99 deallocation failed:slurm_jobid=2 deallocation successful"
        ]
    );
    assert_eq!(h.cluster.idle_nodes().await.unwrap().idle_count(), 4);
}

#[tokio::test]
async fn single_line_allocate() {
    let h = four_nodes();
    let out = request(&h, "allocate N=2 node_list=h[3-4]").await;
    assert_eq!(out, vec!["slurm_jobid=1 allocated_node_list=h3,h4"]);

    let out = request(&h, "allocate N=5 node_list=h1").await;
    assert_eq!(out, vec!["allocate failure, timeout or request too many nodes"]);
}

#[tokio::test]
async fn queries_report_totals_and_idle() {
    let h = harness(&[("n1", 4), ("n2", 4), ("n3", 8)]);
    request(&h, "allocate N=1 node_list=n3").await;

    assert_eq!(
        request(&h, "GET TOTAL NODES AND SLOTS").await,
        vec!["total_nodes=3 total_slots=16"]
    );
    assert_eq!(
        request(&h, "get available nodes and slots").await,
        vec!["avail_nodes=2 avail_slots=8"]
    );
}

#[tokio::test]
async fn empty_and_unknown_messages() {
    let h = four_nodes();
    assert_eq!(request(&h, "\0\0").await, vec!["NULL request, failure"]);
    assert_eq!(request(&h, "   ").await, vec!["NULL request, failure"]);
    assert_eq!(
        request(&h, "reboot everything").await,
        vec!["unrecognized request, failure"]
    );
}
