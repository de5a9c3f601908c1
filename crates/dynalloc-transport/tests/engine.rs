//! MessageEngine over real TCP connections.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;

use dynalloc_core::config::{SelectionConfig, ServerConfig};
use dynalloc_scheduler::{AllocationGateway, RequestHandler};
use dynalloc_state::{InMemoryCluster, NodeState};
use dynalloc_transport::{MessageEngine, TransportError};

async fn start(concurrent: bool) -> (MessageEngine, Arc<InMemoryCluster>) {
    let cluster = Arc::new(InMemoryCluster::new(
        [("n1", 4), ("n2", 4), ("n3", 4), ("n4", 4)],
        1,
    ));
    let (tx, rx) = watch::channel(false);
    let selection = SelectionConfig {
        retry_interval_secs: 1,
        ..SelectionConfig::default()
    };
    let gateway = AllocationGateway::new(cluster.clone(), selection.retry_interval(), rx);
    let handler = RequestHandler::new(gateway, selection);

    let server = ServerConfig {
        bind: "127.0.0.1".to_string(),
        port: 0,
        concurrent,
        ..ServerConfig::default()
    };
    let engine = MessageEngine::start(&server, handler, tx).await.unwrap();
    (engine, cluster)
}

/// Send one request and collect every NUL-terminated response until close.
async fn exchange(addr: SocketAddr, request: &str) -> Vec<String> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    stream.write_all(b"\0").await.unwrap();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    raw.split(|&b| b == 0)
        .filter(|frame| !frame.is_empty())
        .map(|frame| String::from_utf8_lossy(frame).into_owned())
        .collect()
}

#[tokio::test]
async fn serves_sequential_requests() {
    let (engine, _cluster) = start(false).await;
    let addr = engine.local_addr();

    assert_eq!(
        exchange(addr, "get total nodes and slots").await,
        vec!["total_nodes=4 total_slots=16"]
    );
    assert_eq!(
        exchange(addr, "allocate jobid=11 return=all timeout=10:app=0 np=6 N=2 node_list=n[2-3] flag=optional").await,
        vec!["jobid=11:app=0 slurm_jobid=1 allocated_node_list=n2,n3 tasks_per_node=4,2"]
    );
    assert_eq!(
        exchange(addr, "get available nodes and slots").await,
        vec!["avail_nodes=2 avail_slots=8"]
    );
    assert_eq!(
        exchange(addr, "slurm_jobid=1 job_return_code=0").await,
        vec!["slurm_jobid=1 deallocation successful"]
    );

    engine.stop().await.unwrap();
}

#[tokio::test]
async fn per_app_responses_arrive_as_separate_frames() {
    let (engine, _cluster) = start(false).await;

    let frames = exchange(
        engine.local_addr(),
        "allocate jobid=2:app=0 N=1 node_list=n1:app=1 N=1 node_list=n4",
    )
    .await;
    assert_eq!(
        frames,
        vec![
            "jobid=2:app=0 slurm_jobid=1 allocated_node_list=n1 tasks_per_node=4",
            "jobid=2:app=1 slurm_jobid=2 allocated_node_list=n4 tasks_per_node=4",
        ]
    );

    engine.stop().await.unwrap();
}

#[tokio::test]
async fn oversized_request_is_answered() {
    let (engine, _cluster) = start(false).await;
    let big = format!("allocate {}", "x".repeat(5000));
    assert_eq!(
        exchange(engine.local_addr(), &big).await,
        vec!["request too large, failure"]
    );
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn stop_cancels_a_waiting_mandatory_request() {
    let (engine, cluster) = start(false).await;
    cluster.set_node_state("n1", NodeState::Down).await.unwrap();
    let addr = engine.local_addr();

    let waiting = tokio::spawn(async move {
        exchange(addr, "allocate jobid=3 return=all timeout=600:app=0 N=1 node_list=n1 flag=mandatory").await
    });
    tokio::time::sleep(Duration::from_millis(300)).await;

    tokio::time::timeout(Duration::from_secs(5), engine.stop())
        .await
        .expect("engine stopped promptly")
        .unwrap();
    assert_eq!(waiting.await.unwrap(), vec!["jobid=3:app=0 allocate_failure"]);
}

#[tokio::test]
async fn concurrent_mode_is_not_blocked_by_a_waiting_request() {
    let (engine, cluster) = start(true).await;
    cluster.set_node_state("n1", NodeState::Down).await.unwrap();
    let addr = engine.local_addr();

    let waiting = tokio::spawn(async move {
        exchange(addr, "allocate jobid=4 return=all timeout=600:app=0 N=1 node_list=n1 flag=mandatory").await
    });
    tokio::time::sleep(Duration::from_millis(300)).await;

    let reply = tokio::time::timeout(
        Duration::from_secs(5),
        exchange(addr, "get available nodes and slots"),
    )
    .await
    .expect("query answered while another request waits");
    assert_eq!(reply, vec!["avail_nodes=3 avail_slots=12"]);

    cluster.set_node_state("n1", NodeState::Idle).await.unwrap();
    let frames = tokio::time::timeout(Duration::from_secs(5), waiting)
        .await
        .expect("waiting request resolved")
        .unwrap();
    assert_eq!(
        frames,
        vec!["jobid=4:app=0 slurm_jobid=1 allocated_node_list=n1 tasks_per_node=4"]
    );

    engine.stop().await.unwrap();
}

fn idle_handler() -> (RequestHandler, watch::Sender<bool>) {
    let cluster = Arc::new(InMemoryCluster::new([("n1", 4)], 1));
    let (tx, rx) = watch::channel(false);
    let gateway = AllocationGateway::new(cluster, Duration::from_secs(1), rx);
    (RequestHandler::new(gateway, SelectionConfig::default()), tx)
}

fn on_port(port: u16, bind_retry_secs: u64) -> ServerConfig {
    ServerConfig {
        bind: "127.0.0.1".to_string(),
        port,
        bind_retry_secs,
        ..ServerConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn busy_port_is_retried_until_free() {
    let blocker = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = blocker.local_addr().unwrap().port();
    let releaser = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(2500)).await;
        drop(blocker);
    });

    let (handler, tx) = idle_handler();
    let started = tokio::time::Instant::now();
    let engine = MessageEngine::start(&on_port(port, 1), handler, tx)
        .await
        .unwrap();
    assert_eq!(engine.local_addr().port(), port);
    assert!(started.elapsed() >= Duration::from_secs(3));

    releaser.await.unwrap();
    engine.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn busy_port_keeps_waiting_until_abandoned() {
    let blocker = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = blocker.local_addr().unwrap().port();

    let (handler, tx) = idle_handler();
    let waited = tokio::time::timeout(
        Duration::from_secs(600),
        MessageEngine::start(&on_port(port, 60), handler, tx),
    )
    .await;
    assert!(waited.is_err());
    drop(blocker);
}

#[tokio::test]
async fn busy_port_without_retry_fails_at_once() {
    let blocker = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = blocker.local_addr().unwrap().port();

    let (handler, tx) = idle_handler();
    let err = match MessageEngine::start(&on_port(port, 0), handler, tx).await {
        Ok(_) => panic!("bind of a busy port succeeded"),
        Err(e) => e,
    };
    assert!(matches!(err, TransportError::Bind { .. }));
    drop(blocker);
}

