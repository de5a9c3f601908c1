//! dynallocd — assembles the broker from its configuration.
//!
//! ```text
//! DynallocConfig
//!   ├── [cluster]   → InMemoryCluster (+ StateStore when state_path is set)
//!   ├── [selection] → AllocationGateway + RequestHandler
//!   └── [server]    → MessageEngine
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};

use dynalloc_core::DynallocConfig;
use dynalloc_scheduler::{AllocationGateway, RequestHandler};
use dynalloc_state::{InMemoryCluster, ResourceManager};
use dynalloc_transport::MessageEngine;

/// A running broker.
pub struct Daemon {
    engine: MessageEngine,
    cluster: Arc<InMemoryCluster>,
}

impl Daemon {
    /// Build the cluster, bind the listener, and start serving.
    pub async fn start(config: &DynallocConfig) -> anyhow::Result<Self> {
        let cluster = Arc::new(
            InMemoryCluster::from_config(&config.cluster)
                .context("failed to build cluster inventory")?,
        );
        let totals = cluster.node_totals().await?;
        if totals.nodes == 0 {
            warn!("cluster inventory is empty, every allocation will fail");
        }
        info!(
            nodes = totals.nodes,
            slots = totals.slots,
            state_path = ?config.cluster.state_path,
            "cluster inventory loaded"
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let gateway = AllocationGateway::new(
            cluster.clone(),
            config.selection.retry_interval(),
            shutdown_rx,
        );
        let handler = RequestHandler::new(gateway, config.selection.clone());
        let engine = MessageEngine::start(&config.server, handler, shutdown_tx)
            .await
            .context("failed to start listener")?;

        Ok(Self { engine, cluster })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.engine.local_addr()
    }

    pub fn cluster(&self) -> &Arc<InMemoryCluster> {
        &self.cluster
    }

    /// Stop serving, wait for in-flight requests, and save state once more.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        self.engine.stop().await?;
        self.cluster
            .persist_state()
            .await
            .context("failed to save state on shutdown")?;
        info!("dynalloc daemon stopped");
        Ok(())
    }
}
