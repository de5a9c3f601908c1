//! dynallocd — the dynamic node-allocation broker daemon.
//!
//! Listens for allocation, release, and query commands from application
//! launchers and serves them against the configured cluster.
//!
//! # Usage
//!
//! ```text
//! dynallocd serve --config /etc/dynalloc.toml --port 6820
//! dynallocd print-config > dynalloc.toml
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use dynalloc_core::DynallocConfig;
use dynallocd::Daemon;

#[derive(Parser)]
#[command(name = "dynallocd", about = "Dynamic node-allocation broker")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve allocation requests until interrupted.
    Serve {
        /// Path to dynalloc.toml. Built-in defaults when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override `[server] port`.
        #[arg(long)]
        port: Option<u16>,

        /// Override `[server] bind`.
        #[arg(long)]
        bind: Option<String>,

        /// Serve each connection on its own task.
        #[arg(long)]
        concurrent: bool,
    },
    /// Print the default configuration as TOML.
    PrintConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Serve {
            config,
            port,
            bind,
            concurrent,
        } => {
            let mut config = match config {
                Some(path) => {
                    info!(path = ?path, "loading configuration");
                    DynallocConfig::from_file(&path)?
                }
                None => DynallocConfig::default(),
            };
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            config.server.concurrent |= concurrent;
            serve(config).await
        }
        Command::PrintConfig => {
            print!("{}", DynallocConfig::default().to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,dynallocd=debug,dynalloc=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn serve(config: DynallocConfig) -> anyhow::Result<()> {
    info!("dynalloc daemon starting");
    // Start may sit retrying a busy port.
    let daemon = tokio::select! {
        daemon = Daemon::start(&config) => daemon?,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("shutdown signal received before the listener was bound");
            return Ok(());
        }
    };
    info!(addr = %daemon.local_addr(), "accepting requests");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    daemon.shutdown().await
}
