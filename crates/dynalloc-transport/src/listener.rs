//! MessageEngine — the accept loop and its lifecycle.
//!
//! By default connections are served strictly one at a time: a request is
//! read, handled, answered, and the connection closed before the next
//! accept. With `concurrent` set, each connection gets its own task.
//!
//! Stopping flips a watch channel. The accept loop observes it at once, and
//! so does any mandatory selection waiting inside a request (the gateway
//! holds a receiver from the same channel).

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use dynalloc_core::config::ServerConfig;
use dynalloc_scheduler::{ProtocolError, RequestHandler, RespondFuture, Responder};

use crate::error::{TransportError, TransportResult};
use crate::wire::{WireConfig, discard_pending, read_message, write_message};

pub const REQUEST_TOO_LARGE: &str = "request too large, failure";

/// A running listener.
pub struct MessageEngine {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MessageEngine {
    /// Bind `config.listen_addr()` and start serving on a background task.
    ///
    /// A busy address is retried every `bind_retry_secs` until it binds;
    /// cancel the returned future to give up.
    ///
    /// `shutdown` is the sender side of the channel the handler's gateway
    /// was built with, so [`request_stop`](Self::request_stop) also cancels
    /// in-flight mandatory waits.
    pub async fn start(
        config: &ServerConfig,
        handler: RequestHandler,
        shutdown: watch::Sender<bool>,
    ) -> TransportResult<Self> {
        let listener = bind_with_retry(config).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, concurrent = config.concurrent, "dynalloc listener started");

        let server = Server {
            listener,
            handler,
            wire: WireConfig::from(config),
            concurrent: config.concurrent,
        };
        let task = tokio::spawn(server.run(shutdown.subscribe()));
        Ok(Self {
            local_addr,
            shutdown,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Ask the accept loop and any waiting selections to stop.
    pub fn request_stop(&self) {
        info!("dynalloc listener stop requested");
        self.shutdown.send_replace(true);
    }

    /// Wait for the accept loop, and every connection it still serves, to
    /// finish.
    pub async fn await_stopped(self) -> TransportResult<()> {
        self.task
            .await
            .map_err(|e| TransportError::Task(e.to_string()))?;
        info!("dynalloc listener stopped");
        Ok(())
    }

    /// [`request_stop`](Self::request_stop) followed by
    /// [`await_stopped`](Self::await_stopped).
    pub async fn stop(self) -> TransportResult<()> {
        self.request_stop();
        self.await_stopped().await
    }
}

/// Bind, retrying a busy address on `bind_retry_secs`. Dropping the future
/// abandons the retry loop.
async fn bind_with_retry(config: &ServerConfig) -> TransportResult<TcpListener> {
    let addr = config.listen_addr();
    let retry = config.bind_retry();
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match TcpListener::bind(&addr).await {
            Ok(listener) => {
                if attempts > 1 {
                    info!(%addr, attempts, "bound after retrying");
                }
                return Ok(listener);
            }
            Err(source) if retry.is_zero() => return Err(TransportError::Bind { addr, source }),
            Err(e) => {
                warn!(%addr, error = %e, retry_secs = retry.as_secs(), "bind failed, retrying");
                tokio::time::sleep(retry).await;
            }
        }
    }
}

struct Server {
    listener: TcpListener,
    handler: RequestHandler,
    wire: WireConfig,
    concurrent: bool,
}

impl Server {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut in_flight = JoinSet::new();
        loop {
            tokio::select! {
                biased;
                _ = async { shutdown.wait_for(|stop| *stop).await.is_ok() } => {
                    debug!("accept loop observed shutdown");
                    break;
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            error!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    if self.concurrent {
                        let handler = self.handler.clone();
                        let wire = self.wire;
                        in_flight.spawn(serve_connection(stream, peer, handler, wire));
                    } else {
                        serve_connection(stream, peer, self.handler.clone(), self.wire).await;
                    }
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "connection task failed");
                    }
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "connection task failed");
            }
        }
    }
}

/// Read one request, answer it, close.
async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    handler: RequestHandler,
    wire: WireConfig,
) {
    debug!(%peer, "connection accepted");
    if let Err(e) = exchange(&mut stream, &handler, &wire).await {
        warn!(%peer, error = %e, "connection aborted");
    }
}

async fn exchange<S>(stream: &mut S, handler: &RequestHandler, wire: &WireConfig) -> TransportResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let request = match read_message(stream, wire).await {
        Ok(bytes) => bytes,
        Err(TransportError::MessageTooLarge { limit }) => {
            let discarded = discard_pending(stream, wire).await;
            warn!(limit, discarded, "rejecting oversized request");
            return write_message(stream, REQUEST_TOO_LARGE, wire).await;
        }
        Err(e) => return Err(e),
    };
    let request = String::from_utf8_lossy(&request);

    let mut responder = StreamResponder { stream, wire };
    handler.handle(&request, &mut responder).await?;
    Ok(())
}

/// Writes each response to the connection as its own NUL-terminated frame.
struct StreamResponder<'s, S> {
    stream: &'s mut S,
    wire: &'s WireConfig,
}

impl<S> Responder for StreamResponder<'_, S>
where
    S: AsyncWrite + Unpin + Send,
{
    fn send<'a>(&'a mut self, message: &'a str) -> RespondFuture<'a> {
        Box::pin(async move {
            debug!(response = message, "sending response");
            write_message(self.stream, message, self.wire)
                .await
                .map_err(|e| ProtocolError::Respond(e.to_string()))
        })
    }
}
