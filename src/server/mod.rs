//! Listening socket, per-connection tasks and bounded graceful drain.

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::config::ProxyConfig;
use crate::error::{Result, ServerError};
use crate::proxy::AirPrintProxy;
use crate::transcript::TranscriptSession;

pub mod lifecycle;

pub use lifecycle::{Lifecycle, ServerState, ShutdownClaim};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct ProxyServer {
    config: ProxyConfig,
    proxy: Arc<AirPrintProxy>,
    lifecycle: Lifecycle,
    local_addr: RwLock<Option<SocketAddr>>,
    stop: Arc<Notify>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl ProxyServer {
    pub async fn new(config: ProxyConfig) -> Result<Self> {
        let proxy = AirPrintProxy::new(&config).await?;
        Ok(Self::from_parts(config, proxy))
    }

    pub fn from_parts(config: ProxyConfig, proxy: AirPrintProxy) -> Self {
        Self {
            config,
            proxy: Arc::new(proxy),
            lifecycle: Lifecycle::new(),
            local_addr: RwLock::new(None),
            stop: Arc::new(Notify::new()),
            accept_task: Mutex::new(None),
        }
    }

    pub async fn state(&self) -> ServerState {
        self.lifecycle.current()
    }

    /// Bound address once running. Reports the real port when configured
    /// with port 0.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read().await
    }

    pub fn transcript(&self) -> &Arc<TranscriptSession> {
        self.proxy.transcript()
    }

    /// Bind and start accepting. Bind failure is fatal.
    pub async fn start(&self) -> Result<SocketAddr> {
        let state = self.state().await;
        if state != ServerState::Created {
            return Err(ServerError::InvalidStateTransition(format!(
                "cannot start a server that is {state}"
            ))
            .into());
        }

        let addr = self.config.listen_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::BindFailed { addr, source })?;
        let bound = listener.local_addr()?;

        *self.local_addr.write().await = Some(bound);
        self.lifecycle.transition(ServerState::Running)?;

        let task = tokio::spawn(serve(
            listener,
            self.proxy.clone(),
            self.stop.clone(),
            self.config.shutdown_grace(),
        ));
        *self.accept_task.lock().await = Some(task);

        info!(
            "AirPrint proxy listening on {} -> {}",
            bound,
            self.proxy.backend()
        );
        Ok(bound)
    }

    /// Close the transcript, stop accepting, and give in-flight requests up
    /// to the grace period. Concurrent and repeated calls return once the
    /// server is stopped.
    pub async fn shutdown(&self) -> Result<()> {
        match self.lifecycle.begin_shutdown() {
            ShutdownClaim::NeverStarted => {
                self.close_transcript().await;
                return Ok(());
            }
            ShutdownClaim::InProgress => {
                self.lifecycle.stopped().await;
                self.close_transcript().await;
                return Ok(());
            }
            ShutdownClaim::Drain => {}
        }

        info!(
            grace_secs = self.config.shutdown_grace_secs,
            "Shutting down AirPrint proxy"
        );

        self.close_transcript().await;
        self.stop.notify_one();

        let task = self.accept_task.lock().await.take();
        let joined = match task {
            Some(task) => task.await,
            None => Ok(()),
        };

        // Stopped is reached even when the accept task failed, so waiters return.
        self.lifecycle.transition(ServerState::Stopped)?;
        joined.map_err(|e| ServerError::TaskJoin(e.to_string()))?;
        info!("AirPrint proxy stopped");
        Ok(())
    }

    async fn close_transcript(&self) {
        if let Err(e) = self.proxy.transcript().close().await {
            warn!(error = %e, "Failed to close transcript");
        }
    }
}

/// Accept loop. Returns once stopped and drained, or once the grace period
/// has elapsed and the remaining connections were abandoned.
async fn serve(
    listener: TcpListener,
    proxy: Arc<AirPrintProxy>,
    stop: Arc<Notify>,
    grace: Duration,
) {
    let graceful = GracefulShutdown::new();
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = stop.notified() => break,
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = joined {
                    debug!(error = %e, "Connection task ended abnormally");
                }
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                };

                let proxy = proxy.clone();
                let peer = peer.to_string();
                let service = service_fn(move |request: Request<Incoming>| {
                    let proxy = proxy.clone();
                    let peer = peer.clone();
                    async move { Ok::<_, Infallible>(proxy.handle(request, &peer).await) }
                });

                let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
                let conn = graceful.watch(conn);
                connections.spawn(async move {
                    if let Err(e) = conn.await {
                        debug!(error = %e, "Connection closed with error");
                    }
                });
            }
        }
    }

    drop(listener);
    info!(connections = connections.len(), "Draining in-flight connections");

    tokio::select! {
        _ = graceful.shutdown() => info!("All connections drained"),
        _ = tokio::time::sleep(grace) => {
            warn!(
                remaining = connections.len(),
                "Shutdown grace period elapsed, abandoning in-flight requests"
            );
        }
    }

    connections.abort_all();
    while connections.join_next().await.is_some() {}
}
