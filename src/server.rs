//! TCP listener with load shedding.
//!
//! Accepts connections, asks the admission controller whether the new
//! connection may run, and either spawns a session task for it or answers
//! with the fixed 503 response and closes it.

use crate::admission::{Decision, WorkerTracker};
use crate::config::Config;
use crate::handlers::{RandomSleep, Workload};
use crate::protocol::Response;
use crate::router::Router;
use crate::session::{self, SessionContext, SessionError};
use crate::stats::Stats;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Pending connection queue length handed to `listen`
const BACKLOG: i32 = 1024;

/// Server startup errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to resolve {addr}: {source}")]
    Resolve { addr: String, source: io::Error },
    #[error("Failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },
}

/// Triggers server shutdown from outside the accept loop
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }
}

/// Server instance
pub struct Server {
    config: Config,
    listener: TcpListener,
    workers: WorkerTracker,
    ctx: SessionContext,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl Server {
    /// Bind the configured address with the random-sleep workload
    pub async fn bind(config: Config) -> Result<Self, ServerError> {
        let workload = RandomSleep::new(config.min_seconds, config.max_seconds);
        Self::bind_with_workload(config, Arc::new(workload)).await
    }

    /// Bind the configured address, serving `/v1/api` with `workload`
    pub async fn bind_with_workload(
        config: Config,
        workload: Arc<dyn Workload>,
    ) -> Result<Self, ServerError> {
        let addr = format!("{}:{}", config.host, config.port);
        let resolved = tokio::net::lookup_host(addr.as_str())
            .await
            .and_then(|mut addrs| {
                addrs.next().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::NotFound, "no addresses resolved")
                })
            })
            .map_err(|source| ServerError::Resolve {
                addr: addr.clone(),
                source,
            })?;

        let listener = bind_listener(resolved).map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;

        let (tx, rx) = watch::channel(false);
        let ctx = SessionContext {
            router: Arc::new(Router::new(workload)),
            stats: Stats::new(),
            timeout: config.timeout,
            buffer_size: config.buffer_size,
            shutdown: rx,
        };

        Ok(Server {
            config,
            listener,
            workers: WorkerTracker::new(),
            ctx,
            shutdown_tx: Arc::new(tx),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown_tx),
        }
    }

    /// Get a reference to the stats for testing
    #[cfg(test)]
    pub fn stats(&self) -> Arc<Stats> {
        Arc::clone(&self.ctx.stats)
    }

    /// Get a handle on the live worker count for testing
    #[cfg(test)]
    pub fn workers(&self) -> WorkerTracker {
        self.workers.clone()
    }

    /// Accept connections until shutdown
    pub async fn run(self) -> Result<(), ServerError> {
        // The accept loop counts as a live worker.
        let _listener_slot = self.workers.register();
        let mut shutdown = self.ctx.shutdown.clone();

        info!(
            max_workers = self.config.max_workers,
            strict_admission = self.config.strict_admission,
            "Accepting connections"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                _ = shutdown.changed() => break,
            };

            match accepted {
                Ok((stream, peer)) => self.admit(stream, peer).await,
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }

        info!("Server stopped accepting connections");
        Ok(())
    }

    async fn admit(&self, stream: TcpStream, peer: SocketAddr) {
        if self.workers.decide(self.config.max_workers) == Decision::Reject {
            debug!(peer = %peer, active = self.workers.active(), "Connection denied");
            if let Err(e) = reject(stream, self.config.timeout).await {
                debug!(peer = %peer, error = %e, "Failed to send overload response");
            }
            return;
        }

        debug!(peer = %peer, "Connection admitted");

        let early_slot = self
            .config
            .strict_admission
            .then(|| self.workers.register());
        let workers = self.workers.clone();
        let ctx = self.ctx.clone();

        tokio::spawn(async move {
            let _slot = early_slot.unwrap_or_else(|| workers.register());
            match session::serve(stream, peer, ctx).await {
                Ok(()) => debug!(peer = %peer, "Session finished"),
                Err(SessionError::Timeout(idle)) => {
                    debug!(peer = %peer, ?idle, "Session timed out")
                }
                Err(e) => warn!(peer = %peer, error = %e, "Session failed"),
            }
        });
    }
}

/// Write the overload response and close the connection
async fn reject(mut stream: TcpStream, limit: Duration) -> io::Result<()> {
    let response = Response::overloaded().to_bytes();
    timeout(limit, async {
        stream.write_all(&response).await?;
        stream.shutdown().await
    })
    .await
    .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "overload response timed out"))?
}

/// Create a listening socket with `SO_REUSEADDR` set
fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    TcpListener::from_std(socket.into())
}
