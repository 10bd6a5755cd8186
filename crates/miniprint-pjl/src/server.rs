// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Raw TCP listener impersonating a JetDirect port (default 9100).
//
// The accept loop runs in a single Tokio task and takes connections one at a
// time.  Every accepted connection gets its own `Session` in its own task, so
// a slow, hostile or crashing client only ever affects itself.  Accept
// failures are logged and the loop keeps going.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use miniprint_core::config::ServerConfig;
use miniprint_core::error::{MiniprintError, Result};
use miniprint_core::types::ServerStatus;

use crate::events::EventSink;
use crate::session::{Session, SessionContext};

/// Pause after a failed `accept` (e.g. out of file descriptors).
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Counts one live session; decrements when dropped, even on unwind.
struct ConnectionGuard(Arc<AtomicU32>);

impl ConnectionGuard {
    fn new(connections: &Arc<AtomicU32>) -> Self {
        connections.fetch_add(1, Ordering::Relaxed);
        Self(Arc::clone(connections))
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Embedded PJL honeypot listener.
pub struct PjlServer {
    /// Address configuration (host and port).
    config: ServerConfig,
    /// Shared by every session spawned from this listener.
    context: Arc<SessionContext>,
    /// Current lifecycle state of the server.
    status: ServerStatus,
    /// Address actually bound, once running.
    local_addr: Option<SocketAddr>,
    /// Notification handle used to signal a graceful shutdown.
    shutdown_signal: Arc<Notify>,
    /// Handle to the Tokio task running the accept loop.
    task_handle: Option<JoinHandle<()>>,
    /// Counter of currently open sessions.
    active_connections: Arc<AtomicU32>,
}

impl PjlServer {
    /// Create a listener with the standard verb set.  Call [`start`] to bind.
    ///
    /// [`start`]: PjlServer::start
    pub fn new(config: ServerConfig, sink: Arc<dyn EventSink>) -> Self {
        let context = SessionContext::new(&config, sink);
        Self::with_context(config, context)
    }

    /// Create a listener with a custom session context (verb table, timeout).
    pub fn with_context(config: ServerConfig, context: SessionContext) -> Self {
        Self {
            config,
            context: Arc::new(context),
            status: ServerStatus::Stopped,
            local_addr: None,
            shutdown_signal: Arc::new(Notify::new()),
            task_handle: None,
            active_connections: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn status(&self) -> ServerStatus {
        self.status
    }

    /// The bound address, available after [`start`](PjlServer::start).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Number of sessions currently running.
    pub fn active_connections(&self) -> u32 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Bind the listener and spawn the accept loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the address cannot
    /// be bound.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        if let (ServerStatus::Running, Some(addr)) = (self.status, self.local_addr) {
            debug!(%addr, "PJL listener already running");
            return Ok(addr);
        }

        self.config.validate()?;
        self.status = ServerStatus::Starting;

        let bind_addr = self.config.bind_addr();
        let listener = match TcpListener::bind(&bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.status = ServerStatus::Stopped;
                return Err(MiniprintError::BindAddress {
                    addr: bind_addr,
                    reason: e.to_string(),
                });
            }
        };
        let local_addr = listener
            .local_addr()
            .map_err(|e| MiniprintError::Listener(format!("local_addr: {e}")))?;

        info!(addr = %local_addr, "PJL listener started");

        let shutdown = Arc::clone(&self.shutdown_signal);
        let connections = Arc::clone(&self.active_connections);
        let context = Arc::clone(&self.context);

        let handle = tokio::spawn(async move {
            Self::accept_loop(listener, shutdown, connections, context).await;
        });

        self.task_handle = Some(handle);
        self.local_addr = Some(local_addr);
        self.status = ServerStatus::Running;
        Ok(local_addr)
    }

    /// Stop accepting connections.
    ///
    /// Sessions already running are left to finish on their own (idle timeout
    /// or client close).
    pub async fn stop(&mut self) -> Result<()> {
        if self.status != ServerStatus::Running {
            return Ok(());
        }

        info!(addr = ?self.local_addr, "stopping PJL listener");
        self.shutdown_signal.notify_one();

        if let Some(handle) = self.task_handle.take() {
            handle
                .await
                .map_err(|e| MiniprintError::Listener(format!("task join: {e}")))?;
        }

        self.status = ServerStatus::Stopped;
        self.local_addr = None;
        info!("PJL listener stopped");
        Ok(())
    }

    async fn accept_loop(
        listener: TcpListener,
        shutdown: Arc<Notify>,
        connections: Arc<AtomicU32>,
        context: Arc<SessionContext>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    debug!("accept loop received shutdown signal");
                    break;
                }

                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => {
                            if let Err(e) = stream.set_nodelay(true) {
                                warn!(%peer, error = %e, "failed to set TCP_NODELAY");
                            }
                            let session = Session::new(stream, peer, &context);
                            let guard = ConnectionGuard::new(&connections);
                            tokio::spawn(async move {
                                let _guard = guard;
                                session.run().await;
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                            tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                        }
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
