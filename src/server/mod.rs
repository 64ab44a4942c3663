//! # Frame Server
//!
//! Accepts stream connections, reassembles length-prefixed frames, hands them
//! to a [`FrameHandler`] through a bounded per-connection queue, and shuts down
//! without dropping in-flight work.
//!
//! ## Components
//! - **Acceptor**: one task accepting sockets and spawning connection tasks
//! - **Connection**: socket handle plus single-writer close classification
//! - **Reader**: per-connection loop turning bytes into frames
//! - **Queue**: bounded FIFO between the reader and the handler
//! - **Registry**: mutex-guarded map of live connections
//! - **Shutdown**: stop accepting, half-close reads, wait for the drain
//!
//! ## Example
//! ```rust,no_run
//! use frame_server::config::ServerConfig;
//! use frame_server::protocol::EchoHandler;
//! use frame_server::server::FrameServer;
//!
//! # async fn run() -> frame_server::error::Result<()> {
//! let mut server = FrameServer::new(ServerConfig::default(), EchoHandler);
//! let addr = server.start("127.0.0.1:0").await?;
//! println!("listening on {addr}");
//! server.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio_util::task::TaskTracker;
use tracing::instrument;

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::protocol::handler::FrameHandler;
use crate::transport::tcp::FrameListener;
use crate::utils::metrics::ServerMetrics;

pub mod acceptor;
pub mod connection;
pub mod queue;
pub mod reader;
pub mod registry;
pub mod shutdown;

pub use connection::{CloseContext, CloseInfo, CloseType, Connection, ConnectionHandle, ConnectionId};
pub use registry::ConnectionRegistry;

use acceptor::{spawn_acceptor, AcceptorHandle};

/// State shared by the acceptor and every connection task
pub(crate) struct Shared<H> {
    pub(crate) config: ServerConfig,
    pub(crate) handler: Arc<H>,
    pub(crate) registry: ConnectionRegistry,
    /// Connection and processing tasks
    pub(crate) tracker: TaskTracker,
    pub(crate) metrics: Arc<ServerMetrics>,
    next_id: AtomicU64,
}

impl<H> Shared<H> {
    pub(crate) fn next_connection_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Length-prefixed TCP (or TLS) framing server
pub struct FrameServer<H: FrameHandler> {
    shared: Arc<Shared<H>>,
    acceptor: Option<AcceptorHandle>,
}

impl<H: FrameHandler> FrameServer<H> {
    /// Build a server; zero-valued limits in `config` take their defaults
    pub fn new(config: ServerConfig, handler: H) -> Self {
        Self::with_shared_handler(config, Arc::new(handler))
    }

    /// Build a server around a handler the caller keeps a reference to
    pub fn with_shared_handler(config: ServerConfig, handler: Arc<H>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config: config.normalized(),
                handler,
                registry: ConnectionRegistry::new(),
                tracker: TaskTracker::new(),
                metrics: Arc::new(ServerMetrics::new()),
                next_id: AtomicU64::new(1),
            }),
            acceptor: None,
        }
    }

    /// Effective configuration after defaults were applied
    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.shared.handler
    }

    pub fn metrics(&self) -> Arc<ServerMetrics> {
        self.shared.metrics.clone()
    }

    /// Bind `addr` and start accepting. Bind and TLS setup errors are returned here.
    #[instrument(skip(self))]
    pub async fn start(&mut self, addr: &str) -> Result<SocketAddr> {
        if self.acceptor.is_some() {
            return Err(ServerError::AlreadyStarted);
        }

        let listener = FrameListener::bind(addr, &self.shared.config).await?;
        let local_addr = listener.local_addr()?;

        self.shared.registry.reopen();
        self.shared.tracker.reopen();
        self.acceptor = Some(spawn_acceptor(self.shared.clone(), listener, local_addr));
        Ok(local_addr)
    }

    /// Start on the address from the configuration
    pub async fn start_configured(&mut self) -> Result<SocketAddr> {
        let addr = self.shared.config.address.clone();
        self.start(&addr).await
    }

    /// Stop accepting, half-close every connection and wait for all of them to drain
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> Result<()> {
        let acceptor = self.acceptor.take().ok_or(ServerError::NotStarted)?;
        shutdown::shutdown(&self.shared, acceptor).await
    }

    /// Start, wait for `signal`, then stop
    pub async fn run_until<F>(&mut self, addr: &str, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.start(addr).await?;
        signal.await;
        self.stop().await
    }

    pub fn is_running(&self) -> bool {
        self.acceptor.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.acceptor.as_ref().map(|a| a.local_addr)
    }

    pub fn connection(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.shared.registry.lookup(id)
    }

    pub fn connection_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Frame and write `payload` to connection `id`
    pub async fn send_to(&self, id: ConnectionId, payload: &[u8]) -> Result<()> {
        let conn = self
            .shared
            .registry
            .lookup(id)
            .ok_or(ServerError::ConnectionNotFound(id))?;
        conn.send(payload).await
    }

    /// Request closure of connection `id` with the given classification
    pub fn disconnect(
        &self,
        id: ConnectionId,
        reason: &str,
        close_type: CloseType,
        extra: Option<CloseContext>,
    ) -> Result<()> {
        let conn = self
            .shared
            .registry
            .lookup(id)
            .ok_or(ServerError::ConnectionNotFound(id))?;
        conn.disconnect(reason, close_type, extra);
        Ok(())
    }
}

impl<H: FrameHandler> Drop for FrameServer<H> {
    fn drop(&mut self) {
        // Without a stop() the accept loop would outlive its owner
        if let Some(acceptor) = &self.acceptor {
            acceptor.stop.cancel();
        }
    }
}
