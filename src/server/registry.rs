//! Server-wide map of live connections.
//!
//! Every access goes through one mutex. The lock is never held across an
//! await: socket shutdown and close requests happen after the guard is gone.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::server::connection::{Connection, ConnectionHandle, ConnectionId};

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<ConnectionId, ConnectionHandle>,
    closed: bool,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    inner: Mutex<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a connection. Returns `false` once shutdown has closed registration.
    pub fn register(&self, conn: ConnectionHandle) -> bool {
        let mut inner = self.lock();
        if inner.closed {
            return false;
        }
        trace!(conn_id = conn.id(), "connection registered");
        inner.connections.insert(conn.id(), conn);
        true
    }

    /// Remove `conn` and close its socket.
    pub async fn deregister(&self, conn: &Connection) {
        {
            let mut inner = self.lock();
            inner.connections.remove(&conn.id());
        }
        conn.close_socket().await;
        trace!(conn_id = conn.id(), "connection deregistered");
    }

    pub fn lookup(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.lock().connections.get(&id).cloned()
    }

    /// Refuse further registrations and return the connections live right now
    pub fn close_registration(&self) -> Vec<ConnectionHandle> {
        let mut inner = self.lock();
        inner.closed = true;
        inner.connections.values().cloned().collect()
    }

    /// Accept registrations again after a completed stop
    pub fn reopen(&self) {
        self.lock().closed = false;
    }

    pub fn len(&self) -> usize {
        self.lock().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::transport::BoxedStream;
    use crate::utils::metrics::ServerMetrics;
    use std::sync::Arc;

    fn conn(id: ConnectionId) -> ConnectionHandle {
        let (ours, _theirs) = tokio::io::duplex(64);
        let boxed: BoxedStream = Box::new(ours);
        let (_r, w) = tokio::io::split(boxed);
        Arc::new(Connection::new(
            id,
            "127.0.0.1:1".parse().unwrap(),
            Some(w),
            None,
            Arc::new(ServerMetrics::new()),
        ))
    }

    #[tokio::test]
    async fn register_lookup_deregister() {
        let registry = ConnectionRegistry::new();
        let a = conn(1);
        assert!(registry.register(a.clone()));
        assert!(registry.register(conn(2)));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.lookup(1).unwrap().id(), 1);

        registry.deregister(&a).await;
        assert!(registry.lookup(1).is_none());
        assert!(matches!(
            a.send(b"gone").await,
            Err(crate::error::ServerError::ConnectionClosed)
        ));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn closed_registry_refuses_until_reopened() {
        let registry = ConnectionRegistry::new();
        assert!(registry.register(conn(1)));

        let live = registry.close_registration();
        assert_eq!(live.len(), 1);
        assert!(!registry.register(conn(2)));

        registry.reopen();
        assert!(registry.register(conn(3)));
    }
}
