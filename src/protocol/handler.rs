use std::future::Future;

use bytes::Bytes;

use crate::error::Result;
use crate::server::connection::{CloseInfo, ConnectionHandle};

/// Application callbacks driven by the server.
///
/// `on_received` runs on the connection's processing task, one frame at a
/// time in arrival order. A slow handler does not stop the socket from being
/// read; frames pile up in the bounded queue instead.
pub trait FrameHandler: Send + Sync + 'static {
    /// Called once the transport is ready (after the TLS handshake, if any).
    /// An error rejects the connection with `CloseType::Error`.
    fn on_connected(&self, conn: &ConnectionHandle) -> impl Future<Output = Result<()>> + Send {
        let _ = conn;
        async { Ok(()) }
    }

    /// Handle one frame. A non-empty response is framed and written back;
    /// an error closes the connection with `CloseType::Error`.
    fn on_received(
        &self,
        conn: &ConnectionHandle,
        payload: Bytes,
    ) -> impl Future<Output = Result<Bytes>> + Send;

    /// Called exactly once per accepted socket after it is closed.
    ///
    /// This includes sockets that never reached `on_connected`: a failed TLS
    /// handshake reports `CloseType::Error`, and a server stop during the
    /// handshake reports `CloseType::ServerStop`.
    fn on_disconnected(
        &self,
        conn: &ConnectionHandle,
        info: &CloseInfo,
    ) -> impl Future<Output = ()> + Send {
        let _ = (conn, info);
        async {}
    }
}

/// Adapts a synchronous closure into a [`FrameHandler`]
pub struct FnHandler<F> {
    on_received: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&ConnectionHandle, Bytes) -> Result<Bytes> + Send + Sync + 'static,
{
    pub fn new(on_received: F) -> Self {
        Self { on_received }
    }
}

impl<F> FrameHandler for FnHandler<F>
where
    F: Fn(&ConnectionHandle, Bytes) -> Result<Bytes> + Send + Sync + 'static,
{
    fn on_received(
        &self,
        conn: &ConnectionHandle,
        payload: Bytes,
    ) -> impl Future<Output = Result<Bytes>> + Send {
        let result = (self.on_received)(conn, payload);
        async move { result }
    }
}

/// Writes every payload straight back
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

impl FrameHandler for EchoHandler {
    async fn on_received(&self, _conn: &ConnectionHandle, payload: Bytes) -> Result<Bytes> {
        Ok(payload)
    }
}
