//! Per-socket connection state.
//!
//! A [`Connection`] owns the write half of its socket, the token that stops its
//! reader, and the close classification. The classification is written once:
//! the first of {reader termination, handler failure, write failure, external
//! disconnect, server stop} decides the [`CloseType`] and reason, and every
//! later trigger can only append text to the reason.

use std::any::Any;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, trace};

use crate::core::codec::encode_frame;
use crate::error::{Result, ServerError};
use crate::transport::BoxedStream;
use crate::utils::metrics::ServerMetrics;

/// Server-unique connection identifier
pub type ConnectionId = u64;

/// Shared handle passed to handlers and returned by lookups
pub type ConnectionHandle = Arc<Connection>;

/// Opaque extra context attached to a close
pub type CloseContext = Arc<dyn Any + Send + Sync>;

/// Why a connection closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i32)]
pub enum CloseType {
    /// Not classified yet
    #[default]
    Empty = 0,
    /// Peer closed its side cleanly
    Disconnect = 1,
    /// Timeout or reset while reading
    DisconnectOnRead = 2,
    /// Timeout, broken pipe or other failure while writing
    DisconnectOnWrite = 3,
    /// Graceful server shutdown
    ServerStop = 4,
    /// Protocol violation, backpressure overflow, handler failure or unclassified I/O failure
    Error = 5,
}

impl CloseType {
    pub fn as_str(self) -> &'static str {
        match self {
            CloseType::Empty => "empty",
            CloseType::Disconnect => "disconnect",
            CloseType::DisconnectOnRead => "disconnect_on_read",
            CloseType::DisconnectOnWrite => "disconnect_on_write",
            CloseType::ServerStop => "server_stop",
            CloseType::Error => "error",
        }
    }
}

impl fmt::Display for CloseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final classification delivered to `on_disconnected`
#[derive(Clone, Default)]
pub struct CloseInfo {
    pub close_type: CloseType,
    pub reason: String,
    pub extra: Option<CloseContext>,
}

impl fmt::Debug for CloseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloseInfo")
            .field("close_type", &self.close_type)
            .field("reason", &self.reason)
            .field("extra", &self.extra.is_some())
            .finish()
    }
}

#[derive(Default)]
struct CloseState {
    info: CloseInfo,
    is_closed: bool,
}

/// One accepted socket
pub struct Connection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    writer: tokio::sync::Mutex<Option<WriteHalf<BoxedStream>>>,
    close: Mutex<CloseState>,
    read_stop: CancellationToken,
    write_timeout: Option<Duration>,
    metrics: Arc<ServerMetrics>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("close_type", &self.close_type())
            .finish()
    }
}

impl Connection {
    /// `writer` is `None` while the transport is still being set up; see [`Connection::attach_writer`]
    pub(crate) fn new(
        id: ConnectionId,
        peer_addr: SocketAddr,
        writer: Option<WriteHalf<BoxedStream>>,
        write_timeout: Option<Duration>,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        Self {
            id,
            peer_addr,
            writer: tokio::sync::Mutex::new(writer),
            close: Mutex::new(CloseState::default()),
            read_stop: CancellationToken::new(),
            write_timeout,
            metrics,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    fn state(&self) -> MutexGuard<'_, CloseState> {
        // The guarded section never panics midway, so a poisoned lock still holds consistent data
        self.close.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a close classification has been recorded
    pub fn is_closed(&self) -> bool {
        self.state().is_closed
    }

    pub fn close_type(&self) -> CloseType {
        self.state().info.close_type
    }

    /// Current classification, possibly still `Empty`
    pub fn close_info(&self) -> CloseInfo {
        self.state().info.clone()
    }

    /// Record a close cause. Returns `true` if this call set the classification.
    ///
    /// Later callers only append their reason text.
    pub(crate) fn record_close(
        &self,
        reason: &str,
        close_type: CloseType,
        extra: Option<CloseContext>,
    ) -> bool {
        let mut state = self.state();
        if state.is_closed {
            if !reason.is_empty() {
                state.info.reason.push_str("; ");
                state.info.reason.push_str(reason);
            }
            trace!(conn_id = self.id, reason, "close already classified");
            return false;
        }

        state.is_closed = true;
        state.info = CloseInfo {
            close_type,
            reason: reason.to_string(),
            extra,
        };
        debug!(conn_id = self.id, %close_type, reason, "connection close classified");
        true
    }

    /// Classification handed to `on_disconnected`; unclassified closes become `Error`/"unknown"
    pub(crate) fn final_close_info(&self) -> CloseInfo {
        let mut state = self.state();
        if state.info.close_type == CloseType::Empty {
            state.is_closed = true;
            state.info.close_type = CloseType::Error;
            state.info.reason = String::from("unknown");
        }
        state.info.clone()
    }

    /// Request closure: record the cause and half-close the read side.
    ///
    /// Frames already queued are still handled and their responses written.
    /// Safe to call any number of times from any task.
    pub fn disconnect(&self, reason: &str, close_type: CloseType, extra: Option<CloseContext>) {
        self.record_close(reason, close_type, extra);
        self.read_stop.cancel();
    }

    /// Resolves once the read side has been asked to stop
    pub(crate) fn read_stopped(&self) -> WaitForCancellationFuture<'_> {
        self.read_stop.cancelled()
    }

    /// Install the write half once the transport (TLS handshake included) is ready
    pub(crate) async fn attach_writer(&self, writer: WriteHalf<BoxedStream>) {
        *self.writer.lock().await = Some(writer);
    }

    /// Frame `payload` and write it to the peer. Empty payloads are not sent.
    ///
    /// A failed write classifies the connection as `DisconnectOnWrite`,
    /// releases the write side and returns the error.
    pub async fn send(&self, payload: &[u8]) -> Result<()> {
        if payload.is_empty() {
            return Ok(());
        }

        let frame = encode_frame(payload);
        let mut writer = self.writer.lock().await;
        let stream = writer.as_mut().ok_or(ServerError::ConnectionClosed)?;

        let written = match self.write_timeout {
            Some(limit) => match tokio::time::timeout(limit, write_frame(stream, &frame)).await {
                Ok(res) => res,
                Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "write timed out")),
            },
            None => write_frame(stream, &frame).await,
        };

        match written {
            Ok(()) => {
                self.metrics.frame_sent(payload.len() as u64);
                Ok(())
            }
            Err(e) => {
                writer.take();
                drop(writer);
                self.metrics.write_error();
                let reason = match e.kind() {
                    io::ErrorKind::TimedOut => "close by client at write timeout",
                    io::ErrorKind::BrokenPipe => "close by client at write broken",
                    _ => "handle write error",
                };
                self.disconnect(reason, CloseType::DisconnectOnWrite, None);
                Err(ServerError::Io(e))
            }
        }
    }

    /// Flush and shut down the write side, then drop it.
    pub(crate) async fn close_socket(&self) {
        let Some(mut stream) = self.writer.lock().await.take() else {
            return;
        };
        if let Err(e) = stream.shutdown().await {
            trace!(conn_id = self.id, error = %e, "write shutdown failed");
        }
    }
}

async fn write_frame(stream: &mut WriteHalf<BoxedStream>, frame: &[u8]) -> io::Result<()> {
    stream.write_all(frame).await?;
    stream.flush().await
}
