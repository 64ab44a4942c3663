//! Bounded per-connection processing queue.
//!
//! The reader pushes decoded frames without ever blocking; a push that would
//! exceed either the entry bound or the byte bound fails and the connection
//! is torn down. One consumer task drains the queue in arrival order, runs the
//! handler and writes any response back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::error::{constants, Result, ServerError};
use crate::protocol::handler::FrameHandler;
use crate::server::connection::{CloseType, ConnectionHandle};
use crate::utils::metrics::ServerMetrics;

/// Create a queue holding at most `num_limit` frames and `size_limit` payload bytes
pub(crate) fn frame_queue(num_limit: usize, size_limit: u64) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::channel(num_limit.max(1));
    let queued_bytes = Arc::new(AtomicU64::new(0));
    (
        QueueSender {
            tx,
            queued_bytes: queued_bytes.clone(),
            num_limit,
            size_limit,
        },
        QueueReceiver { rx, queued_bytes },
    )
}

/// Producer side, owned by the reader
pub(crate) struct QueueSender {
    tx: mpsc::Sender<Bytes>,
    queued_bytes: Arc<AtomicU64>,
    num_limit: usize,
    size_limit: u64,
}

impl QueueSender {
    /// Enqueue without waiting.
    ///
    /// Fails with `QueueSizeExceeded`/`QueueCountExceeded` when a bound would be
    /// crossed, or `ConnectionClosed` when the consumer has gone away.
    pub(crate) fn try_push(&self, frame: Bytes) -> Result<()> {
        let incoming = frame.len() as u64;
        // Reserve first so a concurrent dequeue can never underflow the counter
        let current = self.queued_bytes.fetch_add(incoming, Ordering::AcqRel);
        if current + incoming > self.size_limit {
            self.queued_bytes.fetch_sub(incoming, Ordering::AcqRel);
            return Err(ServerError::QueueSizeExceeded {
                current,
                incoming,
                limit: self.size_limit,
            });
        }

        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.queued_bytes.fetch_sub(incoming, Ordering::AcqRel);
                match err {
                    TrySendError::Full(_) => Err(ServerError::QueueCountExceeded {
                        limit: self.num_limit,
                    }),
                    TrySendError::Closed(_) => Err(ServerError::ConnectionClosed),
                }
            }
        }
    }

    #[cfg(test)]
    fn queued_bytes(&self) -> u64 {
        self.queued_bytes.load(Ordering::Acquire)
    }
}

/// Consumer side, owned by the processing task
pub(crate) struct QueueReceiver {
    rx: mpsc::Receiver<Bytes>,
    queued_bytes: Arc<AtomicU64>,
}

impl QueueReceiver {
    /// Wait for the next frame; `None` once the sender is dropped and the queue is empty
    pub(crate) async fn recv(&mut self) -> Option<Bytes> {
        let frame = self.rx.recv().await?;
        self.queued_bytes
            .fetch_sub(frame.len() as u64, Ordering::AcqRel);
        Some(frame)
    }
}

/// Drain `queue` through `handler` until the reader is done or the handler fails.
pub(crate) async fn process_queue<H: FrameHandler>(
    conn: ConnectionHandle,
    handler: Arc<H>,
    mut queue: QueueReceiver,
    metrics: Arc<ServerMetrics>,
) {
    while let Some(frame) = queue.recv().await {
        match handler.on_received(&conn, frame).await {
            Ok(response) => {
                if let Err(e) = conn.send(&response).await {
                    debug!(conn_id = conn.id(), error = %e, "response not delivered");
                }
            }
            Err(e) => {
                metrics.handler_error();
                warn!(
                    conn_id = conn.id(),
                    peer = %conn.peer_addr(),
                    error = %e,
                    "on received handler failed"
                );
                conn.disconnect(constants::ERR_RECEIVED_FAILED, CloseType::Error, None);
                return;
            }
        }
    }
}
