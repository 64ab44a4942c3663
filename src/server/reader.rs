//! Per-connection read loop.
//!
//! Reads fixed-size chunks from the socket, feeds them to the [`FrameCodec`]
//! and pushes every completed frame onto the processing queue. A single read
//! can complete several frames; they are all dispatched before the next read.
//!
//! | Termination            | CloseType          | Returned as error |
//! |------------------------|--------------------|-------------------|
//! | end of stream          | `Disconnect`       | no                |
//! | read timeout           | `DisconnectOnRead` | no                |
//! | connection reset       | `DisconnectOnRead` | no                |
//! | other I/O error        | `Error`            | yes               |
//! | frame or queue bound   | `Error`            | yes               |
//! | read stop requested    | set by requester   | no                |

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::codec::Decoder;
use tracing::{debug, trace};

use crate::config::ServerConfig;
use crate::core::codec::FrameCodec;
use crate::error::{Result, ServerError};
use crate::server::connection::{CloseType, Connection};
use crate::server::queue::QueueSender;
use crate::utils::metrics::ServerMetrics;

pub(crate) struct FrameReader<'a> {
    conn: &'a Connection,
    codec: FrameCodec,
    buffer: BytesMut,
    chunk: Vec<u8>,
    read_timeout: Option<Duration>,
    metrics: Arc<ServerMetrics>,
}

impl<'a> FrameReader<'a> {
    pub(crate) fn new(
        conn: &'a Connection,
        config: &ServerConfig,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        Self {
            conn,
            codec: FrameCodec::new(config.packet_size_limit),
            buffer: BytesMut::with_capacity(config.read_buffer_size),
            chunk: vec![0u8; config.read_buffer_size],
            read_timeout: config.read_timeout,
            metrics,
        }
    }

    /// Read until the stream ends, fails, or the connection asks the read side to stop.
    ///
    /// Consumes `queue`, so the processing task sees the end of input once this returns.
    pub(crate) async fn run<R>(mut self, mut stream: R, queue: QueueSender) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let read = tokio::select! {
                biased;
                _ = self.conn.read_stopped() => {
                    trace!(conn_id = self.conn.id(), "read side stopped");
                    return Ok(());
                }
                read = read_chunk(&mut stream, &mut self.chunk, self.read_timeout) => read,
            };

            let n = match read {
                Ok(0) => {
                    self.conn
                        .record_close("close by client at read", CloseType::Disconnect, None);
                    return Ok(());
                }
                Ok(n) => n,
                Err(e) => return self.classify_read_error(e),
            };

            match self.ingest(n, &queue) {
                Ok(()) => {}
                // The processing task failed and already classified the close
                Err(ServerError::ConnectionClosed) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    fn classify_read_error(&self, e: io::Error) -> Result<()> {
        let reason = match e.kind() {
            // A TLS peer that drops TCP without close_notify surfaces here
            io::ErrorKind::UnexpectedEof => {
                self.conn
                    .record_close("close by client at read", CloseType::Disconnect, None);
                return Ok(());
            }
            io::ErrorKind::TimedOut => "close by client at read timeout",
            io::ErrorKind::ConnectionReset => "close by client at read reset",
            _ => {
                self.metrics.read_error();
                self.conn
                    .record_close("handle read error", CloseType::Error, None);
                return Err(ServerError::Io(e));
            }
        };
        debug!(conn_id = self.conn.id(), error = %e, "read side closed by peer");
        self.conn
            .record_close(reason, CloseType::DisconnectOnRead, None);
        Ok(())
    }

    /// Feed `n` freshly read bytes from the chunk buffer through the codec.
    ///
    /// Bytes are appended only as far as the frame in progress needs them, so
    /// the accumulation buffer never holds more than one frame. The codec has
    /// already bounded that frame by its declared length, which keeps the
    /// buffer within `packet_size_limit`.
    fn ingest(&mut self, n: usize, queue: &QueueSender) -> Result<()> {
        let mut offset = 0;
        while offset < n {
            let take = self.codec.bytes_needed(&self.buffer).min(n - offset);
            self.buffer
                .extend_from_slice(&self.chunk[offset..offset + take]);
            offset += take;

            self.dispatch_ready(queue)?;
        }
        Ok(())
    }

    fn dispatch_ready(&mut self, queue: &QueueSender) -> Result<()> {
        loop {
            let frame = match self.codec.decode(&mut self.buffer) {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(()),
                Err(e) => {
                    self.metrics.oversized_frame();
                    self.conn
                        .record_close("packet size too large", CloseType::Error, None);
                    return Err(e);
                }
            };

            let len = frame.len() as u64;
            match queue.try_push(frame) {
                Ok(()) => self.metrics.frame_received(len),
                Err(e @ ServerError::QueueCountExceeded { .. }) => {
                    self.metrics.queue_rejected();
                    self.conn
                        .record_close("queue packet number too many", CloseType::Error, None);
                    return Err(e);
                }
                Err(e @ ServerError::QueueSizeExceeded { .. }) => {
                    self.metrics.queue_rejected();
                    self.conn
                        .record_close("queue packet size too large", CloseType::Error, None);
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

async fn read_chunk<R>(stream: &mut R, chunk: &mut [u8], timeout: Option<Duration>) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, stream.read(chunk))
            .await
            .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out"))),
        None => stream.read(chunk).await,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::codec::encode_frame;
    use crate::server::queue::frame_queue;
    use crate::transport::BoxedStream;
    use bytes::{BufMut, Bytes};
    use tokio::io::AsyncWriteExt;

    fn connection() -> Connection {
        let (ours, _theirs) = tokio::io::duplex(64);
        let boxed: BoxedStream = Box::new(ours);
        let (_r, w) = tokio::io::split(boxed);
        Connection::new(
            1,
            "127.0.0.1:1".parse().unwrap(),
            Some(w),
            None,
            Arc::new(ServerMetrics::new()),
        )
    }

    fn config(packet_size_limit: u64, read_buffer_size: usize) -> ServerConfig {
        ServerConfig {
            packet_size_limit,
            read_buffer_size,
            ..ServerConfig::default()
        }
    }

    /// Drive the reader over `input` delivered in `chunks` separate writes
    async fn read_all(
        conn: &Connection,
        cfg: &ServerConfig,
        input: Vec<Vec<u8>>,
    ) -> (Result<()>, Vec<Bytes>) {
        let (mut client, server) = tokio::io::duplex(4096);
        let (tx, mut rx) = frame_queue(64, 1 << 20);
        let reader = FrameReader::new(conn, cfg, Arc::new(ServerMetrics::new()));

        let writer = async move {
            for piece in input {
                client.write_all(&piece).await.unwrap();
                tokio::task::yield_now().await;
            }
            client.shutdown().await.unwrap();
        };
        let (result, ()) = tokio::join!(reader.run(server, tx), writer);

        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        (result, frames)
    }

    #[tokio::test]
    async fn frame_split_into_single_bytes_is_reassembled() {
        let conn = connection();
        let encoded = encode_frame(b"hello");
        let pieces = encoded.iter().map(|b| vec![*b]).collect();

        let (result, frames) = read_all(&conn, &config(64, 16), pieces).await;
        assert!(result.is_ok());
        assert_eq!(frames, vec![Bytes::from_static(b"hello")]);
        assert_eq!(conn.close_type(), CloseType::Disconnect);
    }

    #[tokio::test]
    async fn coalesced_frames_larger_than_chunk() {
        let conn = connection();
        let mut input = Vec::new();
        for payload in [&b"a"[..], b"bb", b"", b"ccc"] {
            input.extend_from_slice(&encode_frame(payload));
        }

        let (result, frames) = read_all(&conn, &config(64, 5), vec![input]).await;
        assert!(result.is_ok());
        assert_eq!(frames.len(), 4);
        assert_eq!(&frames[3][..], b"ccc");
    }

    #[tokio::test]
    async fn chunk_straddling_two_max_frames_is_accepted() {
        let conn = connection();
        let payload = vec![9u8; 24];
        let mut input = Vec::new();
        input.extend_from_slice(&encode_frame(&payload));
        input.extend_from_slice(&encode_frame(&payload));

        let (result, frames) = read_all(&conn, &config(32, 20), vec![input]).await;
        assert!(result.is_ok());
        assert_eq!(frames.len(), 2);
    }

    #[tokio::test]
    async fn read_larger_than_limit_carries_many_max_frames() {
        let conn = connection();
        let mut input = Vec::new();
        for i in 0..8u8 {
            input.extend_from_slice(&encode_frame(&[i; 24]));
        }

        // One 256-byte read holds eight 32-byte frames; only one is ever buffered
        let (result, frames) = read_all(&conn, &config(32, 256), vec![input]).await;
        assert!(result.is_ok());
        assert_eq!(frames.len(), 8);
        assert_eq!(&frames[7][..], &[7u8; 24]);
    }

    #[tokio::test]
    async fn oversized_declaration_fails_without_dispatch() {
        let conn = connection();
        let mut header = BytesMut::new();
        header.put_u64(100);

        let (result, frames) = read_all(&conn, &config(32, 16), vec![header.to_vec()]).await;
        assert!(matches!(result, Err(ServerError::OversizedFrame { .. })));
        assert!(frames.is_empty());
        assert_eq!(conn.close_type(), CloseType::Error);
    }

    #[tokio::test]
    async fn truncated_header_then_eof_is_a_clean_disconnect() {
        let conn = connection();
        let (result, frames) = read_all(&conn, &config(64, 16), vec![vec![0, 0, 0, 0]]).await;
        assert!(result.is_ok());
        assert!(frames.is_empty());
        assert_eq!(conn.close_type(), CloseType::Disconnect);
    }

    #[tokio::test]
    async fn stop_request_ends_loop_without_reclassifying() {
        let conn = connection();
        let (_client, server) = tokio::io::duplex(64);
        let (tx, _rx) = frame_queue(4, 1024);

        conn.disconnect("tcp server stop", CloseType::ServerStop, None);
        let reader = FrameReader::new(&conn, &config(64, 16), Arc::new(ServerMetrics::new()));
        reader.run(server, tx).await.unwrap();

        assert_eq!(conn.close_type(), CloseType::ServerStop);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_read_times_out_as_disconnect_on_read() {
        let conn = connection();
        let (_client, server) = tokio::io::duplex(64);
        let (tx, _rx) = frame_queue(4, 1024);
        let cfg = ServerConfig {
            read_timeout: Some(Duration::from_millis(50)),
            ..config(64, 16)
        };

        FrameReader::new(&conn, &cfg, Arc::new(ServerMetrics::new()))
            .run(server, tx)
            .await
            .unwrap();
        assert_eq!(conn.close_type(), CloseType::DisconnectOnRead);
        assert!(conn.close_info().reason.contains("timeout"));
    }
}
