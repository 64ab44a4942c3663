//! Queue bounds turn a slow handler into a hard rejection, never unbounded buffering

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common::{frame, RecordingHandler, Reply};
use frame_server::config::ServerConfig;
use frame_server::server::{CloseType, FrameServer};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;

async fn flood(config: ServerConfig, payloads: &[Vec<u8>]) -> (Vec<Bytes>, String) {
    let gate = Arc::new(Semaphore::new(0));
    let (handler, mut events) = RecordingHandler::new(Reply::Nothing);
    let mut server = FrameServer::new(config, handler.gated_connect(gate.clone()));
    let addr = server.start("127.0.0.1:0").await.unwrap();

    let mut client = TcpStream::connect(addr).await.unwrap();
    events.next_connected().await;

    let mut bytes = Vec::new();
    for payload in payloads {
        bytes.extend(frame(payload));
    }
    client.write_all(&bytes).await.unwrap();

    // The reader only starts once on_connected returns, so the whole burst is
    // already buffered and lands in the queue before the handler takes a frame
    tokio::time::sleep(Duration::from_millis(100)).await;
    gate.add_permits(1);

    let (_, info) = events.next_closed().await;
    assert_eq!(info.close_type, CloseType::Error);
    assert_eq!(server.metrics().snapshot().queue_rejections, 1);

    let received = server.handler().received();
    server.stop().await.unwrap();
    (received, info.reason)
}

fn numbered(count: u8, size: usize) -> Vec<Vec<u8>> {
    (0..count).map(|i| vec![i; size]).collect()
}

#[tokio::test]
async fn frame_count_bound_rejects_and_keeps_earlier_frames() {
    let config = ServerConfig {
        queue_packet_num_limit: 2,
        ..ServerConfig::default()
    };
    let sent = numbered(6, 4);
    let (received, reason) = flood(config, &sent).await;

    assert_eq!(reason, "queue packet number too many");
    assert_eq!(received, sent[..2].iter().map(|p| Bytes::from(p.clone())).collect::<Vec<_>>());
}

#[tokio::test]
async fn byte_bound_rejects_and_keeps_earlier_frames() {
    let config = ServerConfig {
        queue_packet_size_limit: 10,
        queue_packet_num_limit: 100,
        ..ServerConfig::default()
    };
    let sent = numbered(4, 6);
    let (received, reason) = flood(config, &sent).await;

    assert_eq!(reason, "queue packet size too large");
    // 6 + 6 > 10, so only the first frame fits
    assert_eq!(received, vec![Bytes::from(sent[0].clone())]);
}
