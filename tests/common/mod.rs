//! Shared fixtures for the integration tests

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use frame_server::error::{Result, ServerError};
use frame_server::protocol::FrameHandler;
use frame_server::server::{CloseInfo, ConnectionHandle, ConnectionId};
use tokio::sync::{mpsc, Notify, Semaphore};

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// What the handler does with a frame
#[derive(Clone, Copy)]
pub enum Reply {
    Echo,
    HelloWorld,
    Nothing,
    FailOn(&'static [u8]),
}

/// Handler that records everything it sees and reports lifecycle events on channels
pub struct RecordingHandler {
    pub received: Mutex<Vec<Bytes>>,
    reply: Reply,
    reject_connect: bool,
    gate: Option<Arc<Semaphore>>,
    connect_gate: Option<Arc<Semaphore>>,
    pub handler_entered: Arc<Notify>,
    connected_tx: mpsc::UnboundedSender<ConnectionId>,
    closed_tx: mpsc::UnboundedSender<(ConnectionId, CloseInfo)>,
}

pub struct Events {
    pub connected: mpsc::UnboundedReceiver<ConnectionId>,
    pub closed: mpsc::UnboundedReceiver<(ConnectionId, CloseInfo)>,
}

impl Events {
    pub async fn next_connected(&mut self) -> ConnectionId {
        tokio::time::timeout(EVENT_TIMEOUT, self.connected.recv())
            .await
            .expect("timed out waiting for on_connected")
            .expect("handler dropped")
    }

    pub async fn next_closed(&mut self) -> (ConnectionId, CloseInfo) {
        tokio::time::timeout(EVENT_TIMEOUT, self.closed.recv())
            .await
            .expect("timed out waiting for on_disconnected")
            .expect("handler dropped")
    }
}

impl RecordingHandler {
    pub fn new(reply: Reply) -> (Self, Events) {
        let (connected_tx, connected) = mpsc::unbounded_channel();
        let (closed_tx, closed) = mpsc::unbounded_channel();
        (
            Self {
                received: Mutex::new(Vec::new()),
                reply,
                reject_connect: false,
                gate: None,
                connect_gate: None,
                handler_entered: Arc::new(Notify::new()),
                connected_tx,
                closed_tx,
            },
            Events { connected, closed },
        )
    }

    /// Every `on_received` waits for one permit from `gate`
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// `on_connected` reports the connection, then waits for one permit from `gate`
    pub fn gated_connect(mut self, gate: Arc<Semaphore>) -> Self {
        self.connect_gate = Some(gate);
        self
    }

    pub fn rejecting_connections(mut self) -> Self {
        self.reject_connect = true;
        self
    }

    pub fn received(&self) -> Vec<Bytes> {
        self.received.lock().unwrap().clone()
    }
}

impl FrameHandler for RecordingHandler {
    async fn on_connected(&self, conn: &ConnectionHandle) -> Result<()> {
        let _ = self.connected_tx.send(conn.id());
        if let Some(gate) = &self.connect_gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        if self.reject_connect {
            return Err(ServerError::handler("not welcome"));
        }
        Ok(())
    }

    async fn on_received(&self, _conn: &ConnectionHandle, payload: Bytes) -> Result<Bytes> {
        self.handler_entered.notify_one();
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        self.received.lock().unwrap().push(payload.clone());

        match self.reply {
            Reply::Echo => Ok(payload),
            Reply::HelloWorld if &payload[..] == b"hello" => Ok(Bytes::from_static(b"world")),
            Reply::HelloWorld | Reply::Nothing => Ok(Bytes::new()),
            Reply::FailOn(bad) if &payload[..] == bad => Err(ServerError::handler("bad frame")),
            Reply::FailOn(_) => Ok(payload),
        }
    }

    async fn on_disconnected(&self, conn: &ConnectionHandle, info: &CloseInfo) {
        let _ = self.closed_tx.send((conn.id(), info.clone()));
    }
}

/// 8-byte big-endian length followed by the payload
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = (payload.len() as u64).to_be_bytes().to_vec();
    out.extend_from_slice(payload);
    out
}
