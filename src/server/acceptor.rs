//! Accept loop and per-connection wiring.
//!
//! One long-lived task accepts sockets. Each accepted socket gets a tracked
//! task that registers the [`Connection`], finishes the transport setup,
//! starts its processing task and runs the read loop inline. The connection
//! is deregistered and `on_disconnected` fires only after both have ended.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::ReadHalf;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{constants, Result};
use crate::server::connection::{CloseType, Connection, ConnectionHandle, ConnectionId};
use crate::server::queue::{frame_queue, process_queue};
use crate::server::reader::FrameReader;
use crate::server::shutdown::SERVER_STOP_REASON;
use crate::server::Shared;
use crate::protocol::handler::FrameHandler;
use crate::transport::tcp::{FrameListener, PendingStream};
use crate::transport::BoxedStream;

/// Running accept loop
pub(crate) struct AcceptorHandle {
    pub(crate) stop: CancellationToken,
    pub(crate) task: JoinHandle<()>,
    pub(crate) local_addr: SocketAddr,
}

pub(crate) fn spawn_acceptor<H: FrameHandler>(
    shared: Arc<Shared<H>>,
    listener: FrameListener,
    local_addr: SocketAddr,
) -> AcceptorHandle {
    let stop = CancellationToken::new();
    let task = tokio::spawn(accept_loop(shared, listener, stop.clone()));
    AcceptorHandle {
        stop,
        task,
        local_addr,
    }
}

async fn accept_loop<H: FrameHandler>(
    shared: Arc<Shared<H>>,
    listener: FrameListener,
    stop: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let pending = match accepted {
            Ok(pending) => pending,
            Err(e) => {
                error!(error = %e, "frame server accept error");
                break;
            }
        };

        let id = shared.next_connection_id();
        let peer = pending.peer_addr();
        debug!(conn_id = id, %peer, "connection accepted");

        let task_shared = shared.clone();
        shared.tracker.spawn(async move {
            if let Err(e) = handle_connection(task_shared, id, pending).await {
                warn!(conn_id = id, %peer, error = %e, "frame server handle connection error");
            }
        });
    }

    // Dropping the listener closes the socket
    drop(listener);
    info!("accept loop stopped");
}

async fn handle_connection<H: FrameHandler>(
    shared: Arc<Shared<H>>,
    id: ConnectionId,
    pending: PendingStream,
) -> Result<()> {
    // Registered before the TLS handshake so shutdown can reach a peer that never completes it
    let conn: ConnectionHandle = Arc::new(Connection::new(
        id,
        pending.peer_addr(),
        None,
        shared.config.write_timeout,
        shared.metrics.clone(),
    ));
    shared.metrics.connection_established();

    if !shared.registry.register(conn.clone()) {
        // Accepted just before shutdown closed the registry
        conn.record_close(SERVER_STOP_REASON, CloseType::ServerStop, None);
        finish(&shared, &conn).await;
        return Ok(());
    }

    let result = match establish(&conn, pending).await {
        Ok(Some(stream)) => {
            let (read_half, write_half) = tokio::io::split(stream);
            conn.attach_writer(write_half).await;
            drive(&shared, &conn, read_half).await
        }
        // Stopped mid-handshake; the stop request already classified the close
        Ok(None) => Ok(()),
        Err(e) => {
            conn.record_close(constants::ERR_ESTABLISH_FAILED, CloseType::Error, None);
            Err(e)
        }
    };
    finish(&shared, &conn).await;
    result
}

/// Finish transport setup unless the connection is asked to stop first
async fn establish(conn: &Connection, pending: PendingStream) -> Result<Option<BoxedStream>> {
    tokio::select! {
        biased;
        _ = conn.read_stopped() => {
            debug!(conn_id = conn.id(), "stopped during transport setup");
            Ok(None)
        }
        stream = pending.establish() => stream.map(Some),
    }
}

async fn drive<H: FrameHandler>(
    shared: &Arc<Shared<H>>,
    conn: &ConnectionHandle,
    read_half: ReadHalf<BoxedStream>,
) -> Result<()> {
    if let Err(e) = shared.handler.on_connected(conn).await {
        conn.record_close(constants::ERR_CONNECTED_REJECTED, CloseType::Error, None);
        return Err(e);
    }

    let (tx, rx) = frame_queue(
        shared.config.queue_packet_num_limit,
        shared.config.queue_packet_size_limit,
    );
    let consumer = shared.tracker.spawn(process_queue(
        conn.clone(),
        shared.handler.clone(),
        rx,
        shared.metrics.clone(),
    ));

    let read_result = FrameReader::new(conn, &shared.config, shared.metrics.clone())
        .run(read_half, tx)
        .await;

    if let Err(e) = consumer.await {
        conn.record_close("processing task aborted", CloseType::Error, None);
        error!(conn_id = conn.id(), error = %e, "processing task aborted");
    }

    read_result
}

async fn finish<H: FrameHandler>(shared: &Shared<H>, conn: &ConnectionHandle) {
    shared.registry.deregister(conn).await;

    let info = conn.final_close_info();
    shared.handler.on_disconnected(conn, &info).await;
    shared.metrics.connection_closed();

    info!(
        conn_id = conn.id(),
        peer = %conn.peer_addr(),
        close_type = %info.close_type,
        reason = %info.reason,
        "connection closed"
    );
}
