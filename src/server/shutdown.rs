//! Two-phase graceful shutdown.
//!
//! 1. Stop the accept loop and wait for it, so no connection can appear later.
//! 2. Close registration, ask every live connection to stop reading with
//!    `CloseType::ServerStop`, then wait for all connection and processing
//!    tasks to finish on their own.
//!
//! There is no deadline. Handlers already running are never interrupted and
//! queued frames are still answered.

use tracing::{error, info};

use crate::error::{Result, ServerError};
use crate::protocol::handler::FrameHandler;
use crate::server::acceptor::AcceptorHandle;
use crate::server::connection::CloseType;
use crate::server::Shared;

/// Close reason recorded for connections ended by a server stop
pub const SERVER_STOP_REASON: &str = "tcp server stop";

pub(crate) async fn shutdown<H: FrameHandler>(
    shared: &Shared<H>,
    acceptor: AcceptorHandle,
) -> Result<()> {
    info!(address = %acceptor.local_addr, "Stopping frame server, closing listener");
    acceptor.stop.cancel();
    let accept_result = acceptor
        .task
        .await
        .map_err(|e| ServerError::Task(format!("accept loop failed: {e}")));
    if let Err(e) = &accept_result {
        error!(error = %e, "accept loop did not exit cleanly");
    }

    let live = shared.registry.close_registration();
    info!(
        connections = live.len(),
        "Waiting for connections to drain"
    );
    for conn in &live {
        conn.disconnect(SERVER_STOP_REASON, CloseType::ServerStop, None);
    }
    drop(live);

    shared.tracker.close();
    shared.tracker.wait().await;

    info!("Frame server stopped");
    accept_result
}
