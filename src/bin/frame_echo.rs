//! Echo server over the length-prefixed framing protocol.
//!
//! Usage: `frame-echo [config.toml]`. Without a file the configuration is read
//! from `FRAME_SERVER_*` environment variables. Ctrl-C stops the server after
//! in-flight frames are answered.

use frame_server::config::FrameServerConfig;
use frame_server::protocol::EchoHandler;
use frame_server::server::FrameServer;
use frame_server::utils::logging::init_logging;
use tracing::{error, info};

#[tokio::main]
async fn main() -> frame_server::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => FrameServerConfig::from_file(path)?,
        None => FrameServerConfig::from_env()?,
    };
    init_logging(&config.logging)?;

    if let Err(e) = config.validate_strict() {
        error!(error = %e, "invalid configuration");
        return Err(e);
    }

    let mut server = FrameServer::new(config.server, EchoHandler);
    let metrics = server.metrics();
    server.start_configured().await?;

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
    }
    info!("Received CTRL+C signal, shutting down");

    server.stop().await?;
    metrics.log_metrics();
    Ok(())
}
