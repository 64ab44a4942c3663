//! # Error Types
//!
//! Error handling for the framing server.
//!
//! Expected network conditions (end of stream, read timeout, connection reset)
//! never become a `ServerError`: the reader resolves them into a
//! [`CloseType`](crate::server::CloseType) locally. What remains here are the
//! failures that get surfaced to a caller.
//!
//! ## Error Categories
//! - **I/O Errors**: socket failures that are not a plain disconnect
//! - **Framing Errors**: declared frame size over the limit
//! - **Backpressure Errors**: per-connection queue count or byte bound exceeded
//! - **Lifecycle Errors**: start/stop misuse, missing connections
//! - **Handler Errors**: failures reported by a [`FrameHandler`](crate::protocol::handler::FrameHandler)
//! - **TLS / Config Errors**: certificate loading and configuration problems
//!
//! ## Example Usage
//! ```rust
//! use frame_server::error::{Result, ServerError};
//!
//! fn check(len: u64, limit: u64) -> Result<()> {
//!     if len > limit {
//!         return Err(ServerError::OversizedFrame { size: len, limit });
//!     }
//!     Ok(())
//! }
//!
//! assert!(check(10, 4).is_err());
//! ```

use std::io;
use thiserror::Error;

/// Static error messages shared by several call sites.
pub mod constants {
    pub const ERR_ESTABLISH_FAILED: &str = "transport setup failed";
    pub const ERR_CONNECTED_REJECTED: &str = "on connected error";
    pub const ERR_RECEIVED_FAILED: &str = "on received error";
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Frame too large: {size} bytes (limit {limit})")]
    OversizedFrame { size: u64, limit: u64 },

    #[error("Queue frame number too many (limit {limit})")]
    QueueCountExceeded { limit: usize },

    #[error("Queue frame size too large: current={current} new={incoming} (limit {limit})")]
    QueueSizeExceeded {
        current: u64,
        incoming: u64,
        limit: u64,
    },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Connection {0} not found")]
    ConnectionNotFound(u64),

    #[error("Server has not been started")]
    NotStarted,

    #[error("Server is already running")]
    AlreadyStarted,

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Task error: {0}")]
    Task(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("TLS error: {0}")]
    TlsError(String),
}

impl ServerError {
    /// Convenience constructor for handler implementations.
    pub fn handler(msg: impl Into<String>) -> Self {
        ServerError::Handler(msg.into())
    }
}

/// Type alias for Results using ServerError
pub type Result<T> = std::result::Result<T, ServerError>;
