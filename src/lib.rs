//! # Frame Server
//!
//! A length-prefixed TCP framing server.
//!
//! Each frame on the wire is an 8-byte big-endian payload length followed by
//! the payload. The server reassembles frames from the byte stream, applies
//! hard backpressure through a bounded queue per connection, hands frames to
//! an application [`FrameHandler`](protocol::FrameHandler), and writes any
//! non-empty response back as a frame.
//!
//! ## Guarantees
//! - Frames of one connection are handled strictly in arrival order
//! - A connection is reported to `on_disconnected` exactly once, with a
//!   definitive [`CloseType`](server::CloseType) and reason
//! - `stop()` returns only after every connection task has finished, and
//!   never interrupts a handler that is already running
//!
//! ## Modules
//! - [`core`]: wire format and codec
//! - [`server`]: acceptor, connections, reader, queue, registry, shutdown
//! - [`protocol`]: the handler interface
//! - [`transport`]: TCP listener and optional TLS
//! - [`config`], [`error`], [`utils`]: ambient plumbing

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod server;
pub mod transport;
pub mod utils;

pub use crate::config::{FrameServerConfig, ServerConfig};
pub use crate::core::codec::FrameCodec;
pub use crate::error::{Result, ServerError};
pub use crate::protocol::{EchoHandler, FnHandler, FrameHandler};
pub use crate::server::{CloseInfo, CloseType, ConnectionHandle, FrameServer};
