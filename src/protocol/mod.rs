//! # Application Interface
//!
//! The boundary between the framing server and the code that gives frames a
//! meaning. Collaborators implement [`handler::FrameHandler`] and hand it to
//! [`FrameServer::new`](crate::server::FrameServer::new); the server calls back
//! on connect, on every frame and on disconnect.

pub mod handler;

pub use handler::{EchoHandler, FnHandler, FrameHandler};
