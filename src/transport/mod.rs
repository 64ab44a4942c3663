//! # Transport Layer
//!
//! Socket plumbing under the framing server.
//!
//! ## Components
//! - **TCP**: listener, deferred stream establishment, framed client helper
//! - **TLS**: rustls server config loading, self-signed generation, TLS client
//!
//! Everything above this layer works on a [`BoxedStream`] and does not know
//! whether the bytes are encrypted.

use tokio::io::{AsyncRead, AsyncWrite};

pub mod tcp;
pub mod tls;

/// Any bidirectional byte stream the server can frame
pub trait FrameStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> FrameStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Type-erased plain or TLS stream
pub type BoxedStream = Box<dyn FrameStream>;
