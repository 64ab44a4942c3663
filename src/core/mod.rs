//! # Core Protocol Components
//!
//! Wire format and framing codec.
//!
//! ## Wire Format
//! ```text
//! [Length(8, big-endian)] [Payload(N)]
//! ```
//!
//! No version byte and no checksum. The only validation is the length bound:
//! a declared length above `packet_size_limit - 8` is rejected before any
//! payload is buffered for it.

pub mod codec;
