//! # Utility Modules
//!
//! Supporting utilities shared by the server components.
//!
//! ## Components
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Thread-safe observability counters

pub mod logging;
pub mod metrics;

pub use metrics::{MetricsSnapshot, ServerMetrics};
