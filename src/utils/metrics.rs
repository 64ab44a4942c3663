//! Observability and Metrics
//!
//! Per-server counters for connection lifecycle, frame traffic and the
//! failure paths of the reader and processing queue.
//!
//! Uses atomic counters for thread-safe metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Metrics collector owned by one server
#[derive(Debug)]
pub struct ServerMetrics {
    /// Total connections registered
    pub connections_total: AtomicU64,
    /// Currently registered connections
    pub connections_active: AtomicU64,
    /// Frames decoded and queued
    pub frames_received: AtomicU64,
    /// Payload bytes decoded and queued
    pub bytes_received: AtomicU64,
    /// Frames written back
    pub frames_sent: AtomicU64,
    /// Payload bytes written back
    pub bytes_sent: AtomicU64,
    /// Frames rejected by the queue bounds
    pub queue_rejections: AtomicU64,
    /// Frames rejected for their declared size
    pub oversized_frames: AtomicU64,
    /// Handler callbacks that returned an error
    pub handler_errors: AtomicU64,
    /// Reads that failed with an unclassified error
    pub read_errors: AtomicU64,
    /// Writes that failed
    pub write_errors: AtomicU64,
    start_time: Instant,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            queue_rejections: AtomicU64::new(0),
            oversized_frames: AtomicU64::new(0),
            handler_errors: AtomicU64::new(0),
            read_errors: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a new connection
    pub fn connection_established(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection closed
    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn frame_received(&self, byte_count: u64) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn frame_sent(&self, byte_count: u64) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn queue_rejected(&self) {
        self.queue_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn oversized_frame(&self) {
        self.oversized_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handler_error(&self) {
        self.handler_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn read_error(&self) {
        self.read_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn write_error(&self) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            queue_rejections: self.queue_rejections.load(Ordering::Relaxed),
            oversized_frames: self.oversized_frames.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            frames_received = snapshot.frames_received,
            bytes_received = snapshot.bytes_received,
            frames_sent = snapshot.frames_sent,
            bytes_sent = snapshot.bytes_sent,
            queue_rejections = snapshot.queue_rejections,
            oversized_frames = snapshot.oversized_frames,
            handler_errors = snapshot.handler_errors,
            read_errors = snapshot.read_errors,
            write_errors = snapshot.write_errors,
            uptime_seconds = snapshot.uptime_seconds,
            "Frame server metrics snapshot"
        );
    }
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub frames_received: u64,
    pub bytes_received: u64,
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub queue_rejections: u64,
    pub oversized_frames: u64,
    pub handler_errors: u64,
    pub read_errors: u64,
    pub write_errors: u64,
    pub uptime_seconds: u64,
}
