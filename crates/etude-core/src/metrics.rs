//! Server-wide counters.
//!
//! The reactor and the workers bump these with relaxed atomics; a
//! [`MetricsSnapshot`] is what `ServerHandle::metrics` hands out and what the
//! server logs on shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Live counters, shared through the server context.
///
/// Aligned to a cache line so the hot counters do not share one with the
/// neighbouring context fields.
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct ServerMetrics {
    /// Responses built by a worker (documents and error pages alike).
    responses: AtomicUsize,
    /// Connections currently holding a slot.
    open_connections: AtomicUsize,
    /// Bytes flushed to clients, heads and bodies.
    bytes_written: AtomicUsize,
    /// Clients turned away with the busy response at the connection ceiling.
    refused: AtomicUsize,
    /// Connections closed because the dispatcher queue was full.
    dropped: AtomicUsize,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub responses: usize,
    pub open_connections: usize,
    pub bytes_written: usize,
    pub refused: usize,
    pub dropped: usize,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn response_queued(&self) {
        self.responses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_opened(&self) {
        self.open_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.open_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn wrote(&self, bytes: usize) {
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn refused(&self) {
        self.refused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            responses: self.responses.load(Ordering::Relaxed),
            open_connections: self.open_connections.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            refused: self.refused.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}
