//! Resolution telemetry.
//!
//! Lock-free atomic counters recording what the provider chain did with each
//! attempt: hits, candidates, misses, queue evictions and requests cancelled
//! before they ever started. Counters are cheap enough to leave on
//! unconditionally; [`ResolveMetrics::snapshot`] takes a point-in-time copy
//! for display or assertions.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters for the tile resolution pipeline.
#[derive(Debug, Default)]
pub struct ResolveMetrics {
    hits: AtomicU64,
    candidates: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    cancelled_before_start: AtomicU64,
}

impl ResolveMetrics {
    /// Creates zeroed metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a terminal hit.
    pub fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a published candidate.
    pub fn candidate(&self) {
        self.candidates.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a provider miss.
    pub fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a not-yet-started request evicted from a full queue.
    pub fn request_evicted(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a request dropped by a worker because it was cancelled before
    /// its task body ran.
    pub fn request_cancelled_before_start(&self) {
        self.cancelled_before_start.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a point-in-time copy of all counters.
    pub fn snapshot(&self) -> ResolveSnapshot {
        ResolveSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            candidates: self.candidates.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            cancelled_before_start: self.cancelled_before_start.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ResolveMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveSnapshot {
    /// Terminal hits delivered.
    pub hits: u64,
    /// Candidates published while the chain continued.
    pub candidates: u64,
    /// Provider misses.
    pub misses: u64,
    /// Not-yet-started requests evicted from full queues.
    pub evictions: u64,
    /// Requests cancelled before their task body ran.
    pub cancelled_before_start: u64,
}

impl fmt::Display for ResolveSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits: {}, candidates: {}, misses: {}, evictions: {}, cancelled: {}",
            self.hits, self.candidates, self.misses, self.evictions, self.cancelled_before_start
        )
    }
}

/// Installs a global tracing subscriber honouring `RUST_LOG`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_diagnostics() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
