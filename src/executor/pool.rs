//! Worker pool: fixed worker tasks draining one bounded queue per provider.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::queue::BoundedQueue;
use crate::chain::TileRequest;
use crate::config;
use crate::provider::TileResolver;
use crate::telemetry::ResolveMetrics;
use crate::tile::Outcome;

// =============================================================================
// Configuration
// =============================================================================

/// Construction parameters for one [`WorkerPool`].
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Diagnostic name used in log output.
    pub label: String,

    /// Number of worker tasks (clamped to at least one).
    pub workers: usize,

    /// Queue capacity (clamped to at least one).
    pub queue_capacity: usize,
}

impl PoolConfig {
    /// Creates a pool configuration.
    pub fn new(label: impl Into<String>, workers: usize, queue_capacity: usize) -> Self {
        Self {
            label: label.into(),
            workers: workers.max(1),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Default configuration for the filesystem cache tier.
    pub fn filesystem() -> Self {
        Self::new(
            "filesystem",
            config::FILESYSTEM_WORKER_COUNT,
            config::FILESYSTEM_QUEUE_CAPACITY,
        )
    }

    /// Default configuration for a download (network) tier.
    pub fn download() -> Self {
        Self::new(
            "download",
            config::DOWNLOAD_WORKER_COUNT,
            config::DOWNLOAD_QUEUE_CAPACITY,
        )
    }
}

// =============================================================================
// Outcome sink
// =============================================================================

/// Receiver for outcomes produced by pool workers.
///
/// The provider chain coordinator implements this to advance requests;
/// tests use recording mocks.
pub trait OutcomeSink: Send + Sync + 'static {
    /// Accepts one provider outcome for one request.
    ///
    /// Must not block: workers call this inline between tasks.
    fn dispatch(&self, request: Arc<TileRequest>, outcome: Outcome);

    /// Accepts a request the pool dropped without running it: displaced by
    /// queue overflow, cancelled before start, or still queued at shutdown.
    ///
    /// The pool has already marked the request cancelled; the sink's job is
    /// bookkeeping cleanup. Must not block.
    fn dropped(&self, request: Arc<TileRequest>);
}

// =============================================================================
// Worker pool
// =============================================================================

/// A bounded task queue drained by a fixed set of worker tasks.
///
/// One pool serves one provider instance. [`submit`](Self::submit) never
/// blocks: a full queue evicts its oldest not-yet-started request to make
/// room. Workers check each request for cancellation before invoking the
/// provider, and [`shutdown`](Self::shutdown) lets in-flight work finish
/// before joining all workers.
///
/// Must be created inside a Tokio runtime (workers are spawned immediately).
pub struct WorkerPool {
    label: String,
    queue: Arc<Mutex<BoundedQueue<Arc<TileRequest>>>>,
    notify: Arc<Notify>,
    accepting: Arc<AtomicBool>,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
    sink: Arc<dyn OutcomeSink>,
    metrics: Arc<ResolveMetrics>,
}

impl WorkerPool {
    /// Creates the pool and spawns its workers.
    ///
    /// # Arguments
    ///
    /// * `config` - Worker count, queue capacity and diagnostic label
    /// * `resolver` - The provider task body shared by all workers
    /// * `sink` - Destination for produced outcomes
    /// * `metrics` - Shared resolution counters
    pub fn new(
        config: PoolConfig,
        resolver: Arc<dyn TileResolver>,
        sink: Arc<dyn OutcomeSink>,
        metrics: Arc<ResolveMetrics>,
    ) -> Self {
        let queue = Arc::new(Mutex::new(BoundedQueue::new(config.queue_capacity)));
        let notify = Arc::new(Notify::new());
        let shutdown = CancellationToken::new();

        let mut workers = Vec::with_capacity(config.workers);
        for index in 0..config.workers {
            workers.push(tokio::spawn(worker_loop(
                config.label.clone(),
                index,
                Arc::clone(&queue),
                Arc::clone(&notify),
                shutdown.clone(),
                Arc::clone(&resolver),
                Arc::clone(&sink),
                Arc::clone(&metrics),
            )));
        }

        debug!(
            pool = %config.label,
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            "worker pool started"
        );

        Self {
            label: config.label,
            queue,
            notify,
            accepting: Arc::new(AtomicBool::new(true)),
            shutdown,
            workers: Mutex::new(workers),
            sink,
            metrics,
        }
    }

    /// Enqueues a request. Never blocks.
    ///
    /// If the queue is at capacity the oldest not-yet-started request is
    /// evicted to make room: it is cancelled (so waiters wake) and handed
    /// to the sink via [`OutcomeSink::dropped`].
    ///
    /// Returns false if the pool is shutting down and the request was not
    /// accepted.
    pub fn submit(&self, request: Arc<TileRequest>) -> bool {
        if !self.accepting.load(Ordering::Acquire) {
            debug!(pool = %self.label, tile = %request.key(), "pool closed - submission rejected");
            return false;
        }

        let evicted = self.queue.lock().push(request);
        if let Some(old) = evicted {
            self.metrics.request_evicted();
            debug!(
                pool = %self.label,
                tile = %old.key(),
                "queue full - evicted oldest pending request"
            );
            old.cancel();
            self.sink.dropped(old);
        }

        self.notify.notify_one();
        true
    }

    /// Number of queued, not-yet-started requests.
    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// The pool's diagnostic label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Stops accepting submissions, lets in-flight tasks finish and joins
    /// all workers. Queued-but-not-started requests are cancelled and
    /// handed to the sink via [`OutcomeSink::dropped`].
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::Release);
        self.shutdown.cancel();
        self.notify.notify_waiters();

        let handles = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            let _ = handle.await;
        }

        // Workers are gone; whatever is still queued will never run.
        while let Some(request) = self.queue.lock().pop() {
            debug!(pool = %self.label, tile = %request.key(), "dropping queued request at shutdown");
            request.cancel();
            self.sink.dropped(request);
        }

        debug!(pool = %self.label, "worker pool stopped");
    }
}

#[allow(clippy::too_many_arguments)]
async fn worker_loop(
    label: String,
    index: usize,
    queue: Arc<Mutex<BoundedQueue<Arc<TileRequest>>>>,
    notify: Arc<Notify>,
    shutdown: CancellationToken,
    resolver: Arc<dyn TileResolver>,
    sink: Arc<dyn OutcomeSink>,
    metrics: Arc<ResolveMetrics>,
) {
    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let next = queue.lock().pop();
        match next {
            Some(request) => {
                if request.is_cancelled() {
                    metrics.request_cancelled_before_start();
                    debug!(
                        pool = %label,
                        tile = %request.key(),
                        "request cancelled before start - dropping"
                    );
                    sink.dropped(request);
                    continue;
                }

                let outcome = resolver.resolve(&request).await;
                trace!(
                    pool = %label,
                    tile = %request.key(),
                    outcome = ?outcome,
                    "provider attempt finished"
                );
                sink.dispatch(request, outcome);
            }
            None => {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = notify.notified() => {}
                }
            }
        }
    }

    trace!(pool = %label, worker = index, "worker stopped");
}
