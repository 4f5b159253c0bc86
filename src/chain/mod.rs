//! Provider chain coordination.
//!
//! One tile request walks an ordered list of providers until a provider
//! produces a terminal hit or the list is exhausted:
//!
//! ```text
//! request(key) ──► pool[0] ──► Outcome ──► dispatcher ──┐
//!                                                       │ Hit:       publish, done
//!                                                       │ Candidate: publish, advance
//!                                                       │ Miss:      advance
//!                                                       ▼
//!                                                    pool[1] ──► ...
//! ```
//!
//! A candidate is forwarded to the request's display slot immediately (the
//! stale image may be shown now) while the chain continues; whatever is
//! published last wins the slot. Providers run on independent worker pools,
//! so the only ordering promise is provider priority order per request.
//!
//! Requests are not coalesced: every submission is independent, and a
//! request instance never revisits a provider it has moved past.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::executor::{OutcomeSink, PoolConfig, WorkerPool};
use crate::provider::TileResolver;
use crate::source::{RegistryError, TileSourceRegistry};
use crate::telemetry::ResolveMetrics;
use crate::tile::{Outcome, TileImage, TileKey};

// =============================================================================
// Errors
// =============================================================================

/// Errors surfaced synchronously when a request is submitted.
///
/// These indicate caller misconfiguration; per-tile resolution failures are
/// absorbed inside the providers and never appear here.
#[derive(Debug, Error)]
pub enum ChainError {
    /// The request names an unknown tile source.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The requested zoom is outside the source's inclusive bounds.
    #[error("zoom {zoom} outside source bounds {min}..={max}")]
    ZoomOutOfRange { zoom: u8, min: u8, max: u8 },
}

// =============================================================================
// Request state
// =============================================================================

/// Lifecycle of one tile request.
///
/// Transitions are monotonic toward termination:
/// `Pending -> CandidatePublished -> {Hit, Exhausted}` (or straight to a
/// terminal state), plus `Cancelled` from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    /// No provider has produced a displayable image yet.
    Pending,

    /// A stale candidate has been published; the chain is still running.
    CandidatePublished,

    /// A provider produced a fresh image. Terminal.
    Hit,

    /// Every provider was tried without a hit. Terminal. If a candidate was
    /// published earlier it remains the displayed result.
    Exhausted,

    /// The request was abandoned without a result: cancelled by the caller,
    /// displaced from a full queue, or still queued at shutdown. Terminal.
    Cancelled,
}

impl ChainState {
    /// True once the chain has stopped working on the request.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Hit | Self::Exhausted | Self::Cancelled)
    }
}

struct RequestInner {
    image: Option<TileImage>,
    state: ChainState,
}

/// One in-flight tile request and its display slot.
///
/// Created by [`ProviderChain::request`], shared between the caller and the
/// worker pools. The display slot is last-write-wins: the most recently
/// published image is what [`latest`](Self::latest) returns.
pub struct TileRequest {
    key: TileKey,
    cancel: CancellationToken,
    /// Index of the next provider to try. Monotonic; a request never
    /// revisits a provider it has moved past.
    next_provider: AtomicUsize,
    inner: Mutex<RequestInner>,
    done: Notify,
}

impl TileRequest {
    pub(crate) fn new(key: TileKey) -> Self {
        Self {
            key,
            cancel: CancellationToken::new(),
            next_provider: AtomicUsize::new(0),
            inner: Mutex::new(RequestInner {
                image: None,
                state: ChainState::Pending,
            }),
            done: Notify::new(),
        }
    }

    /// The tile this request resolves.
    pub fn key(&self) -> &TileKey {
        &self.key
    }

    /// Current chain state.
    pub fn state(&self) -> ChainState {
        self.inner.lock().state
    }

    /// The most recently published image, if any.
    pub fn latest(&self) -> Option<TileImage> {
        self.inner.lock().image.clone()
    }

    /// Marks the request cancelled. Queued-but-not-started work is dropped
    /// by the workers; in-flight work finishes but its result is discarded.
    pub fn cancel(&self) {
        self.cancel.cancel();
        let mut inner = self.inner.lock();
        if !inner.state.is_terminal() {
            inner.state = ChainState::Cancelled;
            drop(inner);
            self.done.notify_waiters();
        }
    }

    /// True if the caller no longer needs this tile.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Waits until the request reaches a terminal state.
    pub async fn completed(&self) {
        loop {
            let mut notified = std::pin::pin!(self.done.notified());
            // Register before re-checking state so a notification between
            // the check and the await is not lost.
            notified.as_mut().enable();
            if self.state().is_terminal() {
                return;
            }
            notified.await;
        }
    }

    /// Writes the display slot. Last write wins.
    fn publish(&self, image: TileImage) {
        self.inner.lock().image = Some(image);
    }

    /// Records that a candidate was published, unless already past that.
    fn mark_candidate(&self) {
        let mut inner = self.inner.lock();
        if inner.state == ChainState::Pending {
            inner.state = ChainState::CandidatePublished;
        }
    }

    /// Moves the request to a terminal state and wakes waiters.
    fn finish(&self, state: ChainState) {
        debug_assert!(state.is_terminal());
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            return;
        }
        inner.state = state;
        drop(inner);
        self.done.notify_waiters();
    }

    /// Claims the next provider index, or `None` when the list is exhausted.
    fn take_next_provider(&self, provider_count: usize) -> Option<usize> {
        let index = self.next_provider.fetch_add(1, Ordering::AcqRel);
        (index < provider_count).then_some(index)
    }
}

// =============================================================================
// Chain coordinator
// =============================================================================

enum ChainEvent {
    Outcome {
        request: Arc<TileRequest>,
        outcome: Outcome,
    },
    /// The pool dropped the request without running it (queue overflow,
    /// cancellation before start, or shutdown). Already cancelled.
    Dropped(Arc<TileRequest>),
}

/// Bridges pool workers to the dispatcher task.
struct PoolEventSink {
    events: mpsc::UnboundedSender<ChainEvent>,
}

impl OutcomeSink for PoolEventSink {
    fn dispatch(&self, request: Arc<TileRequest>, outcome: Outcome) {
        // Send only fails once the dispatcher has shut down, at which point
        // outcomes are discarded.
        let _ = self.events.send(ChainEvent::Outcome { request, outcome });
    }

    fn dropped(&self, request: Arc<TileRequest>) {
        let _ = self.events.send(ChainEvent::Dropped(request));
    }
}

struct ChainInner {
    registry: Arc<TileSourceRegistry>,
    pools: Vec<WorkerPool>,
    active: DashMap<TileKey, Arc<TileRequest>>,
    metrics: Arc<ResolveMetrics>,
}

impl ChainInner {
    fn on_outcome(self: &Arc<Self>, request: Arc<TileRequest>, outcome: Outcome) {
        if request.is_cancelled() {
            debug!(tile = %request.key(), "discarding outcome for cancelled request");
            self.remove_active(&request);
            return;
        }

        match outcome {
            Outcome::Hit(image) => {
                self.metrics.hit();
                request.publish(image);
                request.finish(ChainState::Hit);
                self.remove_active(&request);
            }
            Outcome::Candidate(image) => {
                self.metrics.candidate();
                request.publish(image);
                request.mark_candidate();
                self.submit_next(request);
            }
            Outcome::Miss => {
                self.metrics.miss();
                self.submit_next(request);
            }
        }
    }

    fn submit_next(self: &Arc<Self>, request: Arc<TileRequest>) {
        match request.take_next_provider(self.pools.len()) {
            Some(index) => {
                if !self.pools[index].submit(Arc::clone(&request)) {
                    // Pool is shutting down; nothing further will run.
                    request.finish(ChainState::Exhausted);
                    self.remove_active(&request);
                }
            }
            None => {
                trace!(tile = %request.key(), "provider list exhausted");
                request.finish(ChainState::Exhausted);
                self.remove_active(&request);
            }
        }
    }

    fn on_dropped(self: &Arc<Self>, request: Arc<TileRequest>) {
        debug!(tile = %request.key(), "request dropped by pool before it ran");
        // The pool already cancelled it; this is idempotent.
        request.cancel();
        self.remove_active(&request);
    }

    /// Removes the request from the active table, but only if the table
    /// still holds this exact instance (a resubmission may have replaced it).
    fn remove_active(&self, request: &Arc<TileRequest>) {
        self.active
            .remove_if(request.key(), |_, current| Arc::ptr_eq(current, request));
    }
}

async fn dispatch_loop(
    inner: Arc<ChainInner>,
    mut events: mpsc::UnboundedReceiver<ChainEvent>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,

            event = events.recv() => {
                match event {
                    Some(ChainEvent::Outcome { request, outcome }) => {
                        inner.on_outcome(request, outcome)
                    }
                    Some(ChainEvent::Dropped(request)) => inner.on_dropped(request),
                    None => break,
                }
            }
        }
    }
    trace!("chain dispatcher stopped");
}

/// Builder for a [`ProviderChain`].
pub struct ProviderChainBuilder {
    registry: Arc<TileSourceRegistry>,
    providers: Vec<(Arc<dyn TileResolver>, PoolConfig)>,
    metrics: Arc<ResolveMetrics>,
}

impl ProviderChainBuilder {
    /// Starts a builder over the given registry.
    pub fn new(registry: Arc<TileSourceRegistry>) -> Self {
        Self {
            registry,
            providers: Vec::new(),
            metrics: Arc::new(ResolveMetrics::new()),
        }
    }

    /// Appends a provider. Order is priority order: earlier providers are
    /// tried first for every request.
    pub fn provider(mut self, resolver: Arc<dyn TileResolver>, config: PoolConfig) -> Self {
        self.providers.push((resolver, config));
        self
    }

    /// Uses shared metrics instead of a fresh instance.
    pub fn metrics(mut self, metrics: Arc<ResolveMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Builds the chain, spawning one worker pool per provider and the
    /// outcome dispatcher. Must be called inside a Tokio runtime.
    pub fn build(self) -> ProviderChain {
        let Self {
            registry,
            providers,
            metrics,
        } = self;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let sink: Arc<dyn OutcomeSink> = Arc::new(PoolEventSink { events: events_tx });

        let pools = providers
            .into_iter()
            .map(|(resolver, config)| {
                WorkerPool::new(config, resolver, Arc::clone(&sink), Arc::clone(&metrics))
            })
            .collect();

        let inner = Arc::new(ChainInner {
            registry,
            pools,
            active: DashMap::new(),
            metrics,
        });

        let shutdown = CancellationToken::new();
        let dispatcher = tokio::spawn(dispatch_loop(
            Arc::clone(&inner),
            events_rx,
            shutdown.clone(),
        ));

        ProviderChain {
            inner,
            dispatcher: Mutex::new(Some(dispatcher)),
            shutdown,
        }
    }
}

/// Coordinates an ordered list of providers cooperating on tile requests.
///
/// # Example
///
/// ```ignore
/// use tilechain::{PoolConfig, ProviderChainBuilder, TileKey};
///
/// let chain = ProviderChainBuilder::new(registry)
///     .provider(filesystem_provider, PoolConfig::filesystem())
///     .provider(download_provider, PoolConfig::download())
///     .build();
///
/// let request = chain.request(TileKey::new("Mapnik", 12, 654, 1583))?;
/// request.completed().await;
/// if let Some(image) = request.latest() { /* display */ }
/// ```
pub struct ProviderChain {
    inner: Arc<ChainInner>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl ProviderChain {
    /// Submits a request for a tile. Never blocks.
    ///
    /// The key is validated against the registry before any provider sees
    /// it: the source must exist and the zoom must be within the source's
    /// inclusive bounds.
    ///
    /// # Errors
    ///
    /// [`ChainError::Registry`] for an unknown source,
    /// [`ChainError::ZoomOutOfRange`] for an out-of-bounds zoom.
    pub fn request(&self, key: TileKey) -> Result<Arc<TileRequest>, ChainError> {
        let source = self.inner.registry.lookup_by_name(key.source())?;
        let (min, max) = (source.min_zoom(), source.max_zoom());
        if key.zoom() < min || key.zoom() > max {
            return Err(ChainError::ZoomOutOfRange {
                zoom: key.zoom(),
                min,
                max,
            });
        }

        let request = Arc::new(TileRequest::new(key.clone()));
        trace!(tile = %key, "tile requested");

        // Submissions are independent: a duplicate key replaces the previous
        // instance in the active table but both keep running.
        self.inner.active.insert(key, Arc::clone(&request));
        self.inner.submit_next(Arc::clone(&request));

        Ok(request)
    }

    /// Cancels the most recent in-flight request for a tile, if any.
    ///
    /// Returns true if a request was found and cancelled.
    pub fn cancel(&self, key: &TileKey) -> bool {
        match self.inner.active.remove(key) {
            Some((_, request)) => {
                request.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of requests the chain is currently tracking.
    pub fn active_requests(&self) -> usize {
        self.inner.active.len()
    }

    /// Shared resolution metrics.
    pub fn metrics(&self) -> Arc<ResolveMetrics> {
        Arc::clone(&self.inner.metrics)
    }

    /// Stops all pools (in-flight tasks finish, queued work is dropped) and
    /// the dispatcher.
    pub async fn shutdown(&self) {
        for pool in &self.inner.pools {
            pool.shutdown().await;
        }
        self.shutdown.cancel();
        let handle = self.dispatcher.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        debug!("provider chain stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::BoxFuture;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Semaphore;
    use tokio::time::timeout;

    fn test_registry() -> Arc<TileSourceRegistry> {
        Arc::new(TileSourceRegistry::with_default_sources())
    }

    fn mapnik_key() -> TileKey {
        TileKey::new("Mapnik", 12, 654, 1583)
    }

    fn test_image(size: u32) -> TileImage {
        Arc::new(image::DynamicImage::new_rgba8(size, size))
    }

    fn image_size(image: &TileImage) -> u32 {
        use image::GenericImageView;
        image.dimensions().0
    }

    /// Resolver returning a fixed outcome, counting invocations.
    struct ScriptedResolver {
        name: &'static str,
        outcome: Box<dyn Fn(&TileKey) -> Outcome + Send + Sync>,
        calls: AtomicUsize,
    }

    impl ScriptedResolver {
        fn fixed(name: &'static str, outcome: Outcome) -> Arc<Self> {
            Arc::new(Self {
                name,
                outcome: Box::new(move |_| outcome.clone()),
                calls: AtomicUsize::new(0),
            })
        }

        fn per_key(
            name: &'static str,
            f: impl Fn(&TileKey) -> Outcome + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                name,
                outcome: Box::new(f),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TileResolver for ScriptedResolver {
        fn name(&self) -> &str {
            self.name
        }

        fn resolve<'a>(&'a self, request: &'a TileRequest) -> BoxFuture<'a, Outcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let outcome = (self.outcome)(request.key());
            Box::pin(async move { outcome })
        }
    }

    fn pool_config() -> PoolConfig {
        PoolConfig::new("test", 1, 8)
    }

    async fn wait_terminal(request: &TileRequest) {
        timeout(Duration::from_secs(2), request.completed())
            .await
            .expect("request did not terminate in time");
    }

    #[tokio::test]
    async fn test_hit_terminates_chain() {
        let first = ScriptedResolver::fixed("first", Outcome::Hit(test_image(1)));
        let second = ScriptedResolver::fixed("second", Outcome::Hit(test_image(2)));

        let chain = ProviderChainBuilder::new(test_registry())
            .provider(Arc::clone(&first) as Arc<dyn TileResolver>, pool_config())
            .provider(Arc::clone(&second) as Arc<dyn TileResolver>, pool_config())
            .build();

        let request = chain.request(mapnik_key()).unwrap();
        wait_terminal(&request).await;

        assert_eq!(request.state(), ChainState::Hit);
        assert_eq!(image_size(&request.latest().unwrap()), 1);
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 0, "hit must stop the chain");
        assert_eq!(chain.active_requests(), 0);

        chain.shutdown().await;
    }

    #[tokio::test]
    async fn test_miss_advances_to_next_provider() {
        let first = ScriptedResolver::fixed("first", Outcome::Miss);
        let second = ScriptedResolver::fixed("second", Outcome::Hit(test_image(2)));

        let chain = ProviderChainBuilder::new(test_registry())
            .provider(Arc::clone(&first) as Arc<dyn TileResolver>, pool_config())
            .provider(Arc::clone(&second) as Arc<dyn TileResolver>, pool_config())
            .build();

        let request = chain.request(mapnik_key()).unwrap();
        wait_terminal(&request).await;

        assert_eq!(request.state(), ChainState::Hit);
        assert_eq!(image_size(&request.latest().unwrap()), 2);
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 1);

        chain.shutdown().await;
    }

    #[tokio::test]
    async fn test_candidate_published_then_refreshed_by_hit() {
        let first = ScriptedResolver::fixed("stale-cache", Outcome::Candidate(test_image(1)));
        let second = ScriptedResolver::fixed("download", Outcome::Hit(test_image(2)));

        let chain = ProviderChainBuilder::new(test_registry())
            .provider(Arc::clone(&first) as Arc<dyn TileResolver>, pool_config())
            .provider(Arc::clone(&second) as Arc<dyn TileResolver>, pool_config())
            .build();

        let request = chain.request(mapnik_key()).unwrap();
        wait_terminal(&request).await;

        // Candidate advanced the chain; the later hit overwrote the slot.
        assert_eq!(request.state(), ChainState::Hit);
        assert_eq!(image_size(&request.latest().unwrap()), 2);
        assert_eq!(second.calls(), 1);

        let snapshot = chain.metrics().snapshot();
        assert_eq!(snapshot.candidates, 1);
        assert_eq!(snapshot.hits, 1);

        chain.shutdown().await;
    }

    #[tokio::test]
    async fn test_exhausted_retains_candidate() {
        let first = ScriptedResolver::fixed("stale-cache", Outcome::Candidate(test_image(1)));
        let second = ScriptedResolver::fixed("download", Outcome::Miss);

        let chain = ProviderChainBuilder::new(test_registry())
            .provider(Arc::clone(&first) as Arc<dyn TileResolver>, pool_config())
            .provider(Arc::clone(&second) as Arc<dyn TileResolver>, pool_config())
            .build();

        let request = chain.request(mapnik_key()).unwrap();
        wait_terminal(&request).await;

        assert_eq!(request.state(), ChainState::Exhausted);
        assert_eq!(image_size(&request.latest().unwrap()), 1);

        chain.shutdown().await;
    }

    #[tokio::test]
    async fn test_all_miss_leaves_no_image() {
        let first = ScriptedResolver::fixed("first", Outcome::Miss);
        let second = ScriptedResolver::fixed("second", Outcome::Miss);

        let chain = ProviderChainBuilder::new(test_registry())
            .provider(Arc::clone(&first) as Arc<dyn TileResolver>, pool_config())
            .provider(Arc::clone(&second) as Arc<dyn TileResolver>, pool_config())
            .build();

        let request = chain.request(mapnik_key()).unwrap();
        wait_terminal(&request).await;

        assert_eq!(request.state(), ChainState::Exhausted);
        assert!(request.latest().is_none(), "placeholder persists");
        assert_eq!(chain.metrics().snapshot().misses, 2);

        chain.shutdown().await;
    }

    #[tokio::test]
    async fn test_empty_provider_list_exhausts_immediately() {
        let chain = ProviderChainBuilder::new(test_registry()).build();

        let request = chain.request(mapnik_key()).unwrap();
        wait_terminal(&request).await;

        assert_eq!(request.state(), ChainState::Exhausted);
        chain.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_source_rejected() {
        let chain = ProviderChainBuilder::new(test_registry()).build();

        let result = chain.request(TileKey::new("Nonexistent", 5, 0, 0));
        assert!(matches!(
            result,
            Err(ChainError::Registry(RegistryError::SourceNotFound(_)))
        ));

        chain.shutdown().await;
    }

    #[tokio::test]
    async fn test_zoom_bounds_inclusive() {
        let resolver = ScriptedResolver::fixed("any", Outcome::Miss);
        let chain = ProviderChainBuilder::new(test_registry())
            .provider(resolver as Arc<dyn TileResolver>, pool_config())
            .build();

        // Mapnik serves zoom 0..=18
        assert!(chain.request(TileKey::new("Mapnik", 0, 0, 0)).is_ok());
        assert!(chain.request(TileKey::new("Mapnik", 18, 0, 0)).is_ok());

        let result = chain.request(TileKey::new("Mapnik", 19, 0, 0));
        assert!(matches!(
            result,
            Err(ChainError::ZoomOutOfRange {
                zoom: 19,
                min: 0,
                max: 18
            })
        ));

        chain.shutdown().await;
    }

    /// Resolver that holds its answer long enough for the test to act.
    struct SlowResolver;

    impl TileResolver for SlowResolver {
        fn name(&self) -> &str {
            "slow"
        }

        fn resolve<'a>(&'a self, _request: &'a TileRequest) -> BoxFuture<'a, Outcome> {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Outcome::Hit(test_image(1))
            })
        }
    }

    #[tokio::test]
    async fn test_cancel_discards_result() {
        let chain = ProviderChainBuilder::new(test_registry())
            .provider(Arc::new(SlowResolver) as Arc<dyn TileResolver>, pool_config())
            .build();

        let key = mapnik_key();
        let request = chain.request(key.clone()).unwrap();
        assert!(chain.cancel(&key));
        wait_terminal(&request).await;

        assert_eq!(request.state(), ChainState::Cancelled);
        assert_eq!(chain.active_requests(), 0);
        assert!(!chain.cancel(&key), "nothing left to cancel");

        chain.shutdown().await;
    }

    /// Resolver that signals each task start and holds the task until the
    /// test releases the gate.
    struct BlockingResolver {
        started: Arc<Semaphore>,
        gate: Arc<Semaphore>,
    }

    impl TileResolver for BlockingResolver {
        fn name(&self) -> &str {
            "blocking"
        }

        fn resolve<'a>(&'a self, _request: &'a TileRequest) -> BoxFuture<'a, Outcome> {
            Box::pin(async move {
                self.started.add_permits(1);
                self.gate
                    .acquire()
                    .await
                    .expect("gate semaphore closed")
                    .forget();
                Outcome::Hit(test_image(1))
            })
        }
    }

    #[tokio::test]
    async fn test_evicted_request_terminates_and_leaves_active_table() {
        let started = Arc::new(Semaphore::new(0));
        let gate = Arc::new(Semaphore::new(0));
        let resolver = Arc::new(BlockingResolver {
            started: Arc::clone(&started),
            gate: Arc::clone(&gate),
        });

        let chain = ProviderChainBuilder::new(test_registry())
            .provider(
                resolver as Arc<dyn TileResolver>,
                PoolConfig::new("test", 1, 1),
            )
            .build();

        // Occupy the single worker so later requests stay queued.
        let first = chain.request(TileKey::new("Mapnik", 12, 1, 0)).unwrap();
        started.acquire().await.unwrap().forget();

        // Queue capacity is one: the third request displaces the second.
        let victim = chain.request(TileKey::new("Mapnik", 12, 2, 0)).unwrap();
        let third = chain.request(TileKey::new("Mapnik", 12, 3, 0)).unwrap();

        // The displaced request must terminate, not hang its waiters.
        wait_terminal(&victim).await;
        assert_eq!(victim.state(), ChainState::Cancelled);
        assert_eq!(chain.metrics().snapshot().evictions, 1);

        gate.add_permits(2);
        wait_terminal(&first).await;
        wait_terminal(&third).await;
        assert_eq!(first.state(), ChainState::Hit);
        assert_eq!(third.state(), ChainState::Hit);
        assert_eq!(chain.active_requests(), 0, "no leaked table entries");

        chain.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_requests_no_cross_talk() {
        // Each key resolves to an image whose size encodes the key's x
        // coordinate, so any cross-talk would be visible in the slot.
        let resolver = ScriptedResolver::per_key("sized", |key| {
            Outcome::Hit(Arc::new(image::DynamicImage::new_rgba8(key.x(), 1)))
        });

        let chain = ProviderChainBuilder::new(test_registry())
            .provider(resolver as Arc<dyn TileResolver>, PoolConfig::new("test", 4, 32))
            .build();

        let requests: Vec<_> = (1..=8)
            .map(|x| chain.request(TileKey::new("Mapnik", 12, x, 0)).unwrap())
            .collect();

        for request in &requests {
            wait_terminal(request).await;
            let expected = request.key().x();
            assert_eq!(image_size(&request.latest().unwrap()), expected);
        }

        chain.shutdown().await;
    }

    #[tokio::test]
    async fn test_duplicate_submissions_are_independent() {
        let resolver = ScriptedResolver::fixed("hit", Outcome::Hit(test_image(1)));
        let chain = ProviderChainBuilder::new(test_registry())
            .provider(Arc::clone(&resolver) as Arc<dyn TileResolver>, pool_config())
            .build();

        let a = chain.request(mapnik_key()).unwrap();
        let b = chain.request(mapnik_key()).unwrap();
        wait_terminal(&a).await;
        wait_terminal(&b).await;

        assert_eq!(resolver.calls(), 2, "no coalescing of duplicate keys");

        chain.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_idempotent_state() {
        let chain = ProviderChainBuilder::new(test_registry()).build();
        chain.shutdown().await;
        chain.shutdown().await;
    }
}
