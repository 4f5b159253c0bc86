//! tilechain - asynchronous multi-provider map tile resolution.
//!
//! Fetches map tiles (raster images keyed by source, zoom and grid
//! coordinates) by trying a chain of providers in priority order: typically
//! the filesystem cache tier first, then slower providers such as a network
//! downloader. A stale cache file can be shown immediately as a *candidate*
//! while the chain keeps looking for a fresher copy.
//!
//! # Architecture
//!
//! - [`source`] - tile source descriptors and the [`TileSourceRegistry`]
//! - [`executor`] - bounded [`WorkerPool`]s, one per provider tier
//! - [`provider`] - the [`TileResolver`] capability interface and the
//!   [`FilesystemCacheProvider`]
//! - [`chain`] - the [`ProviderChain`] coordinator and result protocol
//! - [`telemetry`] - resolution counters and tracing bootstrap
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tilechain::{
//!     FilesystemCacheProvider, PoolConfig, ProviderChainBuilder, TileKey, TileResolver,
//!     TileSourceRegistry,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(TileSourceRegistry::with_default_sources());
//!
//! let cache = FilesystemCacheProvider::new(tilechain::config::default_cache_dir())
//!     .with_tile_source(registry.default_source()?);
//!
//! let chain = ProviderChainBuilder::new(Arc::clone(&registry))
//!     .provider(Arc::new(cache) as Arc<dyn TileResolver>, PoolConfig::filesystem())
//!     .build();
//!
//! let request = chain.request(TileKey::new("Mapnik", 12, 654, 1583))?;
//! request.completed().await;
//! if let Some(image) = request.latest() {
//!     // hand the image to the view layer
//! }
//! # Ok(())
//! # }
//! ```

pub mod chain;
pub mod config;
pub mod executor;
pub mod provider;
pub mod source;
pub mod telemetry;
pub mod tile;

pub use chain::{ChainError, ChainState, ProviderChain, ProviderChainBuilder, TileRequest};
pub use executor::{BoundedQueue, OutcomeSink, PoolConfig, WorkerPool};
pub use provider::{
    AlwaysAvailable, FilesystemCacheProvider, PathProbe, StorageProbe, TileResolver,
};
pub use source::{
    RegistryError, SourceError, TileSource, TileSourceRegistry, XyzTileSource,
};
pub use telemetry::{ResolveMetrics, ResolveSnapshot};
pub use tile::{Outcome, TileImage, TileKey};
