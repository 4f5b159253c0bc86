//! Filesystem cache tile provider.
//!
//! Resolves tile requests against on-disk cache files written by other
//! providers. Cheapest tier in the chain (no data connection), so it
//! normally runs first: a fresh file terminates the chain with a hit, a
//! stale file is published as a candidate so the viewer has something to
//! show while a slower provider refreshes the tile.
//!
//! Every per-tile failure mode here (storage gone, no active source, file
//! missing, unreadable, undecodable) is absorbed as a miss. A corrupted
//! cache entry must never break the display pipeline.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use super::{BoxFuture, PathProbe, StorageProbe, TileResolver};
use crate::chain::TileRequest;
use crate::config::DEFAULT_MAXIMUM_CACHED_FILE_AGE;
use crate::source::{RegistryError, TileSource, TileSourceRegistry};
use crate::tile::Outcome;

/// Tile provider backed by the on-disk tile cache.
///
/// # Staleness
///
/// A cached file whose age is strictly less than the maximum cached file age
/// yields [`Outcome::Hit`]; a file exactly at or beyond the threshold is
/// expired and yields [`Outcome::Candidate`] - displayable now, but the
/// chain keeps looking for a fresher copy. A maximum age of zero therefore
/// classifies every cached file as a candidate.
///
/// # Active tile source
///
/// File naming and decoding are delegated to the active tile source, which
/// is swappable at runtime (directly, by registry name or by registry
/// ordinal). The reference is kept behind an `RwLock` so every worker
/// observes a consistent value for the duration of one task.
pub struct FilesystemCacheProvider {
    base_dir: PathBuf,
    max_cached_file_age: Duration,
    storage: Arc<dyn StorageProbe>,
    tile_source: RwLock<Option<Arc<dyn TileSource>>>,
}

impl FilesystemCacheProvider {
    /// Creates a provider over the given base cache directory.
    ///
    /// Uses the library default maximum cached file age and a storage probe
    /// that reports the base directory's existence. No tile source is active
    /// until one is set.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let storage: Arc<dyn StorageProbe> = Arc::new(PathProbe::new(base_dir.clone()));
        Self {
            base_dir,
            max_cached_file_age: DEFAULT_MAXIMUM_CACHED_FILE_AGE,
            storage,
            tile_source: RwLock::new(None),
        }
    }

    /// Overrides the maximum cached file age.
    ///
    /// A zero age makes every cached file always-expired: filesystem lookups
    /// then only ever produce candidates, never hits.
    pub fn with_max_cached_file_age(mut self, age: Duration) -> Self {
        self.max_cached_file_age = age;
        self
    }

    /// Replaces the storage availability probe.
    pub fn with_storage_probe(mut self, probe: Arc<dyn StorageProbe>) -> Self {
        self.storage = probe;
        self
    }

    /// Sets the active tile source during construction.
    pub fn with_tile_source(self, source: Arc<dyn TileSource>) -> Self {
        *self.tile_source.write() = Some(source);
        self
    }

    /// Swaps the active tile source.
    pub fn set_tile_source(&self, source: Arc<dyn TileSource>) {
        debug!(source = source.name(), "switching active tile source");
        *self.tile_source.write() = Some(source);
    }

    /// Swaps the active tile source via registry name lookup.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::SourceNotFound`] if the name is unknown; the
    /// active source is left unchanged in that case.
    pub fn set_tile_source_by_name(
        &self,
        registry: &TileSourceRegistry,
        name: &str,
    ) -> Result<(), RegistryError> {
        let source = registry.lookup_by_name(name)?;
        self.set_tile_source(source);
        Ok(())
    }

    /// Swaps the active tile source via registry ordinal lookup.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::SourceNotFound`] if the ordinal is unknown;
    /// the active source is left unchanged in that case.
    pub fn set_tile_source_by_ordinal(
        &self,
        registry: &TileSourceRegistry,
        ordinal: u32,
    ) -> Result<(), RegistryError> {
        let source = registry.lookup_by_ordinal(ordinal)?;
        self.set_tile_source(source);
        Ok(())
    }

    /// The currently active tile source, if any.
    pub fn tile_source(&self) -> Option<Arc<dyn TileSource>> {
        self.tile_source.read().clone()
    }

    /// Minimum zoom of the active source, if one is set.
    pub fn min_zoom(&self) -> Option<u8> {
        self.tile_source.read().as_ref().map(|s| s.min_zoom())
    }

    /// Maximum zoom of the active source, if one is set.
    pub fn max_zoom(&self) -> Option<u8> {
        self.tile_source.read().as_ref().map(|s| s.max_zoom())
    }

    /// The configured maximum cached file age.
    pub fn max_cached_file_age(&self) -> Duration {
        self.max_cached_file_age
    }

    /// The base cache directory.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

impl TileResolver for FilesystemCacheProvider {
    fn name(&self) -> &str {
        "filesystem-cache"
    }

    fn resolve<'a>(&'a self, request: &'a TileRequest) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let key = request.key();

            // No cache medium - nothing to do for this tile.
            if !self.storage.is_available() {
                trace!(tile = %key, "cache storage unavailable - miss");
                return Outcome::Miss;
            }

            // Defensive fallback: never fail the caller over configuration.
            let Some(source) = self.tile_source.read().clone() else {
                debug!(tile = %key, "no active tile source - miss");
                return Outcome::Miss;
            };

            let path = self.base_dir.join(source.tile_path(key));

            let metadata = match tokio::fs::metadata(&path).await {
                Ok(metadata) => metadata,
                Err(_) => {
                    trace!(tile = %key, path = %path.display(), "no cached file - miss");
                    return Outcome::Miss;
                }
            };

            let modified = match metadata.modified() {
                Ok(modified) => modified,
                Err(e) => {
                    warn!(
                        tile = %key,
                        path = %path.display(),
                        error = %e,
                        "could not read cache file mtime - miss"
                    );
                    return Outcome::Miss;
                }
            };

            // An mtime in the future (clock skew) counts as brand new.
            let age = SystemTime::now()
                .duration_since(modified)
                .unwrap_or(Duration::ZERO);

            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(
                        tile = %key,
                        path = %path.display(),
                        error = %e,
                        "failed to read cache file - miss"
                    );
                    return Outcome::Miss;
                }
            };

            let image = match source.decode(&bytes) {
                Ok(image) => image,
                Err(e) => {
                    warn!(
                        tile = %key,
                        path = %path.display(),
                        error = %e,
                        "failed to decode cache file - miss"
                    );
                    return Outcome::Miss;
                }
            };

            // Strict less-than: a file exactly at the threshold is expired.
            if age < self.max_cached_file_age {
                trace!(tile = %key, age_secs = age.as_secs(), "fresh cache file - hit");
                Outcome::Hit(image)
            } else {
                debug!(
                    tile = %key,
                    age_secs = age.as_secs(),
                    "expired cache file - publishing candidate"
                );
                Outcome::Candidate(image)
            }
        })
    }
}
