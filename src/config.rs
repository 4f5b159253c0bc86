//! Library-wide defaults.
//!
//! These mirror the classic tuning of the map viewer this pipeline serves:
//! a small fixed worker count per provider tier and a short bounded queue,
//! since a deep backlog of scrolled-away tiles is worthless work.

use std::path::PathBuf;
use std::time::Duration;

/// Default maximum age a cached tile file may have and still be served as a
/// terminal hit. Older files are still displayed, but only as candidates.
pub const DEFAULT_MAXIMUM_CACHED_FILE_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default worker count for the filesystem cache provider.
pub const FILESYSTEM_WORKER_COUNT: usize = 8;

/// Default queue capacity for the filesystem cache provider.
pub const FILESYSTEM_QUEUE_CAPACITY: usize = 40;

/// Default worker count for a download (network) provider tier.
pub const DOWNLOAD_WORKER_COUNT: usize = 8;

/// Default queue capacity for a download (network) provider tier.
pub const DOWNLOAD_QUEUE_CAPACITY: usize = 40;

/// Default base directory for the filesystem tile cache.
///
/// Falls back to a relative `tilechain` directory when the platform exposes
/// no user cache directory.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tilechain")
        .join("tiles")
}
