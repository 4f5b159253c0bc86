//! Tile provider capability interface.
//!
//! A provider is anything that can attempt to resolve one tile request into
//! an [`Outcome`](crate::tile::Outcome): the filesystem cache tier here, a
//! network downloader elsewhere. Providers are independent of each other;
//! the chain coordinator decides what a miss or a candidate means for the
//! request as a whole.

mod filesystem;

pub use filesystem::FilesystemCacheProvider;

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use crate::chain::TileRequest;
use crate::tile::Outcome;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One provider's task body: attempt to resolve a tile request.
///
/// Implementations must tolerate concurrent invocation for different
/// requests on the same instance, and must absorb anything that prevents
/// *this one tile* from resolving as [`Outcome::Miss`] rather than failing
/// the pipeline.
pub trait TileResolver: Send + Sync + 'static {
    /// Short diagnostic name, e.g. `"filesystem-cache"`.
    fn name(&self) -> &str;

    /// Attempts to resolve the request. Returns exactly one outcome.
    fn resolve<'a>(&'a self, request: &'a TileRequest) -> BoxFuture<'a, Outcome>;
}

/// Probe for whether the local cache medium is currently accessible.
///
/// A soft-failure input: an unavailable medium turns every cache lookup into
/// a miss, it never raises an error.
pub trait StorageProbe: Send + Sync {
    /// True if the cache medium can be read right now.
    fn is_available(&self) -> bool;
}

/// Probe that reports a fixed directory as available while it exists.
pub struct PathProbe {
    path: PathBuf,
}

impl PathProbe {
    /// Creates a probe watching the given directory.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StorageProbe for PathProbe {
    fn is_available(&self) -> bool {
        self.path.is_dir()
    }
}

/// Probe that always reports storage as available.
pub struct AlwaysAvailable;

impl StorageProbe for AlwaysAvailable {
    fn is_available(&self) -> bool {
        true
    }
}
