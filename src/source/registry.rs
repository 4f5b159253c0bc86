//! Registry of known tile sources.
//!
//! An explicit instance constructed at startup and passed by reference to
//! anything that needs lookup. Read-heavy and write-rare: registration
//! normally happens once during bootstrap, lookups happen on every tile
//! request, so the source list sits behind a `parking_lot::RwLock`.

use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;

use super::TileSource;

/// Errors raised by registry operations.
///
/// These indicate caller misconfiguration and are surfaced synchronously,
/// unlike per-tile resolution failures which are absorbed as misses.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Lookup by name or ordinal found no matching source.
    #[error("no such tile source: {0}")]
    SourceNotFound(String),

    /// Registration conflicts with an existing source name or ordinal.
    #[error("duplicate tile source: {0}")]
    DuplicateSource(String),
}

struct RegistryInner {
    /// Registered sources in insertion order.
    sources: Vec<Arc<dyn TileSource>>,
    /// Ordinal of the designated default source, if one has been chosen.
    default_ordinal: Option<u32>,
}

/// The set of known tile-source descriptors.
///
/// Names and ordinals are unique across the registry. [`all`](Self::all)
/// yields base-map sources in insertion order; overlay-only sources are
/// registered (so the cache tier can resolve their naming rules) but never
/// offered for base-map selection.
///
/// # Example
///
/// ```
/// use tilechain::source::TileSourceRegistry;
///
/// let registry = TileSourceRegistry::with_default_sources();
/// let mapnik = registry.lookup_by_name("Mapnik").unwrap();
/// let same = registry.lookup_by_ordinal(mapnik.ordinal()).unwrap();
/// assert_eq!(mapnik.name(), same.name());
/// ```
pub struct TileSourceRegistry {
    inner: RwLock<RegistryInner>,
}

impl TileSourceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                sources: Vec::new(),
                default_ordinal: None,
            }),
        }
    }

    /// Creates a registry pre-populated with the built-in source catalogue,
    /// overlays included, with Mapnik as the default source.
    pub fn with_default_sources() -> Self {
        let registry = Self::new();

        for source in super::default_sources() {
            registry
                .register(source)
                .expect("built-in catalogue has unique names and ordinals");
        }
        for overlay in super::default_overlays() {
            registry
                .register(overlay)
                .expect("built-in overlays have unique names and ordinals");
        }

        registry
            .set_default("Mapnik")
            .expect("Mapnik is part of the built-in catalogue");

        registry
    }

    /// Registers a tile source.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateSource`] if a source with the same
    /// name or the same ordinal is already registered.
    pub fn register(&self, source: Arc<dyn TileSource>) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();

        for existing in &inner.sources {
            if existing.name() == source.name() {
                return Err(RegistryError::DuplicateSource(format!(
                    "name {:?}",
                    source.name()
                )));
            }
            if existing.ordinal() == source.ordinal() {
                return Err(RegistryError::DuplicateSource(format!(
                    "ordinal {} ({:?} vs {:?})",
                    source.ordinal(),
                    existing.name(),
                    source.name()
                )));
            }
        }

        debug!(
            source = source.name(),
            ordinal = source.ordinal(),
            overlay = source.overlay(),
            "registered tile source"
        );
        inner.sources.push(source);
        Ok(())
    }

    /// Looks up a source by exact, case-sensitive name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::SourceNotFound`] if absent.
    pub fn lookup_by_name(&self, name: &str) -> Result<Arc<dyn TileSource>, RegistryError> {
        self.inner
            .read()
            .sources
            .iter()
            .find(|s| s.name() == name)
            .cloned()
            .ok_or_else(|| RegistryError::SourceNotFound(name.to_string()))
    }

    /// Looks up a source by ordinal.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::SourceNotFound`] if absent.
    pub fn lookup_by_ordinal(&self, ordinal: u32) -> Result<Arc<dyn TileSource>, RegistryError> {
        self.inner
            .read()
            .sources
            .iter()
            .find(|s| s.ordinal() == ordinal)
            .cloned()
            .ok_or_else(|| RegistryError::SourceNotFound(format!("ordinal {}", ordinal)))
    }

    /// All base-map sources in insertion order. Overlay-only sources are
    /// excluded.
    pub fn all(&self) -> Vec<Arc<dyn TileSource>> {
        self.inner
            .read()
            .sources
            .iter()
            .filter(|s| !s.overlay())
            .cloned()
            .collect()
    }

    /// Designates the default source by name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::SourceNotFound`] if no such source is
    /// registered.
    pub fn set_default(&self, name: &str) -> Result<(), RegistryError> {
        let source = self.lookup_by_name(name)?;
        self.inner.write().default_ordinal = Some(source.ordinal());
        Ok(())
    }

    /// The designated default source.
    ///
    /// Falls back to the first registered base-map source if no default has
    /// been designated explicitly.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::SourceNotFound`] if the registry holds no
    /// base-map source at all.
    pub fn default_source(&self) -> Result<Arc<dyn TileSource>, RegistryError> {
        let default_ordinal = self.inner.read().default_ordinal;
        if let Some(ordinal) = default_ordinal {
            return self.lookup_by_ordinal(ordinal);
        }

        self.inner
            .read()
            .sources
            .iter()
            .find(|s| !s.overlay())
            .cloned()
            .ok_or_else(|| RegistryError::SourceNotFound("default".to_string()))
    }

    /// Number of registered sources, overlays included.
    pub fn len(&self) -> usize {
        self.inner.read().sources.len()
    }

    /// True if no sources are registered.
    pub fn is_empty(&self) -> bool {
        self.inner.read().sources.is_empty()
    }
}

impl Default for TileSourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
