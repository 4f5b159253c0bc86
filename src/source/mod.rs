//! Tile source descriptors.
//!
//! A tile source describes one map style/provider: its zoom bounds, tile
//! size, file-naming rule (used by the filesystem cache tier) and URL
//! template (descriptor metadata; the HTTP transport itself lives elsewhere).
//!
//! The built-in set mirrors the classic OpenStreetMap renderer catalogue
//! (Mapnik, Osmarender, CycleMap, ...) plus a few overlay-only sources that
//! are never offered as standalone base maps.
//!
//! # Example
//!
//! ```
//! use tilechain::source::{TileSource, TileSourceRegistry};
//!
//! let registry = TileSourceRegistry::with_default_sources();
//! let mapnik = registry.lookup_by_name("Mapnik").unwrap();
//! assert_eq!(mapnik.min_zoom(), 0);
//! assert_eq!(mapnik.max_zoom(), 18);
//! ```

mod registry;

pub use registry::{RegistryError, TileSourceRegistry};

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::tile::{TileImage, TileKey};

/// Errors raised by tile source construction and decoding.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Zoom bounds are inverted (`min_zoom > max_zoom`).
    #[error("inverted zoom bounds: min {min} > max {max}")]
    InvertedZoomBounds { min: u8, max: u8 },

    /// Raw bytes could not be decoded into a displayable image.
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

/// Descriptor for one map tile source.
///
/// The filesystem cache tier depends only on [`tile_path`](Self::tile_path)
/// (the source's file-naming rule), [`decode`](Self::decode) and the zoom
/// bounds; everything else is registry metadata.
///
/// Implementations must be `Send + Sync`: the descriptor is shared across
/// worker tasks and read on every resolution attempt.
pub trait TileSource: Send + Sync {
    /// Unique, case-sensitive source name.
    fn name(&self) -> &str;

    /// Unique, stable ordinal for positional lookup.
    fn ordinal(&self) -> u32;

    /// Lowest zoom level served (inclusive).
    fn min_zoom(&self) -> u8;

    /// Highest zoom level served (inclusive).
    fn max_zoom(&self) -> u8;

    /// Edge length of one tile in pixels.
    fn tile_size(&self) -> u32;

    /// File extension for cached tiles, including the dot (e.g. `.png`).
    fn file_extension(&self) -> &str;

    /// True for overlay-only sources that are not independently selectable
    /// as a base map. Overlays are excluded from [`TileSourceRegistry::all`].
    fn overlay(&self) -> bool {
        false
    }

    /// Relative cache path for a tile, per this source's naming rule.
    ///
    /// The filesystem cache stores the tile at
    /// `<base_cache_dir>/<tile_path(key)>`.
    fn tile_path(&self, key: &TileKey) -> PathBuf;

    /// Remote URL for a tile. Descriptor metadata only; fetching is a
    /// separate provider's concern.
    fn tile_url(&self, key: &TileKey) -> String;

    /// Decodes raw tile bytes into a displayable image.
    fn decode(&self, bytes: &[u8]) -> Result<TileImage, SourceError> {
        let image = image::load_from_memory(bytes)?;
        Ok(Arc::new(image))
    }
}

/// A tile source following the standard `{z}/{x}/{y}` slippy-map layout.
///
/// Covers every built-in source. Tiles are cached under
/// `<name>/<zoom>/<x>/<y><ext>` and fetched from
/// `<base_url><zoom>/<x>/<y><ext>`; when several mirror base URLs are
/// configured the mirror is chosen deterministically from the tile
/// coordinates.
pub struct XyzTileSource {
    name: String,
    ordinal: u32,
    min_zoom: u8,
    max_zoom: u8,
    tile_size: u32,
    file_extension: String,
    base_urls: Vec<String>,
    overlay: bool,
}

impl XyzTileSource {
    /// Creates a new XYZ tile source.
    ///
    /// # Arguments
    ///
    /// * `name` - Unique source name
    /// * `ordinal` - Unique, stable ordinal
    /// * `min_zoom` / `max_zoom` - Inclusive zoom bounds
    /// * `tile_size` - Tile edge length in pixels
    /// * `file_extension` - Cached file extension, including the dot
    /// * `base_urls` - One or more mirror base URLs (may be empty for
    ///   cache-only sources)
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::InvertedZoomBounds`] if `min_zoom > max_zoom`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        ordinal: u32,
        min_zoom: u8,
        max_zoom: u8,
        tile_size: u32,
        file_extension: impl Into<String>,
        base_urls: Vec<String>,
    ) -> Result<Self, SourceError> {
        if min_zoom > max_zoom {
            return Err(SourceError::InvertedZoomBounds {
                min: min_zoom,
                max: max_zoom,
            });
        }

        Ok(Self {
            name: name.into(),
            ordinal,
            min_zoom,
            max_zoom,
            tile_size,
            file_extension: file_extension.into(),
            base_urls,
            overlay: false,
        })
    }

    /// Marks this source as overlay-only.
    pub fn overlay_only(mut self) -> Self {
        self.overlay = true;
        self
    }

    fn base_url(&self, key: &TileKey) -> &str {
        // Deterministic mirror selection keeps one tile on one mirror,
        // which plays well with intermediary HTTP caches.
        let index = (key.x() as usize + key.y() as usize) % self.base_urls.len();
        &self.base_urls[index]
    }
}

impl TileSource for XyzTileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn ordinal(&self) -> u32 {
        self.ordinal
    }

    fn min_zoom(&self) -> u8 {
        self.min_zoom
    }

    fn max_zoom(&self) -> u8 {
        self.max_zoom
    }

    fn tile_size(&self) -> u32 {
        self.tile_size
    }

    fn file_extension(&self) -> &str {
        &self.file_extension
    }

    fn overlay(&self) -> bool {
        self.overlay
    }

    fn tile_path(&self, key: &TileKey) -> PathBuf {
        PathBuf::from(format!(
            "{}/{}/{}/{}{}",
            self.name,
            key.zoom(),
            key.x(),
            key.y(),
            self.file_extension
        ))
    }

    fn tile_url(&self, key: &TileKey) -> String {
        if self.base_urls.is_empty() {
            return String::new();
        }
        format!(
            "{}{}/{}/{}{}",
            self.base_url(key),
            key.zoom(),
            key.x(),
            key.y(),
            self.file_extension
        )
    }
}

fn xyz(
    name: &str,
    ordinal: u32,
    min_zoom: u8,
    max_zoom: u8,
    base_urls: &[&str],
) -> Arc<dyn TileSource> {
    let source = XyzTileSource::new(
        name,
        ordinal,
        min_zoom,
        max_zoom,
        256,
        ".png",
        base_urls.iter().map(|u| u.to_string()).collect(),
    )
    .expect("built-in source has valid zoom bounds");
    Arc::new(source)
}

/// The built-in base-map sources, in catalogue order.
pub fn default_sources() -> Vec<Arc<dyn TileSource>> {
    vec![
        xyz(
            "Osmarender",
            0,
            0,
            17,
            &["http://tah.openstreetmap.org/Tiles/tile/"],
        ),
        xyz("Mapnik", 1, 0, 18, &["http://tile.openstreetmap.org/"]),
        xyz(
            "CycleMap",
            2,
            0,
            17,
            &[
                "http://a.tile.opencyclemap.org/cycle/",
                "http://b.tile.opencyclemap.org/cycle/",
                "http://c.tile.opencyclemap.org/cycle/",
            ],
        ),
        xyz(
            "OSMPublicTransport",
            3,
            0,
            17,
            &["http://tile.xn--pnvkarte-m4a.de/tilegen/"],
        ),
        xyz("Base", 4, 4, 17, &["http://topo.openstreetmap.de/base/"]),
        xyz("Topo", 5, 4, 17, &["http://topo.openstreetmap.de/topo/"]),
        xyz("Hills", 6, 8, 17, &["http://topo.geofabrik.de/hills/"]),
    ]
}

/// The built-in overlay-only sources. Registered so the cache tier can name
/// their files, but excluded from base-map selection.
pub fn default_overlays() -> Vec<Arc<dyn TileSource>> {
    let overlays = [
        ("Fiets", 100, 3, 16, "http://overlay.openstreetmap.nl/openfietskaart-overlay/"),
        ("BaseNL", 101, 0, 18, "http://overlay.openstreetmap.nl/basemap/"),
        ("RoadsNL", 102, 0, 18, "http://overlay.openstreetmap.nl/roads/"),
    ];

    overlays
        .iter()
        .map(|(name, ordinal, min, max, url)| {
            let source = XyzTileSource::new(
                *name,
                *ordinal,
                *min,
                *max,
                256,
                ".png",
                vec![url.to_string()],
            )
            .expect("built-in overlay has valid zoom bounds")
            .overlay_only();
            Arc::new(source) as Arc<dyn TileSource>
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapnik() -> XyzTileSource {
        XyzTileSource::new(
            "Mapnik",
            1,
            0,
            18,
            256,
            ".png",
            vec!["http://tile.openstreetmap.org/".to_string()],
        )
        .unwrap()
    }

    #[test]
    fn test_inverted_zoom_bounds_rejected() {
        let result = XyzTileSource::new("Broken", 9, 10, 5, 256, ".png", vec![]);
        assert!(matches!(
            result,
            Err(SourceError::InvertedZoomBounds { min: 10, max: 5 })
        ));
    }

    #[test]
    fn test_tile_path_follows_naming_rule() {
        let source = mapnik();
        let key = TileKey::new("Mapnik", 12, 654, 1583);
        assert_eq!(
            source.tile_path(&key),
            PathBuf::from("Mapnik/12/654/1583.png")
        );
    }

    #[test]
    fn test_tile_url() {
        let source = mapnik();
        let key = TileKey::new("Mapnik", 12, 654, 1583);
        assert_eq!(
            source.tile_url(&key),
            "http://tile.openstreetmap.org/12/654/1583.png"
        );
    }

    #[test]
    fn test_tile_url_empty_without_base_urls() {
        let source = XyzTileSource::new("CacheOnly", 50, 0, 18, 256, ".png", vec![]).unwrap();
        let key = TileKey::new("CacheOnly", 3, 1, 2);
        assert_eq!(source.tile_url(&key), "");
    }

    #[test]
    fn test_mirror_selection_is_deterministic() {
        let source = XyzTileSource::new(
            "CycleMap",
            2,
            0,
            17,
            256,
            ".png",
            vec![
                "http://a.example.org/".to_string(),
                "http://b.example.org/".to_string(),
            ],
        )
        .unwrap();

        let key = TileKey::new("CycleMap", 10, 3, 4);
        let first = source.tile_url(&key);
        let second = source.tile_url(&key);
        assert_eq!(first, second);

        // (3 + 4) % 2 == 1 -> mirror b
        assert!(first.starts_with("http://b.example.org/"));
    }

    #[test]
    fn test_decode_valid_png() {
        let source = mapnik();

        let mut bytes = Vec::new();
        image::DynamicImage::new_rgba8(1, 1)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();

        let decoded = source.decode(&bytes).unwrap();
        use image::GenericImageView;
        assert_eq!(decoded.dimensions(), (1, 1));
    }

    #[test]
    fn test_decode_garbage_fails() {
        let source = mapnik();
        let result = source.decode(&[0x00, 0x01, 0x02, 0x03]);
        assert!(matches!(result, Err(SourceError::Decode(_))));
    }

    #[test]
    fn test_default_sources_catalogue() {
        let sources = default_sources();
        assert_eq!(sources.len(), 7);
        assert!(sources.iter().all(|s| !s.overlay()));
        assert_eq!(sources[1].name(), "Mapnik");
        assert_eq!(sources[1].ordinal(), 1);
    }

    #[test]
    fn test_default_overlays_flagged() {
        let overlays = default_overlays();
        assert_eq!(overlays.len(), 3);
        assert!(overlays.iter().all(|s| s.overlay()));
    }

    #[test]
    fn test_overlay_marker() {
        let source = XyzTileSource::new("X", 10, 0, 10, 256, ".png", vec![])
            .unwrap()
            .overlay_only();
        assert!(source.overlay());
    }
}
