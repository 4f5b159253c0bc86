//! Tile addressing and resolution outcome types.
//!
//! A [`TileKey`] names a single raster tile within a tile source. Providers
//! answer a request for a key with an [`Outcome`]: a fresh [`Outcome::Hit`],
//! a usable-but-stale [`Outcome::Candidate`], or [`Outcome::Miss`].

use std::fmt;
use std::sync::Arc;

/// A decoded, displayable tile image.
///
/// Wrapped in `Arc` so a single decode can be cloned cheaply into a request's
/// display slot and handed to the caller without copying pixel data.
pub type TileImage = Arc<image::DynamicImage>;

/// Uniquely identifies a tile within a tile source.
///
/// Equality and hashing are structural: two keys naming the same
/// (source, zoom, x, y) are the same tile.
///
/// # Example
///
/// ```
/// use tilechain::TileKey;
///
/// let key = TileKey::new("Mapnik", 12, 654, 1583);
/// assert_eq!(key.source(), "Mapnik");
/// assert_eq!(key.zoom(), 12);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
    source: String,
    zoom: u8,
    x: u32,
    y: u32,
}

impl TileKey {
    /// Creates a new tile key.
    ///
    /// # Arguments
    ///
    /// * `source` - Tile source name (registry lookup key)
    /// * `zoom` - Zoom level
    /// * `x` - Tile column (west to east)
    /// * `y` - Tile row (north to south)
    pub fn new(source: impl Into<String>, zoom: u8, x: u32, y: u32) -> Self {
        Self {
            source: source.into(),
            zoom,
            x,
            y,
        }
    }

    /// The tile source name.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The zoom level.
    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    /// The tile column.
    pub fn x(&self) -> u32 {
        self.x
    }

    /// The tile row.
    pub fn y(&self) -> u32 {
        self.y
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}/{}", self.source, self.zoom, self.x, self.y)
    }
}

/// Result of one provider attempt for one tile request.
///
/// A provider returns exactly one outcome per attempt:
///
/// - `Hit` - a fresh image; satisfies and terminates the chain
/// - `Candidate` - a stale image that may be displayed now, but the chain
///   continues to the next provider looking for a fresher copy
/// - `Miss` - nothing usable; the chain advances silently
#[derive(Clone)]
pub enum Outcome {
    /// Fresh image. Terminates the provider chain.
    Hit(TileImage),

    /// Stale-but-displayable image. The chain advances as if this were a miss.
    Candidate(TileImage),

    /// No usable image from this provider.
    Miss,
}

impl Outcome {
    /// Returns true for `Hit`.
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }

    /// Returns true for `Candidate`.
    pub fn is_candidate(&self) -> bool {
        matches!(self, Self::Candidate(_))
    }

    /// Returns true for `Miss`.
    pub fn is_miss(&self) -> bool {
        matches!(self, Self::Miss)
    }

    /// Returns the image carried by `Hit` or `Candidate`.
    pub fn image(&self) -> Option<&TileImage> {
        match self {
            Self::Hit(image) | Self::Candidate(image) => Some(image),
            Self::Miss => None,
        }
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use image::GenericImageView;
        match self {
            Self::Hit(image) => {
                let (w, h) = image.dimensions();
                write!(f, "Hit({}x{})", w, h)
            }
            Self::Candidate(image) => {
                let (w, h) = image.dimensions();
                write!(f, "Candidate({}x{})", w, h)
            }
            Self::Miss => write!(f, "Miss"),
        }
    }
}
