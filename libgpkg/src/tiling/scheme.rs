use std::ops::RangeInclusive;

use crate::{tiling::crs::CrsProfile, Error, Result};

/// The highest zoom level a [`ZoomTimesTwo`] scheme supports
pub const DEFAULT_MAX_ZOOM: u8 = 31;

/// Number of columns and rows of a tile matrix at one zoom level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileMatrixDimensions {
    width: u32,
    height: u32,
}

impl TileMatrixDimensions {
    /// A single tile
    pub const ONE_BY_ONE: Self = Self {
        width: 1,
        height: 1,
    };

    /// Two columns, one row
    pub const TWO_BY_ONE: Self = Self {
        width: 2,
        height: 1,
    };

    /// Creates new [`TileMatrixDimensions`]
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTileScheme`] if either dimension is zero
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidTileScheme(format!(
                "matrix dimensions must be at least 1x1, got {width}x{height}"
            )));
        }
        Ok(Self { width, height })
    }

    /// Returns the number of columns
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Returns the number of rows
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Returns the number of tiles in the matrix
    #[must_use]
    pub fn tile_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// A mapping from zoom level to tile matrix dimensions
pub trait TileScheme {
    /// Returns the matrix dimensions at `zoom`
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidZoom`] if `zoom` is not part of the scheme
    fn dimensions(&self, zoom: u8) -> Result<TileMatrixDimensions>;

    /// Returns every zoom level of the scheme, ascending
    fn zoom_levels(&self) -> RangeInclusive<u8>;
}

/// A scheme whose matrix width and height double with every zoom level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoomTimesTwo {
    min_zoom: u8,
    max_zoom: u8,
    base: TileMatrixDimensions,
}

impl ZoomTimesTwo {
    /// Creates a new [`ZoomTimesTwo`] scheme with `base` dimensions at `min_zoom`
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTileScheme`] if `min_zoom > max_zoom` or if the matrix at
    /// `max_zoom` would not be addressable with 32-bit indices
    pub fn new(min_zoom: u8, max_zoom: u8, base: TileMatrixDimensions) -> Result<Self> {
        if min_zoom > max_zoom {
            return Err(Error::InvalidTileScheme(format!(
                "minimum zoom {min_zoom} is greater than maximum zoom {max_zoom}"
            )));
        }
        let span = u32::from(max_zoom - min_zoom);
        let largest = u64::from(base.width.max(base.height));
        if span > 31 || largest << span > u64::from(u32::MAX) {
            return Err(Error::InvalidTileScheme(format!(
                "a {}x{} base matrix cannot double {span} times",
                base.width, base.height
            )));
        }
        Ok(Self {
            min_zoom,
            max_zoom,
            base,
        })
    }

    /// Creates the scheme used for `profile`, starting at zoom level zero with the profile's
    /// base dimensions and going as deep as 32-bit indices allow
    #[must_use]
    pub fn for_profile(profile: &dyn CrsProfile) -> Self {
        let base = profile.base_dimensions();
        let headroom = base.width.max(base.height).leading_zeros();
        let max_zoom = u8::try_from(headroom)
            .unwrap_or(DEFAULT_MAX_ZOOM)
            .min(DEFAULT_MAX_ZOOM);
        Self {
            min_zoom: 0,
            max_zoom,
            base,
        }
    }

    /// Returns the lowest zoom level
    #[must_use]
    pub const fn min_zoom(&self) -> u8 {
        self.min_zoom
    }

    /// Returns the highest zoom level
    #[must_use]
    pub const fn max_zoom(&self) -> u8 {
        self.max_zoom
    }
}

impl TileScheme for ZoomTimesTwo {
    fn dimensions(&self, zoom: u8) -> Result<TileMatrixDimensions> {
        if !self.zoom_levels().contains(&zoom) {
            return Err(Error::InvalidZoom {
                zoom,
                min: self.min_zoom,
                max: self.max_zoom,
            });
        }
        let factor = 1_u32 << (zoom - self.min_zoom);
        Ok(TileMatrixDimensions {
            width: self.base.width * factor,
            height: self.base.height * factor,
        })
    }

    fn zoom_levels(&self) -> RangeInclusive<u8> {
        self.min_zoom..=self.max_zoom
    }
}
