use std::collections::BTreeMap;

use itertools::iproduct;
use tracing::{debug, instrument};

use crate::{
    tiling::{
        crs::{BoundingBox, CrsProfile, TileOrigin},
        scheme::{TileMatrixDimensions, TileScheme},
    },
    Error, Result,
};

/// Slack applied when comparing resolutions, to absorb floating point noise
const RESOLUTION_EPSILON: f64 = 1e-9;

/// An inclusive rectangle of tile indices at one zoom level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileRange {
    min_column: u32,
    min_row: u32,
    max_column: u32,
    max_row: u32,
}

impl TileRange {
    /// Creates a new [`TileRange`]
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTileScheme`] if a minimum is greater than its maximum
    pub fn new(min_column: u32, min_row: u32, max_column: u32, max_row: u32) -> Result<Self> {
        if min_column > max_column || min_row > max_row {
            return Err(Error::InvalidTileScheme(format!(
                "invalid tile range columns {min_column}..={max_column}, rows {min_row}..={max_row}"
            )));
        }
        Ok(Self {
            min_column,
            min_row,
            max_column,
            max_row,
        })
    }

    /// Returns the lowest column
    #[must_use]
    pub const fn min_column(&self) -> u32 {
        self.min_column
    }

    /// Returns the lowest row
    #[must_use]
    pub const fn min_row(&self) -> u32 {
        self.min_row
    }

    /// Returns the highest column
    #[must_use]
    pub const fn max_column(&self) -> u32 {
        self.max_column
    }

    /// Returns the highest row
    #[must_use]
    pub const fn max_row(&self) -> u32 {
        self.max_row
    }

    /// Returns the number of columns covered
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.max_column - self.min_column + 1
    }

    /// Returns the number of rows covered
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.max_row - self.min_row + 1
    }

    /// Returns the number of tiles covered
    #[must_use]
    pub fn tile_count(&self) -> u64 {
        u64::from(self.width()) * u64::from(self.height())
    }

    /// Returns true if the range covers exactly one tile
    #[must_use]
    pub const fn is_single_tile(&self) -> bool {
        self.min_column == self.max_column && self.min_row == self.max_row
    }

    /// Returns true if `(column, row)` lies inside the range
    #[must_use]
    pub const fn contains(&self, column: u32, row: u32) -> bool {
        column >= self.min_column
            && column <= self.max_column
            && row >= self.min_row
            && row <= self.max_row
    }

    /// Iterates over every `(column, row)` of the range, column-major
    pub fn tiles(&self) -> impl Iterator<Item = (u32, u32)> {
        iproduct!(
            self.min_column..=self.max_column,
            self.min_row..=self.max_row
        )
    }
}

/// Per zoom level tile ranges covering a dataset
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TileRanges {
    ranges: BTreeMap<u8, TileRange>,
}

impl TileRanges {
    /// Returns the range at `zoom`
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZoomRangeNotFound`] if no range was calculated for `zoom`
    pub fn range(&self, zoom: u8) -> Result<&TileRange> {
        self.ranges.get(&zoom).ok_or(Error::ZoomRangeNotFound(zoom))
    }

    /// Iterates over `(zoom, range)` pairs in ascending zoom order
    pub fn iter(&self) -> impl Iterator<Item = (u8, &TileRange)> {
        self.ranges.iter().map(|(zoom, range)| (*zoom, range))
    }

    /// Returns the lowest zoom level with a range
    #[must_use]
    pub fn first_zoom(&self) -> Option<u8> {
        self.ranges.keys().next().copied()
    }

    /// Returns the number of zoom levels with a range
    #[must_use]
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Returns true if no ranges were calculated
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// The inclusive interval of zoom levels a pyramid is built over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoomEnvelope {
    minimal: u8,
    maximal: u8,
}

impl ZoomEnvelope {
    /// Creates a new [`ZoomEnvelope`]
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTileScheme`] if `minimal > maximal`
    pub fn new(minimal: u8, maximal: u8) -> Result<Self> {
        if minimal > maximal {
            return Err(Error::InvalidTileScheme(format!(
                "minimal zoom {minimal} is greater than maximal zoom {maximal}"
            )));
        }
        Ok(Self { minimal, maximal })
    }

    /// The coarsest zoom level, holding the root tile(s)
    #[must_use]
    pub const fn minimal(&self) -> u8 {
        self.minimal
    }

    /// The finest zoom level, holding the leaf tiles
    #[must_use]
    pub const fn maximal(&self) -> u8 {
        self.maximal
    }
}

/// Computes, for every zoom level of `scheme`, the tiles whose footprint intersects
/// `dataset_bounds`
///
/// Indices are clamped to the matrix at each zoom level, so datasets reaching past
/// `crs_bounds` never produce negative or overflowing ranges.
///
/// The range at the zoom chosen by [`minimal_zoom`] is a single tile, except when the dataset
/// straddles a tile boundary of the coarsest matrix (e.g. the central meridian of the 2x1
/// geodetic root). Then the coarsest range keeps several tiles, each the root of its own tree.
///
/// # Errors
///
/// Returns an error if `scheme` cannot produce dimensions for one of its own zoom levels
#[instrument(skip(scheme, profile))]
pub fn calculate_tile_ranges(
    scheme: &dyn TileScheme,
    dataset_bounds: &BoundingBox,
    crs_bounds: &BoundingBox,
    profile: &dyn CrsProfile,
    origin: TileOrigin,
) -> Result<TileRanges> {
    let mut ranges = BTreeMap::new();
    for zoom in scheme.zoom_levels() {
        let dimensions = scheme.dimensions(zoom)?;
        let (column_a, row_a) =
            profile.tile_position(dataset_bounds.top_left(), crs_bounds, dimensions, origin);
        let (column_b, row_b) =
            profile.tile_position(dataset_bounds.bottom_right(), crs_bounds, dimensions, origin);

        let (min_column, max_column) = covering_indices(column_a, column_b, dimensions.width());
        let (min_row, max_row) = covering_indices(row_a, row_b, dimensions.height());
        ranges.insert(
            zoom,
            TileRange {
                min_column,
                min_row,
                max_column,
                max_row,
            },
        );
    }
    Ok(TileRanges { ranges })
}

/// Turns two fractional tile positions into the clamped, inclusive index interval they cover
///
/// An edge that falls exactly on a tile boundary does not pull in the following tile.
#[allow(clippy::cast_possible_truncation)]
fn covering_indices(a: f64, b: f64, count: u32) -> (u32, u32) {
    let last = i64::from(count) - 1;
    let low = a.min(b).floor() as i64;
    let high = (a.max(b).ceil() as i64 - 1).max(low);
    let clamp = |v: i64| u32::try_from(v.clamp(0, last)).unwrap_or(0);
    (clamp(low), clamp(high))
}

/// Returns the coarsest zoom level whose tile pixels are at least as fine as the raster's
///
/// `native_resolution` is the raster's CRS units per pixel (the finer of its two axes).
/// `resolution_factor` scales the native resolution before the comparison; values above one
/// stop the pyramid earlier, values below one allow some upsampling. If no level is fine enough,
/// the deepest level of the scheme is returned.
///
/// # Errors
///
/// Returns an error if `scheme` cannot produce dimensions for one of its own zoom levels
pub fn maximal_zoom(
    scheme: &dyn TileScheme,
    crs_bounds: &BoundingBox,
    native_resolution: f64,
    tile_size: u32,
    resolution_factor: f64,
) -> Result<u8> {
    let threshold = native_resolution * resolution_factor * (1.0 + RESOLUTION_EPSILON);
    let tile_size = f64::from(tile_size);
    let levels = scheme.zoom_levels();
    for zoom in levels.clone() {
        let dimensions = scheme.dimensions(zoom)?;
        let pixel_size = tile_pixel_size(crs_bounds, dimensions, tile_size);
        if pixel_size <= threshold {
            debug!(zoom, pixel_size, native_resolution, "selected maximal zoom");
            return Ok(zoom);
        }
    }
    Ok(*levels.end())
}

fn tile_pixel_size(crs_bounds: &BoundingBox, dimensions: TileMatrixDimensions, tile_size: f64) -> f64 {
    let x = crs_bounds.width() / f64::from(dimensions.width()) / tile_size;
    let y = crs_bounds.height() / f64::from(dimensions.height()) / tile_size;
    x.max(y)
}

/// Returns the zoom level holding the root of the pyramid
///
/// Walking from `maximal` toward coarser levels, this is the first level at which the dataset
/// collapses into a single tile. If no level does (the dataset straddles a boundary of the
/// coarsest matrix), the coarsest level is returned and the pyramid has several roots.
///
/// # Errors
///
/// Returns [`Error::ZoomRangeNotFound`] if `maximal` has no range
pub fn minimal_zoom(ranges: &TileRanges, maximal: u8) -> Result<u8> {
    let first = ranges.first_zoom().ok_or(Error::ZoomRangeNotFound(maximal))?;
    ranges.range(maximal)?;
    for zoom in (first..=maximal).rev() {
        if ranges.range(zoom)?.is_single_tile() {
            return Ok(zoom);
        }
    }
    Ok(first)
}

/// Computes the [`ZoomEnvelope`] for a dataset
///
/// # Errors
///
/// See [`maximal_zoom`] and [`minimal_zoom`]
pub fn zoom_envelope(
    scheme: &dyn TileScheme,
    ranges: &TileRanges,
    crs_bounds: &BoundingBox,
    native_resolution: f64,
    tile_size: u32,
    resolution_factor: f64,
) -> Result<ZoomEnvelope> {
    let maximal = maximal_zoom(
        scheme,
        crs_bounds,
        native_resolution,
        tile_size,
        resolution_factor,
    )?;
    let minimal = minimal_zoom(ranges, maximal)?;
    ZoomEnvelope::new(minimal, maximal)
}
