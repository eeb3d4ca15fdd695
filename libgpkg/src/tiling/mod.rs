#![allow(clippy::module_name_repetitions)]

pub(crate) mod builder;
pub(crate) mod cache;
pub(crate) mod crs;
pub(crate) mod range;
pub(crate) mod raster;
pub(crate) mod scheme;
pub(crate) mod store;

use std::fmt::Display;

pub use builder::{
    composite, ImageFormat, PyramidConfig, PyramidLayout, Quadrant, TileBuilder, TileHandle,
    TileKind, TileStream,
};
pub use cache::TileCache;
pub use crs::{
    profile_for, BoundingBox, Coordinate, Crs, CrsProfile, EllipsoidalMercator, GlobalGeodetic,
    SphericalMercator, TileOrigin,
};
pub use range::{
    calculate_tile_ranges, maximal_zoom, minimal_zoom, zoom_envelope, TileRange, TileRanges,
    ZoomEnvelope,
};
pub use raster::{Raster, RasterRead};
pub use scheme::{TileMatrixDimensions, TileScheme, ZoomTimesTwo, DEFAULT_MAX_ZOOM};
pub use store::{DirectoryTileStore, GeoPackageTileStore, TileStore};

/// Address of one tile in a pyramid
///
/// Displays as `zoom/column/row`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    /// zoom level
    pub zoom: u8,
    /// column within the matrix at `zoom`
    pub column: u32,
    /// row within the matrix at `zoom`
    pub row: u32,
}

impl TileKey {
    /// Creates a new [`TileKey`]
    #[must_use]
    pub const fn new(zoom: u8, column: u32, row: u32) -> Self {
        Self { zoom, column, row }
    }
}

impl Display for TileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.column, self.row)
    }
}
