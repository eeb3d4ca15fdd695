use std::{fmt::Display, str::FromStr};

use strum::{Display as StrumDisplay, EnumIter, EnumString, IntoStaticStr};

use crate::{tiling::scheme::TileMatrixDimensions, Error, Result};

/// A coordinate reference system, identified by an authority and a numeric identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Crs {
    authority: String,
    identifier: i32,
}

impl Crs {
    /// Creates a new [`Crs`]
    #[must_use]
    pub fn new(authority: impl Into<String>, identifier: i32) -> Self {
        Self {
            authority: authority.into(),
            identifier,
        }
    }

    /// Creates an `EPSG` [`Crs`]
    #[must_use]
    pub fn epsg(identifier: i32) -> Self {
        Self::new("EPSG", identifier)
    }

    /// Returns the authority, e.g. `EPSG`
    #[must_use]
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Returns the identifier within the authority
    #[must_use]
    pub const fn identifier(&self) -> i32 {
        self.identifier
    }
}

impl Display for Crs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.authority, self.identifier)
    }
}

impl FromStr for Crs {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (authority, identifier) = s
            .split_once(':')
            .ok_or_else(|| Error::Parse(format!("expected AUTHORITY:ID, got '{s}'")))?;
        let identifier = identifier
            .trim()
            .parse()
            .map_err(|e| Error::Parse(format!("invalid CRS identifier '{identifier}': {e}")))?;
        Ok(Self::new(authority.trim().to_uppercase(), identifier))
    }
}

/// A point in CRS units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    /// x (easting/longitude)
    pub x: f64,
    /// y (northing/latitude)
    pub y: f64,
}

impl Coordinate {
    /// Creates a new [`Coordinate`]
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// An axis aligned rectangle in CRS units
///
/// `min <= max` holds on both axes for every constructed value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    min_x: f64,
    min_y: f64,
    max_x: f64,
    max_y: f64,
}

impl BoundingBox {
    /// Creates a new [`BoundingBox`]
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBoundingBox`] if a min value is greater than its max value or any
    /// value is not finite
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Result<Self> {
        let finite = [min_x, min_y, max_x, max_y].iter().all(|v| v.is_finite());
        if !finite || min_x > max_x || min_y > max_y {
            return Err(Error::InvalidBoundingBox {
                min_x,
                min_y,
                max_x,
                max_y,
            });
        }
        Ok(Self {
            min_x,
            min_y,
            max_x,
            max_y,
        })
    }

    /// Returns the minimum x value
    #[must_use]
    pub const fn min_x(&self) -> f64 {
        self.min_x
    }

    /// Returns the minimum y value
    #[must_use]
    pub const fn min_y(&self) -> f64 {
        self.min_y
    }

    /// Returns the maximum x value
    #[must_use]
    pub const fn max_x(&self) -> f64 {
        self.max_x
    }

    /// Returns the maximum y value
    #[must_use]
    pub const fn max_y(&self) -> f64 {
        self.max_y
    }

    /// Returns the extent along the x axis
    #[must_use]
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Returns the extent along the y axis
    #[must_use]
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Returns the upper left corner
    #[must_use]
    pub const fn top_left(&self) -> Coordinate {
        Coordinate::new(self.min_x, self.max_y)
    }

    /// Returns the lower right corner
    #[must_use]
    pub const fn bottom_right(&self) -> Coordinate {
        Coordinate::new(self.max_x, self.min_y)
    }

    /// Returns true if the two boxes share some area
    ///
    /// Boxes that only touch along an edge do not intersect
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.min_x < other.max_x
            && other.min_x < self.max_x
            && self.min_y < other.max_y
            && other.min_y < self.max_y
    }

    /// Returns true if `coordinate` lies inside (or on the edge of) this box
    #[must_use]
    pub fn contains(&self, coordinate: Coordinate) -> bool {
        (self.min_x..=self.max_x).contains(&coordinate.x)
            && (self.min_y..=self.max_y).contains(&coordinate.y)
    }
}

/// The corner of a tile matrix that tile (0, 0) is anchored to
///
/// Columns grow away from the origin's horizontal edge, rows away from its vertical edge.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString, EnumIter, IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum TileOrigin {
    /// rows number downward from the top edge, columns rightward from the left edge
    #[default]
    UpperLeft,
    /// rows number upward from the bottom edge, columns rightward from the left edge
    LowerLeft,
    /// rows number downward from the top edge, columns leftward from the right edge
    UpperRight,
    /// rows number upward from the bottom edge, columns leftward from the right edge
    LowerRight,
}

impl TileOrigin {
    /// Returns true if columns are numbered from the left edge
    #[must_use]
    pub const fn is_left(self) -> bool {
        matches!(self, Self::UpperLeft | Self::LowerLeft)
    }

    /// Returns true if rows are numbered from the top edge
    #[must_use]
    pub const fn is_upper(self) -> bool {
        matches!(self, Self::UpperLeft | Self::UpperRight)
    }

    /// Re-addresses `(column, row)` of a matrix with `dimensions` from this origin to `to`
    ///
    /// Returns `None` if `(column, row)` lies outside of the matrix.
    #[must_use]
    pub const fn transform(
        self,
        to: Self,
        column: u32,
        row: u32,
        dimensions: TileMatrixDimensions,
    ) -> Option<(u32, u32)> {
        if column >= dimensions.width() || row >= dimensions.height() {
            return None;
        }
        let column = if self.is_left() == to.is_left() {
            column
        } else {
            dimensions.width() - 1 - column
        };
        let row = if self.is_upper() == to.is_upper() {
            row
        } else {
            dimensions.height() - 1 - row
        };
        Some((column, row))
    }
}

/// Maps between tile indices and CRS coordinates for one coordinate reference system
///
/// All conversions take the bounds of the tile matrix (usually [`CrsProfile::bounds`]) and the
/// dimensions of the matrix at the zoom level in question.
pub trait CrsProfile: std::fmt::Debug {
    /// The coordinate reference system this profile describes
    fn crs(&self) -> Crs;

    /// The full valid extent of the CRS
    fn bounds(&self) -> BoundingBox;

    /// The matrix dimensions at zoom level zero that keep tiles square
    fn base_dimensions(&self) -> TileMatrixDimensions;

    /// Human readable name, as stored in `gpkg_spatial_ref_sys.srs_name`
    fn name(&self) -> &'static str;

    /// Well known text definition of the CRS
    fn well_known_text(&self) -> &'static str;

    /// Short description of the CRS
    fn description(&self) -> &'static str;

    /// Returns the coordinate of the origin corner of tile `(column, row)`
    fn tile_to_crs_coordinate(
        &self,
        column: u32,
        row: u32,
        matrix_bounds: &BoundingBox,
        dimensions: TileMatrixDimensions,
        origin: TileOrigin,
    ) -> Coordinate {
        tile_to_crs_coordinate(column, row, matrix_bounds, dimensions, origin)
    }

    /// Returns the CRS footprint of tile `(column, row)`
    fn tile_bounds(
        &self,
        column: u32,
        row: u32,
        matrix_bounds: &BoundingBox,
        dimensions: TileMatrixDimensions,
        origin: TileOrigin,
    ) -> BoundingBox {
        tile_bounds(column, row, matrix_bounds, dimensions, origin)
    }

    /// Returns the position of `coordinate` in fractional tile units, measured from `origin`
    fn tile_position(
        &self,
        coordinate: Coordinate,
        matrix_bounds: &BoundingBox,
        dimensions: TileMatrixDimensions,
        origin: TileOrigin,
    ) -> (f64, f64) {
        fractional_tile(coordinate, matrix_bounds, dimensions, origin)
    }

    /// Returns the (unclamped) index of the tile containing `coordinate`
    ///
    /// Coordinates outside `matrix_bounds` produce negative or overflowing indices
    fn crs_to_tile_coordinate(
        &self,
        coordinate: Coordinate,
        matrix_bounds: &BoundingBox,
        dimensions: TileMatrixDimensions,
        origin: TileOrigin,
    ) -> (i64, i64) {
        let (column, row) = self.tile_position(coordinate, matrix_bounds, dimensions, origin);
        #[allow(clippy::cast_possible_truncation)]
        (column.floor() as i64, row.floor() as i64)
    }
}

fn tile_size(matrix_bounds: &BoundingBox, dimensions: TileMatrixDimensions) -> (f64, f64) {
    (
        matrix_bounds.width() / f64::from(dimensions.width()),
        matrix_bounds.height() / f64::from(dimensions.height()),
    )
}

fn tile_to_crs_coordinate(
    column: u32,
    row: u32,
    matrix_bounds: &BoundingBox,
    dimensions: TileMatrixDimensions,
    origin: TileOrigin,
) -> Coordinate {
    let (tile_width, tile_height) = tile_size(matrix_bounds, dimensions);
    let x = if origin.is_left() {
        f64::from(column).mul_add(tile_width, matrix_bounds.min_x)
    } else {
        f64::from(column).mul_add(-tile_width, matrix_bounds.max_x)
    };
    let y = if origin.is_upper() {
        f64::from(row).mul_add(-tile_height, matrix_bounds.max_y)
    } else {
        f64::from(row).mul_add(tile_height, matrix_bounds.min_y)
    };
    Coordinate::new(x, y)
}

fn tile_bounds(
    column: u32,
    row: u32,
    matrix_bounds: &BoundingBox,
    dimensions: TileMatrixDimensions,
    origin: TileOrigin,
) -> BoundingBox {
    let (tile_width, tile_height) = tile_size(matrix_bounds, dimensions);
    let corner = tile_to_crs_coordinate(column, row, matrix_bounds, dimensions, origin);
    let (min_x, max_x) = if origin.is_left() {
        (corner.x, corner.x + tile_width)
    } else {
        (corner.x - tile_width, corner.x)
    };
    let (min_y, max_y) = if origin.is_upper() {
        (corner.y - tile_height, corner.y)
    } else {
        (corner.y, corner.y + tile_height)
    };
    // both extents are derived from positive sizes
    BoundingBox {
        min_x,
        min_y,
        max_x,
        max_y,
    }
}

fn fractional_tile(
    coordinate: Coordinate,
    matrix_bounds: &BoundingBox,
    dimensions: TileMatrixDimensions,
    origin: TileOrigin,
) -> (f64, f64) {
    let (tile_width, tile_height) = tile_size(matrix_bounds, dimensions);
    let column = if origin.is_left() {
        (coordinate.x - matrix_bounds.min_x) / tile_width
    } else {
        (matrix_bounds.max_x - coordinate.x) / tile_width
    };
    let row = if origin.is_upper() {
        (matrix_bounds.max_y - coordinate.y) / tile_height
    } else {
        (coordinate.y - matrix_bounds.min_y) / tile_height
    };
    (column, row)
}

const SPHERICAL_MERCATOR_HALF_WORLD: f64 = 20_037_508.342_789_244;

/// EPSG:4326, longitude/latitude in decimal degrees on the WGS 84 ellipsoid
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalGeodetic;

impl CrsProfile for GlobalGeodetic {
    fn crs(&self) -> Crs {
        Crs::epsg(4326)
    }

    fn bounds(&self) -> BoundingBox {
        BoundingBox {
            min_x: -180.0,
            min_y: -90.0,
            max_x: 180.0,
            max_y: 90.0,
        }
    }

    fn base_dimensions(&self) -> TileMatrixDimensions {
        TileMatrixDimensions::TWO_BY_ONE
    }

    fn name(&self) -> &'static str {
        "WGS 84 geodetic"
    }

    fn well_known_text(&self) -> &'static str {
        r#"GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],PRIMEM["Greenwich",0,AUTHORITY["EPSG","8901"]],UNIT["degree",0.0174532925199433,AUTHORITY["EPSG","9122"]],AUTHORITY["EPSG","4326"]]"#
    }

    fn description(&self) -> &'static str {
        "longitude/latitude coordinates in decimal degrees on the WGS 84 spheroid"
    }
}

/// EPSG:3857, the web mercator projection on a sphere
#[derive(Debug, Clone, Copy, Default)]
pub struct SphericalMercator;

impl CrsProfile for SphericalMercator {
    fn crs(&self) -> Crs {
        Crs::epsg(3857)
    }

    fn bounds(&self) -> BoundingBox {
        BoundingBox {
            min_x: -SPHERICAL_MERCATOR_HALF_WORLD,
            min_y: -SPHERICAL_MERCATOR_HALF_WORLD,
            max_x: SPHERICAL_MERCATOR_HALF_WORLD,
            max_y: SPHERICAL_MERCATOR_HALF_WORLD,
        }
    }

    fn base_dimensions(&self) -> TileMatrixDimensions {
        TileMatrixDimensions::ONE_BY_ONE
    }

    fn name(&self) -> &'static str {
        "WGS 84 / Pseudo-Mercator"
    }

    fn well_known_text(&self) -> &'static str {
        r#"PROJCS["WGS 84 / Pseudo-Mercator",GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],PRIMEM["Greenwich",0,AUTHORITY["EPSG","8901"]],UNIT["degree",0.0174532925199433,AUTHORITY["EPSG","9122"]],AUTHORITY["EPSG","4326"]],PROJECTION["Mercator_1SP"],PARAMETER["central_meridian",0],PARAMETER["scale_factor",1],PARAMETER["false_easting",0],PARAMETER["false_northing",0],UNIT["metre",1,AUTHORITY["EPSG","9001"]],AXIS["X",EAST],AXIS["Y",NORTH],EXTENSION["PROJ4","+proj=merc +a=6378137 +b=6378137 +lat_ts=0.0 +lon_0=0.0 +x_0=0.0 +y_0=0 +k=1.0 +units=m +nadgrids=@null +wktext  +no_defs"],AUTHORITY["EPSG","3857"]]"#
    }

    fn description(&self) -> &'static str {
        "spherical mercator projection coordinates in meters"
    }
}

/// EPSG:3395, the mercator projection on the WGS 84 ellipsoid
#[derive(Debug, Clone, Copy, Default)]
pub struct EllipsoidalMercator;

impl CrsProfile for EllipsoidalMercator {
    fn crs(&self) -> Crs {
        Crs::epsg(3395)
    }

    fn bounds(&self) -> BoundingBox {
        SphericalMercator.bounds()
    }

    fn base_dimensions(&self) -> TileMatrixDimensions {
        TileMatrixDimensions::ONE_BY_ONE
    }

    fn name(&self) -> &'static str {
        "WGS 84 / World Mercator"
    }

    fn well_known_text(&self) -> &'static str {
        r#"PROJCS["WGS 84 / World Mercator",GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],PRIMEM["Greenwich",0,AUTHORITY["EPSG","8901"]],UNIT["degree",0.0174532925199433,AUTHORITY["EPSG","9122"]],AUTHORITY["EPSG","4326"]],PROJECTION["Mercator_1SP"],PARAMETER["central_meridian",0],PARAMETER["scale_factor",1],PARAMETER["false_easting",0],PARAMETER["false_northing",0],UNIT["metre",1,AUTHORITY["EPSG","9001"]],AXIS["Easting",EAST],AXIS["Northing",NORTH],AUTHORITY["EPSG","3395"]]"#
    }

    fn description(&self) -> &'static str {
        "ellipsoidal mercator projection coordinates in meters"
    }
}

/// Returns the profile for `crs`
///
/// # Errors
///
/// Returns [`Error::UnsupportedCrs`] for any CRS other than EPSG 4326, 3857 and 3395
pub fn profile_for(crs: &Crs) -> Result<Box<dyn CrsProfile>> {
    if !crs.authority().eq_ignore_ascii_case("EPSG") {
        return Err(unsupported(crs));
    }
    match crs.identifier() {
        4326 => Ok(Box::new(GlobalGeodetic)),
        3857 => Ok(Box::new(SphericalMercator)),
        3395 => Ok(Box::new(EllipsoidalMercator)),
        _ => Err(unsupported(crs)),
    }
}

fn unsupported(crs: &Crs) -> Error {
    Error::UnsupportedCrs {
        authority: crs.authority().to_owned(),
        identifier: crs.identifier(),
    }
}
