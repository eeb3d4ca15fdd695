use std::path::PathBuf;

use itertools::Itertools;
use thiserror::Error;

use crate::{tiling::TileKey, verification::VerificationIssue};

/// Convenience alias for results returned by `libgpkg`
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
#[non_exhaustive]
/// Possible `libgpkg` errors
pub enum Error {
    /// Error returned when a coordinate reference system has no known profile
    #[error("unsupported coordinate reference system {authority}:{identifier}")]
    UnsupportedCrs {
        /// CRS authority, e.g. `EPSG`
        authority: String,
        /// CRS identifier within the authority
        identifier: i32,
    },
    /// Error returned when a zoom level is outside of a tile scheme's range
    #[error("zoom level {zoom} is outside of the range {min}..={max}")]
    InvalidZoom {
        /// requested zoom level
        zoom: u8,
        /// lowest zoom level of the scheme
        min: u8,
        /// highest zoom level of the scheme
        max: u8,
    },
    /// Error returned when no tile range was computed for a zoom level
    #[error("no tile range was calculated for zoom level {0}")]
    ZoomRangeNotFound(u8),
    /// Error returned when an interior tile of a pyramid has no children to composite
    #[error("interior tile {0} has no children")]
    ChildlessInteriorTile(TileKey),
    /// Error returned when tile construction failed for a specific tile
    #[error("failed to build tile {key}")]
    TileBuild {
        /// zoom/column/row of the failing tile
        key: TileKey,
        /// underlying failure
        #[source]
        source: Box<Error>,
    },
    /// Error returned when a bounding box has min > max on some axis
    #[error("invalid bounding box ({min_x}, {min_y}, {max_x}, {max_y})")]
    InvalidBoundingBox {
        /// min x
        min_x: f64,
        /// min y
        min_y: f64,
        /// max x
        max_x: f64,
        /// max y
        max_y: f64,
    },
    /// Error returned when a tile scheme cannot represent its zoom range
    #[error("invalid tile scheme: {0}")]
    InvalidTileScheme(String),
    /// Error returned when a tile matrix violates its invariants
    #[error("invalid tile matrix: {0}")]
    InvalidTileMatrix(String),
    /// Error returned when a table or column name may not be used
    #[error("invalid name '{name}': {reason}")]
    InvalidName {
        /// the rejected name
        name: String,
        /// why it was rejected
        reason: &'static str,
    },
    /// Error returned when a tile lies outside of its tile matrix
    #[error("tile ({column}, {row}) is outside of the {matrix_width}x{matrix_height} matrix at zoom level {zoom}")]
    TileOutOfMatrix {
        /// zoom level
        zoom: u8,
        /// tile column
        column: u32,
        /// tile row
        row: u32,
        /// matrix width
        matrix_width: u32,
        /// matrix height
        matrix_height: u32,
    },
    /// Error returned when a textual value cannot be parsed
    #[error("parse error: {0}")]
    Parse(String),
    /// Error returned when a referenced GeoPackage row does not exist
    #[error("{0} not found")]
    NotFound(String),
    /// Error returned when a row conflicts with an existing one
    #[error("conflict: {0}")]
    Conflict(String),
    /// Error returned when creating a file that already exists
    #[error("file {} already exists", .0.display())]
    FileExists(PathBuf),
    /// Error returned when opening a file that does not exist
    #[error("file {} does not exist", .0.display())]
    FileNotFound(PathBuf),
    /// Error returned when a file is not an SQLite database
    #[error("file {} is not an SQLite database", .0.display())]
    UnsupportedFormat(PathBuf),
    /// Error returned when a transaction cannot be started or committed
    #[error("transaction failure")]
    Transaction(#[source] rusqlite::Error),
    /// Error returned when a GeoPackage fails verification with errors
    #[error("GeoPackage failed verification:\n{}", display_issues(.0))]
    ConformanceFailure(Vec<VerificationIssue>),
    /// SQLite error
    #[error("sqlite error")]
    Sqlite(#[from] rusqlite::Error),
    /// Image encoding/decoding error
    #[error("image error")]
    Image(#[from] image::ImageError),
    /// I/O error
    #[error("i/o error")]
    Io(#[from] std::io::Error),
}

fn display_issues(issues: &[VerificationIssue]) -> String {
    issues.iter().join("\n")
}
