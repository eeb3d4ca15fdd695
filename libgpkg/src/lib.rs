//! # libgpkg
//!
//! This library builds raster tile pyramids and stores them in [OGC GeoPackage](https://www.geopackage.org/spec/)
//! files, and checks existing GeoPackages against the requirements of the standard.
//!
//! It is split into three parts:
//! - [`tiling`]: tile schemes, CRS profiles, zoom and range calculation, and the
//!   [`TileBuilder`] that cuts a georeferenced [`Raster`] into tiles and composites the
//!   lower zoom levels from their children.
//! - [`geopackage`]: the [`GeoPackage`] container and its sub-APIs for the core, tiles,
//!   features, schema, metadata and extensions tables.
//! - [`verification`]: the conformance [`Verifier`](verification::Verifier), which reports
//!   [`VerificationIssue`]s instead of failing on the first problem.
//!
//! ### Usage
//!
//! #### Tiling an image into a GeoPackage
//!
//! ```rust,no_run
//! use libgpkg::{
//!     tiling::{BoundingBox, Crs, GeoPackageTileStore},
//!     GeoPackage, PyramidConfig, Raster, TileBuilder,
//! };
//!
//! fn main() -> anyhow::Result<()> {
//!     let bounds = BoundingBox::new(-180.0, -90.0, 180.0, 90.0)?;
//!     let raster = Raster::open("world.png", bounds, Crs::epsg(4326))?;
//!
//!     let gpkg = GeoPackage::create("world.gpkg")?;
//!     let mut store = GeoPackageTileStore::new(&gpkg, "world");
//!     let written = TileBuilder::new(&raster, &PyramidConfig::default())?.write_to(&mut store)?;
//!     println!("{written} tiles");
//!     Ok(())
//! }
//! ```
//!
//! #### Verifying a GeoPackage
//!
//! ```rust,no_run
//! use libgpkg::{GeoPackage, OpenMode, VerificationLevel};
//!
//! fn main() -> anyhow::Result<()> {
//!     let gpkg = GeoPackage::open("world.gpkg", OpenMode::Open, VerificationLevel::None)?;
//!     for issue in gpkg.verify(VerificationLevel::Full)? {
//!         println!("{issue}");
//!     }
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]

mod error;
/// The GeoPackage container and its table APIs
pub mod geopackage;
/// Tile schemes, CRS profiles and pyramid construction
pub mod tiling;
pub mod verification;

pub use error::{Error, Result};
pub use geopackage::{GeoPackage, OpenMode};
pub use tiling::{PyramidConfig, Raster, TileBuilder, TileKey};
pub use verification::{Severity, VerificationIssue, VerificationLevel};
