use libgpkg::{
    tiling::{
        BoundingBox, Crs, DirectoryTileStore, GeoPackageTileStore, ImageFormat, TileOrigin,
    },
    GeoPackage, OpenMode, PyramidConfig, Raster, Severity, TileBuilder, VerificationLevel,
};
use std::path::PathBuf;
use tracing::{info, warn, Level};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

#[cfg(not(debug_assertions))]
const DEFAULT_DEBUG_LEVEL: u8 = 1;
#[cfg(debug_assertions)]
const DEFAULT_DEBUG_LEVEL: u8 = 99;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Turn debugging information on
    #[arg(short, long, default_value_t = DEFAULT_DEBUG_LEVEL, action = clap::ArgAction::Count)]
    verbosity: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// cuts a georeferenced image into a tile pyramid
    Tile {
        /// The image
        img_file: PathBuf,

        /// Extent of the image as minx,miny,maxx,maxy in CRS units
        #[arg(short, long, value_parser = parse_bounds, allow_hyphen_values = true)]
        bounds: BoundingBox,

        /// Coordinate reference system of the image
        #[arg(short, long, default_value = "EPSG:4326")]
        crs: Crs,

        /// Write tiles as files below this directory
        #[arg(short, long, conflicts_with = "geopackage", required_unless_present = "geopackage")]
        directory: Option<PathBuf>,

        /// Write tiles into this GeoPackage
        #[arg(short, long)]
        geopackage: Option<PathBuf>,

        /// Name of the tile table (defaults to the image's file stem)
        #[arg(short, long, requires = "geopackage")]
        table: Option<String>,

        /// Width and height of the tiles in pixels
        #[arg(long, default_value_t = 256)]
        tile_size: u32,

        /// Corner tile (0, 0) is anchored to
        #[arg(long, default_value = "upper-left")]
        origin: TileOrigin,

        /// Tile encoding (png or jpeg)
        #[arg(long, default_value = "png")]
        format: ImageFormat,
    },

    /// checks a GeoPackage against the standard
    Verify {
        /// The GeoPackage
        gpkg_file: PathBuf,

        /// Also run the slow checks (integrity, tile image formats)
        #[arg(short, long)]
        full: bool,
    },
}

fn parse_bounds(s: &str) -> Result<BoundingBox> {
    let values = s
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()?;
    let [min_x, min_y, max_x, max_y] = values[..] else {
        bail!("expected minx,miny,maxx,maxy, got '{s}'");
    };
    Ok(BoundingBox::new(min_x, min_y, max_x, max_y)?)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        3 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_file(true)
        .with_line_number(true)
        .init();

    match cli.command {
        Commands::Tile {
            img_file,
            bounds,
            crs,
            directory,
            geopackage,
            table,
            tile_size,
            origin,
            format,
        } => {
            let raster = Raster::open(&img_file, bounds, crs)?;
            let config = PyramidConfig::builder()
                .tile_size(tile_size)
                .origin(origin)
                .image_format(format)
                .build();
            let builder = TileBuilder::new(&raster, &config)?;

            let written = match (directory, geopackage) {
                (Some(directory), _) => {
                    let mut store = DirectoryTileStore::new(directory);
                    builder.write_to(&mut store)?
                }
                (None, Some(geopackage)) => {
                    let table = match table {
                        Some(t) => t,
                        None => {
                            let Some(Some(stem)) = img_file.file_stem().map(|os| os.to_str())
                            else {
                                bail!("Invalid img file");
                            };
                            info!("table name: {stem}");
                            stem.to_owned()
                        }
                    };
                    let gpkg = GeoPackage::open(
                        &geopackage,
                        OpenMode::OpenOrCreate,
                        VerificationLevel::Fast,
                    )?;
                    let mut store = GeoPackageTileStore::new(&gpkg, table);
                    let written = builder.write_to(&mut store)?;
                    drop(store);
                    gpkg.close()?;
                    written
                }
                (None, None) => bail!("Either --directory or --geopackage is required"),
            };
            info!("{written} tiles written");
        }
        Commands::Verify { gpkg_file, full } => {
            let level = if full {
                VerificationLevel::Full
            } else {
                VerificationLevel::Fast
            };
            let gpkg = GeoPackage::open(&gpkg_file, OpenMode::Open, VerificationLevel::None)?;
            let issues = gpkg.verify(level)?;
            for issue in &issues {
                println!("{issue}");
            }
            let errors = issues
                .iter()
                .filter(|i| i.severity() == Severity::Error)
                .count();
            if errors > 0 {
                bail!("{} failed {errors} requirement(s)", gpkg_file.display());
            }
            if issues.is_empty() {
                println!("{}: no issues", gpkg_file.display());
            } else {
                warn!("{} passed with {} warning(s)", gpkg_file.display(), issues.len());
            }
        }
    }
    Ok(())
}
