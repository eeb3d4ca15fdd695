use bon::bon;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, instrument, trace};

use crate::{
    geopackage::{
        core::{ensure_spatial_reference_system, insert_content, query_content, query_contents},
        names::validate_table_name,
        quote_identifier, table_exists, transaction, Content, DataType, SpatialReferenceSystem,
    },
    tiling::{BoundingBox, TileMatrixDimensions},
    Error, Result,
};

pub(crate) const TILE_MATRIX_SET_DDL: &str = "CREATE TABLE IF NOT EXISTS gpkg_tile_matrix_set (
    table_name TEXT NOT NULL PRIMARY KEY,
    srs_id INTEGER NOT NULL,
    min_x DOUBLE NOT NULL,
    min_y DOUBLE NOT NULL,
    max_x DOUBLE NOT NULL,
    max_y DOUBLE NOT NULL,
    CONSTRAINT fk_gtms_table_name FOREIGN KEY (table_name) REFERENCES gpkg_contents(table_name),
    CONSTRAINT fk_gtms_srs FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys (srs_id)
)";

pub(crate) const TILE_MATRIX_DDL: &str = "CREATE TABLE IF NOT EXISTS gpkg_tile_matrix (
    table_name TEXT NOT NULL,
    zoom_level INTEGER NOT NULL,
    matrix_width INTEGER NOT NULL,
    matrix_height INTEGER NOT NULL,
    tile_width INTEGER NOT NULL,
    tile_height INTEGER NOT NULL,
    pixel_x_size DOUBLE NOT NULL,
    pixel_y_size DOUBLE NOT NULL,
    CONSTRAINT pk_ttm PRIMARY KEY (table_name, zoom_level),
    CONSTRAINT fk_tmm_table_name FOREIGN KEY (table_name) REFERENCES gpkg_contents(table_name)
)";

fn tile_table_ddl(table_name: &str) -> String {
    format!(
        "CREATE TABLE {} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    zoom_level INTEGER NOT NULL,
    tile_column INTEGER NOT NULL,
    tile_row INTEGER NOT NULL,
    tile_data BLOB NOT NULL,
    UNIQUE (zoom_level, tile_column, tile_row)
)",
        quote_identifier(table_name)
    )
}

/// A `gpkg_contents` row with `data_type` `tiles`
pub type TileSet = Content;

/// A row of `gpkg_tile_matrix_set`: the CRS and extent every matrix of a tile set covers
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct TileMatrixSet {
    /// Column: `table_name`
    pub table_name: String,
    /// Column: `srs_id`
    pub srs_id: i32,
    /// Columns: `min_x`, `min_y`, `max_x`, `max_y`
    pub bounding_box: BoundingBox,
}

/// A row of `gpkg_tile_matrix`: the geometry of one zoom level of a tile set
#[derive(Debug, Clone, PartialEq)]
pub struct TileMatrix {
    table_name: String,
    zoom_level: u8,
    dimensions: TileMatrixDimensions,
    tile_width: u32,
    tile_height: u32,
    pixel_x_size: f64,
    pixel_y_size: f64,
}

#[bon]
impl TileMatrix {
    /// Creates a tile matrix, checking that every size is positive
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTileMatrix`] if a tile or pixel size is not positive
    #[builder]
    pub fn new(
        #[builder(into)] table_name: String,
        zoom_level: u8,
        dimensions: TileMatrixDimensions,
        tile_width: u32,
        tile_height: u32,
        pixel_x_size: f64,
        pixel_y_size: f64,
    ) -> Result<Self> {
        if tile_width == 0 || tile_height == 0 {
            return Err(Error::InvalidTileMatrix(format!(
                "tile size {tile_width}x{tile_height} must be positive"
            )));
        }
        if !(pixel_x_size.is_finite() && pixel_x_size > 0.0)
            || !(pixel_y_size.is_finite() && pixel_y_size > 0.0)
        {
            return Err(Error::InvalidTileMatrix(format!(
                "pixel size {pixel_x_size}x{pixel_y_size} must be positive"
            )));
        }
        Ok(Self {
            table_name,
            zoom_level,
            dimensions,
            tile_width,
            tile_height,
            pixel_x_size,
            pixel_y_size,
        })
    }

    /// Returns the tile set this matrix belongs to
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Returns the zoom level
    #[must_use]
    pub const fn zoom_level(&self) -> u8 {
        self.zoom_level
    }

    /// Returns the number of columns and rows
    #[must_use]
    pub const fn dimensions(&self) -> TileMatrixDimensions {
        self.dimensions
    }

    /// Returns the width of a tile in pixels
    #[must_use]
    pub const fn tile_width(&self) -> u32 {
        self.tile_width
    }

    /// Returns the height of a tile in pixels
    #[must_use]
    pub const fn tile_height(&self) -> u32 {
        self.tile_height
    }

    /// Returns the width of a pixel in CRS units
    #[must_use]
    pub const fn pixel_x_size(&self) -> f64 {
        self.pixel_x_size
    }

    /// Returns the height of a pixel in CRS units
    #[must_use]
    pub const fn pixel_y_size(&self) -> f64 {
        self.pixel_y_size
    }

    fn check_tile(&self, column: u32, row: u32) -> Result<()> {
        if column < self.dimensions.width() && row < self.dimensions.height() {
            Ok(())
        } else {
            Err(Error::TileOutOfMatrix {
                zoom: self.zoom_level,
                column,
                row,
                matrix_width: self.dimensions.width(),
                matrix_height: self.dimensions.height(),
            })
        }
    }
}

const TILE_MATRIX_COLUMNS: &str = "table_name, zoom_level, matrix_width, matrix_height, tile_width, tile_height, pixel_x_size, pixel_y_size";

type RawTileMatrix = (String, u8, u32, u32, u32, u32, f64, f64);

fn raw_tile_matrix(row: &Row<'_>) -> rusqlite::Result<RawTileMatrix> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn tile_matrix_from_raw(
    (table_name, zoom_level, width, height, tile_width, tile_height, pixel_x_size, pixel_y_size): RawTileMatrix,
) -> Result<TileMatrix> {
    TileMatrix::builder()
        .table_name(table_name)
        .zoom_level(zoom_level)
        .dimensions(TileMatrixDimensions::new(width, height)?)
        .tile_width(tile_width)
        .tile_height(tile_height)
        .pixel_x_size(pixel_x_size)
        .pixel_y_size(pixel_y_size)
        .build()
}

/// Access to tile sets, their tile matrices and the tiles themselves
#[derive(Debug, Clone, Copy)]
pub struct GeoPackageTiles<'a> {
    conn: &'a Connection,
}

impl<'a> GeoPackageTiles<'a> {
    pub(crate) const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Creates the tile pyramid user table `table_name` and registers it
    ///
    /// `bounding_box` is the extent of the data and goes to `gpkg_contents`;
    /// `tile_matrix_set_bounds` is the extent every tile matrix covers. The spatial reference
    /// system is added if it is not present yet.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidName`] if `table_name` may not be used
    /// - [`Error::Conflict`] if the table already exists or `srs` conflicts with a stored row
    #[instrument(skip(self, srs), fields(srs_id = srs.identifier))]
    pub fn add_tile_set(
        &self,
        table_name: &str,
        identifier: &str,
        description: &str,
        bounding_box: &BoundingBox,
        srs: &SpatialReferenceSystem,
        tile_matrix_set_bounds: &BoundingBox,
    ) -> Result<TileSet> {
        validate_table_name(table_name)?;
        transaction(self.conn, |tx| {
            if table_exists(tx, table_name)? {
                return Err(Error::Conflict(format!("table {table_name} already exists")));
            }
            ensure_spatial_reference_system(tx, srs)?;
            tx.execute_batch(TILE_MATRIX_SET_DDL)?;
            tx.execute_batch(TILE_MATRIX_DDL)?;
            tx.execute_batch(&tile_table_ddl(table_name))?;
            let content = insert_content(
                tx,
                table_name,
                &DataType::Tiles,
                identifier,
                description,
                bounding_box,
                srs.identifier,
            )?;
            tx.execute(
                "INSERT INTO gpkg_tile_matrix_set (table_name, srs_id, min_x, min_y, max_x, max_y) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    table_name,
                    srs.identifier,
                    tile_matrix_set_bounds.min_x(),
                    tile_matrix_set_bounds.min_y(),
                    tile_matrix_set_bounds.max_x(),
                    tile_matrix_set_bounds.max_y()
                ],
            )?;
            debug!("Created tile set {table_name}");
            Ok(content)
        })
    }

    /// Adds the tile matrix for `zoom_level` to a tile set
    ///
    /// Pixel sizes are derived from the tile matrix set bounds, so every matrix of the set covers
    /// the same extent.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if `table_name` has no tile matrix set
    /// - [`Error::InvalidTileMatrix`] if a tile size is zero
    pub fn add_tile_matrix(
        &self,
        table_name: &str,
        zoom_level: u8,
        dimensions: TileMatrixDimensions,
        tile_width: u32,
        tile_height: u32,
    ) -> Result<TileMatrix> {
        let set = self
            .tile_matrix_set(table_name)?
            .ok_or_else(|| Error::NotFound(format!("tile matrix set {table_name}")))?;
        let bounds = set.bounding_box;
        let matrix = TileMatrix::builder()
            .table_name(table_name)
            .zoom_level(zoom_level)
            .dimensions(dimensions)
            .tile_width(tile_width)
            .tile_height(tile_height)
            .pixel_x_size(bounds.width() / f64::from(dimensions.width()) / f64::from(tile_width.max(1)))
            .pixel_y_size(bounds.height() / f64::from(dimensions.height()) / f64::from(tile_height.max(1)))
            .build()?;
        self.insert_tile_matrix(&matrix)?;
        Ok(matrix)
    }

    /// Stores `matrix` as is
    ///
    /// # Errors
    ///
    /// Returns an error if the tile set does not exist or already has a matrix at that zoom level
    pub fn insert_tile_matrix(&self, matrix: &TileMatrix) -> Result<()> {
        transaction(self.conn, |tx| {
            tx.execute(
                &format!("INSERT INTO gpkg_tile_matrix ({TILE_MATRIX_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
                params![
                    matrix.table_name,
                    matrix.zoom_level,
                    matrix.dimensions.width(),
                    matrix.dimensions.height(),
                    matrix.tile_width,
                    matrix.tile_height,
                    matrix.pixel_x_size,
                    matrix.pixel_y_size
                ],
            )?;
            Ok(())
        })?;
        debug!(
            "Added tile matrix {} of {} ({}x{})",
            matrix.zoom_level,
            matrix.table_name,
            matrix.dimensions.width(),
            matrix.dimensions.height()
        );
        Ok(())
    }

    /// Inserts one encoded tile, addressed from the upper left corner, and returns its row id
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if there is no tile matrix at `zoom_level`
    /// - [`Error::TileOutOfMatrix`] if `(column, row)` lies outside of that matrix
    pub fn add_tile(
        &self,
        table_name: &str,
        zoom_level: u8,
        column: u32,
        row: u32,
        data: &[u8],
    ) -> Result<i64> {
        let matrix = self.tile_matrix(table_name, zoom_level)?.ok_or_else(|| {
            Error::NotFound(format!("tile matrix {zoom_level} of {table_name}"))
        })?;
        matrix.check_tile(column, row)?;
        let id = transaction(self.conn, |tx| {
            tx.execute(
                &format!(
                    "INSERT INTO {} (zoom_level, tile_column, tile_row, tile_data) VALUES (?1, ?2, ?3, ?4)",
                    quote_identifier(table_name)
                ),
                params![zoom_level, column, row, data],
            )?;
            Ok(tx.last_insert_rowid())
        })?;
        trace!("Inserted tile {zoom_level}/{column}/{row} into {table_name}");
        Ok(id)
    }

    /// Returns the encoded image of one tile
    ///
    /// # Errors
    ///
    /// Returns an error if the tile table cannot be read
    pub fn tile_data(
        &self,
        table_name: &str,
        zoom_level: u8,
        column: u32,
        row: u32,
    ) -> Result<Option<Vec<u8>>> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT tile_data FROM {} WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
                    quote_identifier(table_name)
                ),
                params![zoom_level, column, row],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Returns the number of tiles in a tile set, optionally at one zoom level
    ///
    /// # Errors
    ///
    /// Returns an error if the tile table cannot be read
    pub fn tile_count(&self, table_name: &str, zoom_level: Option<u8>) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            &format!(
                "SELECT count(*) FROM {} WHERE ?1 IS NULL OR zoom_level = ?1",
                quote_identifier(table_name)
            ),
            [zoom_level],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Returns every tile set
    ///
    /// # Errors
    ///
    /// Returns an error if `gpkg_contents` cannot be read
    pub fn tile_sets(&self) -> Result<Vec<TileSet>> {
        query_contents(self.conn, Some(&DataType::Tiles))
    }

    /// Returns the tile set called `table_name`
    ///
    /// # Errors
    ///
    /// Returns an error if `gpkg_contents` cannot be read
    pub fn tile_set(&self, table_name: &str) -> Result<Option<TileSet>> {
        Ok(query_content(self.conn, table_name)?.filter(|c| c.data_type == DataType::Tiles))
    }

    /// Returns the tile matrix set of `table_name`
    ///
    /// # Errors
    ///
    /// Returns an error if `gpkg_tile_matrix_set` cannot be read
    pub fn tile_matrix_set(&self, table_name: &str) -> Result<Option<TileMatrixSet>> {
        if !table_exists(self.conn, "gpkg_tile_matrix_set")? {
            return Ok(None);
        }
        self.conn
            .query_row(
                "SELECT table_name, srs_id, min_x, min_y, max_x, max_y FROM gpkg_tile_matrix_set WHERE table_name = ?1",
                [table_name],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i32>(1)?,
                        [row.get::<_, f64>(2)?, row.get(3)?, row.get(4)?, row.get(5)?],
                    ))
                },
            )
            .optional()?
            .map(|(table_name, srs_id, [min_x, min_y, max_x, max_y])| {
                Ok(TileMatrixSet {
                    table_name,
                    srs_id,
                    bounding_box: BoundingBox::new(min_x, min_y, max_x, max_y)?,
                })
            })
            .transpose()
    }

    /// Returns the tile matrices of `table_name`, ordered by zoom level
    ///
    /// # Errors
    ///
    /// Returns an error if `gpkg_tile_matrix` cannot be read or holds an invalid row
    pub fn tile_matrices(&self, table_name: &str) -> Result<Vec<TileMatrix>> {
        if !table_exists(self.conn, "gpkg_tile_matrix")? {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TILE_MATRIX_COLUMNS} FROM gpkg_tile_matrix WHERE table_name = ?1 ORDER BY zoom_level"
        ))?;
        let rows = stmt
            .query_map([table_name], raw_tile_matrix)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(tile_matrix_from_raw).collect()
    }

    /// Returns the tile matrix of `table_name` at `zoom_level`
    ///
    /// # Errors
    ///
    /// Returns an error if `gpkg_tile_matrix` cannot be read or the row is invalid
    pub fn tile_matrix(&self, table_name: &str, zoom_level: u8) -> Result<Option<TileMatrix>> {
        if !table_exists(self.conn, "gpkg_tile_matrix")? {
            return Ok(None);
        }
        self.conn
            .query_row(
                &format!(
                    "SELECT {TILE_MATRIX_COLUMNS} FROM gpkg_tile_matrix WHERE table_name = ?1 AND zoom_level = ?2"
                ),
                params![table_name, zoom_level],
                raw_tile_matrix,
            )
            .optional()?
            .map(tile_matrix_from_raw)
            .transpose()
    }
}
