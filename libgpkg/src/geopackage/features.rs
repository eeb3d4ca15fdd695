use bon::Builder;
use rusqlite::{params, Connection, OptionalExtension, Row};
use strum::{Display as StrumDisplay, EnumIter, EnumString, IntoStaticStr};
use tracing::{debug, instrument};

use crate::{
    geopackage::{
        core::{ensure_spatial_reference_system, insert_content, query_content, query_contents},
        names::{validate_column_name, validate_table_name},
        quote_identifier, table_exists, transaction, Content, DataType, SpatialReferenceSystem,
    },
    tiling::BoundingBox,
    Error, Result,
};

pub(crate) const GEOMETRY_COLUMNS_DDL: &str = "CREATE TABLE IF NOT EXISTS gpkg_geometry_columns (
    table_name TEXT NOT NULL,
    column_name TEXT NOT NULL,
    geometry_type_name TEXT NOT NULL,
    srs_id INTEGER NOT NULL,
    z TINYINT NOT NULL,
    m TINYINT NOT NULL,
    CONSTRAINT pk_geom_cols PRIMARY KEY (table_name, column_name),
    CONSTRAINT uk_gc_table_name UNIQUE (table_name),
    CONSTRAINT fk_gc_tn FOREIGN KEY (table_name) REFERENCES gpkg_contents(table_name),
    CONSTRAINT fk_gc_srs FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys (srs_id)
)";

/// A `gpkg_contents` row with `data_type` `features`
pub type FeatureSet = Content;

/// Geometry type names allowed in `gpkg_geometry_columns.geometry_type_name`
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString, EnumIter, IntoStaticStr,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[allow(missing_docs)]
pub enum GeometryType {
    Geometry,
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
    GeometryCollection,
}

/// Whether z or m values are allowed in a geometry column
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueRequirement {
    /// values must not be present (0)
    #[default]
    Prohibited,
    /// values must be present (1)
    Mandatory,
    /// values may be present (2)
    Optional,
}

impl ValueRequirement {
    /// Returns the value stored in the `z`/`m` columns
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        match self {
            Self::Prohibited => 0,
            Self::Mandatory => 1,
            Self::Optional => 2,
        }
    }
}

impl TryFrom<i32> for ValueRequirement {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(Self::Prohibited),
            1 => Ok(Self::Mandatory),
            2 => Ok(Self::Optional),
            v => Err(Error::Parse(format!("z/m value must be 0, 1 or 2, got {v}"))),
        }
    }
}

/// A row of `gpkg_geometry_columns`
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
#[non_exhaustive]
pub struct GeometryColumn {
    /// Column: `table_name`
    #[builder(into)]
    pub table_name: String,
    /// Column: `column_name`
    #[builder(into)]
    pub column_name: String,
    /// Column: `geometry_type_name`
    pub geometry_type: GeometryType,
    /// Column: `srs_id`
    pub srs_id: i32,
    /// Column: `z`
    #[builder(default)]
    pub z: ValueRequirement,
    /// Column: `m`
    #[builder(default)]
    pub m: ValueRequirement,
}

type RawGeometryColumn = (String, String, String, i32, i32, i32);

fn raw_geometry_column(row: &Row<'_>) -> rusqlite::Result<RawGeometryColumn> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn geometry_column_from_raw(
    (table_name, column_name, geometry_type, srs_id, z, m): RawGeometryColumn,
) -> Result<GeometryColumn> {
    Ok(GeometryColumn {
        table_name,
        column_name,
        geometry_type: geometry_type
            .parse()
            .map_err(|_| Error::Parse(format!("unknown geometry type {geometry_type}")))?,
        srs_id,
        z: z.try_into()?,
        m: m.try_into()?,
    })
}

/// Access to feature sets and their geometry columns
///
/// Only the table structure is managed; geometry blobs are written by the caller.
#[derive(Debug, Clone, Copy)]
pub struct GeoPackageFeatures<'a> {
    conn: &'a Connection,
}

impl<'a> GeoPackageFeatures<'a> {
    pub(crate) const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Creates the feature user table described by `geometry_column` and registers it
    ///
    /// The table gets an integer primary key called `primary_key_column` and the geometry column.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidName`] if a table or column name may not be used
    /// - [`Error::Conflict`] if the table already exists, or `geometry_column.srs_id` is not
    ///   `srs.identifier`
    #[instrument(skip(self, srs, geometry_column), fields(table = %geometry_column.table_name))]
    pub fn add_feature_set(
        &self,
        identifier: &str,
        description: &str,
        bounding_box: &BoundingBox,
        srs: &SpatialReferenceSystem,
        geometry_column: &GeometryColumn,
        primary_key_column: &str,
    ) -> Result<FeatureSet> {
        let table_name = geometry_column.table_name.as_str();
        validate_table_name(table_name)?;
        validate_column_name(&geometry_column.column_name)?;
        validate_column_name(primary_key_column)?;
        if geometry_column.srs_id != srs.identifier {
            return Err(Error::Conflict(format!(
                "geometry column uses srs_id {} but the feature set uses {}",
                geometry_column.srs_id, srs.identifier
            )));
        }
        transaction(self.conn, |tx| {
            if table_exists(tx, table_name)? {
                return Err(Error::Conflict(format!("table {table_name} already exists")));
            }
            ensure_spatial_reference_system(tx, srs)?;
            tx.execute_batch(GEOMETRY_COLUMNS_DDL)?;
            tx.execute_batch(&format!(
                "CREATE TABLE {} ({} INTEGER PRIMARY KEY AUTOINCREMENT, {} {})",
                quote_identifier(table_name),
                quote_identifier(primary_key_column),
                quote_identifier(&geometry_column.column_name),
                geometry_column.geometry_type
            ))?;
            let content = insert_content(
                tx,
                table_name,
                &DataType::Features,
                identifier,
                description,
                bounding_box,
                srs.identifier,
            )?;
            tx.execute(
                "INSERT INTO gpkg_geometry_columns (table_name, column_name, geometry_type_name, srs_id, z, m) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    table_name,
                    geometry_column.column_name,
                    geometry_column.geometry_type.to_string(),
                    geometry_column.srs_id,
                    geometry_column.z.as_i32(),
                    geometry_column.m.as_i32()
                ],
            )?;
            debug!("Created feature set {table_name}");
            Ok(content)
        })
    }

    /// Returns every feature set
    ///
    /// # Errors
    ///
    /// Returns an error if `gpkg_contents` cannot be read
    pub fn feature_sets(&self) -> Result<Vec<FeatureSet>> {
        query_contents(self.conn, Some(&DataType::Features))
    }

    /// Returns the feature set called `table_name`
    ///
    /// # Errors
    ///
    /// Returns an error if `gpkg_contents` cannot be read
    pub fn feature_set(&self, table_name: &str) -> Result<Option<FeatureSet>> {
        Ok(query_content(self.conn, table_name)?.filter(|c| c.data_type == DataType::Features))
    }

    /// Returns the geometry column of the feature set `table_name`
    ///
    /// # Errors
    ///
    /// Returns an error if `gpkg_geometry_columns` cannot be read or the row is malformed
    pub fn geometry_column(&self, table_name: &str) -> Result<Option<GeometryColumn>> {
        if !table_exists(self.conn, "gpkg_geometry_columns")? {
            return Ok(None);
        }
        self.conn
            .query_row(
                "SELECT table_name, column_name, geometry_type_name, srs_id, z, m FROM gpkg_geometry_columns WHERE table_name = ?1",
                [table_name],
                raw_geometry_column,
            )
            .optional()?
            .map(geometry_column_from_raw)
            .transpose()
    }
}
