use std::{fmt::Display, str::FromStr};

use bon::Builder;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, instrument};

use crate::{
    geopackage::{parse_timestamp, timestamp, transaction},
    tiling::{BoundingBox, Crs, CrsProfile},
    Error, Result,
};

pub(crate) const SPATIAL_REF_SYS_DDL: &str = "CREATE TABLE IF NOT EXISTS gpkg_spatial_ref_sys (
    srs_name TEXT NOT NULL,
    srs_id INTEGER NOT NULL PRIMARY KEY,
    organization TEXT NOT NULL,
    organization_coordsys_id INTEGER NOT NULL,
    definition TEXT NOT NULL,
    description TEXT
)";

pub(crate) const CONTENTS_DDL: &str = "CREATE TABLE IF NOT EXISTS gpkg_contents (
    table_name TEXT NOT NULL PRIMARY KEY,
    data_type TEXT NOT NULL,
    identifier TEXT UNIQUE,
    description TEXT DEFAULT '',
    last_change DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
    min_x DOUBLE,
    min_y DOUBLE,
    max_x DOUBLE,
    max_y DOUBLE,
    srs_id INTEGER,
    CONSTRAINT fk_gc_r_srs_id FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys(srs_id)
)";

pub(crate) fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(SPATIAL_REF_SYS_DDL)?;
    conn.execute_batch(CONTENTS_DDL)?;
    Ok(())
}

/// Inserts the three spatial reference systems every GeoPackage must contain
pub(crate) fn seed_spatial_reference_systems(conn: &Connection) -> Result<()> {
    for srs in [
        SpatialReferenceSystem::wgs84(),
        SpatialReferenceSystem::undefined_cartesian(),
        SpatialReferenceSystem::undefined_geographic(),
    ] {
        insert_spatial_reference_system(conn, &srs)?;
    }
    Ok(())
}

/// A row of `gpkg_spatial_ref_sys`
#[derive(Builder, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct SpatialReferenceSystem {
    /// Column: `srs_name`
    pub name: String,
    /// Column: `srs_id`, the key other tables reference
    pub identifier: i32,
    /// Column: `organization`, e.g. `EPSG`
    pub organization: String,
    /// Column: `organization_coordsys_id`
    pub organization_srs_id: i32,
    /// Column: `definition`, well known text
    pub definition: String,
    /// Column: `description`
    pub description: Option<String>,
}

impl SpatialReferenceSystem {
    /// The WGS 84 geographic CRS (EPSG:4326)
    #[must_use]
    pub fn wgs84() -> Self {
        Self::from_profile(&crate::tiling::GlobalGeodetic)
    }

    /// The undefined cartesian CRS (`srs_id` -1)
    #[must_use]
    pub fn undefined_cartesian() -> Self {
        Self {
            name: "Undefined cartesian SRS".to_owned(),
            identifier: -1,
            organization: "NONE".to_owned(),
            organization_srs_id: -1,
            definition: "undefined".to_owned(),
            description: Some("undefined cartesian coordinate reference system".to_owned()),
        }
    }

    /// The undefined geographic CRS (`srs_id` 0)
    #[must_use]
    pub fn undefined_geographic() -> Self {
        Self {
            name: "Undefined geographic SRS".to_owned(),
            identifier: 0,
            organization: "NONE".to_owned(),
            organization_srs_id: 0,
            definition: "undefined".to_owned(),
            description: Some("undefined geographic coordinate reference system".to_owned()),
        }
    }

    /// Describes the CRS of `profile`, using its identifier as `srs_id`
    #[must_use]
    pub fn from_profile(profile: &dyn CrsProfile) -> Self {
        let crs = profile.crs();
        Self {
            name: profile.name().to_owned(),
            identifier: crs.identifier(),
            organization: crs.authority().to_owned(),
            organization_srs_id: crs.identifier(),
            definition: profile.well_known_text().to_owned(),
            description: Some(profile.description().to_owned()),
        }
    }

    /// Returns the CRS this row defines
    #[must_use]
    pub fn crs(&self) -> Crs {
        Crs::new(self.organization.clone(), self.organization_srs_id)
    }

    fn same_definition(&self, other: &Self) -> bool {
        self.organization.eq_ignore_ascii_case(&other.organization)
            && self.organization_srs_id == other.organization_srs_id
            && self.definition == other.definition
    }
}

/// The kind of data a `gpkg_contents` row describes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Tile pyramid user data
    Tiles,
    /// Vector feature user data
    Features,
    /// Non spatial attribute user data
    Attributes,
    /// A data type defined by an extension
    Other(String),
}

impl DataType {
    /// Returns the value stored in `gpkg_contents.data_type`
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Tiles => "tiles",
            Self::Features => "features",
            Self::Attributes => "attributes",
            Self::Other(s) => s,
        }
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for DataType {
    fn from(s: &str) -> Self {
        match s {
            "tiles" => Self::Tiles,
            "features" => Self::Features,
            "attributes" => Self::Attributes,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl FromStr for DataType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

/// A row of `gpkg_contents`
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct Content {
    /// Column: `table_name`
    pub table_name: String,
    /// Column: `data_type`
    pub data_type: DataType,
    /// Column: `identifier`
    pub identifier: Option<String>,
    /// Column: `description`
    pub description: Option<String>,
    /// Column: `last_change`
    pub last_change: DateTime<Utc>,
    /// Columns: `min_x`, `min_y`, `max_x`, `max_y`
    pub bounding_box: Option<BoundingBox>,
    /// Column: `srs_id`
    pub srs_id: Option<i32>,
}

const CONTENT_COLUMNS: &str =
    "table_name, data_type, identifier, description, last_change, min_x, min_y, max_x, max_y, srs_id";

type RawContent = (
    String,
    String,
    Option<String>,
    Option<String>,
    String,
    [Option<f64>; 4],
    Option<i32>,
);

fn raw_content(row: &Row<'_>) -> rusqlite::Result<RawContent> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        [row.get(5)?, row.get(6)?, row.get(7)?, row.get(8)?],
        row.get(9)?,
    ))
}

fn content_from_raw(
    (table_name, data_type, identifier, description, last_change, bounds, srs_id): RawContent,
) -> Result<Content> {
    let bounding_box = match bounds {
        [Some(min_x), Some(min_y), Some(max_x), Some(max_y)] => {
            Some(BoundingBox::new(min_x, min_y, max_x, max_y)?)
        }
        _ => None,
    };
    Ok(Content {
        table_name,
        data_type: DataType::from(data_type.as_str()),
        identifier,
        description,
        last_change: parse_timestamp(&last_change)?,
        bounding_box,
        srs_id,
    })
}

pub(crate) fn insert_spatial_reference_system(
    conn: &Connection,
    srs: &SpatialReferenceSystem,
) -> Result<()> {
    conn.execute(
        "INSERT INTO gpkg_spatial_ref_sys (srs_name, srs_id, organization, organization_coordsys_id, definition, description) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            srs.name,
            srs.identifier,
            srs.organization,
            srs.organization_srs_id,
            srs.definition,
            srs.description
        ],
    )?;
    debug!("Inserted spatial reference system {}", srs.identifier);
    Ok(())
}

pub(crate) fn query_spatial_reference_system(
    conn: &Connection,
    srs_id: i32,
) -> Result<Option<SpatialReferenceSystem>> {
    Ok(conn
        .query_row(
            "SELECT srs_name, srs_id, organization, organization_coordsys_id, definition, description FROM gpkg_spatial_ref_sys WHERE srs_id = ?1",
            [srs_id],
            spatial_reference_system_from_row,
        )
        .optional()?)
}

fn spatial_reference_system_from_row(row: &Row<'_>) -> rusqlite::Result<SpatialReferenceSystem> {
    Ok(SpatialReferenceSystem {
        name: row.get(0)?,
        identifier: row.get(1)?,
        organization: row.get(2)?,
        organization_srs_id: row.get(3)?,
        definition: row.get(4)?,
        description: row.get(5)?,
    })
}

/// Adds or reuses the row for `srs`, returning the stored row
pub(crate) fn ensure_spatial_reference_system(
    conn: &Connection,
    srs: &SpatialReferenceSystem,
) -> Result<SpatialReferenceSystem> {
    match query_spatial_reference_system(conn, srs.identifier)? {
        Some(existing) if existing.same_definition(srs) => Ok(existing),
        Some(existing) => Err(Error::Conflict(format!(
            "srs_id {} is already defined as {}:{}",
            existing.identifier, existing.organization, existing.organization_srs_id
        ))),
        None => {
            insert_spatial_reference_system(conn, srs)?;
            Ok(srs.clone())
        }
    }
}

pub(crate) fn insert_content(
    conn: &Connection,
    table_name: &str,
    data_type: &DataType,
    identifier: &str,
    description: &str,
    bounding_box: &BoundingBox,
    srs_id: i32,
) -> Result<Content> {
    let last_change = timestamp();
    conn.execute(
        "INSERT INTO gpkg_contents (table_name, data_type, identifier, description, last_change, min_x, min_y, max_x, max_y, srs_id) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            table_name,
            data_type.as_str(),
            identifier,
            description,
            last_change,
            bounding_box.min_x(),
            bounding_box.min_y(),
            bounding_box.max_x(),
            bounding_box.max_y(),
            srs_id
        ],
    )?;
    debug!("Registered {table_name} as {data_type} content");
    Ok(Content {
        table_name: table_name.to_owned(),
        data_type: data_type.clone(),
        identifier: Some(identifier.to_owned()),
        description: Some(description.to_owned()),
        last_change: parse_timestamp(&last_change)?,
        bounding_box: Some(*bounding_box),
        srs_id: Some(srs_id),
    })
}

pub(crate) fn query_content(conn: &Connection, table_name: &str) -> Result<Option<Content>> {
    conn.query_row(
        &format!("SELECT {CONTENT_COLUMNS} FROM gpkg_contents WHERE table_name = ?1"),
        [table_name],
        raw_content,
    )
    .optional()?
    .map(content_from_raw)
    .transpose()
}

pub(crate) fn query_contents(conn: &Connection, data_type: Option<&DataType>) -> Result<Vec<Content>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CONTENT_COLUMNS} FROM gpkg_contents WHERE ?1 IS NULL OR data_type = ?1 ORDER BY table_name"
    ))?;
    let rows = stmt
        .query_map([data_type.map(DataType::as_str)], raw_content)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(content_from_raw).collect()
}

/// Access to `gpkg_spatial_ref_sys` and `gpkg_contents`
#[derive(Debug, Clone, Copy)]
pub struct GeoPackageCore<'a> {
    conn: &'a Connection,
}

impl<'a> GeoPackageCore<'a> {
    pub(crate) const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Returns every spatial reference system, ordered by `srs_id`
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be read
    pub fn spatial_reference_systems(&self) -> Result<Vec<SpatialReferenceSystem>> {
        let mut stmt = self.conn.prepare(
            "SELECT srs_name, srs_id, organization, organization_coordsys_id, definition, description FROM gpkg_spatial_ref_sys ORDER BY srs_id",
        )?;
        let rows = stmt
            .query_map([], spatial_reference_system_from_row)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(rows)
    }

    /// Returns the spatial reference system with `srs_id`
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be read
    pub fn spatial_reference_system(&self, srs_id: i32) -> Result<Option<SpatialReferenceSystem>> {
        query_spatial_reference_system(self.conn, srs_id)
    }

    /// Returns the spatial reference system defining `crs`
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be read
    pub fn spatial_reference_system_for(&self, crs: &Crs) -> Result<Option<SpatialReferenceSystem>> {
        Ok(self
            .conn
            .query_row(
                "SELECT srs_name, srs_id, organization, organization_coordsys_id, definition, description FROM gpkg_spatial_ref_sys WHERE organization = ?1 COLLATE NOCASE AND organization_coordsys_id = ?2",
                params![crs.authority(), crs.identifier()],
                spatial_reference_system_from_row,
            )
            .optional()?)
    }

    /// Adds `srs`, or returns the stored row if an identical one already exists
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] if `srs.identifier` is already used by a different definition
    #[instrument(skip(self))]
    pub fn add_spatial_reference_system(
        &self,
        srs: &SpatialReferenceSystem,
    ) -> Result<SpatialReferenceSystem> {
        transaction(self.conn, |tx| ensure_spatial_reference_system(tx, srs))
    }

    /// Returns every `gpkg_contents` row, optionally restricted to one data type
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be read or holds malformed rows
    pub fn contents(&self, data_type: Option<&DataType>) -> Result<Vec<Content>> {
        query_contents(self.conn, data_type)
    }

    /// Returns the `gpkg_contents` row for `table_name`
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be read or the row is malformed
    pub fn content(&self, table_name: &str) -> Result<Option<Content>> {
        query_content(self.conn, table_name)
    }
}
