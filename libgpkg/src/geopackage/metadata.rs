use bon::Builder;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use strum::{Display as StrumDisplay, EnumIter, EnumString, IntoStaticStr};
use tracing::debug;

use crate::{
    geopackage::{
        core::query_content, format_timestamp, parse_timestamp, table_exists, transaction,
    },
    Error, Result,
};

pub(crate) const METADATA_DDL: &str = "CREATE TABLE IF NOT EXISTS gpkg_metadata (
    id INTEGER CONSTRAINT m_pk PRIMARY KEY ASC NOT NULL,
    md_scope TEXT NOT NULL DEFAULT 'dataset',
    md_standard_uri TEXT NOT NULL,
    mime_type TEXT NOT NULL DEFAULT 'text/xml',
    metadata TEXT NOT NULL DEFAULT ''
)";

pub(crate) const METADATA_REFERENCE_DDL: &str = "CREATE TABLE IF NOT EXISTS gpkg_metadata_reference (
    reference_scope TEXT NOT NULL,
    table_name TEXT,
    column_name TEXT,
    row_id_value INTEGER,
    timestamp DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
    md_file_id INTEGER NOT NULL,
    md_parent_id INTEGER,
    CONSTRAINT crmr_mfi_fk FOREIGN KEY (md_file_id) REFERENCES gpkg_metadata(id),
    CONSTRAINT crmr_mpi_fk FOREIGN KEY (md_parent_id) REFERENCES gpkg_metadata(id)
)";

/// What a metadata document describes (ISO 19115 `MD_ScopeCode`)
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString, EnumIter, IntoStaticStr,
)]
#[strum(serialize_all = "camelCase")]
#[allow(missing_docs)]
pub enum MetadataScope {
    Undefined,
    FieldSession,
    CollectionSession,
    Series,
    #[default]
    Dataset,
    FeatureType,
    Feature,
    AttributeType,
    Attribute,
    Tile,
    Model,
    Catalog,
    Schema,
    Taxonomy,
    Software,
    Service,
    CollectionHardware,
    NonGeographicDataset,
    DimensionGroup,
    Style,
}

/// What a metadata reference points at
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString, EnumIter, IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum ReferenceScope {
    /// the whole file
    GeoPackage,
    /// a table
    Table,
    /// a column of a table
    Column,
    /// a row of a table
    Row,
    /// one cell of a table
    #[strum(serialize = "row/col")]
    RowCol,
}

impl ReferenceScope {
    const fn requires_table(self) -> bool {
        !matches!(self, Self::GeoPackage)
    }

    const fn requires_column(self) -> bool {
        matches!(self, Self::Column | Self::RowCol)
    }

    const fn requires_row(self) -> bool {
        matches!(self, Self::Row | Self::RowCol)
    }
}

/// A row of `gpkg_metadata`
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct Metadata {
    /// Column: `id`
    pub id: i64,
    /// Column: `md_scope`
    pub scope: MetadataScope,
    /// Column: `md_standard_uri`
    pub standard_uri: String,
    /// Column: `mime_type`
    pub mime_type: String,
    /// Column: `metadata`
    pub metadata: String,
}

/// A row of `gpkg_metadata_reference`
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
#[non_exhaustive]
pub struct MetadataReference {
    /// Column: `reference_scope`
    pub scope: ReferenceScope,
    /// Column: `table_name`
    #[builder(into)]
    pub table_name: Option<String>,
    /// Column: `column_name`
    #[builder(into)]
    pub column_name: Option<String>,
    /// Column: `row_id_value`
    pub row_id: Option<i64>,
    /// Column: `timestamp`
    #[builder(default = Utc::now())]
    pub timestamp: DateTime<Utc>,
    /// Column: `md_file_id`
    pub file_id: i64,
    /// Column: `md_parent_id`
    pub parent_id: Option<i64>,
}

impl MetadataReference {
    fn validate(&self) -> Result<()> {
        let scope = self.scope;
        if scope.requires_table() != self.table_name.is_some()
            || scope.requires_column() != self.column_name.is_some()
            || scope.requires_row() != self.row_id.is_some()
        {
            return Err(Error::Parse(format!(
                "a {scope} metadata reference does not fit table {:?}, column {:?}, row {:?}",
                self.table_name, self.column_name, self.row_id
            )));
        }
        if self.parent_id == Some(self.file_id) {
            return Err(Error::Parse(format!(
                "metadata {} cannot be its own parent",
                self.file_id
            )));
        }
        Ok(())
    }
}

/// Access to metadata documents and what they describe
#[derive(Debug, Clone, Copy)]
pub struct GeoPackageMetadata<'a> {
    conn: &'a Connection,
}

impl<'a> GeoPackageMetadata<'a> {
    pub(crate) const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Stores a metadata document and returns it with its assigned id
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be inserted
    pub fn add_metadata(
        &self,
        scope: MetadataScope,
        standard_uri: &str,
        mime_type: &str,
        metadata: &str,
    ) -> Result<Metadata> {
        let id = transaction(self.conn, |tx| {
            tx.execute_batch(METADATA_DDL)?;
            tx.execute(
                "INSERT INTO gpkg_metadata (md_scope, md_standard_uri, mime_type, metadata) VALUES (?1, ?2, ?3, ?4)",
                params![scope.to_string(), standard_uri, mime_type, metadata],
            )?;
            Ok(tx.last_insert_rowid())
        })?;
        debug!("Added {scope} metadata {id}");
        Ok(Metadata {
            id,
            scope,
            standard_uri: standard_uri.to_owned(),
            mime_type: mime_type.to_owned(),
            metadata: metadata.to_owned(),
        })
    }

    /// Returns every metadata document, ordered by id
    ///
    /// # Errors
    ///
    /// Returns an error if `gpkg_metadata` cannot be read or holds an unknown scope
    pub fn metadata(&self) -> Result<Vec<Metadata>> {
        if !table_exists(self.conn, "gpkg_metadata")? {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(
            "SELECT id, md_scope, md_standard_uri, mime_type, metadata FROM gpkg_metadata ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(id, scope, standard_uri, mime_type, metadata)| {
                Ok(Metadata {
                    id,
                    scope: scope
                        .parse()
                        .map_err(|_| Error::Parse(format!("unknown metadata scope {scope}")))?,
                    standard_uri,
                    mime_type,
                    metadata,
                })
            })
            .collect()
    }

    /// Links a metadata document to the part of the file it describes
    ///
    /// # Errors
    ///
    /// - [`Error::Parse`] if the table/column/row fields do not fit the reference scope
    /// - [`Error::NotFound`] if the referenced table is not in `gpkg_contents`
    /// - an SQLite error if `file_id` or `parent_id` is not a stored metadata id
    pub fn add_metadata_reference(&self, reference: &MetadataReference) -> Result<()> {
        reference.validate()?;
        if let Some(table_name) = &reference.table_name {
            if query_content(self.conn, table_name)?.is_none() {
                return Err(Error::NotFound(format!("contents entry {table_name}")));
            }
        }
        transaction(self.conn, |tx| {
            tx.execute_batch(METADATA_DDL)?;
            tx.execute_batch(METADATA_REFERENCE_DDL)?;
            tx.execute(
                "INSERT INTO gpkg_metadata_reference (reference_scope, table_name, column_name, row_id_value, timestamp, md_file_id, md_parent_id) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    reference.scope.to_string(),
                    reference.table_name,
                    reference.column_name,
                    reference.row_id,
                    format_timestamp(reference.timestamp),
                    reference.file_id,
                    reference.parent_id
                ],
            )?;
            Ok(())
        })?;
        debug!("Referenced metadata {} at {} scope", reference.file_id, reference.scope);
        Ok(())
    }

    /// Returns every metadata reference
    ///
    /// # Errors
    ///
    /// Returns an error if `gpkg_metadata_reference` cannot be read or holds malformed rows
    pub fn metadata_references(&self) -> Result<Vec<MetadataReference>> {
        if !table_exists(self.conn, "gpkg_metadata_reference")? {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(
            "SELECT reference_scope, table_name, column_name, row_id_value, timestamp, md_file_id, md_parent_id FROM gpkg_metadata_reference ORDER BY md_file_id, timestamp",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, Option<i64>>(6)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(
                |(scope, table_name, column_name, row_id, timestamp, file_id, parent_id)| {
                    Ok(MetadataReference {
                        scope: scope.parse().map_err(|_| {
                            Error::Parse(format!("unknown reference scope {scope}"))
                        })?,
                        table_name,
                        column_name,
                        row_id,
                        timestamp: parse_timestamp(&timestamp)?,
                        file_id,
                        parent_id,
                    })
                },
            )
            .collect()
    }
}
