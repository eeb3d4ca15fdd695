use bon::Builder;
use rusqlite::{params, Connection, OptionalExtension, Row};
use strum::{Display as StrumDisplay, EnumIter, EnumString, IntoStaticStr};
use tracing::debug;

use crate::{
    geopackage::{core::query_content, quote_identifier, table_exists, transaction},
    Error, Result,
};

pub(crate) const DATA_COLUMNS_DDL: &str = "CREATE TABLE IF NOT EXISTS gpkg_data_columns (
    table_name TEXT NOT NULL,
    column_name TEXT NOT NULL,
    name TEXT,
    title TEXT,
    description TEXT,
    mime_type TEXT,
    constraint_name TEXT,
    CONSTRAINT pk_gdc PRIMARY KEY (table_name, column_name),
    CONSTRAINT gdc_tn UNIQUE (table_name, name)
)";

pub(crate) const DATA_COLUMN_CONSTRAINTS_DDL: &str = "CREATE TABLE IF NOT EXISTS gpkg_data_column_constraints (
    constraint_name TEXT NOT NULL,
    constraint_type TEXT NOT NULL,
    value TEXT,
    min NUMERIC,
    min_is_inclusive BOOLEAN,
    max NUMERIC,
    max_is_inclusive BOOLEAN,
    description TEXT,
    CONSTRAINT gdcc_ntv UNIQUE (constraint_name, constraint_type, value)
)";

/// Kind of a data column constraint
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString, EnumIter, IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum ConstraintType {
    /// numeric interval given by `min` and `max`
    Range,
    /// one allowed value per row, sharing the constraint name
    Enum,
    /// a glob pattern in `value`
    Glob,
}

/// A row of `gpkg_data_columns`
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
#[non_exhaustive]
pub struct DataColumn {
    /// Column: `table_name`
    #[builder(into)]
    pub table_name: String,
    /// Column: `column_name`
    #[builder(into)]
    pub column_name: String,
    /// Column: `name`
    #[builder(into)]
    pub name: Option<String>,
    /// Column: `title`
    #[builder(into)]
    pub title: Option<String>,
    /// Column: `description`
    #[builder(into)]
    pub description: Option<String>,
    /// Column: `mime_type`
    #[builder(into)]
    pub mime_type: Option<String>,
    /// Column: `constraint_name`
    #[builder(into)]
    pub constraint_name: Option<String>,
}

/// A row of `gpkg_data_column_constraints`
#[derive(Debug, Clone, PartialEq, Builder)]
#[non_exhaustive]
pub struct DataColumnConstraint {
    /// Column: `constraint_name`
    #[builder(into)]
    pub constraint_name: String,
    /// Column: `constraint_type`
    pub constraint_type: ConstraintType,
    /// Column: `value`
    #[builder(into)]
    pub value: Option<String>,
    /// Column: `min`
    pub min: Option<f64>,
    /// Column: `min_is_inclusive`
    pub min_is_inclusive: Option<bool>,
    /// Column: `max`
    pub max: Option<f64>,
    /// Column: `max_is_inclusive`
    pub max_is_inclusive: Option<bool>,
    /// Column: `description`
    #[builder(into)]
    pub description: Option<String>,
}

impl DataColumnConstraint {
    fn validate(&self) -> Result<()> {
        let valid = match self.constraint_type {
            ConstraintType::Range => {
                self.value.is_none()
                    && matches!((self.min, self.max), (Some(min), Some(max)) if min < max)
                    && self.min_is_inclusive.is_some()
                    && self.max_is_inclusive.is_some()
            }
            ConstraintType::Enum | ConstraintType::Glob => {
                self.value.is_some()
                    && self.min.is_none()
                    && self.max.is_none()
                    && self.min_is_inclusive.is_none()
                    && self.max_is_inclusive.is_none()
            }
        };
        if valid {
            Ok(())
        } else {
            Err(Error::Parse(format!(
                "malformed {} constraint {}",
                self.constraint_type, self.constraint_name
            )))
        }
    }
}

const DATA_COLUMN_COLUMNS: &str =
    "table_name, column_name, name, title, description, mime_type, constraint_name";

fn data_column_from_row(row: &Row<'_>) -> rusqlite::Result<DataColumn> {
    Ok(DataColumn {
        table_name: row.get(0)?,
        column_name: row.get(1)?,
        name: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        mime_type: row.get(5)?,
        constraint_name: row.get(6)?,
    })
}

/// Access to data column descriptions and their constraints
#[derive(Debug, Clone, Copy)]
pub struct GeoPackageSchema<'a> {
    conn: &'a Connection,
}

impl<'a> GeoPackageSchema<'a> {
    pub(crate) const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Describes a column of a table listed in `gpkg_contents`
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the table is not in `gpkg_contents` or has no such column
    /// - an SQLite error if the column is already described
    pub fn add_data_column(&self, column: &DataColumn) -> Result<()> {
        if query_content(self.conn, &column.table_name)?.is_none() {
            return Err(Error::NotFound(format!("contents entry {}", column.table_name)));
        }
        if !self.has_column(&column.table_name, &column.column_name)? {
            return Err(Error::NotFound(format!(
                "column {}.{}",
                column.table_name, column.column_name
            )));
        }
        transaction(self.conn, |tx| {
            tx.execute_batch(DATA_COLUMNS_DDL)?;
            tx.execute(
                &format!("INSERT INTO gpkg_data_columns ({DATA_COLUMN_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
                params![
                    column.table_name,
                    column.column_name,
                    column.name,
                    column.title,
                    column.description,
                    column.mime_type,
                    column.constraint_name
                ],
            )?;
            Ok(())
        })?;
        debug!("Described column {}.{}", column.table_name, column.column_name);
        Ok(())
    }

    fn has_column(&self, table_name: &str, column_name: &str) -> Result<bool> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", quote_identifier(table_name)))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names.iter().any(|n| n.eq_ignore_ascii_case(column_name)))
    }

    /// Returns the described columns of `table_name`
    ///
    /// # Errors
    ///
    /// Returns an error if `gpkg_data_columns` cannot be read
    pub fn data_columns(&self, table_name: &str) -> Result<Vec<DataColumn>> {
        if !table_exists(self.conn, "gpkg_data_columns")? {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {DATA_COLUMN_COLUMNS} FROM gpkg_data_columns WHERE table_name = ?1 ORDER BY column_name"
        ))?;
        let rows = stmt
            .query_map([table_name], data_column_from_row)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(rows)
    }

    /// Returns the description of one column
    ///
    /// # Errors
    ///
    /// Returns an error if `gpkg_data_columns` cannot be read
    pub fn data_column(&self, table_name: &str, column_name: &str) -> Result<Option<DataColumn>> {
        if !table_exists(self.conn, "gpkg_data_columns")? {
            return Ok(None);
        }
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {DATA_COLUMN_COLUMNS} FROM gpkg_data_columns WHERE table_name = ?1 AND column_name = ?2"),
                [table_name, column_name],
                data_column_from_row,
            )
            .optional()?)
    }

    /// Adds one row of a data column constraint
    ///
    /// Range constraints carry `min`/`max` and no `value`; enum and glob constraints carry a
    /// `value` and nothing else.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the row does not fit its constraint type
    pub fn add_data_column_constraint(&self, constraint: &DataColumnConstraint) -> Result<()> {
        constraint.validate()?;
        transaction(self.conn, |tx| {
            tx.execute_batch(DATA_COLUMN_CONSTRAINTS_DDL)?;
            tx.execute(
                "INSERT INTO gpkg_data_column_constraints (constraint_name, constraint_type, value, min, min_is_inclusive, max, max_is_inclusive, description) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    constraint.constraint_name,
                    constraint.constraint_type.to_string(),
                    constraint.value,
                    constraint.min,
                    constraint.min_is_inclusive,
                    constraint.max,
                    constraint.max_is_inclusive,
                    constraint.description
                ],
            )?;
            Ok(())
        })?;
        debug!(
            "Added {} constraint {}",
            constraint.constraint_type, constraint.constraint_name
        );
        Ok(())
    }

    /// Returns every row of the constraint called `constraint_name`
    ///
    /// # Errors
    ///
    /// Returns an error if `gpkg_data_column_constraints` cannot be read or holds an unknown
    /// constraint type
    pub fn data_column_constraints(&self, constraint_name: &str) -> Result<Vec<DataColumnConstraint>> {
        if !table_exists(self.conn, "gpkg_data_column_constraints")? {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(
            "SELECT constraint_name, constraint_type, value, min, min_is_inclusive, max, max_is_inclusive, description FROM gpkg_data_column_constraints WHERE constraint_name = ?1 ORDER BY value",
        )?;
        let rows = stmt
            .query_map([constraint_name], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<f64>>(3)?,
                    row.get::<_, Option<bool>>(4)?,
                    row.get::<_, Option<f64>>(5)?,
                    row.get::<_, Option<bool>>(6)?,
                    row.get::<_, Option<String>>(7)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(
                |(constraint_name, constraint_type, value, min, min_is_inclusive, max, max_is_inclusive, description)| {
                    Ok(DataColumnConstraint {
                        constraint_type: constraint_type.parse().map_err(|_| {
                            Error::Parse(format!("unknown constraint type {constraint_type}"))
                        })?,
                        constraint_name,
                        value,
                        min,
                        min_is_inclusive,
                        max,
                        max_is_inclusive,
                        description,
                    })
                },
            )
            .collect()
    }
}
