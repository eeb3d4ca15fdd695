use std::sync::LazyLock;

use bon::Builder;
use regex::Regex;
use rusqlite::{params, Connection};
use strum::{Display as StrumDisplay, EnumIter, EnumString, IntoStaticStr};
use tracing::debug;

use crate::{
    geopackage::{table_exists, transaction},
    Error, Result,
};

pub(crate) const EXTENSIONS_DDL: &str = "CREATE TABLE IF NOT EXISTS gpkg_extensions (
    table_name TEXT,
    column_name TEXT,
    extension_name TEXT NOT NULL,
    definition TEXT NOT NULL,
    scope TEXT NOT NULL,
    CONSTRAINT ge_tce UNIQUE (table_name, column_name, extension_name)
)";

/// `<author>_<extension>`, e.g. `gpkg_rtree_index`
pub(crate) static EXTENSION_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9]+_[A-Za-z0-9_]+$").expect("valid extension name regex")
});

/// Which operations an extension affects
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString, EnumIter, IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum ExtensionScope {
    /// readers and writers must understand the extension
    ReadWrite,
    /// only writers must understand the extension
    WriteOnly,
}

/// A row of `gpkg_extensions`
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
#[non_exhaustive]
pub struct Extension {
    /// Column: `table_name`, `None` for extensions of the whole file
    #[builder(into)]
    pub table_name: Option<String>,
    /// Column: `column_name`
    #[builder(into)]
    pub column_name: Option<String>,
    /// Column: `extension_name`
    #[builder(into)]
    pub extension_name: String,
    /// Column: `definition`, usually a URL
    #[builder(into)]
    pub definition: String,
    /// Column: `scope`
    pub scope: ExtensionScope,
}

/// Access to the registered extensions
#[derive(Debug, Clone, Copy)]
pub struct GeoPackageExtensions<'a> {
    conn: &'a Connection,
}

impl<'a> GeoPackageExtensions<'a> {
    pub(crate) const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Registers `extension`
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidName`] if the extension name is not `<author>_<extension>`
    /// - [`Error::Parse`] if a column is given without a table
    /// - [`Error::Conflict`] if the same extension is already registered for the same table and
    ///   column
    pub fn add_extension(&self, extension: &Extension) -> Result<()> {
        if !EXTENSION_NAME_REGEX.is_match(&extension.extension_name) {
            return Err(Error::InvalidName {
                name: extension.extension_name.clone(),
                reason: "extension names have the form <author>_<extension>",
            });
        }
        if extension.column_name.is_some() && extension.table_name.is_none() {
            return Err(Error::Parse(format!(
                "extension {} names a column but no table",
                extension.extension_name
            )));
        }
        if self.has_extension(
            &extension.extension_name,
            extension.table_name.as_deref(),
            extension.column_name.as_deref(),
        )? {
            return Err(Error::Conflict(format!(
                "extension {} is already registered",
                extension.extension_name
            )));
        }
        transaction(self.conn, |tx| {
            tx.execute_batch(EXTENSIONS_DDL)?;
            tx.execute(
                "INSERT INTO gpkg_extensions (table_name, column_name, extension_name, definition, scope) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    extension.table_name,
                    extension.column_name,
                    extension.extension_name,
                    extension.definition,
                    extension.scope.to_string()
                ],
            )?;
            Ok(())
        })?;
        debug!("Registered extension {}", extension.extension_name);
        Ok(())
    }

    /// Returns true if `extension_name` is registered for exactly this table and column
    ///
    /// # Errors
    ///
    /// Returns an error if `gpkg_extensions` cannot be read
    pub fn has_extension(
        &self,
        extension_name: &str,
        table_name: Option<&str>,
        column_name: Option<&str>,
    ) -> Result<bool> {
        if !table_exists(self.conn, "gpkg_extensions")? {
            return Ok(false);
        }
        let count: i64 = self.conn.query_row(
            "SELECT count(*) FROM gpkg_extensions WHERE extension_name = ?1 AND table_name IS ?2 AND column_name IS ?3",
            params![extension_name, table_name, column_name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Returns every registered extension
    ///
    /// # Errors
    ///
    /// Returns an error if `gpkg_extensions` cannot be read or holds an unknown scope
    pub fn extensions(&self) -> Result<Vec<Extension>> {
        if !table_exists(self.conn, "gpkg_extensions")? {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(
            "SELECT table_name, column_name, extension_name, definition, scope FROM gpkg_extensions ORDER BY extension_name, table_name, column_name",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(table_name, column_name, extension_name, definition, scope)| {
                Ok(Extension {
                    table_name,
                    column_name,
                    extension_name,
                    definition,
                    scope: scope
                        .parse()
                        .map_err(|_| Error::Parse(format!("unknown extension scope {scope}")))?,
                })
            })
            .collect()
    }
}
