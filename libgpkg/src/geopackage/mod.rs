#![allow(clippy::module_name_repetitions)]

pub(crate) mod core;
pub(crate) mod extensions;
pub(crate) mod features;
pub(crate) mod metadata;
pub(crate) mod names;
pub(crate) mod schema;
pub(crate) mod tiles;

use std::{
    fs::File,
    io::{ErrorKind, Read},
    path::{Path, PathBuf},
};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension};
use strum::{Display as StrumDisplay, EnumString};
use tracing::{debug, info, instrument, warn};

use crate::{
    verification::{Severity, VerificationIssue, VerificationLevel, Verifier},
    Error, Result,
};

pub use self::core::{Content, DataType, GeoPackageCore, SpatialReferenceSystem};
pub use extensions::{Extension, ExtensionScope, GeoPackageExtensions};
pub use features::{FeatureSet, GeoPackageFeatures, GeometryColumn, GeometryType, ValueRequirement};
pub use metadata::{GeoPackageMetadata, Metadata, MetadataReference, MetadataScope, ReferenceScope};
pub use names::{validate_column_name, validate_table_name};
pub use schema::{ConstraintType, DataColumn, DataColumnConstraint, GeoPackageSchema};
pub use tiles::{GeoPackageTiles, TileMatrix, TileMatrixSet, TileSet};

/// The first 16 bytes of every SQLite 3 database
pub const SQLITE_HEADER: &[u8; 16] = b"SQLite format 3\0";

/// `application_id` of a GeoPackage: the ASCII bytes `GPKG`
pub const APPLICATION_ID: i32 = 0x4750_4B47;

/// `user_version` written to new GeoPackages (1.02.00)
pub const USER_VERSION: i32 = 10_200;

/// Offset of the big-endian `application_id` in the SQLite header
pub const APPLICATION_ID_OFFSET: usize = 68;

/// Offset of the big-endian `user_version` in the SQLite header
pub const USER_VERSION_OFFSET: usize = 60;

/// How [`GeoPackage::open`] treats the file at the given path
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum OpenMode {
    /// The file must already exist
    Open,
    /// The file must not exist yet
    Create,
    /// Open the file if it exists, create it otherwise
    #[default]
    OpenOrCreate,
}

/// An open GeoPackage file
///
/// The container owns the SQLite connection; the sub-APIs returned by [`Self::core`],
/// [`Self::tiles`] and friends borrow it. Every mutation runs in its own transaction, which is
/// rolled back if the mutation fails.
#[derive(Debug)]
pub struct GeoPackage {
    conn: Connection,
    path: PathBuf,
}

impl GeoPackage {
    /// Opens (and possibly creates) the GeoPackage at `path`
    ///
    /// Newly created files get the GeoPackage `application_id` and `user_version`, the
    /// `gpkg_spatial_ref_sys` and `gpkg_contents` tables, and the three mandatory spatial
    /// reference systems. Unless `level` is [`VerificationLevel::None`], the file is verified
    /// after opening and rejected if any [`Severity::Error`] issue is found.
    ///
    /// # Errors
    ///
    /// - [`Error::FileExists`] for [`OpenMode::Create`] on an existing file
    /// - [`Error::FileNotFound`] for [`OpenMode::Open`] on a missing file
    /// - [`Error::UnsupportedFormat`] if an existing file is not an SQLite database
    /// - [`Error::ConformanceFailure`] if verification found errors
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, mode: OpenMode, level: VerificationLevel) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let exists = path.try_exists()?;
        match (mode, exists) {
            (OpenMode::Create, true) => return Err(Error::FileExists(path)),
            (OpenMode::Open, false) => return Err(Error::FileNotFound(path)),
            _ => {}
        }
        if exists {
            check_sqlite_header(&path)?;
        }

        let conn = Connection::open(&path)?;
        configure(&conn).map_err(|e| match e {
            Error::Sqlite(rusqlite::Error::SqliteFailure(f, _))
                if f.code == ErrorCode::NotADatabase =>
            {
                Error::UnsupportedFormat(path.clone())
            }
            e => e,
        })?;
        let gpkg = Self { conn, path };
        if !exists {
            gpkg.initialize()?;
            info!("Created GeoPackage {}", gpkg.path.display());
        }

        if level != VerificationLevel::None {
            let issues = gpkg.verify(level)?;
            if issues.iter().any(|i| i.severity() == Severity::Error) {
                return Err(Error::ConformanceFailure(issues));
            }
            for issue in &issues {
                warn!("{issue}");
            }
        }
        info!("Opened GeoPackage {}", gpkg.path.display());
        Ok(gpkg)
    }

    /// Creates a new GeoPackage at `path` without verifying it
    ///
    /// # Errors
    ///
    /// See [`Self::open`]
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(path, OpenMode::Create, VerificationLevel::None)
    }

    fn initialize(&self) -> Result<()> {
        // the header fields are committed on their own, before any table exists
        self.conn
            .pragma_update(None, "application_id", APPLICATION_ID)?;
        self.conn.pragma_update(None, "user_version", USER_VERSION)?;
        transaction(&self.conn, |tx| {
            self::core::create_tables(tx)?;
            self::core::seed_spatial_reference_systems(tx)
        })
    }

    /// Rolls back any pending transaction and closes the connection
    ///
    /// # Errors
    ///
    /// Returns an error if the rollback or the close fails
    pub fn close(self) -> Result<()> {
        if !self.conn.is_autocommit() {
            warn!("Rolling back pending transaction on close");
            self.conn.execute_batch("ROLLBACK")?;
        }
        self.conn.close().map_err(|(_, e)| Error::Sqlite(e))?;
        debug!("Closed {}", self.path.display());
        Ok(())
    }

    pub(crate) const fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Returns the path of the file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the `application_id` stored in the database header
    ///
    /// # Errors
    ///
    /// Returns an error if the pragma cannot be read
    pub fn application_id(&self) -> Result<i32> {
        Ok(self
            .conn
            .pragma_query_value(None, "application_id", |row| row.get(0))?)
    }

    /// Returns the `user_version` stored in the database header
    ///
    /// # Errors
    ///
    /// Returns an error if the pragma cannot be read
    pub fn user_version(&self) -> Result<i32> {
        Ok(self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?)
    }

    /// Spatial reference systems and contents
    #[must_use]
    pub const fn core(&self) -> GeoPackageCore<'_> {
        GeoPackageCore::new(&self.conn)
    }

    /// Tile sets, tile matrices and tiles
    #[must_use]
    pub const fn tiles(&self) -> GeoPackageTiles<'_> {
        GeoPackageTiles::new(&self.conn)
    }

    /// Feature sets and geometry columns
    #[must_use]
    pub const fn features(&self) -> GeoPackageFeatures<'_> {
        GeoPackageFeatures::new(&self.conn)
    }

    /// Data columns and data column constraints
    #[must_use]
    pub const fn schema(&self) -> GeoPackageSchema<'_> {
        GeoPackageSchema::new(&self.conn)
    }

    /// Metadata and metadata references
    #[must_use]
    pub const fn metadata(&self) -> GeoPackageMetadata<'_> {
        GeoPackageMetadata::new(&self.conn)
    }

    /// Registered extensions
    #[must_use]
    pub const fn extensions(&self) -> GeoPackageExtensions<'_> {
        GeoPackageExtensions::new(&self.conn)
    }

    /// Checks the file against the GeoPackage requirements
    ///
    /// Verification only reads; running it twice yields the same issues.
    ///
    /// # Errors
    ///
    /// Individual requirement failures are reported as issues, not errors. This only fails if
    /// the verifier itself cannot be set up.
    pub fn verify(&self, level: VerificationLevel) -> Result<Vec<VerificationIssue>> {
        Ok(Verifier::new().verify(&self.conn, &self.path, level))
    }
}

/// Applies the connection settings every GeoPackage is used with
///
/// Durability is traded for write speed (`synchronous=OFF`, in-memory journal); foreign keys
/// are enforced.
fn configure(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "synchronous", "OFF")?;
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "MEMORY", |row| row.get(0))?;
    debug!("journal_mode={mode}");
    conn.pragma_update(None, "foreign_keys", "ON")?;
    // forces SQLite to read the header of existing files
    conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
        row.get::<_, i64>(0)
    })?;
    Ok(())
}

fn check_sqlite_header(path: &Path) -> Result<()> {
    let mut header = [0; SQLITE_HEADER.len()];
    match File::open(path)?.read_exact(&mut header) {
        Ok(()) if &header == SQLITE_HEADER => Ok(()),
        Ok(()) => Err(Error::UnsupportedFormat(path.to_path_buf())),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
            Err(Error::UnsupportedFormat(path.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Runs `f` inside a savepoint, releasing it only if `f` succeeds
///
/// On failure everything `f` wrote is rolled back and the original error is returned. Calls nest,
/// so a mutation made while a [`begin_savepoint`] is open only becomes durable once that outer
/// savepoint is released.
pub(crate) fn transaction<T>(conn: &Connection, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
    const NAME: &str = "gpkg_write";
    begin_savepoint(conn, NAME)?;
    match f(conn) {
        Ok(value) => {
            release_savepoint(conn, NAME)?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = rollback_savepoint(conn, NAME) {
                warn!("Unable to roll back {NAME}: {rollback}");
            }
            Err(e)
        }
    }
}

/// Opens the savepoint `name`, starting a transaction if none is open
pub(crate) fn begin_savepoint(conn: &Connection, name: &str) -> Result<()> {
    conn.execute_batch(&format!("SAVEPOINT {name}"))
        .map_err(Error::Transaction)
}

/// Keeps everything written since `name` was opened
pub(crate) fn release_savepoint(conn: &Connection, name: &str) -> Result<()> {
    conn.execute_batch(&format!("RELEASE {name}"))
        .map_err(Error::Transaction)
}

/// Discards everything written since `name` was opened and closes it
pub(crate) fn rollback_savepoint(conn: &Connection, name: &str) -> Result<()> {
    conn.execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name}"))
        .map_err(Error::Transaction)
}

/// Current time in the ISO 8601 form GeoPackage timestamps use
pub(crate) fn timestamp() -> String {
    format_timestamp(Utc::now())
}

pub(crate) fn format_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Parse(format!("invalid timestamp '{value}': {e}")))
}

/// Returns true if a table or view called `name` exists
pub(crate) fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE (type = 'table' OR type = 'view') AND name = ?1 COLLATE NOCASE",
            [name],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

/// Quotes `name` for use as an SQL identifier
pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
