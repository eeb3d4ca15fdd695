use std::{fs::File, io::Read, sync::LazyLock};

use regex::Regex;

use crate::{
    geopackage::{parse_timestamp, APPLICATION_ID, SQLITE_HEADER, USER_VERSION},
    verification::{
        require, require_level, verify_table, ColumnDefinition, ForeignKeyDefinition, Rule,
        Severity, TableDefinition, VerificationContext, VerificationLevel,
    },
};

pub(super) const RULES: &[Rule] = &[
    Rule::new(
        "Requirement 1",
        "A GeoPackage SHALL be an SQLite 3 database whose first 16 bytes are \"SQLite format 3\\0\"",
        sqlite_header,
    ),
    Rule::new(
        "Requirement 2",
        "A GeoPackage SHALL contain 0x47504B47 (\"GPKG\") as application_id and a GeoPackage version as user_version",
        application_id,
    ),
    Rule::new(
        "Requirement 3",
        "A GeoPackage SHALL have the file extension \".gpkg\"",
        file_extension,
    ),
    Rule::new(
        "Requirement 5",
        "The columns of tables in a GeoPackage SHALL only be declared using the GeoPackage data types",
        column_data_types,
    ),
    Rule::new(
        "Requirement 6",
        "PRAGMA integrity_check SHALL return \"ok\"",
        integrity_check,
    ),
    Rule::new(
        "Requirement 7",
        "PRAGMA foreign_key_check SHALL return an empty result set",
        foreign_key_check,
    ),
    Rule::new(
        "Requirement 10",
        "A GeoPackage SHALL include a gpkg_spatial_ref_sys table",
        spatial_ref_sys_table,
    ),
    Rule::new(
        "Requirement 11",
        "gpkg_spatial_ref_sys SHALL contain records for srs_id 4326 (EPSG), -1 and 0 (NONE)",
        required_spatial_reference_systems,
    ),
    Rule::new(
        "Requirement 13",
        "A GeoPackage SHALL include a gpkg_contents table",
        contents_table,
    ),
    Rule::new(
        "Requirement 14",
        "gpkg_contents.table_name SHALL reference an existing table or view",
        contents_table_names,
    ),
    Rule::new(
        "Requirement 15",
        "gpkg_contents.last_change SHALL be an ISO 8601 UTC timestamp of the form YYYY-MM-DDTHH:MM:SS.SSSZ",
        contents_last_change,
    ),
    Rule::new(
        "Requirement 16",
        "gpkg_contents.srs_id SHALL reference gpkg_spatial_ref_sys.srs_id",
        contents_srs_ids,
    ),
];

pub(super) const SPATIAL_REF_SYS: TableDefinition = TableDefinition::new(
    &[
        ColumnDefinition::new("srs_name", "TEXT").not_null(),
        ColumnDefinition::new("srs_id", "INTEGER").not_null().primary_key(),
        ColumnDefinition::new("organization", "TEXT").not_null(),
        ColumnDefinition::new("organization_coordsys_id", "INTEGER").not_null(),
        ColumnDefinition::new("definition", "TEXT").not_null(),
        ColumnDefinition::new("description", "TEXT"),
    ],
    &[],
    &[],
);

pub(super) const CONTENTS: TableDefinition = TableDefinition::new(
    &[
        ColumnDefinition::new("table_name", "TEXT").not_null().primary_key(),
        ColumnDefinition::new("data_type", "TEXT").not_null(),
        ColumnDefinition::new("identifier", "TEXT").unique(),
        ColumnDefinition::new("description", "TEXT").default_value("''"),
        ColumnDefinition::new("last_change", "DATETIME")
            .not_null()
            .default_value("strftime('%Y-%m-%dT%H:%M:%fZ','now')"),
        ColumnDefinition::new("min_x", "DOUBLE"),
        ColumnDefinition::new("min_y", "DOUBLE"),
        ColumnDefinition::new("max_x", "DOUBLE"),
        ColumnDefinition::new("max_y", "DOUBLE"),
        ColumnDefinition::new("srs_id", "INTEGER"),
    ],
    &[ForeignKeyDefinition::new("srs_id", "gpkg_spatial_ref_sys", "srs_id")],
    &[],
);

static DATA_TYPE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(BOOLEAN|TINYINT|SMALLINT|MEDIUMINT|INT|INTEGER|FLOAT|DOUBLE|REAL|TEXT(\s*\(\s*\d+\s*\))?|BLOB(\s*\(\s*\d+\s*\))?|GEOMETRY|POINT|LINESTRING|POLYGON|MULTIPOINT|MULTILINESTRING|MULTIPOLYGON|GEOMETRYCOLLECTION|DATE|DATETIME)$",
    )
    .expect("valid data type regex")
});

static TIMESTAMP_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}(:\d{2}(\.\d+)?)?Z$").expect("valid timestamp regex")
});

fn sqlite_header(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    let mut header = [0; SQLITE_HEADER.len()];
    let read = File::open(context.path())?.read_exact(&mut header);
    require(
        read.is_ok() && &header == SQLITE_HEADER,
        Severity::Error,
        "the file does not start with the SQLite 3 header",
    )
}

fn application_id(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    let conn = context.conn();
    let application_id: i32 = conn.pragma_query_value(None, "application_id", |row| row.get(0))?;
    require(
        application_id == APPLICATION_ID,
        Severity::Error,
        format!("application_id is {application_id:#010x}, expected {APPLICATION_ID:#010x}"),
    )?;
    let user_version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    require(
        user_version >= USER_VERSION,
        Severity::Warning,
        format!("user_version {user_version} predates {USER_VERSION}"),
    )
}

fn file_extension(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    let extension = context.path().extension().and_then(|e| e.to_str());
    require(
        extension.is_some_and(|e| e.eq_ignore_ascii_case("gpkg")),
        Severity::Warning,
        format!("{} does not end in .gpkg", context.path().display()),
    )
}

fn column_data_types(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    require(
        context.table_exists("gpkg_contents")?,
        Severity::Skipped,
        "gpkg_contents is missing",
    )?;
    let conn = context.conn();
    let mut stmt = conn.prepare(
        "SELECT c.table_name, p.name, p.type FROM gpkg_contents c, pragma_table_info(c.table_name) p ORDER BY c.table_name, p.cid",
    )?;
    let invalid = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .filter_map(|r| match r {
            Ok((_, _, sql_type)) if DATA_TYPE_REGEX.is_match(&sql_type) => None,
            Ok((table, column, sql_type)) => Some(Ok(format!("{table}.{column} ({sql_type})"))),
            Err(e) => Some(Err(e)),
        })
        .collect::<rusqlite::Result<Vec<_>>>()?;
    require(
        invalid.is_empty(),
        Severity::Error,
        format!("columns with non GeoPackage types: {}", invalid.join(", ")),
    )
}

fn integrity_check(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    require_level(context, VerificationLevel::Full)?;
    let mut stmt = context.conn().prepare("PRAGMA integrity_check")?;
    let results = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    require(
        results == ["ok"],
        Severity::Error,
        format!("integrity check failed: {}", results.join("; ")),
    )
}

fn foreign_key_check(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    let mut stmt = context.conn().prepare("PRAGMA foreign_key_check")?;
    let violations = stmt
        .query_map([], |row| {
            Ok(format!(
                "{} row {} -> {}",
                row.get::<_, String>(0)?,
                row.get::<_, Option<i64>>(1)?.unwrap_or_default(),
                row.get::<_, String>(2)?
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    require(
        violations.is_empty(),
        Severity::Error,
        format!("foreign key violations: {}", violations.join(", ")),
    )
}

fn spatial_ref_sys_table(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    verify_table(context.conn(), "gpkg_spatial_ref_sys", &SPATIAL_REF_SYS)
}

fn required_spatial_reference_systems(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    require(
        context.table_exists("gpkg_spatial_ref_sys")?,
        Severity::Skipped,
        "gpkg_spatial_ref_sys is missing",
    )?;
    let conn = context.conn();
    let missing = [(4326, "EPSG", 4326), (-1, "NONE", -1), (0, "NONE", 0)]
        .into_iter()
        .map(|(srs_id, organization, organization_id)| -> rusqlite::Result<Option<String>> {
            let count: i64 = conn.query_row(
                "SELECT count(*) FROM gpkg_spatial_ref_sys WHERE srs_id = ?1 AND organization = ?2 COLLATE NOCASE AND organization_coordsys_id = ?3",
                rusqlite::params![srs_id, organization, organization_id],
                |row| row.get(0),
            )?;
            Ok((count == 0).then(|| srs_id.to_string()))
        })
        .collect::<rusqlite::Result<Vec<_>>>()?
        .into_iter()
        .flatten()
        .collect::<Vec<_>>();
    require(
        missing.is_empty(),
        Severity::Error,
        format!("missing srs_id {}", missing.join(", ")),
    )
}

fn contents_table(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    verify_table(context.conn(), "gpkg_contents", &CONTENTS)
}

fn contents_table_names(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    require(
        context.table_exists("gpkg_contents")?,
        Severity::Skipped,
        "gpkg_contents is missing",
    )?;
    let mut stmt = context.conn().prepare(
        "SELECT table_name FROM gpkg_contents WHERE lower(table_name) NOT IN (SELECT lower(name) FROM sqlite_master WHERE type IN ('table', 'view'))",
    )?;
    let dangling = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    require(
        dangling.is_empty(),
        Severity::Error,
        format!("contents without a table: {}", dangling.join(", ")),
    )
}

fn contents_last_change(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    require(
        context.table_exists("gpkg_contents")?,
        Severity::Skipped,
        "gpkg_contents is missing",
    )?;
    let mut stmt = context
        .conn()
        .prepare("SELECT table_name, CAST(last_change AS TEXT) FROM gpkg_contents")?;
    let invalid = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?
        .into_iter()
        .filter(|(_, value)| {
            !value
                .as_deref()
                .is_some_and(|v| TIMESTAMP_REGEX.is_match(v) && parse_timestamp(v).is_ok())
        })
        .map(|(table, value)| format!("{table} ({})", value.unwrap_or_default()))
        .collect::<Vec<_>>();
    require(
        invalid.is_empty(),
        Severity::Error,
        format!("malformed last_change: {}", invalid.join(", ")),
    )
}

fn contents_srs_ids(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    require(
        context.table_exists("gpkg_contents")? && context.table_exists("gpkg_spatial_ref_sys")?,
        Severity::Skipped,
        "gpkg_contents or gpkg_spatial_ref_sys is missing",
    )?;
    let mut stmt = context.conn().prepare(
        "SELECT table_name, srs_id FROM gpkg_contents WHERE srs_id IS NOT NULL AND srs_id NOT IN (SELECT srs_id FROM gpkg_spatial_ref_sys)",
    )?;
    let dangling = stmt
        .query_map([], |row| {
            Ok(format!(
                "{} ({})",
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    require(
        dangling.is_empty(),
        Severity::Warning,
        format!("contents referencing unknown srs_id: {}", dangling.join(", ")),
    )
}
