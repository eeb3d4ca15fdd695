use crate::{
    geopackage::GeometryType,
    verification::{
        require, require_table, verify_table, ColumnDefinition, ForeignKeyDefinition, Rule,
        Severity, TableDefinition, UniqueDefinition, VerificationContext,
    },
};

pub(super) const RULES: &[Rule] = &[
    Rule::new(
        "Requirement 21",
        "A GeoPackage with features SHALL include a gpkg_geometry_columns table",
        geometry_columns_table,
    ),
    Rule::new(
        "Requirement 22",
        "gpkg_geometry_columns.table_name SHALL reference a features row of gpkg_contents",
        geometry_columns_table_names,
    ),
    Rule::new(
        "Requirement 23",
        "gpkg_geometry_columns.column_name SHALL name a column of its table",
        geometry_columns_column_names,
    ),
    Rule::new(
        "Requirement 24",
        "gpkg_geometry_columns.geometry_type_name SHALL be a GeoPackage geometry type",
        geometry_type_names,
    ),
    Rule::new(
        "Requirement 25",
        "gpkg_geometry_columns.srs_id SHALL reference gpkg_spatial_ref_sys.srs_id",
        geometry_columns_srs_ids,
    ),
    Rule::new(
        "Requirement 26",
        "gpkg_geometry_columns.z SHALL be 0, 1 or 2",
        geometry_columns_z,
    ),
    Rule::new(
        "Requirement 27",
        "gpkg_geometry_columns.m SHALL be 0, 1 or 2",
        geometry_columns_m,
    ),
    Rule::new(
        "Requirement 29",
        "A feature table SHALL have exactly one INTEGER PRIMARY KEY column",
        feature_primary_keys,
    ),
];

const GEOMETRY_COLUMNS: TableDefinition = TableDefinition::new(
    &[
        ColumnDefinition::new("table_name", "TEXT").not_null().primary_key(),
        ColumnDefinition::new("column_name", "TEXT").not_null().primary_key(),
        ColumnDefinition::new("geometry_type_name", "TEXT").not_null(),
        ColumnDefinition::new("srs_id", "INTEGER").not_null(),
        ColumnDefinition::new("z", "TINYINT").not_null(),
        ColumnDefinition::new("m", "TINYINT").not_null(),
    ],
    &[
        ForeignKeyDefinition::new("table_name", "gpkg_contents", "table_name"),
        ForeignKeyDefinition::new("srs_id", "gpkg_spatial_ref_sys", "srs_id"),
    ],
    &[
        UniqueDefinition::new(&["table_name", "column_name"]),
        UniqueDefinition::new(&["table_name"]),
    ],
);

fn feature_tables(context: &VerificationContext<'_>) -> anyhow::Result<Vec<String>> {
    require_table(context, "gpkg_contents")?;
    let tables = context.query_strings(
        "SELECT table_name FROM gpkg_contents WHERE data_type = 'features' ORDER BY table_name",
    )?;
    require(!tables.is_empty(), Severity::Skipped, "no feature sets")?;
    Ok(tables)
}

fn geometry_columns_table(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    feature_tables(context)?;
    verify_table(context.conn(), "gpkg_geometry_columns", &GEOMETRY_COLUMNS)
}

fn geometry_columns_table_names(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    require_table(context, "gpkg_geometry_columns")?;
    require_table(context, "gpkg_contents")?;
    let dangling = context.query_strings(
        "SELECT table_name FROM gpkg_geometry_columns WHERE table_name NOT IN (SELECT table_name FROM gpkg_contents WHERE data_type = 'features')",
    )?;
    require(
        dangling.is_empty(),
        Severity::Error,
        format!("geometry columns without features contents: {}", dangling.join(", ")),
    )
}

fn geometry_columns_column_names(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    require_table(context, "gpkg_geometry_columns")?;
    let mut stmt = context
        .conn()
        .prepare("SELECT table_name, column_name FROM gpkg_geometry_columns")?;
    let columns = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    let mut missing = Vec::new();
    for (table, column) in columns {
        if !context.column_exists(&table, &column)? {
            missing.push(format!("{table}.{column}"));
        }
    }
    require(
        missing.is_empty(),
        Severity::Error,
        format!("geometry columns that do not exist: {}", missing.join(", ")),
    )
}

fn geometry_type_names(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    require_table(context, "gpkg_geometry_columns")?;
    let invalid = context
        .query_strings("SELECT geometry_type_name FROM gpkg_geometry_columns")?
        .into_iter()
        .filter(|name| name.parse::<GeometryType>().is_err())
        .collect::<Vec<_>>();
    require(
        invalid.is_empty(),
        Severity::Error,
        format!("unknown geometry types: {}", invalid.join(", ")),
    )
}

fn geometry_columns_srs_ids(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    require_table(context, "gpkg_geometry_columns")?;
    require_table(context, "gpkg_spatial_ref_sys")?;
    let dangling = context.query_strings(
        "SELECT table_name FROM gpkg_geometry_columns WHERE srs_id NOT IN (SELECT srs_id FROM gpkg_spatial_ref_sys)",
    )?;
    require(
        dangling.is_empty(),
        Severity::Error,
        format!("geometry columns with unknown srs_id: {}", dangling.join(", ")),
    )
}

fn value_requirement(context: &VerificationContext<'_>, column: &str) -> anyhow::Result<()> {
    require_table(context, "gpkg_geometry_columns")?;
    let invalid = context.query_strings(&format!(
        "SELECT table_name FROM gpkg_geometry_columns WHERE {column} NOT IN (0, 1, 2)"
    ))?;
    require(
        invalid.is_empty(),
        Severity::Error,
        format!("invalid {column} values for: {}", invalid.join(", ")),
    )
}

fn geometry_columns_z(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    value_requirement(context, "z")
}

fn geometry_columns_m(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    value_requirement(context, "m")
}

fn feature_primary_keys(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    let mut invalid = Vec::new();
    let mut stmt = context
        .conn()
        .prepare("SELECT type FROM pragma_table_info(?1) WHERE pk > 0")?;
    for table in feature_tables(context)? {
        if !context.table_exists(&table)? {
            continue;
        }
        let keys = stmt
            .query_map([&table], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        if keys.len() != 1 || !keys[0].eq_ignore_ascii_case("INTEGER") {
            invalid.push(table);
        }
    }
    require(
        invalid.is_empty(),
        Severity::Error,
        format!("feature tables without an integer primary key: {}", invalid.join(", ")),
    )
}
