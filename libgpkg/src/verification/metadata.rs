use crate::{
    geopackage::{parse_timestamp, quote_identifier, MetadataScope, ReferenceScope},
    verification::{
        require, require_table, verify_table, ColumnDefinition, ForeignKeyDefinition, Rule,
        Severity, TableDefinition, VerificationContext,
    },
};

pub(super) const RULES: &[Rule] = &[
    Rule::new(
        "Requirement 67",
        "A gpkg_metadata table SHALL have the standard definition",
        metadata_table,
    ),
    Rule::new(
        "Requirement 68",
        "gpkg_metadata.md_scope SHALL be an MD_ScopeCode name",
        metadata_scopes,
    ),
    Rule::new(
        "Requirement 69",
        "A gpkg_metadata_reference table SHALL have the standard definition",
        metadata_reference_table,
    ),
    Rule::new(
        "Requirement 70",
        "gpkg_metadata_reference.reference_scope SHALL be geopackage, table, column, row or row/col",
        reference_scopes,
    ),
    Rule::new(
        "Requirement 71",
        "gpkg_metadata_reference.table_name SHALL be NULL for geopackage scope and reference gpkg_contents otherwise",
        reference_table_names,
    ),
    Rule::new(
        "Requirement 72",
        "gpkg_metadata_reference.column_name SHALL be NULL unless the scope is column or row/col, where it names a column",
        reference_column_names,
    ),
    Rule::new(
        "Requirement 73",
        "gpkg_metadata_reference.row_id_value SHALL be NULL unless the scope is row or row/col, where it names a row",
        reference_row_ids,
    ),
    Rule::new(
        "Requirement 74",
        "gpkg_metadata_reference.timestamp SHALL be an ISO 8601 UTC timestamp",
        reference_timestamps,
    ),
    Rule::new(
        "Requirement 75",
        "gpkg_metadata_reference.md_file_id SHALL reference gpkg_metadata.id",
        reference_file_ids,
    ),
    Rule::new(
        "Requirement 76",
        "gpkg_metadata_reference.md_parent_id SHALL be NULL or reference a different gpkg_metadata.id",
        reference_parent_ids,
    ),
];

const METADATA: TableDefinition = TableDefinition::new(
    &[
        ColumnDefinition::new("id", "INTEGER").not_null().primary_key(),
        ColumnDefinition::new("md_scope", "TEXT").not_null().default_value("'dataset'"),
        ColumnDefinition::new("md_standard_uri", "TEXT").not_null(),
        ColumnDefinition::new("mime_type", "TEXT").not_null().default_value("'text/xml'"),
        ColumnDefinition::new("metadata", "TEXT").not_null().default_value("''"),
    ],
    &[],
    &[],
);

const METADATA_REFERENCE: TableDefinition = TableDefinition::new(
    &[
        ColumnDefinition::new("reference_scope", "TEXT").not_null(),
        ColumnDefinition::new("table_name", "TEXT"),
        ColumnDefinition::new("column_name", "TEXT"),
        ColumnDefinition::new("row_id_value", "INTEGER"),
        ColumnDefinition::new("timestamp", "DATETIME")
            .not_null()
            .default_value("strftime('%Y-%m-%dT%H:%M:%fZ','now')"),
        ColumnDefinition::new("md_file_id", "INTEGER").not_null(),
        ColumnDefinition::new("md_parent_id", "INTEGER"),
    ],
    &[
        ForeignKeyDefinition::new("md_file_id", "gpkg_metadata", "id"),
        ForeignKeyDefinition::new("md_parent_id", "gpkg_metadata", "id"),
    ],
    &[],
);

fn metadata_table(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    require_table(context, "gpkg_metadata")?;
    verify_table(context.conn(), "gpkg_metadata", &METADATA)
}

fn metadata_scopes(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    require_table(context, "gpkg_metadata")?;
    let invalid = context
        .query_strings("SELECT DISTINCT md_scope FROM gpkg_metadata")?
        .into_iter()
        .filter(|scope| scope.parse::<MetadataScope>().is_err())
        .collect::<Vec<_>>();
    require(
        invalid.is_empty(),
        Severity::Error,
        format!("unknown metadata scopes: {}", invalid.join(", ")),
    )
}

fn metadata_reference_table(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    require_table(context, "gpkg_metadata_reference")?;
    verify_table(
        context.conn(),
        "gpkg_metadata_reference",
        &METADATA_REFERENCE,
    )
}

fn reference_scopes(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    require_table(context, "gpkg_metadata_reference")?;
    let invalid = context
        .query_strings("SELECT DISTINCT reference_scope FROM gpkg_metadata_reference")?
        .into_iter()
        .filter(|scope| scope.parse::<ReferenceScope>().is_err())
        .collect::<Vec<_>>();
    require(
        invalid.is_empty(),
        Severity::Error,
        format!("unknown reference scopes: {}", invalid.join(", ")),
    )
}

fn reference_table_names(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    require_table(context, "gpkg_metadata_reference")?;
    require_table(context, "gpkg_contents")?;
    let invalid = context.query_strings(
        "SELECT reference_scope || ':' || coalesce(table_name, '') FROM gpkg_metadata_reference WHERE
            (reference_scope = 'geopackage' AND table_name IS NOT NULL)
            OR (reference_scope != 'geopackage' AND (table_name IS NULL OR table_name NOT IN (SELECT table_name FROM gpkg_contents)))",
    )?;
    require(
        invalid.is_empty(),
        Severity::Error,
        format!("references with invalid table names: {}", invalid.join(", ")),
    )
}

fn reference_column_names(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    require_table(context, "gpkg_metadata_reference")?;
    let mut invalid = context.query_strings(
        "SELECT reference_scope || ':' || coalesce(column_name, '') FROM gpkg_metadata_reference WHERE
            (reference_scope IN ('geopackage', 'table', 'row') AND column_name IS NOT NULL)
            OR (reference_scope IN ('column', 'row/col') AND column_name IS NULL)",
    )?;
    let mut stmt = context.conn().prepare(
        "SELECT DISTINCT table_name, column_name FROM gpkg_metadata_reference
            WHERE reference_scope IN ('column', 'row/col') AND table_name IS NOT NULL AND column_name IS NOT NULL",
    )?;
    let columns = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for (table, column) in columns {
        if !context.column_exists(&table, &column)? {
            invalid.push(format!("{table}.{column}"));
        }
    }
    require(
        invalid.is_empty(),
        Severity::Error,
        format!("references with invalid column names: {}", invalid.join(", ")),
    )
}

fn reference_row_ids(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    require_table(context, "gpkg_metadata_reference")?;
    let mut invalid = context.query_strings(
        "SELECT reference_scope || ':' || coalesce(row_id_value, '') FROM gpkg_metadata_reference WHERE
            (reference_scope IN ('geopackage', 'table', 'column') AND row_id_value IS NOT NULL)
            OR (reference_scope IN ('row', 'row/col') AND row_id_value IS NULL)",
    )?;
    let mut stmt = context.conn().prepare(
        "SELECT DISTINCT table_name, row_id_value FROM gpkg_metadata_reference
            WHERE reference_scope IN ('row', 'row/col') AND table_name IS NOT NULL AND row_id_value IS NOT NULL",
    )?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for (table, row_id) in rows {
        if !context.table_exists(&table)? {
            continue;
        }
        let found: bool = context.conn().query_row(
            &format!(
                "SELECT EXISTS(SELECT 1 FROM {} WHERE ROWID = ?1)",
                quote_identifier(&table)
            ),
            [row_id],
            |row| row.get(0),
        )?;
        if !found {
            invalid.push(format!("{table}#{row_id}"));
        }
    }
    require(
        invalid.is_empty(),
        Severity::Error,
        format!("references with invalid row ids: {}", invalid.join(", ")),
    )
}

fn reference_timestamps(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    require_table(context, "gpkg_metadata_reference")?;
    let invalid = context
        .query_strings("SELECT DISTINCT timestamp FROM gpkg_metadata_reference")?
        .into_iter()
        .filter(|value| parse_timestamp(value).is_err())
        .collect::<Vec<_>>();
    require(
        invalid.is_empty(),
        Severity::Error,
        format!("malformed timestamps: {}", invalid.join(", ")),
    )
}

fn reference_file_ids(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    require_table(context, "gpkg_metadata_reference")?;
    require_table(context, "gpkg_metadata")?;
    let dangling = context.query_strings(
        "SELECT DISTINCT md_file_id FROM gpkg_metadata_reference WHERE md_file_id NOT IN (SELECT id FROM gpkg_metadata)",
    )?;
    require(
        dangling.is_empty(),
        Severity::Error,
        format!("references to unknown metadata: {}", dangling.join(", ")),
    )
}

fn reference_parent_ids(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    require_table(context, "gpkg_metadata_reference")?;
    require_table(context, "gpkg_metadata")?;
    let invalid = context.query_strings(
        "SELECT DISTINCT md_parent_id FROM gpkg_metadata_reference WHERE md_parent_id IS NOT NULL
            AND (md_parent_id = md_file_id OR md_parent_id NOT IN (SELECT id FROM gpkg_metadata))",
    )?;
    require(
        invalid.is_empty(),
        Severity::Error,
        format!("invalid parent metadata ids: {}", invalid.join(", ")),
    )
}
