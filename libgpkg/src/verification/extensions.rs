use crate::{
    geopackage::{extensions::EXTENSION_NAME_REGEX, ExtensionScope},
    verification::{
        require, require_table, verify_table, ColumnDefinition, Rule, Severity, TableDefinition,
        UniqueDefinition, VerificationContext,
    },
};

pub(super) const RULES: &[Rule] = &[
    Rule::new(
        "Requirement 79",
        "A gpkg_extensions table SHALL have the standard definition",
        extensions_table,
    ),
    Rule::new(
        "Requirement 80",
        "gpkg_extensions.table_name SHALL be NULL or name an existing table",
        extension_table_names,
    ),
    Rule::new(
        "Requirement 81",
        "gpkg_extensions.column_name SHALL be NULL for file extensions and name a column of table_name otherwise",
        extension_column_names,
    ),
    Rule::new(
        "Requirement 82",
        "gpkg_extensions.extension_name SHALL have the form <author>_<extension>",
        extension_names,
    ),
    Rule::new(
        "Requirement 83",
        "gpkg_extensions.definition SHALL describe the extension",
        extension_definitions,
    ),
    Rule::new(
        "Requirement 84",
        "gpkg_extensions.scope SHALL be read-write or write-only",
        extension_scopes,
    ),
];

const EXTENSIONS: TableDefinition = TableDefinition::new(
    &[
        ColumnDefinition::new("table_name", "TEXT"),
        ColumnDefinition::new("column_name", "TEXT"),
        ColumnDefinition::new("extension_name", "TEXT").not_null(),
        ColumnDefinition::new("definition", "TEXT").not_null(),
        ColumnDefinition::new("scope", "TEXT").not_null(),
    ],
    &[],
    &[UniqueDefinition::new(&["table_name", "column_name", "extension_name"])],
);

fn extensions_table(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    require_table(context, "gpkg_extensions")?;
    verify_table(context.conn(), "gpkg_extensions", &EXTENSIONS)
}

fn extension_table_names(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    require_table(context, "gpkg_extensions")?;
    let mut missing = Vec::new();
    for table in context.query_strings(
        "SELECT DISTINCT table_name FROM gpkg_extensions WHERE table_name IS NOT NULL",
    )? {
        if !context.table_exists(&table)? {
            missing.push(table);
        }
    }
    require(
        missing.is_empty(),
        Severity::Error,
        format!("extensions of missing tables: {}", missing.join(", ")),
    )
}

fn extension_column_names(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    require_table(context, "gpkg_extensions")?;
    let mut invalid = context.query_strings(
        "SELECT extension_name FROM gpkg_extensions WHERE table_name IS NULL AND column_name IS NOT NULL",
    )?;
    let mut stmt = context.conn().prepare(
        "SELECT DISTINCT table_name, column_name FROM gpkg_extensions WHERE table_name IS NOT NULL AND column_name IS NOT NULL",
    )?;
    let columns = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for (table, column) in columns {
        if context.table_exists(&table)? && !context.column_exists(&table, &column)? {
            invalid.push(format!("{table}.{column}"));
        }
    }
    require(
        invalid.is_empty(),
        Severity::Error,
        format!("extensions with invalid columns: {}", invalid.join(", ")),
    )
}

fn extension_names(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    require_table(context, "gpkg_extensions")?;
    let invalid = context
        .query_strings("SELECT DISTINCT extension_name FROM gpkg_extensions")?
        .into_iter()
        .filter(|name| !EXTENSION_NAME_REGEX.is_match(name))
        .collect::<Vec<_>>();
    require(
        invalid.is_empty(),
        Severity::Error,
        format!("malformed extension names: {}", invalid.join(", ")),
    )
}

fn extension_definitions(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    require_table(context, "gpkg_extensions")?;
    let empty = context.query_strings(
        "SELECT DISTINCT extension_name FROM gpkg_extensions WHERE trim(definition) = ''",
    )?;
    require(
        empty.is_empty(),
        Severity::Warning,
        format!("extensions without a definition: {}", empty.join(", ")),
    )
}

fn extension_scopes(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    require_table(context, "gpkg_extensions")?;
    let invalid = context
        .query_strings("SELECT DISTINCT scope FROM gpkg_extensions")?
        .into_iter()
        .filter(|scope| scope.parse::<ExtensionScope>().is_err())
        .collect::<Vec<_>>();
    require(
        invalid.is_empty(),
        Severity::Error,
        format!("unknown extension scopes: {}", invalid.join(", ")),
    )
}
