use crate::{
    geopackage::ConstraintType,
    verification::{
        require, require_table, verify_table, ColumnDefinition, Rule, Severity, TableDefinition,
        UniqueDefinition, VerificationContext,
    },
};

pub(super) const RULES: &[Rule] = &[
    Rule::new(
        "Requirement 57",
        "A gpkg_data_columns table SHALL have the standard definition",
        data_columns_table,
    ),
    Rule::new(
        "Requirement 58",
        "gpkg_data_columns.table_name SHALL reference gpkg_contents.table_name",
        data_columns_table_names,
    ),
    Rule::new(
        "Requirement 59",
        "gpkg_data_columns.column_name SHALL name a column of its table",
        data_columns_column_names,
    ),
    Rule::new(
        "Requirement 60",
        "gpkg_data_columns.constraint_name SHALL reference gpkg_data_column_constraints.constraint_name",
        data_columns_constraint_names,
    ),
    Rule::new(
        "Requirement 61",
        "A gpkg_data_column_constraints table SHALL have the standard definition",
        data_column_constraints_table,
    ),
    Rule::new(
        "Requirement 62",
        "gpkg_data_column_constraints.constraint_type SHALL be range, enum or glob",
        constraint_types,
    ),
    Rule::new(
        "Requirement 63",
        "Range constraints SHALL have min < max and no value; enum and glob constraints SHALL have a value and no bounds",
        constraint_values,
    ),
];

const DATA_COLUMNS: TableDefinition = TableDefinition::new(
    &[
        ColumnDefinition::new("table_name", "TEXT").not_null().primary_key(),
        ColumnDefinition::new("column_name", "TEXT").not_null().primary_key(),
        ColumnDefinition::new("name", "TEXT"),
        ColumnDefinition::new("title", "TEXT"),
        ColumnDefinition::new("description", "TEXT"),
        ColumnDefinition::new("mime_type", "TEXT"),
        ColumnDefinition::new("constraint_name", "TEXT"),
    ],
    &[],
    &[
        UniqueDefinition::new(&["table_name", "column_name"]),
        UniqueDefinition::new(&["table_name", "name"]),
    ],
);

const DATA_COLUMN_CONSTRAINTS: TableDefinition = TableDefinition::new(
    &[
        ColumnDefinition::new("constraint_name", "TEXT").not_null(),
        ColumnDefinition::new("constraint_type", "TEXT").not_null(),
        ColumnDefinition::new("value", "TEXT"),
        ColumnDefinition::new("min", "NUMERIC"),
        ColumnDefinition::new("min_is_inclusive", "BOOLEAN"),
        ColumnDefinition::new("max", "NUMERIC"),
        ColumnDefinition::new("max_is_inclusive", "BOOLEAN"),
        ColumnDefinition::new("description", "TEXT"),
    ],
    &[],
    &[UniqueDefinition::new(&["constraint_name", "constraint_type", "value"])],
);

fn data_columns_table(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    require_table(context, "gpkg_data_columns")?;
    verify_table(context.conn(), "gpkg_data_columns", &DATA_COLUMNS)
}

fn data_columns_table_names(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    require_table(context, "gpkg_data_columns")?;
    require_table(context, "gpkg_contents")?;
    let dangling = context.query_strings(
        "SELECT DISTINCT table_name FROM gpkg_data_columns WHERE table_name NOT IN (SELECT table_name FROM gpkg_contents)",
    )?;
    require(
        dangling.is_empty(),
        Severity::Error,
        format!("data columns of unknown tables: {}", dangling.join(", ")),
    )
}

fn data_columns_column_names(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    require_table(context, "gpkg_data_columns")?;
    let mut stmt = context
        .conn()
        .prepare("SELECT table_name, column_name FROM gpkg_data_columns")?;
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
        format!("data columns that do not exist: {}", missing.join(", ")),
    )
}

fn data_columns_constraint_names(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    require_table(context, "gpkg_data_columns")?;
    let query = if context.table_exists("gpkg_data_column_constraints")? {
        "SELECT DISTINCT constraint_name FROM gpkg_data_columns WHERE constraint_name IS NOT NULL AND constraint_name NOT IN (SELECT constraint_name FROM gpkg_data_column_constraints)"
    } else {
        "SELECT DISTINCT constraint_name FROM gpkg_data_columns WHERE constraint_name IS NOT NULL"
    };
    let dangling = context.query_strings(query)?;
    require(
        dangling.is_empty(),
        Severity::Error,
        format!("unknown constraints: {}", dangling.join(", ")),
    )
}

fn data_column_constraints_table(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    require_table(context, "gpkg_data_column_constraints")?;
    verify_table(
        context.conn(),
        "gpkg_data_column_constraints",
        &DATA_COLUMN_CONSTRAINTS,
    )
}

fn constraint_types(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    require_table(context, "gpkg_data_column_constraints")?;
    let invalid = context
        .query_strings("SELECT DISTINCT constraint_type FROM gpkg_data_column_constraints")?
        .into_iter()
        .filter(|t| t.parse::<ConstraintType>().is_err())
        .collect::<Vec<_>>();
    require(
        invalid.is_empty(),
        Severity::Error,
        format!("unknown constraint types: {}", invalid.join(", ")),
    )
}

fn constraint_values(context: &VerificationContext<'_>) -> anyhow::Result<()> {
    require_table(context, "gpkg_data_column_constraints")?;
    let invalid = context.query_strings(
        "SELECT constraint_name FROM gpkg_data_column_constraints WHERE
            (constraint_type = 'range' AND (value IS NOT NULL OR min IS NULL OR max IS NULL OR min >= max OR min_is_inclusive NOT IN (0, 1) OR max_is_inclusive NOT IN (0, 1)))
            OR (constraint_type IN ('enum', 'glob') AND (value IS NULL OR min IS NOT NULL OR max IS NOT NULL OR min_is_inclusive IS NOT NULL OR max_is_inclusive IS NOT NULL))",
    )?;
    require(
        invalid.is_empty(),
        Severity::Error,
        format!("malformed constraints: {}", invalid.join(", ")),
    )
}
