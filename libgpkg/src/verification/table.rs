use std::collections::BTreeSet;

use itertools::Itertools;
use rusqlite::{Connection, OptionalExtension};

use crate::verification::{require, Severity};

/// Expected shape of one column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDefinition {
    name: &'static str,
    sql_type: &'static str,
    not_null: bool,
    primary_key: bool,
    unique: bool,
    default: Option<&'static str>,
}

impl ColumnDefinition {
    /// A nullable, non key column without default
    #[must_use]
    pub const fn new(name: &'static str, sql_type: &'static str) -> Self {
        Self {
            name,
            sql_type,
            not_null: false,
            primary_key: false,
            unique: false,
            default: None,
        }
    }

    /// Marks the column `NOT NULL`
    #[must_use]
    pub const fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    /// Marks the column as (part of) the primary key
    #[must_use]
    pub const fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Marks the column `UNIQUE` on its own
    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Sets the expected default, as an SQL expression
    #[must_use]
    pub const fn default_value(mut self, expression: &'static str) -> Self {
        self.default = Some(expression);
        self
    }

    /// Returns the column name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

/// Expected foreign key of one column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKeyDefinition {
    from_column: &'static str,
    to_table: &'static str,
    to_column: &'static str,
}

impl ForeignKeyDefinition {
    /// `from_column REFERENCES to_table(to_column)`
    #[must_use]
    pub const fn new(from_column: &'static str, to_table: &'static str, to_column: &'static str) -> Self {
        Self {
            from_column,
            to_table,
            to_column,
        }
    }
}

/// Expected `UNIQUE` constraint spanning several columns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniqueDefinition {
    columns: &'static [&'static str],
}

impl UniqueDefinition {
    /// `UNIQUE (columns...)`
    #[must_use]
    pub const fn new(columns: &'static [&'static str]) -> Self {
        Self { columns }
    }
}

/// Expected columns, foreign keys and unique constraints of a table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableDefinition {
    columns: &'static [ColumnDefinition],
    foreign_keys: &'static [ForeignKeyDefinition],
    unique: &'static [UniqueDefinition],
}

impl TableDefinition {
    /// Creates a new [`TableDefinition`]
    #[must_use]
    pub const fn new(
        columns: &'static [ColumnDefinition],
        foreign_keys: &'static [ForeignKeyDefinition],
        unique: &'static [UniqueDefinition],
    ) -> Self {
        Self {
            columns,
            foreign_keys,
            unique,
        }
    }

    /// Returns the expected columns
    #[must_use]
    pub const fn columns(&self) -> &'static [ColumnDefinition] {
        self.columns
    }
}

#[derive(Debug)]
struct ActualColumn {
    name: String,
    sql_type: String,
    not_null: bool,
    default: Option<String>,
    primary_key: bool,
}

/// Checks that `table_name` exists and matches `definition`
///
/// Column types compare case-insensitively, defaults by evaluating both expressions. Missing and
/// unexpected foreign keys are both reported. Every mismatch is collected into one
/// [`Severity::Error`] failure.
///
/// # Errors
///
/// Returns an [`AssertionError`](super::AssertionError) listing the mismatches, or the SQLite
/// error that prevented reading the schema
pub fn verify_table(
    conn: &Connection,
    table_name: &str,
    definition: &TableDefinition,
) -> anyhow::Result<()> {
    require(
        crate::geopackage::table_exists(conn, table_name)?,
        Severity::Error,
        format!("table {table_name} does not exist"),
    )?;

    let mut problems = Vec::new();
    let actual = table_columns(conn, table_name)?;
    let unique_indexes = unique_indexes(conn, table_name)?;
    for expected in definition.columns {
        let Some(column) = actual
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(expected.name))
        else {
            problems.push(format!("missing column {}", expected.name));
            continue;
        };
        problems.extend(column_problems(conn, expected, column, &unique_indexes));
    }

    let expected_keys = definition
        .foreign_keys
        .iter()
        .map(|k| {
            (
                k.from_column.to_ascii_lowercase(),
                k.to_table.to_ascii_lowercase(),
                k.to_column.to_ascii_lowercase(),
            )
        })
        .collect::<BTreeSet<_>>();
    let actual_keys = foreign_keys(conn, table_name)?;
    for (from, table, to) in expected_keys.difference(&actual_keys) {
        problems.push(format!("missing foreign key {from} -> {table}({to})"));
    }
    for (from, table, to) in actual_keys.difference(&expected_keys) {
        problems.push(format!("unexpected foreign key {from} -> {table}({to})"));
    }

    for group in definition.unique {
        let columns = group
            .columns
            .iter()
            .map(|c| c.to_ascii_lowercase())
            .collect::<BTreeSet<_>>();
        if !unique_indexes.contains(&columns) {
            problems.push(format!(
                "missing unique constraint on ({})",
                group.columns.iter().join(", ")
            ));
        }
    }

    require(
        problems.is_empty(),
        Severity::Error,
        format!("table {table_name}: {}", problems.join("; ")),
    )
}

fn column_problems(
    conn: &Connection,
    expected: &ColumnDefinition,
    column: &ActualColumn,
    unique_indexes: &[BTreeSet<String>],
) -> Vec<String> {
    let mut problems = Vec::new();
    let name = expected.name;
    if !column.sql_type.eq_ignore_ascii_case(expected.sql_type) {
        problems.push(format!(
            "column {name} has type {} instead of {}",
            column.sql_type, expected.sql_type
        ));
    }
    if column.not_null != expected.not_null {
        problems.push(format!(
            "column {name} should{} be NOT NULL",
            if expected.not_null { "" } else { " not" }
        ));
    }
    if column.primary_key != expected.primary_key {
        problems.push(format!(
            "column {name} should{} be part of the primary key",
            if expected.primary_key { "" } else { " not" }
        ));
    }
    if !expected.primary_key {
        let single = BTreeSet::from([name.to_ascii_lowercase()]);
        let unique = unique_indexes.contains(&single);
        if unique != expected.unique {
            problems.push(format!(
                "column {name} should{} be UNIQUE",
                if expected.unique { "" } else { " not" }
            ));
        }
    }
    match (expected.default, column.default.as_deref()) {
        (None, None) => {}
        (Some(e), Some(a)) if equivalent_defaults(conn, e, a) => {}
        (e, a) => problems.push(format!(
            "column {name} has default {} instead of {}",
            a.unwrap_or("NULL"),
            e.unwrap_or("NULL")
        )),
    }
    problems
}

/// Evaluates both default expressions and compares the results
fn equivalent_defaults(conn: &Connection, expected: &str, actual: &str) -> bool {
    let evaluated = conn
        .query_row(&format!("SELECT ({expected}) IS ({actual})"), [], |row| {
            row.get::<_, bool>(0)
        })
        .optional();
    match evaluated {
        Ok(Some(equal)) => equal,
        // not evaluable, fall back to comparing the text without whitespace
        _ => {
            let strip = |s: &str| s.split_whitespace().collect::<String>().to_ascii_lowercase();
            strip(expected) == strip(actual)
        }
    }
}

fn table_columns(conn: &Connection, table_name: &str) -> anyhow::Result<Vec<ActualColumn>> {
    let mut stmt = conn
        .prepare("SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1)")?;
    let columns = stmt
        .query_map([table_name], |row| {
            Ok(ActualColumn {
                name: row.get(0)?,
                sql_type: row.get(1)?,
                not_null: row.get(2)?,
                default: row.get(3)?,
                primary_key: row.get::<_, i64>(4)? > 0,
            })
        })?
        .collect::<rusqlite::Result<_>>()?;
    Ok(columns)
}

/// Column sets covered by a unique index (including primary keys that are not the rowid)
fn unique_indexes(conn: &Connection, table_name: &str) -> anyhow::Result<Vec<BTreeSet<String>>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_index_list(?1) WHERE \"unique\" = 1")?;
    let indexes = stmt
        .query_map([table_name], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    let mut info = conn.prepare("SELECT name FROM pragma_index_info(?1)")?;
    indexes
        .iter()
        .map(|index| -> anyhow::Result<BTreeSet<String>> {
            Ok(info
                .query_map([index], |row| row.get::<_, Option<String>>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?
                .into_iter()
                .flatten()
                .map(|c| c.to_ascii_lowercase())
                .collect())
        })
        .collect()
}

fn foreign_keys(
    conn: &Connection,
    table_name: &str,
) -> anyhow::Result<BTreeSet<(String, String, String)>> {
    let mut stmt =
        conn.prepare("SELECT \"from\", \"table\", \"to\" FROM pragma_foreign_key_list(?1)")?;
    let keys = stmt
        .query_map([table_name], |row| {
            Ok((
                row.get::<_, String>(0)?.to_ascii_lowercase(),
                row.get::<_, String>(1)?.to_ascii_lowercase(),
                row.get::<_, Option<String>>(2)?
                    .unwrap_or_default()
                    .to_ascii_lowercase(),
            ))
        })?
        .collect::<rusqlite::Result<_>>()?;
    Ok(keys)
}
