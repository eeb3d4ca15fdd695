//! Checks a GeoPackage against the requirements of the standard
//!
//! Every requirement is a [`Rule`]: a reference, its text and a check function. Each area of the
//! standard contributes its rules; [`Verifier::new`] gathers them and orders them by reference.
//! A check passes by returning `Ok`, fails by returning an [`AssertionError`] carrying a
//! [`Severity`], and any other error is reported as an [`Severity::Error`] issue. One failing
//! check never stops the others.
#![allow(clippy::module_name_repetitions)]

mod core;
mod extensions;
mod features;
mod metadata;
mod schema;
mod table;
mod tiles;

use std::{cmp::Ordering, fmt::Display, path::Path};

use nom::{
    branch::alt,
    bytes::complete::take_till1,
    character::complete::digit1,
    combinator::map,
    multi::many0,
    IResult,
};
use rusqlite::{types::ValueRef, Connection};
use strum::{Display as StrumDisplay, EnumIter, EnumString, IntoStaticStr};
use thiserror::Error;
use tracing::{debug, info, instrument, trace, warn};

pub use table::{
    verify_table, ColumnDefinition, ForeignKeyDefinition, TableDefinition, UniqueDefinition,
};

/// How bad a failed requirement is
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, StrumDisplay, EnumString, EnumIter, IntoStaticStr,
)]
#[strum(ascii_case_insensitive)]
pub enum Severity {
    /// The file does not conform and must be rejected
    Error,
    /// The file is usable but deviates from the standard
    Warning,
    /// The check did not run; never part of a report
    Skipped,
}

/// How thoroughly a GeoPackage is checked
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, StrumDisplay, EnumString, EnumIter, IntoStaticStr,
)]
#[strum(ascii_case_insensitive)]
pub enum VerificationLevel {
    /// No verification at all
    None,
    /// Every check except the ones reading all of the file
    #[default]
    Fast,
    /// Every check, including `PRAGMA integrity_check` and tile data decoding
    Full,
}

/// A requirement of the standard: its reference and what it demands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Requirement {
    reference: &'static str,
    text: &'static str,
}

impl Requirement {
    /// Creates a new [`Requirement`]
    #[must_use]
    pub const fn new(reference: &'static str, text: &'static str) -> Self {
        Self { reference, text }
    }

    /// Returns the reference, e.g. `Requirement 2`
    #[must_use]
    pub const fn reference(&self) -> &'static str {
        self.reference
    }

    /// Returns the requirement text
    #[must_use]
    pub const fn text(&self) -> &'static str {
        self.text
    }
}

/// One failed requirement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationIssue {
    message: String,
    requirement: Requirement,
    severity: Severity,
}

impl VerificationIssue {
    /// Creates a new [`VerificationIssue`]
    #[must_use]
    pub fn new(message: impl Into<String>, requirement: Requirement, severity: Severity) -> Self {
        Self {
            message: message.into(),
            requirement,
            severity,
        }
    }

    /// Returns what went wrong
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the violated requirement
    #[must_use]
    pub const fn requirement(&self) -> &Requirement {
        &self.requirement
    }

    /// Returns the severity
    #[must_use]
    pub const fn severity(&self) -> Severity {
        self.severity
    }
}

impl Display for VerificationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} ({}): {}",
            self.severity, self.requirement.reference, self.requirement.text, self.message
        )
    }
}

/// Failure raised by a check
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct AssertionError {
    message: String,
    severity: Severity,
}

impl AssertionError {
    /// Creates a new [`AssertionError`]
    #[must_use]
    pub fn new(message: impl Into<String>, severity: Severity) -> Self {
        Self {
            message: message.into(),
            severity,
        }
    }

    /// Returns the severity the failure is reported with
    #[must_use]
    pub const fn severity(&self) -> Severity {
        self.severity
    }
}

/// Fails with `severity` unless `condition` holds
///
/// # Errors
///
/// Returns an [`AssertionError`] if `condition` is false
pub fn require(condition: bool, severity: Severity, message: impl Display) -> anyhow::Result<()> {
    if condition {
        Ok(())
    } else {
        Err(AssertionError::new(message.to_string(), severity).into())
    }
}

/// Skips the calling check unless verification runs at `level` or above
///
/// # Errors
///
/// Returns a [`Severity::Skipped`] [`AssertionError`] below `level`
pub fn require_level(context: &VerificationContext<'_>, level: VerificationLevel) -> anyhow::Result<()> {
    require(
        context.level >= level,
        Severity::Skipped,
        format!("only checked at verification level {level}"),
    )
}

/// Skips the calling check if the table `name` does not exist
///
/// # Errors
///
/// Returns a [`Severity::Skipped`] [`AssertionError`] if the table is missing, or the error that
/// prevented looking it up
pub fn require_table(context: &VerificationContext<'_>, name: &str) -> anyhow::Result<()> {
    require(
        context.table_exists(name)?,
        Severity::Skipped,
        format!("{name} is missing"),
    )
}

/// Everything a check can look at
#[derive(Debug, Clone, Copy)]
pub struct VerificationContext<'c> {
    conn: &'c Connection,
    path: &'c Path,
    level: VerificationLevel,
}

impl<'c> VerificationContext<'c> {
    /// Creates a new [`VerificationContext`]
    #[must_use]
    pub const fn new(conn: &'c Connection, path: &'c Path, level: VerificationLevel) -> Self {
        Self { conn, path, level }
    }

    /// Returns the connection to the file under test
    #[must_use]
    pub const fn conn(&self) -> &'c Connection {
        self.conn
    }

    /// Returns the path of the file under test
    #[must_use]
    pub const fn path(&self) -> &'c Path {
        self.path
    }

    /// Returns the verification level
    #[must_use]
    pub const fn level(&self) -> VerificationLevel {
        self.level
    }

    /// Returns true if a table or view called `name` exists
    ///
    /// # Errors
    ///
    /// Returns an error if `sqlite_master` cannot be read
    pub fn table_exists(&self, name: &str) -> anyhow::Result<bool> {
        Ok(crate::geopackage::table_exists(self.conn, name)?)
    }

    /// Returns true if `table` has a column called `column`
    ///
    /// # Errors
    ///
    /// Returns an error if the table info cannot be read
    pub fn column_exists(&self, table: &str, column: &str) -> anyhow::Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT count(*) FROM pragma_table_info(?1) WHERE name = ?2 COLLATE NOCASE",
            [table, column],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Runs `sql` and returns the first column of every row as text
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub fn query_strings(&self, sql: &str) -> anyhow::Result<Vec<String>> {
        let mut stmt = self.conn.prepare(sql)?;
        let values = stmt
            .query_map([], |row| {
                Ok(match row.get_ref(0)? {
                    ValueRef::Null => String::from("NULL"),
                    ValueRef::Integer(i) => i.to_string(),
                    ValueRef::Real(f) => f.to_string(),
                    ValueRef::Text(t) | ValueRef::Blob(t) => String::from_utf8_lossy(t).into_owned(),
                })
            })?
            .collect::<rusqlite::Result<_>>()?;
        Ok(values)
    }
}

/// Signature of a requirement check
pub type Check = fn(&VerificationContext<'_>) -> anyhow::Result<()>;

/// A requirement bound to the check that verifies it
#[derive(Clone, Copy)]
pub struct Rule {
    requirement: Requirement,
    check: Check,
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("requirement", &self.requirement)
            .finish_non_exhaustive()
    }
}

impl Rule {
    /// Creates a new [`Rule`]
    #[must_use]
    pub const fn new(reference: &'static str, text: &'static str, check: Check) -> Self {
        Self {
            requirement: Requirement::new(reference, text),
            check,
        }
    }

    /// Returns the requirement this rule verifies
    #[must_use]
    pub const fn requirement(&self) -> &Requirement {
        &self.requirement
    }

    /// Runs the check, turning its outcome into an issue
    ///
    /// Returns `None` if the check passed or was skipped.
    #[must_use]
    pub fn evaluate(&self, context: &VerificationContext<'_>) -> Option<VerificationIssue> {
        let error = (self.check)(context).err()?;
        let (message, severity) = match error.downcast::<AssertionError>() {
            Ok(assertion) => (assertion.message, assertion.severity),
            Err(unexpected) => (format!("{unexpected:#}"), Severity::Error),
        };
        if severity == Severity::Skipped {
            trace!("Skipped {}: {message}", self.requirement.reference);
            return None;
        }
        Some(VerificationIssue::new(message, self.requirement, severity))
    }
}

/// Runs every known requirement against a GeoPackage
#[derive(Debug, Clone)]
pub struct Verifier {
    rules: Vec<Rule>,
}

impl Default for Verifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Verifier {
    /// Gathers the rules of every area of the standard, ordered by requirement reference
    #[must_use]
    pub fn new() -> Self {
        Self::with_rules(
            [
                core::RULES,
                features::RULES,
                tiles::RULES,
                schema::RULES,
                metadata::RULES,
                extensions::RULES,
            ]
            .concat(),
        )
    }

    /// Creates a verifier running only `rules`, ordered by requirement reference
    #[must_use]
    pub fn with_rules(mut rules: Vec<Rule>) -> Self {
        rules.sort_by(|a, b| natural_cmp(a.requirement.reference, b.requirement.reference));
        Self { rules }
    }

    /// Returns the rules in the order they run
    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Runs every rule and returns the issues found, in rule order
    ///
    /// Skipped checks are left out of the result.
    #[instrument(skip(self, conn), fields(path = %path.display()))]
    pub fn verify(
        &self,
        conn: &Connection,
        path: &Path,
        level: VerificationLevel,
    ) -> Vec<VerificationIssue> {
        let context = VerificationContext::new(conn, path, level);
        let issues = self
            .rules
            .iter()
            .filter_map(|rule| rule.evaluate(&context))
            .inspect(|issue| debug!("{issue}"))
            .collect::<Vec<_>>();
        let errors = issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
            .count();
        if errors > 0 {
            warn!("{errors} of {} issues are errors", issues.len());
        }
        info!(
            "Checked {} requirements, found {} issues",
            self.rules.len(),
            issues.len()
        );
        issues
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Chunk<'a> {
    Number(&'a str),
    Text(&'a str),
}

impl Ord for Chunk<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => {
                let a = a.trim_start_matches('0');
                let b = b.trim_start_matches('0');
                a.len().cmp(&b.len()).then_with(|| a.cmp(b))
            }
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Number(_), Self::Text(_)) => Ordering::Less,
            (Self::Text(_), Self::Number(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Chunk<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn chunks(input: &str) -> IResult<&str, Vec<Chunk<'_>>> {
    many0(alt((
        map(digit1, Chunk::Number),
        map(take_till1(|c: char| c.is_ascii_digit()), Chunk::Text),
    )))(input)
}

/// Compares strings chunk by chunk, digit runs by their numeric value
///
/// `Requirement 9` sorts before `Requirement 10`.
#[must_use]
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    match (chunks(a), chunks(b)) {
        (Ok((_, a)), Ok((_, b))) => a.cmp(&b),
        _ => a.cmp(b),
    }
}
