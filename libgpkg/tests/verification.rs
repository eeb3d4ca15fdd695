use std::path::{Path, PathBuf};

mod common;
use common::{eastern_hemisphere, gpkg_path};
use libgpkg::{
    tiling::GeoPackageTileStore,
    verification::{
        require, verify_table, ColumnDefinition, Rule, Severity, TableDefinition,
        UniqueDefinition, VerificationContext, VerificationLevel, Verifier,
    },
    GeoPackage, OpenMode, PyramidConfig, TileBuilder, VerificationIssue,
};
use mktemp::Temp;
use rusqlite::Connection;

fn tiled_gpkg(path: &Path) -> anyhow::Result<()> {
    let raster = eastern_hemisphere()?;
    let gpkg = GeoPackage::create(path)?;
    let mut store = GeoPackageTileStore::new(&gpkg, "hemisphere");
    TileBuilder::new(&raster, &PyramidConfig::default())?.write_to(&mut store)?;
    drop(store);
    gpkg.close()?;
    Ok(())
}

fn issues_for<'a>(issues: &'a [VerificationIssue], reference: &str) -> Vec<&'a VerificationIssue> {
    issues
        .iter()
        .filter(|i| i.requirement().reference() == reference)
        .collect()
}

fn reference_number(rule: &Rule) -> u32 {
    rule.requirement()
        .reference()
        .trim_start_matches("Requirement ")
        .parse()
        .unwrap_or(u32::MAX)
}

#[test]
fn rules_run_in_natural_order() {
    let verifier = Verifier::new();
    let numbers = verifier.rules().iter().map(reference_number).collect::<Vec<_>>();
    assert!(!numbers.is_empty());
    assert!(numbers.windows(2).all(|w| w[0] < w[1]), "{numbers:?}");

    let position = |reference: &str| {
        verifier
            .rules()
            .iter()
            .position(|r| r.requirement().reference() == reference)
    };
    assert!(position("Requirement 2") < position("Requirement 10"));
}

#[test]
fn with_rules_sorts_custom_rules() {
    fn pass(_: &VerificationContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }
    let verifier = Verifier::with_rules(vec![
        Rule::new("Requirement 10", "ten", pass),
        Rule::new("Requirement 9", "nine", pass),
        Rule::new("Requirement 100", "hundred", pass),
    ]);
    let references = verifier
        .rules()
        .iter()
        .map(|r| r.requirement().reference())
        .collect::<Vec<_>>();
    assert_eq!(
        references,
        ["Requirement 9", "Requirement 10", "Requirement 100"]
    );
}

#[test]
fn failing_checks_do_not_stop_the_others() -> anyhow::Result<()> {
    fn warns(_: &VerificationContext<'_>) -> anyhow::Result<()> {
        require(false, Severity::Warning, "just a warning")
    }
    fn breaks(context: &VerificationContext<'_>) -> anyhow::Result<()> {
        context.query_strings("SELECT * FROM table_that_does_not_exist")?;
        Ok(())
    }
    fn skips(_: &VerificationContext<'_>) -> anyhow::Result<()> {
        require(false, Severity::Skipped, "nothing to check")
    }
    let verifier = Verifier::with_rules(vec![
        Rule::new("Requirement 1", "warns", warns),
        Rule::new("Requirement 2", "breaks", breaks),
        Rule::new("Requirement 3", "skips", skips),
    ]);

    let conn = Connection::open_in_memory()?;
    let issues = verifier.verify(&conn, Path::new("memory.gpkg"), VerificationLevel::Fast);
    assert_eq!(issues.len(), 2);
    assert_eq!(issues[0].severity(), Severity::Warning);
    assert_eq!(issues[0].message(), "just a warning");
    assert_eq!(issues[1].severity(), Severity::Error);
    assert!(issues[1].to_string().contains("Requirement 2"));
    Ok(())
}

#[test]
fn verification_does_not_modify_the_file() -> anyhow::Result<()> {
    let (_dir, path) = gpkg_path("readonly")?;
    tiled_gpkg(&path)?;
    let before = sha256::try_digest(path.as_path())?;

    let gpkg = GeoPackage::open(&path, OpenMode::Open, VerificationLevel::None)?;
    let first = gpkg.verify(VerificationLevel::Full)?;
    let second = gpkg.verify(VerificationLevel::Full)?;
    assert_eq!(first, second);
    gpkg.close()?;

    assert_eq!(sha256::try_digest(path.as_path())?, before);
    Ok(())
}

#[test]
fn dangling_contents_srs_is_reported() -> anyhow::Result<()> {
    let (_dir, path) = gpkg_path("dangling")?;
    GeoPackage::create(&path)?.close()?;

    let conn = Connection::open(&path)?;
    conn.execute_batch(
        "PRAGMA foreign_keys = OFF;
         CREATE TABLE orphans (id INTEGER PRIMARY KEY, label TEXT);
         INSERT INTO gpkg_contents (table_name, data_type, identifier, srs_id)
             VALUES ('orphans', 'attributes', 'orphans', 999);",
    )?;
    conn.close().map_err(|(_, e)| e)?;

    // opening with verification rejects the file
    assert!(matches!(
        GeoPackage::open(&path, OpenMode::Open, VerificationLevel::Fast),
        Err(libgpkg::Error::ConformanceFailure(_))
    ));

    let gpkg = GeoPackage::open(&path, OpenMode::Open, VerificationLevel::None)?;
    let issues = gpkg.verify(VerificationLevel::Fast)?;
    let dangling = issues_for(&issues, "Requirement 16");
    assert_eq!(dangling.len(), 1);
    assert_eq!(dangling[0].severity(), Severity::Warning);
    assert!(dangling[0].message().contains("orphans"));

    let foreign_keys = issues_for(&issues, "Requirement 7");
    assert_eq!(foreign_keys.len(), 1);
    assert_eq!(foreign_keys[0].severity(), Severity::Error);
    Ok(())
}

#[test]
fn wrong_file_extension_is_a_warning() -> anyhow::Result<()> {
    let dir = Temp::new_dir()?;
    let path: PathBuf = AsRef::<Path>::as_ref(&dir).join("tiles.sqlite");
    tiled_gpkg(&path)?;

    // warnings alone do not fail opening
    let gpkg = GeoPackage::open(&path, OpenMode::Open, VerificationLevel::Fast)?;
    let issues = gpkg.verify(VerificationLevel::Fast)?;
    let extension = issues_for(&issues, "Requirement 3");
    assert_eq!(extension.len(), 1, "{issues:?}");
    assert_eq!(extension[0].severity(), Severity::Warning);
    assert!(issues.iter().all(|i| i.severity() != Severity::Error));
    Ok(())
}

#[test]
fn tile_encoding_is_only_checked_in_full_verification() -> anyhow::Result<()> {
    let (_dir, path) = gpkg_path("garbage")?;
    tiled_gpkg(&path)?;

    let conn = Connection::open(&path)?;
    conn.execute(
        "UPDATE hemisphere SET tile_data = ?1 WHERE zoom_level = 0",
        [b"not an image".as_slice()],
    )?;
    conn.close().map_err(|(_, e)| e)?;

    let gpkg = GeoPackage::open(&path, OpenMode::Open, VerificationLevel::None)?;
    let fast = gpkg.verify(VerificationLevel::Fast)?;
    assert!(issues_for(&fast, "Requirement 35").is_empty(), "{fast:?}");

    let issues = gpkg.verify(VerificationLevel::Full)?;
    let encoding = issues_for(&issues, "Requirement 35");
    assert_eq!(encoding.len(), 1);
    assert_eq!(encoding[0].severity(), Severity::Error);
    assert!(encoding[0].message().contains("hemisphere 0/1/0"));
    Ok(())
}

#[test]
fn malformed_extensions_are_reported() -> anyhow::Result<()> {
    let (_dir, path) = gpkg_path("extensions")?;
    tiled_gpkg(&path)?;

    let conn = Connection::open(&path)?;
    conn.execute_batch(
        "CREATE TABLE gpkg_extensions (
             table_name TEXT,
             column_name TEXT,
             extension_name TEXT NOT NULL,
             definition TEXT NOT NULL,
             scope TEXT NOT NULL,
             CONSTRAINT ge_tce UNIQUE (table_name, column_name, extension_name)
         );
         INSERT INTO gpkg_extensions VALUES ('hemisphere', NULL, 'nounderscore', 'somewhere', 'read-write');
         INSERT INTO gpkg_extensions VALUES ('missing_table', NULL, 'acme_ext', 'somewhere', 'read-write');
         INSERT INTO gpkg_extensions VALUES (NULL, NULL, 'acme_other', 'somewhere', 'sometimes');",
    )?;
    conn.close().map_err(|(_, e)| e)?;

    let gpkg = GeoPackage::open(&path, OpenMode::Open, VerificationLevel::None)?;
    let issues = gpkg.verify(VerificationLevel::Fast)?;
    assert!(issues_for(&issues, "Requirement 79").is_empty(), "{issues:?}");

    let missing = issues_for(&issues, "Requirement 80");
    assert_eq!(missing.len(), 1);
    assert!(missing[0].message().contains("missing_table"));

    let names = issues_for(&issues, "Requirement 82");
    assert_eq!(names.len(), 1);
    assert!(names[0].message().contains("nounderscore"));

    let scopes = issues_for(&issues, "Requirement 84");
    assert_eq!(scopes.len(), 1);
    assert!(scopes[0].message().contains("sometimes"));
    Ok(())
}

#[test]
fn table_definitions_are_compared_column_by_column() -> anyhow::Result<()> {
    const COLUMNS: &[ColumnDefinition] = &[
        ColumnDefinition::new("id", "INTEGER").primary_key(),
        ColumnDefinition::new("code", "TEXT").not_null().unique(),
        ColumnDefinition::new("state", "TEXT").default_value("'new'"),
    ];
    const DEFINITION: TableDefinition =
        TableDefinition::new(COLUMNS, &[], &[UniqueDefinition::new(&["code"])]);

    let conn = Connection::open_in_memory()?;
    conn.execute_batch(
        "CREATE TABLE good (id INTEGER PRIMARY KEY, code TEXT NOT NULL UNIQUE, state TEXT DEFAULT 'new');
         CREATE TABLE bad (id INTEGER PRIMARY KEY, code TEXT, state TEXT DEFAULT 'old');",
    )?;

    verify_table(&conn, "good", &DEFINITION)?;

    let error = verify_table(&conn, "bad", &DEFINITION).expect_err("bad table");
    let message = error.to_string();
    assert!(message.contains("column code should be NOT NULL"), "{message}");
    assert!(message.contains("column code should be UNIQUE"), "{message}");
    assert!(message.contains("column state has default"), "{message}");
    assert!(message.contains("missing unique constraint on (code)"), "{message}");

    assert!(verify_table(&conn, "absent", &DEFINITION).is_err());
    Ok(())
}
