mod common;
use common::{eastern_hemisphere, gpkg_path, FailingStore};
use libgpkg::{
    geopackage::{
        ConstraintType, DataColumn, DataColumnConstraint, DataType, Extension, ExtensionScope,
        GeometryColumn, GeometryType, MetadataReference, MetadataScope, ReferenceScope,
        SpatialReferenceSystem, ValueRequirement, APPLICATION_ID, APPLICATION_ID_OFFSET,
        SQLITE_HEADER, USER_VERSION, USER_VERSION_OFFSET,
    },
    tiling::{BoundingBox, GeoPackageTileStore, TileMatrixDimensions, TileOrigin},
    Error, GeoPackage, OpenMode, PyramidConfig, Severity, TileBuilder, VerificationLevel,
};

fn errors(gpkg: &GeoPackage, level: VerificationLevel) -> anyhow::Result<Vec<String>> {
    Ok(gpkg
        .verify(level)?
        .into_iter()
        .filter(|i| i.severity() == Severity::Error)
        .map(|i| i.to_string())
        .collect())
}

#[test]
fn create_writes_header_and_mandatory_tables() -> anyhow::Result<()> {
    let (_dir, path) = gpkg_path("empty")?;
    let gpkg = GeoPackage::create(&path)?;
    assert_eq!(gpkg.application_id()?, APPLICATION_ID);
    assert_eq!(gpkg.user_version()?, USER_VERSION);

    let ids = gpkg
        .core()
        .spatial_reference_systems()?
        .iter()
        .map(|srs| srs.identifier)
        .collect::<Vec<_>>();
    for id in [4326, -1, 0] {
        assert!(ids.contains(&id), "srs_id {id} is missing");
    }
    assert!(gpkg.core().contents(None)?.is_empty());
    assert_eq!(gpkg.verify(VerificationLevel::Full)?, Vec::new());
    Ok(())
}

#[test]
fn open_modes_respect_existing_files() -> anyhow::Result<()> {
    let (_dir, path) = gpkg_path("modes")?;
    assert!(matches!(
        GeoPackage::open(&path, OpenMode::Open, VerificationLevel::Fast),
        Err(Error::FileNotFound(_))
    ));

    GeoPackage::open(&path, OpenMode::OpenOrCreate, VerificationLevel::Fast)?.close()?;
    assert!(path.exists());
    assert!(matches!(
        GeoPackage::open(&path, OpenMode::Create, VerificationLevel::Fast),
        Err(Error::FileExists(_))
    ));
    let reopened = GeoPackage::open(&path, OpenMode::Open, VerificationLevel::Full)?;
    assert_eq!(reopened.path(), path.as_path());
    Ok(())
}

#[test]
fn files_that_are_not_sqlite_are_rejected() -> anyhow::Result<()> {
    let (_dir, path) = gpkg_path("text")?;
    std::fs::write(&path, "definitely not a database")?;
    assert!(matches!(
        GeoPackage::open(&path, OpenMode::Open, VerificationLevel::None),
        Err(Error::UnsupportedFormat(_))
    ));

    std::fs::write(&path, "short")?;
    assert!(matches!(
        GeoPackage::open(&path, OpenMode::OpenOrCreate, VerificationLevel::None),
        Err(Error::UnsupportedFormat(_))
    ));
    Ok(())
}

#[test]
fn pyramid_is_stored_as_a_conforming_tile_set() -> anyhow::Result<()> {
    let (_dir, path) = gpkg_path("pyramid")?;
    let raster = eastern_hemisphere()?;
    let gpkg = GeoPackage::create(&path)?;

    let mut store = GeoPackageTileStore::new(&gpkg, "hemisphere")
        .with_identifier("Eastern hemisphere")
        .with_description("one red hemisphere");
    let written = TileBuilder::new(&raster, &PyramidConfig::default())?.write_to(&mut store)?;
    assert_eq!(written, 21);

    let tiles = gpkg.tiles();
    assert_eq!(tiles.tile_count("hemisphere", None)?, 21);
    assert_eq!(tiles.tile_count("hemisphere", Some(2))?, 16);
    assert_eq!(tiles.tile_count("hemisphere", Some(0))?, 1);

    let set = tiles.tile_set("hemisphere")?.expect("tile set");
    assert_eq!(set.data_type, DataType::Tiles);
    assert_eq!(set.identifier.as_deref(), Some("Eastern hemisphere"));
    assert_eq!(set.srs_id, Some(4326));

    let matrix_set = tiles.tile_matrix_set("hemisphere")?.expect("tile matrix set");
    assert_eq!(matrix_set.bounding_box, BoundingBox::new(-180.0, -90.0, 180.0, 90.0)?);

    let matrices = tiles.tile_matrices("hemisphere")?;
    assert_eq!(matrices.len(), 3);
    let deepest = tiles.tile_matrix("hemisphere", 2)?.expect("zoom 2 matrix");
    assert_eq!(deepest.dimensions(), TileMatrixDimensions::new(8, 4)?);
    assert!((deepest.pixel_x_size() - 180.0 / 1024.0).abs() < 1e-12);

    let root = tiles.tile_data("hemisphere", 0, 1, 0)?.expect("root tile");
    assert_eq!(image::guess_format(&root)?, image::ImageFormat::Png);
    assert!(tiles.tile_data("hemisphere", 0, 0, 0)?.is_none());

    assert_eq!(errors(&gpkg, VerificationLevel::Full)?, Vec::<String>::new());
    drop(store);
    gpkg.close()?;

    // the file passes the verification done on open
    GeoPackage::open(&path, OpenMode::Open, VerificationLevel::Full)?;
    Ok(())
}

#[test]
fn tiles_are_stored_with_an_upper_left_origin() -> anyhow::Result<()> {
    let (_dir, path) = gpkg_path("lower_left")?;
    let raster = eastern_hemisphere()?;
    let gpkg = GeoPackage::create(&path)?;

    let config = PyramidConfig::builder().origin(TileOrigin::LowerLeft).build();
    let mut store = GeoPackageTileStore::new(&gpkg, "flipped");
    TileBuilder::new(&raster, &config)?.write_to(&mut store)?;

    let tiles = gpkg.tiles();
    // the north eastern leaf is row 3 when counted from the south
    assert!(tiles.tile_data("flipped", 2, 7, 0)?.is_some());
    assert!(tiles.tile_data("flipped", 2, 4, 3)?.is_some());
    assert!(tiles.tile_data("flipped", 2, 0, 0)?.is_none());
    assert_eq!(tiles.tile_count("flipped", Some(2))?, 16);
    assert!(errors(&gpkg, VerificationLevel::Full)?.is_empty());
    Ok(())
}

#[test]
fn tiles_outside_their_matrix_are_rejected() -> anyhow::Result<()> {
    let (_dir, path) = gpkg_path("matrix")?;
    let gpkg = GeoPackage::create(&path)?;
    let tiles = gpkg.tiles();
    let world = BoundingBox::new(-180.0, -90.0, 180.0, 90.0)?;
    tiles.add_tile_set(
        "world",
        "world",
        "",
        &world,
        &SpatialReferenceSystem::wgs84(),
        &world,
    )?;
    tiles.add_tile_matrix("world", 0, TileMatrixDimensions::TWO_BY_ONE, 256, 256)?;

    assert!(tiles.add_tile("world", 0, 1, 0, b"tile")? > 0);
    assert!(matches!(
        tiles.add_tile("world", 0, 2, 0, b"tile"),
        Err(Error::TileOutOfMatrix { column: 2, matrix_width: 2, .. })
    ));
    assert!(matches!(
        tiles.add_tile("world", 0, 0, 1, b"tile"),
        Err(Error::TileOutOfMatrix { row: 1, .. })
    ));
    assert!(matches!(
        tiles.add_tile("world", 1, 0, 0, b"tile"),
        Err(Error::NotFound(_))
    ));
    // the same tile twice violates the unique constraint and leaves the table untouched
    assert!(tiles.add_tile("world", 0, 1, 0, b"again").is_err());
    assert_eq!(tiles.tile_count("world", None)?, 1);
    assert_eq!(
        tiles.tile_data("world", 0, 1, 0)?.as_deref(),
        Some(b"tile".as_slice())
    );
    Ok(())
}

#[test]
fn table_names_are_validated() -> anyhow::Result<()> {
    let (_dir, path) = gpkg_path("names")?;
    let gpkg = GeoPackage::create(&path)?;
    let tiles = gpkg.tiles();
    let world = BoundingBox::new(-180.0, -90.0, 180.0, 90.0)?;
    let wgs84 = SpatialReferenceSystem::wgs84();

    for name in ["gpkg_tiles", "select", "1tiles", "with space"] {
        assert!(
            matches!(
                tiles.add_tile_set(name, name, "", &world, &wgs84, &world),
                Err(Error::InvalidName { .. })
            ),
            "{name} should be rejected"
        );
    }
    tiles.add_tile_set("tiles", "tiles", "", &world, &wgs84, &world)?;
    assert!(matches!(
        tiles.add_tile_set("tiles", "again", "", &world, &wgs84, &world),
        Err(Error::Conflict(_))
    ));
    assert_eq!(tiles.tile_sets()?.len(), 1);
    Ok(())
}

#[test]
fn conflicting_spatial_reference_systems_are_rejected() -> anyhow::Result<()> {
    let (_dir, path) = gpkg_path("srs")?;
    let gpkg = GeoPackage::create(&path)?;
    let core = gpkg.core();

    // an identical definition is accepted and returns the stored row
    let stored = core.add_spatial_reference_system(&SpatialReferenceSystem::wgs84())?;
    assert_eq!(stored.identifier, 4326);

    let impostor = SpatialReferenceSystem::builder()
        .name("not wgs 84".to_owned())
        .identifier(4326)
        .organization("EPSG".to_owned())
        .organization_srs_id(3857)
        .definition("undefined".to_owned())
        .build();
    assert!(matches!(
        core.add_spatial_reference_system(&impostor),
        Err(Error::Conflict(_))
    ));

    let custom = SpatialReferenceSystem::builder()
        .name("local grid".to_owned())
        .identifier(100_000)
        .organization("NONE".to_owned())
        .organization_srs_id(100_000)
        .definition("undefined".to_owned())
        .description("a local engineering grid".to_owned())
        .build();
    core.add_spatial_reference_system(&custom)?;
    assert_eq!(core.spatial_reference_system(100_000)?, Some(custom));
    assert!(core.spatial_reference_system(42)?.is_none());
    Ok(())
}

#[test]
fn features_schema_metadata_and_extensions_conform() -> anyhow::Result<()> {
    let (_dir, path) = gpkg_path("everything")?;
    let gpkg = GeoPackage::create(&path)?;
    let bounds = BoundingBox::new(5.0, 45.0, 11.0, 48.0)?;

    let geometry_column = GeometryColumn::builder()
        .table_name("stations")
        .column_name("geom")
        .geometry_type(GeometryType::Point)
        .srs_id(4326)
        .z(ValueRequirement::Optional)
        .build();
    gpkg.features().add_feature_set(
        "stations",
        "weather stations",
        &bounds,
        &SpatialReferenceSystem::wgs84(),
        &geometry_column,
        "fid",
    )?;
    assert_eq!(
        gpkg.features().geometry_column("stations")?,
        Some(geometry_column)
    );
    assert_eq!(gpkg.features().feature_sets()?.len(), 1);

    let schema = gpkg.schema();
    schema.add_data_column_constraint(
        &DataColumnConstraint::builder()
            .constraint_name("station_ids")
            .constraint_type(ConstraintType::Range)
            .min(0.0)
            .min_is_inclusive(true)
            .max(10_000.0)
            .max_is_inclusive(false)
            .build(),
    )?;
    assert!(schema
        .add_data_column_constraint(
            &DataColumnConstraint::builder()
                .constraint_name("broken")
                .constraint_type(ConstraintType::Enum)
                .min(1.0)
                .build(),
        )
        .is_err());
    schema.add_data_column(
        &DataColumn::builder()
            .table_name("stations")
            .column_name("fid")
            .name("station id")
            .constraint_name("station_ids")
            .build(),
    )?;
    assert!(matches!(
        schema.add_data_column(
            &DataColumn::builder()
                .table_name("stations")
                .column_name("altitude")
                .build()
        ),
        Err(Error::NotFound(_))
    ));
    assert_eq!(schema.data_columns("stations")?.len(), 1);

    let metadata = gpkg.metadata();
    let document = metadata.add_metadata(
        MetadataScope::Dataset,
        "http://www.isotc211.org/2005/gmd",
        "text/xml",
        "<md/>",
    )?;
    metadata.add_metadata_reference(
        &MetadataReference::builder()
            .scope(ReferenceScope::Table)
            .table_name("stations")
            .file_id(document.id)
            .build(),
    )?;
    assert!(matches!(
        metadata.add_metadata_reference(
            &MetadataReference::builder()
                .scope(ReferenceScope::Column)
                .table_name("stations")
                .file_id(document.id)
                .build(),
        ),
        Err(Error::Parse(_))
    ));
    assert_eq!(metadata.metadata_references()?.len(), 1);

    let extensions = gpkg.extensions();
    extensions.add_extension(
        &Extension::builder()
            .table_name("stations")
            .column_name("geom")
            .extension_name("gpkg_rtree_index")
            .definition("http://www.geopackage.org/spec/#extension_rtree")
            .scope(ExtensionScope::WriteOnly)
            .build(),
    )?;
    assert!(matches!(
        extensions.add_extension(
            &Extension::builder()
                .extension_name("rtree")
                .definition("nowhere")
                .scope(ExtensionScope::ReadWrite)
                .build(),
        ),
        Err(Error::InvalidName { .. })
    ));
    assert!(extensions.has_extension("gpkg_rtree_index", Some("stations"), Some("geom"))?);
    assert!(!extensions.has_extension("gpkg_rtree_index", None, None)?);

    assert_eq!(gpkg.verify(VerificationLevel::Full)?, Vec::new());
    Ok(())
}

#[test]
fn failed_builds_leave_no_partial_tile_set() -> anyhow::Result<()> {
    let (_dir, path) = gpkg_path("partial")?;
    let raster = eastern_hemisphere()?;
    let gpkg = GeoPackage::create(&path)?;

    // a finished tile set written before the failing one must survive
    let mut store = GeoPackageTileStore::new(&gpkg, "complete");
    TileBuilder::new(&raster, &PyramidConfig::default())?.write_to(&mut store)?;
    drop(store);

    let mut failing = FailingStore {
        inner: GeoPackageTileStore::new(&gpkg, "partial"),
        failing_zoom: 0,
    };
    let result = TileBuilder::new(&raster, &PyramidConfig::default())?.write_to(&mut failing);
    assert!(matches!(
        result,
        Err(Error::TileBuild { key, .. }) if key.zoom == 0
    ));
    drop(failing);

    let tiles = gpkg.tiles();
    assert!(tiles.tile_set("partial")?.is_none());
    assert!(tiles.tile_matrix_set("partial")?.is_none());
    assert!(tiles.tile_matrices("partial")?.is_empty());
    assert!(!gpkg.core().contents(None)?.iter().any(|c| c.table_name == "partial"));
    assert_eq!(tiles.tile_count("complete", None)?, 21);
    assert!(errors(&gpkg, VerificationLevel::Full)?.is_empty());
    gpkg.close()?;

    // nothing of the failed build reached the file either
    let reopened = GeoPackage::open(&path, OpenMode::Open, VerificationLevel::Full)?;
    assert_eq!(reopened.tiles().tile_sets()?.len(), 1);
    Ok(())
}

#[test]
fn sqlite_header_is_written_on_create() -> anyhow::Result<()> {
    let (_dir, path) = gpkg_path("header")?;
    GeoPackage::create(&path)?.close()?;

    let bytes = std::fs::read(&path)?;
    assert_eq!(&bytes[..16], SQLITE_HEADER);
    assert_eq!(
        &bytes[APPLICATION_ID_OFFSET..APPLICATION_ID_OFFSET + 4],
        b"GPKG"
    );
    assert_eq!(
        &bytes[USER_VERSION_OFFSET..USER_VERSION_OFFSET + 4],
        USER_VERSION.to_be_bytes()
    );
    Ok(())
}
