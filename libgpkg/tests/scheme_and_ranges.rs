use std::str::FromStr;

use libgpkg::{
    tiling::{
        calculate_tile_ranges, minimal_zoom, profile_for, BoundingBox, Crs, CrsProfile,
        GlobalGeodetic, SphericalMercator, TileMatrixDimensions, TileOrigin, TileScheme,
        ZoomTimesTwo,
    },
    Error,
};

fn geodetic_ranges(
    dataset: &BoundingBox,
    origin: TileOrigin,
) -> anyhow::Result<libgpkg::tiling::TileRanges> {
    let profile = GlobalGeodetic;
    let scheme = ZoomTimesTwo::for_profile(&profile);
    Ok(calculate_tile_ranges(
        &scheme,
        dataset,
        &profile.bounds(),
        &profile,
        origin,
    )?)
}

#[test]
fn zoom_times_two_doubles_each_level() -> anyhow::Result<()> {
    let geodetic = ZoomTimesTwo::for_profile(&GlobalGeodetic);
    assert_eq!(geodetic.dimensions(0)?, TileMatrixDimensions::new(2, 1)?);
    assert_eq!(geodetic.dimensions(3)?, TileMatrixDimensions::new(16, 8)?);

    let mercator = ZoomTimesTwo::for_profile(&SphericalMercator);
    assert_eq!(mercator.dimensions(0)?, TileMatrixDimensions::ONE_BY_ONE);
    assert_eq!(mercator.dimensions(10)?.width(), 1024);
    assert_eq!(*mercator.zoom_levels().end(), mercator.max_zoom());
    Ok(())
}

#[test]
fn zoom_outside_scheme_is_rejected() -> anyhow::Result<()> {
    let scheme = ZoomTimesTwo::new(2, 5, TileMatrixDimensions::ONE_BY_ONE)?;
    assert_eq!(scheme.dimensions(2)?, TileMatrixDimensions::ONE_BY_ONE);
    assert!(matches!(
        scheme.dimensions(1),
        Err(Error::InvalidZoom { zoom: 1, min: 2, max: 5 })
    ));
    assert!(matches!(
        scheme.dimensions(6),
        Err(Error::InvalidZoom { zoom: 6, .. })
    ));
    assert!(ZoomTimesTwo::new(5, 2, TileMatrixDimensions::ONE_BY_ONE).is_err());
    Ok(())
}

#[test]
fn empty_matrix_dimensions_are_rejected() {
    assert!(matches!(
        TileMatrixDimensions::new(0, 1),
        Err(Error::InvalidTileScheme(_))
    ));
    assert!(TileMatrixDimensions::new(1, 0).is_err());
}

#[test]
fn ranges_are_clamped_to_the_matrix() -> anyhow::Result<()> {
    let oversized = BoundingBox::new(-200.0, -100.0, 200.0, 100.0)?;
    let ranges = geodetic_ranges(&oversized, TileOrigin::UpperLeft)?;
    let range = ranges.range(2)?;
    assert_eq!(
        (range.min_column(), range.max_column(), range.min_row(), range.max_row()),
        (0, 7, 0, 3)
    );
    assert_eq!(range.tile_count(), 32);
    Ok(())
}

#[test]
fn ranges_cover_the_dataset() -> anyhow::Result<()> {
    let small = BoundingBox::new(-10.0, -10.0, 10.0, 10.0)?;
    let ranges = geodetic_ranges(&small, TileOrigin::UpperLeft)?;
    let range = ranges.range(2)?;
    assert_eq!(
        (range.min_column(), range.max_column(), range.min_row(), range.max_row()),
        (3, 4, 1, 2)
    );
    assert!(range.contains(3, 2));
    assert!(!range.contains(5, 2));

    // straddles the central meridian and the equator down to zoom 0
    let root = ranges.range(0)?;
    assert_eq!((root.min_column(), root.max_column()), (0, 1));
    assert!(!root.is_single_tile());
    Ok(())
}

#[test]
fn tile_boundaries_do_not_pull_in_neighbors() -> anyhow::Result<()> {
    let aligned = BoundingBox::new(0.0, 0.0, 45.0, 45.0)?;
    let ranges = geodetic_ranges(&aligned, TileOrigin::UpperLeft)?;
    let range = ranges.range(2)?;
    assert_eq!(
        (range.min_column(), range.max_column(), range.min_row(), range.max_row()),
        (4, 4, 1, 1)
    );
    Ok(())
}

#[test]
fn lower_left_origin_counts_rows_from_the_south() -> anyhow::Result<()> {
    let north = BoundingBox::new(0.0, 50.0, 40.0, 80.0)?;
    let upper = geodetic_ranges(&north, TileOrigin::UpperLeft)?;
    let lower = geodetic_ranges(&north, TileOrigin::LowerLeft)?;
    assert_eq!(upper.range(2)?.min_row(), 0);
    assert_eq!(lower.range(2)?.min_row(), 3);
    assert_eq!(upper.range(2)?.min_column(), lower.range(2)?.min_column());
    Ok(())
}

#[test]
fn minimal_zoom_is_deepest_single_tile() -> anyhow::Result<()> {
    let north_east = BoundingBox::new(10.0, 10.0, 20.0, 20.0)?;
    let ranges = geodetic_ranges(&north_east, TileOrigin::UpperLeft)?;
    // 10..20 degrees fits into a single 22.5 degree tile at zoom 3, but not at zoom 4
    assert_eq!(minimal_zoom(&ranges, 6)?, 3);

    assert!(ranges.range(3)?.is_single_tile());
    Ok(())
}

#[test]
fn datasets_straddling_the_root_matrix_keep_several_roots() -> anyhow::Result<()> {
    // the central meridian splits the 2x1 geodetic matrix, no zoom holds the box in one tile
    let straddling = BoundingBox::new(-10.0, -10.0, 10.0, 10.0)?;
    let ranges = geodetic_ranges(&straddling, TileOrigin::UpperLeft)?;
    assert_eq!(minimal_zoom(&ranges, 4)?, 0);
    let root = ranges.range(0)?;
    assert!(!root.is_single_tile());
    assert_eq!(root.tile_count(), 2);
    Ok(())
}

#[test]
fn origin_transform_flips_the_right_axes() -> anyhow::Result<()> {
    let dimensions = TileMatrixDimensions::new(4, 2)?;
    assert_eq!(
        TileOrigin::UpperLeft.transform(TileOrigin::LowerLeft, 1, 0, dimensions),
        Some((1, 1))
    );
    assert_eq!(
        TileOrigin::UpperLeft.transform(TileOrigin::UpperRight, 1, 0, dimensions),
        Some((2, 0))
    );
    assert_eq!(
        TileOrigin::LowerRight.transform(TileOrigin::UpperLeft, 0, 0, dimensions),
        Some((3, 1))
    );
    assert_eq!(
        TileOrigin::UpperLeft.transform(TileOrigin::UpperLeft, 2, 1, dimensions),
        Some((2, 1))
    );
    Ok(())
}

#[test]
fn origin_transform_rejects_tiles_outside_the_matrix() -> anyhow::Result<()> {
    let dimensions = TileMatrixDimensions::new(4, 2)?;
    assert_eq!(
        TileOrigin::UpperLeft.transform(TileOrigin::UpperRight, 4, 0, dimensions),
        None
    );
    assert_eq!(
        TileOrigin::UpperLeft.transform(TileOrigin::LowerLeft, 0, 2, dimensions),
        None
    );
    // out of range even when no axis is flipped
    assert_eq!(
        TileOrigin::UpperLeft.transform(TileOrigin::UpperLeft, 9, 9, dimensions),
        None
    );
    Ok(())
}

#[test]
fn crs_is_parsed_and_profiled() -> anyhow::Result<()> {
    let crs = Crs::from_str("epsg:3857")?;
    assert_eq!(crs, Crs::epsg(3857));
    assert_eq!(crs.to_string(), "EPSG:3857");
    assert_eq!(profile_for(&crs)?.crs(), crs);

    assert!(Crs::from_str("4326").is_err());
    assert!(matches!(
        profile_for(&Crs::epsg(2056)),
        Err(Error::UnsupportedCrs { identifier: 2056, .. })
    ));
    Ok(())
}

#[test]
fn bounding_box_is_validated() {
    assert!(BoundingBox::new(1.0, 0.0, 0.0, 1.0).is_err());
    assert!(BoundingBox::new(0.0, 0.0, f64::NAN, 1.0).is_err());
    assert!(BoundingBox::new(0.0, 0.0, 1.0, 1.0).is_ok());
}
