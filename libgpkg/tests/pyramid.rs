use std::{collections::BTreeSet, path::Path};

mod common;
use common::{eastern_hemisphere, FailingStore, RED};
use image::{GenericImageView, Rgba, RgbaImage};
use libgpkg::{
    tiling::{
        composite, BoundingBox, Crs, DirectoryTileStore, ImageFormat, Quadrant, TileCache,
        TileKind, TileOrigin,
    },
    Error, PyramidConfig, Raster, TileBuilder, TileKey,
};
use mktemp::Temp;

#[test]
fn envelope_spans_root_to_native_resolution() -> anyhow::Result<()> {
    let raster = eastern_hemisphere()?;
    let builder = TileBuilder::new(&raster, &PyramidConfig::default())?;
    // 180 degrees over 1024 pixels matches the 8x4 matrix of zoom 2
    assert_eq!(builder.envelope().maximal(), 2);
    // the whole hemisphere is the eastern tile of the 2x1 matrix at zoom 0
    assert_eq!(builder.envelope().minimal(), 0);

    let layout = builder.layout()?;
    assert_eq!(layout.dimensions(2)?.width(), 8);
    assert!(layout.dimensions(3).is_err());
    Ok(())
}

#[test]
fn resolution_factor_stops_the_pyramid_earlier() -> anyhow::Result<()> {
    let raster = eastern_hemisphere()?;
    let config = PyramidConfig::builder().resolution_factor(2.0).build();
    let builder = TileBuilder::new(&raster, &config)?;
    assert_eq!(builder.envelope().maximal(), 1);
    Ok(())
}

#[test]
fn handles_form_a_quad_tree() -> anyhow::Result<()> {
    let raster = eastern_hemisphere()?;
    let builder = TileBuilder::new(&raster, &PyramidConfig::default())?;
    let handles = builder.handles()?;

    assert_eq!(handles.len(), 21);
    assert_eq!(handles.iter().filter(|h| h.is_leaf()).count(), 16);
    assert!(handles.iter().filter(|h| h.is_leaf()).all(|h| h.key().zoom == 2));

    // deepest zoom level first, so children always precede their parent
    let zooms = handles.iter().map(|h| h.key().zoom).collect::<Vec<_>>();
    assert!(zooms.windows(2).all(|w| w[0] >= w[1]));

    let root = handles.last().expect("at least one tile");
    assert_eq!(root.key(), TileKey::new(0, 1, 0));
    let TileKind::Interior { children } = root.kind() else {
        panic!("root should be composited");
    };
    let quadrants = children.iter().map(|(q, _)| *q).collect::<BTreeSet<_>>();
    assert_eq!(quadrants.len(), 4);
    assert!(children.contains(&(Quadrant::NorthWest, TileKey::new(1, 2, 0))));
    assert!(children.contains(&(Quadrant::SouthEast, TileKey::new(1, 3, 1))));
    Ok(())
}

#[test]
fn children_outside_the_dataset_are_pruned() -> anyhow::Result<()> {
    // a quarter of the eastern hemisphere, north of the equator
    let image = RgbaImage::from_pixel(512, 512, RED);
    let raster = Raster::new(
        image,
        BoundingBox::new(0.0, 0.0, 90.0, 90.0)?,
        Crs::epsg(4326),
    )?;
    let builder = TileBuilder::new(&raster, &PyramidConfig::default())?;
    assert_eq!(builder.envelope().maximal(), 2);
    assert_eq!(builder.envelope().minimal(), 1);

    let handles = builder.handles()?;
    // one root at zoom 1 with the four zoom 2 tiles below it
    assert_eq!(handles.len(), 5);
    let root = handles.last().expect("at least one tile");
    assert_eq!(root.key(), TileKey::new(1, 2, 0));
    Ok(())
}

#[test]
fn straddling_datasets_are_built_from_several_roots() -> anyhow::Result<()> {
    let image = RgbaImage::from_pixel(128, 128, RED);
    let raster = Raster::new(
        image,
        BoundingBox::new(-10.0, -10.0, 10.0, 10.0)?,
        Crs::epsg(4326),
    )?;
    let builder = TileBuilder::new(&raster, &PyramidConfig::default())?;
    assert_eq!(builder.envelope().minimal(), 0);

    let handles = builder.handles()?;
    let roots = handles
        .iter()
        .filter(|h| h.key().zoom == 0)
        .map(|h| h.key())
        .collect::<BTreeSet<_>>();
    assert_eq!(
        roots,
        BTreeSet::from([TileKey::new(0, 0, 0), TileKey::new(0, 1, 0)])
    );
    Ok(())
}

#[test]
fn stream_produces_every_tile_and_drains_the_cache() -> anyhow::Result<()> {
    let raster = eastern_hemisphere()?;
    let builder = TileBuilder::new(&raster, &PyramidConfig::default())?;
    let mut stream = builder.build()?;

    let mut produced = 0;
    let mut root = None;
    for tile in stream.by_ref() {
        let (handle, image) = tile?;
        assert_eq!(image.dimensions(), (256, 256));
        produced += 1;
        if handle.key().zoom == 0 {
            root = Some(image);
        }
    }
    assert_eq!(produced, 21);
    assert_eq!(stream.cached(), 0);

    // the raster is a single color, so is everything composited from it
    let root = root.expect("root tile");
    assert_eq!(*root.get_pixel(128, 128), RED);
    assert_eq!(*root.get_pixel(0, 0), RED);
    Ok(())
}

#[test]
fn cache_entries_are_single_use() -> anyhow::Result<()> {
    let mut cache = TileCache::new()?;
    let root = cache.root().to_path_buf();
    let key = TileKey::new(3, 5, 2);
    assert!(cache.get(&key)?.is_none());

    cache.put(key, b"child")?;
    cache.put(TileKey::new(3, 4, 2), b"sibling")?;
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.get(&key)?.as_deref(), Some(b"child".as_slice()));
    assert!(root.join("3").join("5_2").exists());

    cache.remove(&key);
    assert!(!cache.contains(&key));
    assert!(!root.join("3").join("5_2").exists());
    // removing twice is harmless
    cache.remove(&key);

    drop(cache);
    assert!(!root.exists());
    Ok(())
}

#[test]
fn composite_places_children_in_their_quadrants() {
    let blue = Rgba([0, 0, 255, 255]);
    let children = vec![
        (Quadrant::NorthWest, RgbaImage::from_pixel(256, 256, RED)),
        (Quadrant::NorthEast, RgbaImage::from_pixel(256, 256, blue)),
    ];
    let parent = composite(&children, 256);
    assert_eq!(parent.dimensions(), (256, 256));
    // each output pixel only averages its own 2x2 block, so the seam stays sharp
    assert_eq!(*parent.get_pixel(127, 10), RED);
    assert_eq!(*parent.get_pixel(128, 10), blue);
    assert_eq!(*parent.get_pixel(0, 127), RED);
    assert_eq!(*parent.get_pixel(255, 127), blue);
    // the missing southern quadrants stay fully transparent
    assert_eq!(*parent.get_pixel(10, 128), Rgba([0, 0, 0, 0]));
    assert_eq!(*parent.get_pixel(200, 255), Rgba([0, 0, 0, 0]));
}

#[test]
fn composite_weights_colors_by_alpha() {
    // one opaque red pixel in an otherwise transparent 2x2 block
    let mut child = RgbaImage::new(2, 2);
    child.put_pixel(0, 0, RED);
    let parent = composite(&[(Quadrant::NorthWest, child)], 2);
    assert_eq!(*parent.get_pixel(0, 0), Rgba([255, 0, 0, 64]));

    let mixed = RgbaImage::from_fn(2, 2, |x, _| {
        if x == 0 {
            Rgba([200, 0, 0, 255])
        } else {
            Rgba([0, 0, 100, 255])
        }
    });
    let parent = composite(&[(Quadrant::SouthEast, mixed)], 2);
    assert_eq!(*parent.get_pixel(1, 1), Rgba([100, 0, 50, 255]));
    assert_eq!(*parent.get_pixel(0, 0), Rgba([0, 0, 0, 0]));
}

#[test]
fn quadrants_follow_the_origin() {
    assert_eq!(
        Quadrant::of_child(0, 0, TileOrigin::UpperLeft),
        Quadrant::NorthWest
    );
    assert_eq!(
        Quadrant::of_child(0, 0, TileOrigin::LowerLeft),
        Quadrant::SouthWest
    );
    assert_eq!(
        Quadrant::of_child(1, 0, TileOrigin::UpperRight),
        Quadrant::NorthWest
    );
    assert_eq!(
        Quadrant::of_child(1, 1, TileOrigin::UpperLeft),
        Quadrant::SouthEast
    );
    assert_eq!(Quadrant::SouthWest.offset(256), (0, 256));
}

#[test]
fn directory_store_writes_one_file_per_tile() -> anyhow::Result<()> {
    let raster = eastern_hemisphere()?;
    let builder = TileBuilder::new(&raster, &PyramidConfig::default())?;
    let keys = builder
        .handles()?
        .iter()
        .map(libgpkg::tiling::TileHandle::key)
        .collect::<Vec<_>>();

    let dir = Temp::new_dir()?;
    let mut store = DirectoryTileStore::new(AsRef::<Path>::as_ref(&dir));
    let written = builder.write_to(&mut store)?;
    assert_eq!(written, keys.len());

    for key in &keys {
        let path = store.tile_path(*key);
        assert!(path.exists(), "{} is missing", path.display());
    }
    let root = store.tile_path(TileKey::new(0, 1, 0));
    assert!(root.ends_with("0/1_0_0.png"));
    let decoded = image::open(&root)?;
    assert_eq!(decoded.dimensions(), (256, 256));
    assert_eq!(decoded.get_pixel(100, 100), RED);
    Ok(())
}

#[test]
fn failed_builds_remove_written_files() -> anyhow::Result<()> {
    let raster = eastern_hemisphere()?;
    let builder = TileBuilder::new(&raster, &PyramidConfig::default())?;
    let dir = Temp::new_dir()?;
    let mut store = FailingStore {
        inner: DirectoryTileStore::new(AsRef::<Path>::as_ref(&dir)),
        failing_zoom: 1,
    };
    assert!(builder.write_to(&mut store).is_err());

    // the leaves were written before zoom 1 failed, and are gone again
    let leaf = store.inner.tile_path(TileKey::new(2, 4, 0));
    assert!(leaf.ends_with("2/4_0_2.png"));
    assert!(!leaf.exists());
    let leftovers = std::fs::read_dir(AsRef::<Path>::as_ref(&dir).join("2"))?.count();
    assert_eq!(leftovers, 0);
    Ok(())
}

#[test]
fn jpeg_tiles_use_the_jpeg_extension() -> anyhow::Result<()> {
    let raster = eastern_hemisphere()?;
    let config = PyramidConfig::builder()
        .image_format(ImageFormat::Jpeg)
        .tile_size(128)
        .build();
    let builder = TileBuilder::new(&raster, &config)?;
    let dir = Temp::new_dir()?;
    let mut store = DirectoryTileStore::new(AsRef::<Path>::as_ref(&dir));
    builder.write_to(&mut store)?;

    let root = store.tile_path(TileKey::new(0, 1, 0));
    assert!(root.ends_with("0/1_0_0.jpg"));
    let bytes = std::fs::read(&root)?;
    assert_eq!(image::guess_format(&bytes)?, image::ImageFormat::Jpeg);
    Ok(())
}

#[test]
fn zero_tile_size_is_rejected() -> anyhow::Result<()> {
    let raster = eastern_hemisphere()?;
    let config = PyramidConfig::builder().tile_size(0).build();
    assert!(matches!(
        TileBuilder::new(&raster, &config),
        Err(Error::InvalidTileScheme(_))
    ));
    Ok(())
}

#[test]
fn unsupported_crs_is_rejected() -> anyhow::Result<()> {
    let image = RgbaImage::from_pixel(16, 16, RED);
    let raster = Raster::new(image, BoundingBox::new(0.0, 0.0, 1.0, 1.0)?, Crs::epsg(2056))?;
    assert!(matches!(
        TileBuilder::new(&raster, &PyramidConfig::default()),
        Err(Error::UnsupportedCrs { .. })
    ));
    Ok(())
}
