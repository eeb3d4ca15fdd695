#![allow(dead_code)]

use std::path::{Path, PathBuf};

use image::{Rgba, RgbaImage};
use libgpkg::{
    tiling::{BoundingBox, Crs, PyramidLayout, TileHandle, TileStore},
    Error, Raster,
};
use mktemp::Temp;

pub const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

/// A single-colored 1024x1024 raster covering the eastern hemisphere in EPSG:4326
pub fn eastern_hemisphere() -> anyhow::Result<Raster> {
    let image = RgbaImage::from_pixel(1024, 1024, RED);
    let bounds = BoundingBox::new(0.0, -90.0, 180.0, 90.0)?;
    Ok(Raster::new(image, bounds, Crs::epsg(4326))?)
}

/// A fresh directory plus the path of a not yet existing `.gpkg` file inside it
///
/// The directory is removed when the returned [`Temp`] is dropped.
pub fn gpkg_path(name: &str) -> anyhow::Result<(Temp, PathBuf)> {
    let dir = Temp::new_dir()?;
    let path = AsRef::<Path>::as_ref(&dir).join(format!("{name}.gpkg"));
    Ok((dir, path))
}

/// Passes tiles through to `inner` until the first tile of `failing_zoom`
pub struct FailingStore<S> {
    pub inner: S,
    pub failing_zoom: u8,
}

impl<S: TileStore> TileStore for FailingStore<S> {
    fn begin(&mut self, layout: &PyramidLayout) -> libgpkg::Result<()> {
        self.inner.begin(layout)
    }

    fn store(&mut self, handle: &TileHandle, image: &RgbaImage) -> libgpkg::Result<()> {
        if handle.key().zoom == self.failing_zoom {
            return Err(Error::NotFound("disk space".to_owned()));
        }
        self.inner.store(handle, image)
    }

    fn finish(&mut self) -> libgpkg::Result<()> {
        self.inner.finish()
    }

    fn abort(&mut self) -> libgpkg::Result<()> {
        self.inner.abort()
    }
}
