use std::path::Path;

use image::{DynamicImage, Rgba, RgbaImage};
use tracing::{debug, instrument};

use crate::{
    tiling::crs::{BoundingBox, Crs},
    Error, Result,
};

/// A georeferenced image: pixels plus the CRS footprint they cover
///
/// Row zero of the image is the northern edge of `bounds`.
#[derive(Debug, Clone)]
pub struct Raster {
    image: RgbaImage,
    bounds: BoundingBox,
    crs: Crs,
}

/// Outcome of reading a tile footprint from a [`Raster`]
#[derive(Debug, Clone, PartialEq)]
pub enum RasterRead {
    /// The footprint overlaps the raster; uncovered pixels are transparent
    Image(RgbaImage),
    /// The footprint does not overlap the raster at all
    OutsideBounds,
}

impl Raster {
    /// Creates a new [`Raster`]
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBoundingBox`] if `bounds` has no area, and
    /// [`Error::InvalidTileScheme`] if the image has no pixels
    pub fn new(image: impl Into<DynamicImage>, bounds: BoundingBox, crs: Crs) -> Result<Self> {
        let image = image.into().into_rgba8();
        if image.width() == 0 || image.height() == 0 {
            return Err(Error::InvalidTileScheme(
                "raster must contain at least one pixel".to_owned(),
            ));
        }
        if bounds.width() <= 0.0 || bounds.height() <= 0.0 {
            return Err(Error::InvalidBoundingBox {
                min_x: bounds.min_x(),
                min_y: bounds.min_y(),
                max_x: bounds.max_x(),
                max_y: bounds.max_y(),
            });
        }
        Ok(Self { image, bounds, crs })
    }

    /// Decodes the image at `path` (any format supported by [`image`]) into a [`Raster`]
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be decoded, or see [`Self::new`]
    #[instrument(skip(bounds))]
    pub fn open(path: impl AsRef<Path> + std::fmt::Debug, bounds: BoundingBox, crs: Crs) -> Result<Self> {
        let image = image::open(path.as_ref())?;
        debug!("Decoded {}x{} raster", image.width(), image.height());
        Self::new(image, bounds, crs)
    }

    /// Returns the image width in pixels
    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Returns the image height in pixels
    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Returns the geographic footprint of the raster
    #[must_use]
    pub const fn bounds(&self) -> &BoundingBox {
        &self.bounds
    }

    /// Returns the coordinate reference system of [`Self::bounds`]
    #[must_use]
    pub const fn crs(&self) -> &Crs {
        &self.crs
    }

    /// Returns the pixel buffer
    #[must_use]
    pub const fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Returns the size of one pixel in CRS units, taking the finer of the two axes
    #[must_use]
    pub fn resolution(&self) -> f64 {
        let x = self.bounds.width() / f64::from(self.width());
        let y = self.bounds.height() / f64::from(self.height());
        x.min(y)
    }

    /// Resamples the raster onto a `tile_size` square covering `footprint`
    ///
    /// Each output pixel takes the nearest raster pixel under its center.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn read(&self, footprint: &BoundingBox, tile_size: u32) -> RasterRead {
        if !self.bounds.intersects(footprint) {
            return RasterRead::OutsideBounds;
        }
        let size = f64::from(tile_size);
        let (width, height) = (f64::from(self.width()), f64::from(self.height()));
        let step_x = footprint.width() / size;
        let step_y = footprint.height() / size;

        let tile = RgbaImage::from_fn(tile_size, tile_size, |px, py| {
            let x = (f64::from(px) + 0.5).mul_add(step_x, footprint.min_x());
            let y = (f64::from(py) + 0.5).mul_add(-step_y, footprint.max_y());
            let column = (x - self.bounds.min_x()) / self.bounds.width() * width;
            let row = (self.bounds.max_y() - y) / self.bounds.height() * height;
            if (0.0..width).contains(&column) && (0.0..height).contains(&row) {
                *self.image.get_pixel(column as u32, row as u32)
            } else {
                Rgba([0, 0, 0, 0])
            }
        });
        RasterRead::Image(tile)
    }
}
