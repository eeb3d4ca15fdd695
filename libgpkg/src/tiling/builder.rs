use std::{collections::BTreeMap, io::Cursor};

use bon::Builder;
use image::{imageops, DynamicImage, Rgba, RgbaImage};
use itertools::iproduct;
use strum::{Display as StrumDisplay, EnumString};
use tracing::{debug, info, instrument, trace, warn};

use crate::{
    tiling::{
        cache::TileCache,
        crs::{profile_for, BoundingBox, Crs, CrsProfile, TileOrigin},
        range::{calculate_tile_ranges, zoom_envelope, TileRanges, ZoomEnvelope},
        raster::{Raster, RasterRead},
        scheme::{TileMatrixDimensions, TileScheme, ZoomTimesTwo},
        store::TileStore,
        TileKey,
    },
    Error, Result,
};

/// Encoding used for finished tiles
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ImageFormat {
    /// Lossless PNG, keeps transparency
    #[default]
    Png,
    /// JPEG, transparency is dropped
    #[strum(serialize = "jpeg", serialize = "jpg")]
    Jpeg,
}

impl ImageFormat {
    /// File extension for this format
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }

    /// MIME type for this format
    #[must_use]
    pub const fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
        }
    }

    /// Encodes `image` in this format
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails
    pub fn encode(self, image: &RgbaImage) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        match self {
            Self::Png => image.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)?,
            Self::Jpeg => DynamicImage::ImageRgba8(image.clone())
                .to_rgb8()
                .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Jpeg)?,
        }
        Ok(bytes)
    }
}

/// Settings for building a tile pyramid
#[derive(Debug, Clone, PartialEq, Builder)]
pub struct PyramidConfig {
    /// Width and height of every tile, in pixels
    #[builder(default = 256)]
    tile_size: u32,
    /// Corner tile (0, 0) is anchored to
    #[builder(default)]
    origin: TileOrigin,
    /// Multiplier on the raster's native resolution when choosing the maximal zoom level
    #[builder(default = 1.0)]
    resolution_factor: f64,
    /// Encoding of finished tiles
    #[builder(default)]
    image_format: ImageFormat,
}

impl Default for PyramidConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl PyramidConfig {
    /// Returns the tile size in pixels
    #[must_use]
    pub const fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Returns the tile origin
    #[must_use]
    pub const fn origin(&self) -> TileOrigin {
        self.origin
    }

    /// Returns the resolution factor
    #[must_use]
    pub const fn resolution_factor(&self) -> f64 {
        self.resolution_factor
    }

    /// Returns the tile encoding
    #[must_use]
    pub const fn image_format(&self) -> ImageFormat {
        self.image_format
    }
}

/// Position of a child tile inside its parent's image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Quadrant {
    /// upper left
    NorthWest,
    /// upper right
    NorthEast,
    /// lower left
    SouthWest,
    /// lower right
    SouthEast,
}

impl Quadrant {
    /// Returns the quadrant of the child at `(2 * column + column_offset, 2 * row + row_offset)`
    ///
    /// Offsets are 0 or 1; which image corner they land in depends on `origin`
    #[must_use]
    pub const fn of_child(column_offset: u32, row_offset: u32, origin: TileOrigin) -> Self {
        let west = (column_offset == 0) == origin.is_left();
        let north = (row_offset == 0) == origin.is_upper();
        match (north, west) {
            (true, true) => Self::NorthWest,
            (true, false) => Self::NorthEast,
            (false, true) => Self::SouthWest,
            (false, false) => Self::SouthEast,
        }
    }

    /// Pixel offset of this quadrant inside a canvas twice `tile_size` wide and high
    #[must_use]
    pub const fn offset(self, tile_size: u32) -> (u32, u32) {
        match self {
            Self::NorthWest => (0, 0),
            Self::NorthEast => (tile_size, 0),
            Self::SouthWest => (0, tile_size),
            Self::SouthEast => (tile_size, tile_size),
        }
    }
}

/// How a tile's image is produced
#[derive(Debug, Clone, PartialEq)]
pub enum TileKind {
    /// Sampled directly from the raster
    Leaf,
    /// Composited from the listed children, which all sit one zoom level deeper
    Interior {
        /// children that intersect the dataset, with their place in this tile's image
        children: Vec<(Quadrant, TileKey)>,
    },
}

/// A tile of the pyramid whose image has not been produced yet
#[derive(Debug, Clone, PartialEq)]
pub struct TileHandle {
    key: TileKey,
    bounds: BoundingBox,
    kind: TileKind,
}

impl TileHandle {
    /// Returns the tile address
    #[must_use]
    pub const fn key(&self) -> TileKey {
        self.key
    }

    /// Returns the CRS footprint of the tile
    #[must_use]
    pub const fn bounds(&self) -> &BoundingBox {
        &self.bounds
    }

    /// Returns how the image is produced
    #[must_use]
    pub const fn kind(&self) -> &TileKind {
        &self.kind
    }

    /// Returns true for tiles sampled straight from the raster
    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        matches!(self.kind, TileKind::Leaf)
    }
}

/// Everything a [`TileStore`] needs to know about a pyramid before tiles arrive
#[derive(Debug, Clone, PartialEq)]
pub struct PyramidLayout {
    crs: Crs,
    crs_bounds: BoundingBox,
    dataset_bounds: BoundingBox,
    envelope: ZoomEnvelope,
    tile_size: u32,
    origin: TileOrigin,
    image_format: ImageFormat,
    dimensions: BTreeMap<u8, TileMatrixDimensions>,
}

impl PyramidLayout {
    /// Returns the CRS of the pyramid
    #[must_use]
    pub const fn crs(&self) -> &Crs {
        &self.crs
    }

    /// Returns the bounds of the tile matrices (the whole CRS extent)
    #[must_use]
    pub const fn crs_bounds(&self) -> &BoundingBox {
        &self.crs_bounds
    }

    /// Returns the bounds of the source raster
    #[must_use]
    pub const fn dataset_bounds(&self) -> &BoundingBox {
        &self.dataset_bounds
    }

    /// Returns the zoom levels being built
    #[must_use]
    pub const fn envelope(&self) -> ZoomEnvelope {
        self.envelope
    }

    /// Returns the tile size in pixels
    #[must_use]
    pub const fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Returns the origin tiles are addressed from
    #[must_use]
    pub const fn origin(&self) -> TileOrigin {
        self.origin
    }

    /// Returns the tile encoding
    #[must_use]
    pub const fn image_format(&self) -> ImageFormat {
        self.image_format
    }

    /// Returns the matrix dimensions at `zoom`
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZoomRangeNotFound`] if `zoom` is outside the envelope
    pub fn dimensions(&self, zoom: u8) -> Result<TileMatrixDimensions> {
        self.dimensions
            .get(&zoom)
            .copied()
            .ok_or(Error::ZoomRangeNotFound(zoom))
    }
}

/// State shared by every step of a build
#[derive(Debug)]
struct BuilderContext {
    cache: TileCache,
    scheme: ZoomTimesTwo,
    profile: Box<dyn CrsProfile>,
    tile_size: u32,
    origin: TileOrigin,
}

/// Builds a quad-tree pyramid of tiles from a single [`Raster`]
///
/// Leaf tiles at the maximal zoom level are sampled from the raster; every coarser tile is
/// composited from its (up to four) children and downsampled by one half.
#[derive(Debug)]
pub struct TileBuilder<'r> {
    raster: &'r Raster,
    context: BuilderContext,
    ranges: TileRanges,
    envelope: ZoomEnvelope,
    image_format: ImageFormat,
}

impl<'r> TileBuilder<'r> {
    /// Prepares a build of `raster`
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedCrs`] if the raster's CRS has no profile, or an error if the
    /// tile cache cannot be created
    #[instrument(skip(raster), fields(crs = %raster.crs()))]
    pub fn new(raster: &'r Raster, config: &PyramidConfig) -> Result<Self> {
        if config.tile_size == 0 {
            return Err(Error::InvalidTileScheme("tile size must be positive".to_owned()));
        }
        let profile = profile_for(raster.crs())?;
        let scheme = ZoomTimesTwo::for_profile(profile.as_ref());
        let crs_bounds = profile.bounds();
        let ranges = calculate_tile_ranges(
            &scheme,
            raster.bounds(),
            &crs_bounds,
            profile.as_ref(),
            config.origin,
        )?;
        let envelope = zoom_envelope(
            &scheme,
            &ranges,
            &crs_bounds,
            raster.resolution(),
            config.tile_size,
            config.resolution_factor,
        )?;
        info!(
            "Pyramid spans zoom levels {}..={}",
            envelope.minimal(),
            envelope.maximal()
        );
        Ok(Self {
            raster,
            context: BuilderContext {
                cache: TileCache::new()?,
                scheme,
                profile,
                tile_size: config.tile_size,
                origin: config.origin,
            },
            ranges,
            envelope,
            image_format: config.image_format,
        })
    }

    /// Returns the zoom levels that will be built
    #[must_use]
    pub const fn envelope(&self) -> ZoomEnvelope {
        self.envelope
    }

    /// Returns the per zoom level tile ranges covering the raster
    #[must_use]
    pub const fn ranges(&self) -> &TileRanges {
        &self.ranges
    }

    /// Returns the tile scheme
    #[must_use]
    pub const fn scheme(&self) -> &ZoomTimesTwo {
        &self.context.scheme
    }

    /// Returns the layout a [`TileStore`] receives before any tile
    ///
    /// # Errors
    ///
    /// Returns an error if the scheme cannot produce dimensions for a zoom level of the envelope
    pub fn layout(&self) -> Result<PyramidLayout> {
        let dimensions = (self.envelope.minimal()..=self.envelope.maximal())
            .map(|zoom| Ok((zoom, self.context.scheme.dimensions(zoom)?)))
            .collect::<Result<_>>()?;
        Ok(PyramidLayout {
            crs: self.raster.crs().clone(),
            crs_bounds: self.context.profile.bounds(),
            dataset_bounds: *self.raster.bounds(),
            envelope: self.envelope,
            tile_size: self.context.tile_size,
            origin: self.context.origin,
            image_format: self.image_format,
            dimensions,
        })
    }

    /// Walks the pyramid from its root(s) and returns every tile, deepest zoom level first
    ///
    /// Children that fall outside the dataset's tile range are pruned and never appear.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChildlessInteriorTile`] if an interior tile has no children in range
    pub fn handles(&self) -> Result<Vec<TileHandle>> {
        let mut handles = Vec::new();
        let roots = self.ranges.range(self.envelope.minimal())?;
        for (column, row) in roots.tiles() {
            self.expand(TileKey::new(self.envelope.minimal(), column, row), &mut handles)?;
        }
        // children must be produced before the parents that read them from the cache
        handles.sort_by(|a, b| b.key.zoom.cmp(&a.key.zoom).then(a.key.cmp(&b.key)));
        debug!("Walked {} tiles", handles.len());
        Ok(handles)
    }

    fn expand(&self, key: TileKey, handles: &mut Vec<TileHandle>) -> Result<()> {
        let context = &self.context;
        let dimensions = context.scheme.dimensions(key.zoom)?;
        let bounds = context.profile.tile_bounds(
            key.column,
            key.row,
            &context.profile.bounds(),
            dimensions,
            context.origin,
        );
        if key.zoom >= self.envelope.maximal() {
            handles.push(TileHandle {
                key,
                bounds,
                kind: TileKind::Leaf,
            });
            return Ok(());
        }

        let child_zoom = key.zoom + 1;
        let child_range = *self.ranges.range(child_zoom)?;
        let mut children = Vec::with_capacity(4);
        for (column_offset, row_offset) in iproduct!(0..2, 0..2) {
            let column = key.column * 2 + column_offset;
            let row = key.row * 2 + row_offset;
            if !child_range.contains(column, row) {
                trace!("Pruned {child_zoom}/{column}/{row}");
                continue;
            }
            let child = TileKey::new(child_zoom, column, row);
            children.push((
                Quadrant::of_child(column_offset, row_offset, context.origin),
                child,
            ));
            self.expand(child, handles)?;
        }
        if children.is_empty() {
            return Err(Error::ChildlessInteriorTile(key));
        }
        handles.push(TileHandle {
            key,
            bounds,
            kind: TileKind::Interior { children },
        });
        Ok(())
    }

    /// Starts the build, returning a stream that produces each tile's image in dependency order
    ///
    /// # Errors
    ///
    /// See [`Self::handles`]
    pub fn build(self) -> Result<TileStream<'r>> {
        let handles = self.handles()?;
        Ok(TileStream {
            raster: self.raster,
            context: self.context,
            minimal_zoom: self.envelope.minimal(),
            handles: handles.into_iter(),
            failed: false,
        })
    }

    /// Builds the whole pyramid into `store`, returning the number of tiles written
    ///
    /// # Errors
    ///
    /// Any failure is fatal; the error names the tile that triggered it. The store is told to
    /// [`abort`](TileStore::abort) so no partial pyramid is left behind.
    #[instrument(skip_all)]
    pub fn write_to(self, store: &mut dyn TileStore) -> Result<usize> {
        let layout = self.layout()?;
        match self.write_all(&layout, store) {
            Ok(written) => {
                info!("Wrote {written} tiles");
                Ok(written)
            }
            Err(e) => {
                warn!("Build failed, discarding written tiles: {e}");
                if let Err(abort) = store.abort() {
                    warn!("Unable to discard written tiles: {abort}");
                }
                Err(e)
            }
        }
    }

    fn write_all(self, layout: &PyramidLayout, store: &mut dyn TileStore) -> Result<usize> {
        store.begin(layout)?;
        let mut written = 0;
        for tile in self.build()? {
            let (handle, image) = tile?;
            store
                .store(&handle, &image)
                .map_err(|e| tile_error(handle.key, e))?;
            written += 1;
        }
        store.finish()?;
        Ok(written)
    }
}

/// Iterator over the finished tiles of a build, deepest zoom level first
///
/// Interior tiles consume their children's cached images, so the stream must be driven in order.
/// The first error ends the stream; dropping the stream releases whatever is still cached.
#[derive(Debug)]
pub struct TileStream<'r> {
    raster: &'r Raster,
    context: BuilderContext,
    minimal_zoom: u8,
    handles: std::vec::IntoIter<TileHandle>,
    failed: bool,
}

impl TileStream<'_> {
    /// Returns the number of images still cached, waiting for their parent
    #[must_use]
    pub fn cached(&self) -> usize {
        self.context.cache.len()
    }

    fn produce(&mut self, handle: &TileHandle) -> Result<RgbaImage> {
        let tile_size = self.context.tile_size;
        let image = match &handle.kind {
            TileKind::Leaf => match self.raster.read(&handle.bounds, tile_size) {
                RasterRead::Image(image) => image,
                RasterRead::OutsideBounds => {
                    debug!("Tile {} is outside the raster", handle.key);
                    RgbaImage::new(tile_size, tile_size)
                }
            },
            TileKind::Interior { children } => {
                let mut present = Vec::with_capacity(children.len());
                for (quadrant, key) in children {
                    if let Some(bytes) = self.context.cache.get(key)? {
                        let image =
                            image::load_from_memory_with_format(&bytes, image::ImageFormat::Png)?;
                        present.push((*quadrant, image.into_rgba8()));
                    }
                }
                if present.is_empty() {
                    return Err(Error::ChildlessInteriorTile(handle.key));
                }
                let image = composite(&present, tile_size);
                for (_, key) in children {
                    self.context.cache.remove(key);
                }
                image
            }
        };
        if handle.key.zoom > self.minimal_zoom {
            let bytes = ImageFormat::Png.encode(&image)?;
            self.context.cache.put(handle.key, &bytes)?;
        }
        Ok(image)
    }
}

impl Iterator for TileStream<'_> {
    type Item = Result<(TileHandle, RgbaImage)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let Some(handle) = self.handles.next() else {
            if !self.context.cache.is_empty() {
                debug!("{} cached tiles were never consumed", self.context.cache.len());
                self.context.cache.clear();
            }
            return None;
        };
        trace!("Producing {}", handle.key);
        match self.produce(&handle) {
            Ok(image) => Some(Ok((handle, image))),
            Err(e) => {
                self.failed = true;
                self.context.cache.clear();
                Some(Err(tile_error(handle.key, e)))
            }
        }
    }
}

fn tile_error(key: TileKey, error: Error) -> Error {
    match error {
        e @ (Error::ChildlessInteriorTile(_) | Error::TileBuild { .. }) => e,
        e => Error::TileBuild {
            key,
            source: Box::new(e),
        },
    }
}

/// Places each child image in its quadrant of a canvas twice `tile_size` on each side and
/// downsamples the canvas by one half
///
/// Every output pixel is the box average of its 2x2 source block, weighted by alpha so that
/// transparent pixels contribute no color. Missing quadrants stay fully transparent.
#[must_use]
pub fn composite(children: &[(Quadrant, RgbaImage)], tile_size: u32) -> RgbaImage {
    let mut canvas = RgbaImage::new(tile_size * 2, tile_size * 2);
    for (quadrant, child) in children {
        let (x, y) = quadrant.offset(tile_size);
        imageops::replace(&mut canvas, child, i64::from(x), i64::from(y));
    }
    RgbaImage::from_fn(tile_size, tile_size, |x, y| {
        box_average(iproduct!(0..2, 0..2).map(|(dx, dy)| *canvas.get_pixel(2 * x + dx, 2 * y + dy)))
    })
}

fn box_average(block: impl Iterator<Item = Rgba<u8>>) -> Rgba<u8> {
    let mut color = [0_u32; 3];
    let mut alpha = 0_u32;
    for Rgba([r, g, b, a]) in block {
        let weight = u32::from(a);
        color[0] += u32::from(r) * weight;
        color[1] += u32::from(g) * weight;
        color[2] += u32::from(b) * weight;
        alpha += weight;
    }
    if alpha == 0 {
        return Rgba([0, 0, 0, 0]);
    }
    // rounded integer division; every quotient fits a u8
    let channel = |sum: u32| u8::try_from((sum + alpha / 2) / alpha).unwrap_or(u8::MAX);
    Rgba([
        channel(color[0]),
        channel(color[1]),
        channel(color[2]),
        u8::try_from((alpha + 2) / 4).unwrap_or(u8::MAX),
    ])
}
