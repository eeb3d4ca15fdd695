use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use image::RgbaImage;
use tracing::{debug, instrument, trace, warn};

use crate::{
    geopackage::{
        begin_savepoint, release_savepoint, rollback_savepoint, GeoPackage, SpatialReferenceSystem,
    },
    tiling::{
        builder::{ImageFormat, PyramidLayout, TileHandle},
        crs::{profile_for, TileOrigin},
        TileKey,
    },
    Error, Result,
};

/// Destination of the tiles a [`TileBuilder`](super::TileBuilder) produces
///
/// `begin` is called once before the first tile, `finish` once after the last one. If the build
/// fails anywhere in between, `abort` is called instead of `finish` and must discard everything
/// the store wrote since `begin`.
pub trait TileStore {
    /// Prepares the store for a pyramid shaped like `layout`
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be prepared
    fn begin(&mut self, layout: &PyramidLayout) -> Result<()> {
        let _ = layout;
        Ok(())
    }

    /// Persists one finished tile
    ///
    /// # Errors
    ///
    /// Returns an error if the tile cannot be encoded or written
    fn store(&mut self, handle: &TileHandle, image: &RgbaImage) -> Result<()>;

    /// Called after the last tile
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be finalized
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }

    /// Discards the partially written pyramid after a failed build
    ///
    /// # Errors
    ///
    /// Returns an error if the written tiles cannot be discarded
    fn abort(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Writes each tile to `<root>/<zoom>/<column>_<row>_<zoom>.<extension>`
///
/// Tiles keep the column and row numbering of the build's origin.
#[derive(Debug, Clone)]
pub struct DirectoryTileStore {
    root: PathBuf,
    image_format: ImageFormat,
    written: Vec<PathBuf>,
}

impl DirectoryTileStore {
    /// Creates a store rooted at `root`; the directory is created on [`TileStore::begin`]
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            image_format: ImageFormat::default(),
            written: Vec::new(),
        }
    }

    /// Returns the root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the file a tile is written to
    #[must_use]
    pub fn tile_path(&self, key: TileKey) -> PathBuf {
        self.root.join(key.zoom.to_string()).join(format!(
            "{}_{}_{}.{}",
            key.column,
            key.row,
            key.zoom,
            self.image_format.extension()
        ))
    }
}

impl TileStore for DirectoryTileStore {
    fn begin(&mut self, layout: &PyramidLayout) -> Result<()> {
        self.image_format = layout.image_format();
        self.written.clear();
        let envelope = layout.envelope();
        for zoom in envelope.minimal()..=envelope.maximal() {
            fs::create_dir_all(self.root.join(zoom.to_string()))?;
        }
        debug!("Writing tiles below {}", self.root.display());
        Ok(())
    }

    fn store(&mut self, handle: &TileHandle, image: &RgbaImage) -> Result<()> {
        let path = self.tile_path(handle.key());
        fs::write(&path, self.image_format.encode(image)?)?;
        trace!("Wrote {}", path.display());
        self.written.push(path);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.written.clear();
        Ok(())
    }

    fn abort(&mut self) -> Result<()> {
        debug!("Removing {} tiles below {}", self.written.len(), self.root.display());
        for path in self.written.drain(..) {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Writes tiles into a tile pyramid user table of a [`GeoPackage`]
///
/// [`TileStore::begin`] creates the tile set, registers its spatial reference system and adds one
/// tile matrix per zoom level. Tiles are re-addressed from the build origin to the upper left
/// origin GeoPackage uses.
///
/// Everything from `begin` to `finish` is written inside one savepoint: a failed build leaves the
/// GeoPackage as it was before `begin`.
#[derive(Debug)]
pub struct GeoPackageTileStore<'g> {
    gpkg: &'g GeoPackage,
    table_name: String,
    identifier: String,
    description: String,
    layout: Option<PyramidLayout>,
    pending: bool,
}

const TILE_STORE_SAVEPOINT: &str = "gpkg_tile_store";

impl<'g> GeoPackageTileStore<'g> {
    /// Creates a store writing into the new tile set `table_name`
    #[must_use]
    pub fn new(gpkg: &'g GeoPackage, table_name: impl Into<String>) -> Self {
        let table_name = table_name.into();
        Self {
            gpkg,
            identifier: table_name.clone(),
            description: String::new(),
            table_name,
            layout: None,
            pending: false,
        }
    }

    /// Sets the human readable identifier of the tile set (defaults to the table name)
    #[must_use]
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }

    /// Sets the description of the tile set
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Returns the tile table name
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table_name
    }
}

impl TileStore for GeoPackageTileStore<'_> {
    #[instrument(skip_all, fields(table = %self.table_name))]
    fn begin(&mut self, layout: &PyramidLayout) -> Result<()> {
        let profile = profile_for(layout.crs())?;
        let srs = SpatialReferenceSystem::from_profile(profile.as_ref());
        begin_savepoint(self.gpkg.conn(), TILE_STORE_SAVEPOINT)?;
        self.pending = true;
        let tiles = self.gpkg.tiles();
        tiles.add_tile_set(
            &self.table_name,
            &self.identifier,
            &self.description,
            layout.dataset_bounds(),
            &srs,
            layout.crs_bounds(),
        )?;
        let envelope = layout.envelope();
        for zoom in envelope.minimal()..=envelope.maximal() {
            tiles.add_tile_matrix(
                &self.table_name,
                zoom,
                layout.dimensions(zoom)?,
                layout.tile_size(),
                layout.tile_size(),
            )?;
        }
        self.layout = Some(layout.clone());
        Ok(())
    }

    fn store(&mut self, handle: &TileHandle, image: &RgbaImage) -> Result<()> {
        let layout = self.layout.as_ref().ok_or_else(|| {
            Error::NotFound(format!("layout of tile set {}", self.table_name))
        })?;
        let key = handle.key();
        let dimensions = layout.dimensions(key.zoom)?;
        let (column, row) = layout
            .origin()
            .transform(TileOrigin::UpperLeft, key.column, key.row, dimensions)
            .ok_or(Error::TileOutOfMatrix {
                zoom: key.zoom,
                column: key.column,
                row: key.row,
                matrix_width: dimensions.width(),
                matrix_height: dimensions.height(),
            })?;
        let data = layout.image_format().encode(image)?;
        self.gpkg
            .tiles()
            .add_tile(&self.table_name, key.zoom, column, row, &data)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.layout = None;
        if self.pending {
            release_savepoint(self.gpkg.conn(), TILE_STORE_SAVEPOINT)?;
            self.pending = false;
        }
        debug!("Finished tile set {}", self.table_name);
        Ok(())
    }

    fn abort(&mut self) -> Result<()> {
        self.layout = None;
        if self.pending {
            self.pending = false;
            rollback_savepoint(self.gpkg.conn(), TILE_STORE_SAVEPOINT)?;
            debug!("Discarded tile set {}", self.table_name);
        }
        Ok(())
    }
}

impl Drop for GeoPackageTileStore<'_> {
    fn drop(&mut self) {
        if self.pending {
            warn!("Tile set {} was never finished, discarding it", self.table_name);
            if let Err(e) = self.abort() {
                warn!("Unable to discard tile set {}: {e}", self.table_name);
            }
        }
    }
}
