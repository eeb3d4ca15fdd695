use std::{
    collections::HashMap,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use mktemp::Temp;
use tracing::{debug, trace, warn};

use crate::{tiling::TileKey, Result};

/// Transient on-disk store for tile images that have been produced but not yet consumed
///
/// Entries live under a private temporary directory, one file per `zoom/column/row` key. The
/// directory and anything left in it are removed when the cache is dropped.
pub struct TileCache {
    root: Temp,
    entries: HashMap<TileKey, PathBuf>,
}

impl TileCache {
    /// Creates an empty cache in a fresh temporary directory
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created
    pub fn new() -> Result<Self> {
        let root = Temp::new_dir()?;
        debug!(
            "Created tile cache at {}",
            AsRef::<Path>::as_ref(&root).display()
        );
        Ok(Self {
            root,
            entries: HashMap::new(),
        })
    }

    /// Returns the directory backing the cache
    #[must_use]
    pub fn root(&self) -> &Path {
        self.root.as_ref()
    }

    /// Stores `bytes` under `key`, replacing any previous entry
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written
    pub fn put(&mut self, key: TileKey, bytes: &[u8]) -> Result<()> {
        let dir = self.root().join(key.zoom.to_string());
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}_{}", key.column, key.row));
        fs::write(&path, bytes)?;
        trace!("Cached {key} ({} bytes)", bytes.len());
        self.entries.insert(key, path);
        Ok(())
    }

    /// Returns the bytes stored under `key`, if any
    ///
    /// # Errors
    ///
    /// Returns an error if the entry exists but cannot be read
    pub fn get(&self, key: &TileKey) -> Result<Option<Vec<u8>>> {
        let Some(path) = self.entries.get(key) else {
            return Ok(None);
        };
        Ok(Some(fs::read(path)?))
    }

    /// Returns true if an entry exists for `key`
    #[must_use]
    pub fn contains(&self, key: &TileKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Removes the entry for `key`
    ///
    /// Failing to delete the backing file is logged, not returned
    pub fn remove(&mut self, key: &TileKey) {
        if let Some(path) = self.entries.remove(key) {
            delete(&path);
        }
    }

    /// Removes every entry
    pub fn clear(&mut self) {
        for (_, path) in self.entries.drain() {
            delete(&path);
        }
    }

    /// Returns the number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the cache holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for TileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileCache")
            .field("root", &self.root())
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl Drop for TileCache {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            warn!("Dropping tile cache with {} entries", self.entries.len());
        }
        self.clear();
    }
}

fn delete(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Unable to remove cached tile {}: {e}", path.display()),
    }
}
