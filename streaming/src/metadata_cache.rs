//! Persisted texture metadata.
//!
//! Loading a texture normally needs the file decoded before GPU storage can
//! be created. The cache remembers each texture's shape and format from the
//! previous run so storage can be allocated the moment a load is scheduled.
//! The file is RON:
//!
//! ```ron
//! (
//!     entries: {
//!         "brick.png": (
//!             kind: Type2D,
//!             width: 512,
//!             height: 512,
//!             depth_or_slices: 1,
//!             format: Rgba8Unorm,
//!             mip_count: 10,
//!             pool_id: 0,
//!         ),
//!     },
//! )
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use texstream_core::{PixelFormat, TextureKind};

use crate::error::StreamingError;
use crate::texture::TextureMetadata;

/// Metadata of one texture file, as decoded (before filters).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedMetadata {
    pub kind: TextureKind,
    pub width: u32,
    pub height: u32,
    pub depth_or_slices: u32,
    pub format: PixelFormat,
    pub mip_count: u8,
    #[serde(default)]
    pub pool_id: u32,
}

impl CachedMetadata {
    pub fn new(metadata: &TextureMetadata, pool_id: u32) -> Self {
        Self {
            kind: metadata.kind,
            width: metadata.width,
            height: metadata.height,
            depth_or_slices: metadata.depth_or_slices,
            format: metadata.format,
            mip_count: metadata.mip_count,
            pool_id,
        }
    }

    pub fn metadata(&self) -> TextureMetadata {
        TextureMetadata::new(
            self.kind,
            self.width,
            self.height,
            self.depth_or_slices,
            self.format,
            self.mip_count,
        )
    }
}

/// Texture name to [`CachedMetadata`] map with RON import/export.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataCache {
    entries: HashMap<String, CachedMetadata>,
    #[serde(skip)]
    dirty: bool,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a file. A missing file is an empty cache.
    pub fn load(path: &Path) -> Result<Self, StreamingError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No metadata cache at {}", path.display());
                return Ok(Self::new());
            }
            Err(e) => return Err(e.into()),
        };
        let cache = Self::from_ron(&content)?;
        log::info!(
            "Loaded {} metadata cache entries from {}",
            cache.len(),
            path.display()
        );
        Ok(cache)
    }

    pub fn from_ron(content: &str) -> Result<Self, StreamingError> {
        ron::from_str(content).map_err(|e| StreamingError::MetadataCache(e.to_string()))
    }

    pub fn to_ron(&self) -> Result<String, StreamingError> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| StreamingError::MetadataCache(e.to_string()))
    }

    /// Write to a file and clear the dirty flag.
    pub fn save(&mut self, path: &Path) -> Result<(), StreamingError> {
        let content = self.to_ron()?;
        std::fs::write(path, content)?;
        self.dirty = false;
        log::info!(
            "Saved {} metadata cache entries to {}",
            self.len(),
            path.display()
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&CachedMetadata> {
        self.entries.get(name)
    }

    /// Insert or replace an entry. Returns true if the cache changed.
    pub fn insert(&mut self, name: impl Into<String>, entry: CachedMetadata) -> bool {
        let name = name.into();
        if self.entries.get(&name) == Some(&entry) {
            return false;
        }
        self.entries.insert(name, entry);
        self.dirty = true;
        true
    }

    pub fn remove(&mut self, name: &str) -> Option<CachedMetadata> {
        let removed = self.entries.remove(name);
        self.dirty |= removed.is_some();
        removed
    }

    /// Returns true if entries changed since the last load or save.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
