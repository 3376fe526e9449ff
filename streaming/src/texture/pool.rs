//! Shared array textures for automatically batched textures.
//!
//! Every pool is one 2D array texture whose slices are handed out to
//! textures of the same size, format, mip count and pool id.

use fixedbitset::FixedBitSet;
use texstream_core::TextureKind;

use super::TextureMetadata;
use crate::backend::{GpuBackend, GpuTexture};
use crate::error::BackendError;

struct TexturePool {
    key: u64,
    pool_id: u32,
    metadata: TextureMetadata,
    master: GpuTexture,
    used: FixedBitSet,
}

pub(crate) struct TexturePools {
    pools: Vec<TexturePool>,
    next_key: u64,
    slices_per_pool: u32,
}

impl TexturePools {
    pub fn new(slices_per_pool: u32) -> Self {
        Self {
            pools: Vec::new(),
            next_key: 1,
            slices_per_pool: slices_per_pool.max(1),
        }
    }

    /// Find a free slice for a texture, creating a new pool when all
    /// compatible ones are full. Returns the pool key and the slice.
    pub fn reserve(
        &mut self,
        backend: &dyn GpuBackend,
        metadata: &TextureMetadata,
        pool_id: u32,
    ) -> Result<(u64, u32), BackendError> {
        for pool in &mut self.pools {
            if pool.pool_id != pool_id || !pool.metadata.is_pool_compatible(metadata) {
                continue;
            }
            if let Some(slice) = pool.used.zeroes().next() {
                pool.used.insert(slice);
                return Ok((pool.key, slice as u32));
            }
        }

        let pool_metadata = TextureMetadata {
            kind: TextureKind::Type2DArray,
            depth_or_slices: self.slices_per_pool,
            ..*metadata
        };
        let key = self.next_key;
        let label = format!("texture pool {key} (id {pool_id})");
        let master = backend.create_texture(&pool_metadata.descriptor(&label))?;
        log::debug!(
            "Created texture pool {} for {}x{} {:?}, {} slices",
            key,
            metadata.width,
            metadata.height,
            metadata.format,
            self.slices_per_pool
        );

        let mut used = FixedBitSet::with_capacity(self.slices_per_pool as usize);
        used.insert(0);
        self.next_key += 1;
        self.pools.push(TexturePool {
            key,
            pool_id,
            metadata: pool_metadata,
            master,
            used,
        });
        Ok((key, 0))
    }

    /// Free a slice; a pool with no slice left in use is destroyed.
    pub fn release(&mut self, backend: &dyn GpuBackend, key: u64, slice: u32) {
        let Some(index) = self.pools.iter().position(|p| p.key == key) else {
            log::warn!("Releasing slice {slice} of unknown texture pool {key}");
            return;
        };
        let pool = &mut self.pools[index];
        pool.used.set(slice as usize, false);
        if pool.used.is_clear() {
            let pool = self.pools.swap_remove(index);
            log::debug!("Destroying empty texture pool {}", pool.key);
            backend.destroy_texture(pool.master);
        }
    }

    /// The array texture behind a pool.
    pub fn texture(&self, key: u64) -> Option<&GpuTexture> {
        self.pools.iter().find(|p| p.key == key).map(|p| &p.master)
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn shutdown(&mut self, backend: &dyn GpuBackend) {
        for pool in self.pools.drain(..) {
            backend.destroy_texture(pool.master);
        }
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;
    use texstream_core::PixelFormat;

    fn meta(width: u32) -> TextureMetadata {
        TextureMetadata::new(TextureKind::Type2D, width, width, 1, PixelFormat::Rgba8Unorm, 1)
    }

    #[test]
    fn test_slices_are_shared_and_recycled() {
        let backend = DummyBackend::new();
        let mut pools = TexturePools::new(2);

        let a = pools.reserve(&backend, &meta(64), 0).unwrap();
        let b = pools.reserve(&backend, &meta(64), 0).unwrap();
        assert_eq!(a.0, b.0);
        assert_eq!((a.1, b.1), (0, 1));

        // full pool, other size, other pool id: three new pools
        let c = pools.reserve(&backend, &meta(64), 0).unwrap();
        let d = pools.reserve(&backend, &meta(32), 0).unwrap();
        let e = pools.reserve(&backend, &meta(64), 7).unwrap();
        assert_eq!(pools.len(), 4);
        assert_ne!(c.0, a.0);
        assert_ne!(d.0, e.0);
        assert_eq!(backend.stats().live_textures, 4);

        pools.release(&backend, a.0, a.1);
        let f = pools.reserve(&backend, &meta(64), 0).unwrap();
        assert_eq!(f, a);

        pools.release(&backend, c.0, c.1);
        assert_eq!(pools.len(), 3);
        assert!(pools.texture(c.0).is_none());

        pools.shutdown(&backend);
        assert_eq!(backend.stats().live_textures, 0);
    }
}
