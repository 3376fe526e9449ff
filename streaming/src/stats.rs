//! Counters describing what the streamer has been doing.

use crate::staging::PoolStats;

/// Snapshot returned by [`TextureStreamingManager::stats`](crate::TextureStreamingManager::stats).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamingStats {
    /// Live textures.
    pub textures: usize,
    /// Textures with GPU storage.
    pub resident_textures: usize,
    /// Textures with a transition in flight.
    pub active_transitions: usize,
    /// Most transitions ever in flight at once on a single texture.
    pub peak_transitions_per_texture: u32,
    pub transitions_started: u64,
    pub transitions_completed: u64,
    /// Requests handed to the worker.
    pub loads_scheduled: u64,
    /// Requests whose content fully arrived.
    pub loads_completed: u64,
    pub load_failures: u64,
    /// Staging-to-texture copies issued by `update`.
    pub uploads: u64,
    pub bytes_uploaded: u64,
    /// Loads whose GPU storage was created from cached metadata.
    pub metadata_cache_hits: u64,
    /// Cached metadata that turned out wrong.
    pub metadata_cache_mismatches: u64,
    pub metadata_cache_entries: usize,
    /// Bytes held by idle staging buffers.
    pub available_staging_bytes: usize,
    pub available_staging_buffers: usize,
    pub staging: PoolStats,
    /// Shared array textures backing batched textures.
    pub texture_pools: usize,
    /// `update` calls.
    pub updates: u64,
    /// `update` calls that could not take the streaming lock.
    pub skipped_updates: u64,
}
