//! Reuse and budgeting of staging buffers.

use texstream_core::PixelFormat;
use texstream_core::profiling::profile_scope;

use crate::backend::GpuBackend;
use crate::config::BudgetEntry;
use crate::error::{BackendError, StreamingError};

use super::buffer::StagingBuffer;
use super::usage::{self, UsageStat};

/// Fill ratio used when the pool itself acquires buffers for the worker.
const STREAMING_FILL_RATIO: u32 = 50;

/// Counters of pool activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub created: u64,
    pub destroyed: u64,
    pub reused: u64,
    /// Times the pool waited on the GPU to reuse a buffer.
    pub stalls: u64,
}

/// Idle staging buffers waiting for reuse, plus the rules for creating,
/// reusing and evicting them.
///
/// Lives on the main thread; every method that takes a backend must be
/// called from the thread owning it.
pub struct StagingPool {
    available: Vec<StagingBuffer>,
    next_id: u64,
    max_budget_bytes: usize,
    stats: PoolStats,
}

impl StagingPool {
    pub fn new(max_budget_bytes: usize) -> Self {
        Self {
            available: Vec::new(),
            next_id: 0,
            max_budget_bytes,
            stats: PoolStats::default(),
        }
    }

    /// Total bytes of idle buffers.
    pub fn available_bytes(&self) -> usize {
        self.available.iter().map(StagingBuffer::size_bytes).sum()
    }

    /// Number of idle buffers.
    pub fn available_len(&self) -> usize {
        self.available.len()
    }

    pub fn max_budget_bytes(&self) -> usize {
        self.max_budget_bytes
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    /// Get an unmapped buffer able to hold the given region.
    ///
    /// Prefers the smallest idle buffer the GPU is done with. A candidate is
    /// rejected when the request would fill less than `min_fill_ratio`
    /// percent of it (0 accepts anything).
    #[allow(clippy::too_many_arguments)]
    pub fn acquire(
        &mut self,
        backend: &dyn GpuBackend,
        width: u32,
        height: u32,
        depth: u32,
        num_slices: u32,
        format: PixelFormat,
        min_fill_ratio: u32,
    ) -> Result<StagingBuffer, StreamingError> {
        if min_fill_ratio > 100 {
            return Err(StreamingError::InvalidParameter(format!(
                "min_fill_ratio is a percentage, got {min_fill_ratio}"
            )));
        }
        if width == 0 || height == 0 || depth == 0 || num_slices == 0 {
            return Err(StreamingError::InvalidParameter(format!(
                "empty staging request {width}x{height}x{depth}x{num_slices}"
            )));
        }
        let row_alignment = backend.staging_row_alignment();
        let required =
            StagingBuffer::required_bytes(width, height, depth, num_slices, format, row_alignment);

        let mut best: Option<usize> = None;
        for (index, buffer) in self.available.iter().enumerate() {
            if buffer.fits(width, height, depth, num_slices, format)
                && backend.is_frame_finished(buffer.last_frame_used())
                && best.is_none_or(|b| buffer.is_smaller_than(&self.available[b]))
            {
                best = Some(index);
            }
        }
        if let Some(index) = best
            && min_fill_ratio != 0
            && required * 100 / self.available[index].size_bytes() < min_fill_ratio as usize
        {
            best = None;
        }

        if let Some(index) = best {
            self.stats.reused += 1;
            return Ok(self.available.remove(index));
        }

        if let Some(buffer) = self.check_limits(
            backend,
            required,
            width,
            height,
            depth,
            num_slices,
            format,
            min_fill_ratio,
        ) {
            self.stats.reused += 1;
            return Ok(buffer);
        }

        Ok(self.create(backend, width, height, depth, num_slices, format)?)
    }

    /// Called when no idle buffer could be used as is. Under budget this
    /// does nothing; over budget it stalls on the GPU to free up idle
    /// buffers and, failing that, destroys idle buffers until the new one
    /// fits.
    #[allow(clippy::too_many_arguments)]
    fn check_limits(
        &mut self,
        backend: &dyn GpuBackend,
        required: usize,
        width: u32,
        height: u32,
        depth: u32,
        num_slices: u32,
        format: PixelFormat,
        min_fill_ratio: u32,
    ) -> Option<StagingBuffer> {
        let mut consumed = self.available_bytes();
        if consumed + required < self.max_budget_bytes || self.available.is_empty() {
            return None;
        }

        log::warn!(
            "Staging budget exceeded ({} idle + {} requested >= {}). Stalling GPU.",
            consumed,
            required,
            self.max_budget_bytes
        );
        let mut waited: Vec<u64> = Vec::new();
        let mut best: Option<usize> = None;
        for (index, buffer) in self.available.iter().enumerate() {
            let frame = buffer.last_frame_used();
            if !waited.contains(&frame) {
                backend.wait_for_frame(frame);
                waited.push(frame);
                self.stats.stalls += 1;
            }
            if buffer.fits(width, height, depth, num_slices, format)
                && best.is_none_or(|b| buffer.is_smaller_than(&self.available[b]))
                && required * 100 / buffer.size_bytes() >= min_fill_ratio as usize
            {
                best = Some(index);
            }
        }

        if let Some(index) = best {
            return Some(self.available.remove(index));
        }

        log::warn!("Stalling was not enough. Freeing staging memory.");
        while consumed + required > self.max_budget_bytes && !self.available.is_empty() {
            let buffer = self.available.remove(0);
            consumed -= buffer.size_bytes();
            self.destroy(backend, buffer);
        }
        None
    }

    fn create(
        &mut self,
        backend: &dyn GpuBackend,
        width: u32,
        height: u32,
        depth: u32,
        num_slices: u32,
        format: PixelFormat,
    ) -> Result<StagingBuffer, BackendError> {
        let row_alignment = backend.staging_row_alignment();
        let size =
            StagingBuffer::required_bytes(width, height, depth, num_slices, format, row_alignment);
        let gpu = backend.create_staging_buffer(size)?;
        self.next_id += 1;
        self.stats.created += 1;
        log::debug!(
            "Created staging buffer #{} {}x{}x{}x{} {:?} ({} bytes)",
            self.next_id,
            width,
            height,
            depth,
            num_slices,
            format.family(),
            size
        );
        Ok(StagingBuffer::new(
            self.next_id,
            gpu,
            width,
            height,
            depth,
            num_slices,
            format,
            row_alignment,
        ))
    }

    /// Map a buffer so it can be written.
    pub fn map(
        &self,
        backend: &dyn GpuBackend,
        buffer: &mut StagingBuffer,
    ) -> Result<(), BackendError> {
        if buffer.is_mapped() {
            return Ok(());
        }
        let data = backend.map_staging_buffer(buffer.gpu())?;
        buffer.start_map(data);
        Ok(())
    }

    /// Unmap a buffer, handing the written bytes to the GPU.
    pub fn unmap(
        &self,
        backend: &dyn GpuBackend,
        buffer: &mut StagingBuffer,
    ) -> Result<(), BackendError> {
        match buffer.take_mapped() {
            Some(data) => backend.unmap_staging_buffer(buffer.gpu(), data),
            None => Ok(()),
        }
    }

    /// Return a buffer for reuse once the GPU finishes the current frame.
    pub fn release(&mut self, backend: &dyn GpuBackend, mut buffer: StagingBuffer) {
        if let Err(e) = self.unmap(backend, &mut buffer) {
            log::error!("Failed to unmap staging buffer #{}: {}", buffer.id(), e);
        }
        buffer.mark_used(backend.frame_count());
        self.available.push(buffer);
    }

    /// Destroy a buffer right away.
    pub fn destroy(&mut self, backend: &dyn GpuBackend, mut buffer: StagingBuffer) {
        if let Err(e) = self.unmap(backend, &mut buffer) {
            log::error!("Failed to unmap staging buffer #{}: {}", buffer.id(), e);
        }
        log::trace!("Destroying staging buffer #{}", buffer.id());
        self.stats.destroyed += 1;
        backend.destroy_staging_buffer(buffer.into_gpu());
    }

    /// Destroy idle buffers nobody used for more than `frame latency + 2` frames.
    pub fn trim_idle(&mut self, backend: &dyn GpuBackend) {
        let frame = backend.frame_count();
        let keep_frames = backend.frame_latency() + 2;
        let (stale, fresh): (Vec<_>, Vec<_>) = std::mem::take(&mut self.available)
            .into_iter()
            .partition(|b| frame.saturating_sub(b.last_frame_used()) > keep_frames);
        self.available = fresh;
        for buffer in stale {
            self.destroy(backend, buffer);
        }
    }

    /// Destroy the oldest idle buffers while their total exceeds the budget.
    /// A single buffer bigger than the budget is kept.
    pub fn enforce_budget(&mut self, backend: &dyn GpuBackend) {
        while self.available.len() > 1 && self.available_bytes() > self.max_budget_bytes {
            let buffer = self.available.remove(0);
            self.destroy(backend, buffer);
        }
    }

    /// Rebuild the set of mapped buffers handed to the worker.
    ///
    /// Worker demand (`previous_stats`) is served first, then every
    /// `minimum_budget` entry (biggest first) is guaranteed a buffer.
    /// Streaming buffers not needed by either are unmapped and returned to
    /// the pool.
    pub fn fulfill_budget(
        &mut self,
        backend: &dyn GpuBackend,
        streaming: &mut Vec<StagingBuffer>,
        previous_stats: &mut Vec<UsageStat>,
        minimum_budget: &[BudgetEntry],
        max_bytes_per_request: usize,
    ) {
        profile_scope!("fulfill_budget");

        let mut leftover = std::mem::take(streaming);
        leftover.sort_by_key(StagingBuffer::size_bytes);
        let mut kept: Vec<StagingBuffer> = Vec::with_capacity(leftover.len());

        usage::age(previous_stats);
        for stat in previous_stats.iter() {
            let slices = stat.slices_needed(max_bytes_per_request);
            let (family, width, height) = (stat.format_family, stat.width, stat.height);
            if let Some(pos) = leftover
                .iter()
                .position(|b| b.fits(width, height, 1, slices, family))
            {
                kept.push(leftover.remove(pos));
                continue;
            }
            if let Some(buffer) = self.acquire_mapped(backend, width, height, slices, family) {
                kept.push(buffer);
            }
        }

        for entry in minimum_budget {
            let (family, res, slices) = (entry.format, entry.min_resolution, entry.min_slices);
            if let Some(pos) = leftover
                .iter()
                .position(|b| b.fits(res, res, 1, slices, family))
            {
                kept.push(leftover.remove(pos));
                continue;
            }
            if kept.iter().any(|b| b.fits(res, res, 1, slices, family)) {
                continue;
            }
            if let Some(buffer) = self.acquire_mapped(backend, res, res, slices, family) {
                kept.push(buffer);
            }
        }

        for buffer in leftover {
            self.release(backend, buffer);
        }
        *streaming = kept;
    }

    fn acquire_mapped(
        &mut self,
        backend: &dyn GpuBackend,
        width: u32,
        height: u32,
        slices: u32,
        family: PixelFormat,
    ) -> Option<StagingBuffer> {
        let mut buffer = match self.acquire(
            backend,
            width,
            height,
            1,
            slices,
            family,
            STREAMING_FILL_RATIO,
        ) {
            Ok(buffer) => buffer,
            Err(e) => {
                log::error!("Could not get a {width}x{height}x{slices} {family:?} staging buffer: {e}");
                return None;
            }
        };
        if let Err(e) = self.map(backend, &mut buffer) {
            log::error!("Could not map staging buffer #{}: {}", buffer.id(), e);
            self.release(backend, buffer);
            return None;
        }
        Some(buffer)
    }

    /// Destroy every idle buffer.
    pub fn shutdown(&mut self, backend: &dyn GpuBackend) {
        for buffer in std::mem::take(&mut self.available) {
            self.destroy(backend, buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;

    const SLICE: usize = 256 * 256 * 4;

    fn backend() -> DummyBackend {
        DummyBackend::new().with_row_alignment(256).with_frame_latency(1)
    }

    #[test]
    fn test_invalid_fill_ratio() {
        let backend = backend();
        let mut pool = StagingPool::new(SLICE);
        let result = pool.acquire(&backend, 4, 4, 1, 1, PixelFormat::Rgba8Unorm, 101);
        assert!(matches!(result, Err(StreamingError::InvalidParameter(_))));
    }

    #[test]
    fn test_reuse_after_frame_finished() {
        let backend = backend();
        let mut pool = StagingPool::new(4 * SLICE);
        let buffer = pool
            .acquire(&backend, 256, 256, 1, 1, PixelFormat::Rgba8Unorm, 0)
            .unwrap();
        let id = buffer.id();
        pool.release(&backend, buffer);

        // Released this frame: not reusable without a stall, so a new one is made
        let other = pool
            .acquire(&backend, 256, 256, 1, 1, PixelFormat::Rgba8Unorm, 0)
            .unwrap();
        assert_ne!(other.id(), id);
        pool.release(&backend, other);

        backend.advance_frame();
        let again = pool
            .acquire(&backend, 128, 128, 1, 1, PixelFormat::Bgra8Unorm, 0)
            .unwrap();
        assert_eq!(again.id(), id);
        assert_eq!(pool.stats().created, 2);
        assert_eq!(pool.stats().reused, 1);
    }

    #[test]
    fn test_fill_ratio_rejects_oversized() {
        let backend = backend();
        let mut pool = StagingPool::new(8 * SLICE);
        let buffer = pool
            .acquire(&backend, 256, 256, 1, 1, PixelFormat::Rgba8Unorm, 0)
            .unwrap();
        pool.release(&backend, buffer);
        backend.advance_frame();

        // 64x64 is ~6% of the buffer
        let small = pool
            .acquire(&backend, 64, 64, 1, 1, PixelFormat::Rgba8Unorm, 50)
            .unwrap();
        assert_eq!(small.size_bytes(), 64 * 256);
        assert_eq!(pool.available_len(), 1);
    }

    #[test]
    fn test_over_budget_stalls_and_reuses() {
        let backend = backend();
        let mut pool = StagingPool::new(SLICE);
        let buffer = pool
            .acquire(&backend, 256, 256, 1, 1, PixelFormat::Rgba8Unorm, 0)
            .unwrap();
        let id = buffer.id();
        pool.release(&backend, buffer);

        let again = pool
            .acquire(&backend, 256, 256, 1, 1, PixelFormat::Rgba8Unorm, 0)
            .unwrap();
        assert_eq!(again.id(), id);
        assert_eq!(pool.stats().stalls, 1);
        assert!(backend.is_frame_finished(0));
    }

    #[test]
    fn test_over_budget_evicts() {
        let backend = backend();
        let mut pool = StagingPool::new(SLICE);
        let buffer = pool
            .acquire(&backend, 256, 256, 1, 1, PixelFormat::Rgba8Unorm, 0)
            .unwrap();
        pool.release(&backend, buffer);

        // Wrong family: stalling cannot help, the idle buffer is destroyed
        let bc = pool
            .acquire(&backend, 256, 256, 1, 1, PixelFormat::Bc1RgbaUnorm, 0)
            .unwrap();
        assert_eq!(bc.format_family(), PixelFormat::Bc1RgbaUnorm);
        assert_eq!(pool.available_len(), 0);
        assert_eq!(pool.stats().destroyed, 1);
        assert_eq!(backend.stats().live_staging_buffers, 1);
    }

    #[test]
    fn test_trim_idle() {
        let backend = backend();
        let mut pool = StagingPool::new(4 * SLICE);
        let buffer = pool
            .acquire(&backend, 16, 16, 1, 1, PixelFormat::Rgba8Unorm, 0)
            .unwrap();
        pool.release(&backend, buffer);

        for _ in 0..3 {
            backend.advance_frame();
            pool.trim_idle(&backend);
        }
        assert_eq!(pool.available_len(), 1);
        backend.advance_frame();
        pool.trim_idle(&backend);
        assert_eq!(pool.available_len(), 0);
        assert_eq!(backend.stats().live_staging_buffers, 0);
    }

    #[test]
    fn test_fulfill_minimum_budget() {
        let backend = backend();
        let mut pool = StagingPool::new(4 * SLICE);
        let mut streaming = Vec::new();
        let mut stats = Vec::new();
        let budget = [BudgetEntry::new(PixelFormat::Rgba8Unorm, 256, 1)];

        pool.fulfill_budget(&backend, &mut streaming, &mut stats, &budget, usize::MAX);
        assert_eq!(streaming.len(), 1);
        assert!(streaming[0].is_mapped());
        let id = streaming[0].id();

        // Untouched streaming buffers are kept across updates
        pool.fulfill_budget(&backend, &mut streaming, &mut stats, &budget, usize::MAX);
        assert_eq!(streaming.len(), 1);
        assert_eq!(streaming[0].id(), id);

        // Without a budget they go back to the pool, unmapped
        pool.fulfill_budget(&backend, &mut streaming, &mut stats, &[], usize::MAX);
        assert!(streaming.is_empty());
        assert_eq!(pool.available_len(), 1);
    }

    #[test]
    fn test_fulfill_usage_stats() {
        let backend = backend();
        let mut pool = StagingPool::new(16 * SLICE);
        let mut streaming = Vec::new();
        let mut current = Vec::new();
        let mut previous = Vec::new();
        usage::record(&mut current, PixelFormat::Rgba8Unorm, 256, 256, 1);
        usage::record(&mut current, PixelFormat::Rgba8Unorm, 256, 256, 1);
        usage::merge_into_previous(&mut current, &mut previous);

        pool.fulfill_budget(&backend, &mut streaming, &mut previous, &[], usize::MAX);
        assert_eq!(streaming.len(), 1);
        assert_eq!(streaming[0].num_slices(), 2);
        assert_eq!(previous[0].loop_count, usage::USAGE_STAT_LIFETIME - 1);

        let mut streaming_capped = Vec::new();
        pool.fulfill_budget(&backend, &mut streaming_capped, &mut previous, &[], SLICE);
        assert_eq!(streaming_capped[0].num_slices(), 1);

        pool.shutdown(&backend);
        for buffer in streaming.into_iter().chain(streaming_capped) {
            pool.destroy(&backend, buffer);
        }
        assert_eq!(backend.stats().live_staging_buffers, 0);
    }
}
