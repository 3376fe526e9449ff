//! A single mappable upload buffer.

use texstream_core::format::align_up;
use texstream_core::{ImageError, PixelFormat, TextureBox};

use crate::backend::GpuStagingBuffer;
use crate::transfer::StagingRegion;

/// Mapping state of a [`StagingBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapState {
    /// Not mapped; the GPU may read it.
    Unmapped,
    /// Mapped, no region handed out yet.
    Mapped,
    /// Mapped with at least one region handed out.
    Mapping,
}

/// A transfer-only buffer that moves pixel bytes from host memory to a texture.
///
/// A buffer is sized for a format family and an extent, and is filled by
/// sub-allocating regions from the front with [`map_region`](Self::map_region).
/// The buffer is a plain value: whoever holds it owns its mapped bytes, so
/// handing it from the worker to the main thread is a move.
///
/// # Example
///
/// ```ignore
/// let mut buffer = manager.get_staging_buffer(64, 64, 1, 1, PixelFormat::Rgba8Unorm, 0)?;
/// let region = buffer.map_region(64, 64, 1, 1, PixelFormat::Rgba8Unorm).unwrap();
/// buffer.write_region(&region, image.data(), &image.mip_box(0))?;
/// manager.upload_from_staging(&mut buffer, &region, texture, 0, TextureOrigin::zero())?;
/// manager.release_staging_buffer(buffer);
/// ```
pub struct StagingBuffer {
    id: u64,
    gpu: GpuStagingBuffer,
    width: u32,
    height: u32,
    depth: u32,
    num_slices: u32,
    format: PixelFormat,
    size_bytes: usize,
    row_alignment: u32,
    last_frame_used: u64,
    state: MapState,
    cursor: usize,
    mapped: Option<Vec<u8>>,
}

impl StagingBuffer {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: u64,
        gpu: GpuStagingBuffer,
        width: u32,
        height: u32,
        depth: u32,
        num_slices: u32,
        format: PixelFormat,
        row_alignment: u32,
    ) -> Self {
        let format = format.family();
        Self {
            id,
            gpu,
            width,
            height,
            depth,
            num_slices,
            format,
            size_bytes: Self::required_bytes(width, height, depth, num_slices, format, row_alignment),
            row_alignment,
            last_frame_used: 0,
            state: MapState::Unmapped,
            cursor: 0,
            mapped: None,
        }
    }

    /// Bytes a region of the given shape needs with the given row alignment.
    pub fn required_bytes(
        width: u32,
        height: u32,
        depth: u32,
        num_slices: u32,
        format: PixelFormat,
        row_alignment: u32,
    ) -> usize {
        format
            .family()
            .size_bytes(width, height, depth, num_slices, row_alignment)
    }

    /// Identifier unique within the owning pool.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn num_slices(&self) -> u32 {
        self.num_slices
    }

    /// Format family the buffer was created for.
    pub fn format_family(&self) -> PixelFormat {
        self.format
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn row_alignment(&self) -> u32 {
        self.row_alignment
    }

    /// Frame in which the GPU last read this buffer.
    pub fn last_frame_used(&self) -> u64 {
        self.last_frame_used
    }

    pub fn map_state(&self) -> MapState {
        self.state
    }

    pub fn is_mapped(&self) -> bool {
        self.state != MapState::Unmapped
    }

    /// Bytes already handed out as regions.
    pub fn used_bytes(&self) -> usize {
        self.cursor
    }

    /// Returns true if a fresh mapping of this buffer could hold the region.
    pub fn fits(
        &self,
        width: u32,
        height: u32,
        depth: u32,
        num_slices: u32,
        format: PixelFormat,
    ) -> bool {
        format.family() == self.format
            && Self::required_bytes(width, height, depth, num_slices, format, self.row_alignment)
                <= self.size_bytes
    }

    /// Returns true if the remaining mapped space can hold the region.
    pub fn supports_format(
        &self,
        width: u32,
        height: u32,
        depth: u32,
        num_slices: u32,
        format: PixelFormat,
    ) -> bool {
        if !self.is_mapped() || format.family() != self.format {
            return false;
        }
        let required =
            Self::required_bytes(width, height, depth, num_slices, format, self.row_alignment);
        self.region_start(format) + required <= self.size_bytes
    }

    /// Ordering used to pick the tightest buffer.
    pub fn is_smaller_than(&self, other: &StagingBuffer) -> bool {
        self.size_bytes < other.size_bytes
    }

    /// Reserve a region of the mapped bytes. Returns `None` when the buffer
    /// is not mapped, has another format family or has no space left.
    pub fn map_region(
        &mut self,
        width: u32,
        height: u32,
        depth: u32,
        num_slices: u32,
        format: PixelFormat,
    ) -> Option<StagingRegion> {
        if !self.supports_format(width, height, depth, num_slices, format) {
            return None;
        }
        let offset = self.region_start(format);
        let size_bytes =
            Self::required_bytes(width, height, depth, num_slices, format, self.row_alignment);
        self.cursor = offset + size_bytes;
        self.state = MapState::Mapping;
        Some(StagingRegion {
            offset,
            bytes_per_row: format.bytes_per_row(width, self.row_alignment),
            rows_per_image: format.rows(height),
            width,
            height,
            depth_or_slices: depth * num_slices,
            format,
            size_bytes,
        })
    }

    /// Copy pixels addressed by `src_box` inside `src` into a region of this
    /// buffer, converting between the two row pitches.
    pub fn write_region(
        &mut self,
        region: &StagingRegion,
        src: &[u8],
        src_box: &TextureBox,
    ) -> Result<(), ImageError> {
        let dst_box = region.texture_box();
        let data = self
            .mapped
            .as_mut()
            .ok_or_else(|| ImageError::Codec("staging buffer is not mapped".into()))?;
        TextureBox::copy(src, src_box, data, &dst_box)
    }

    /// Mapped bytes, if mapped.
    pub fn mapped_data(&self) -> Option<&[u8]> {
        self.mapped.as_deref()
    }

    fn region_start(&self, format: PixelFormat) -> usize {
        let alignment = (self.row_alignment as usize).max(format.block_size() as usize);
        align_up(self.cursor, alignment)
    }

    pub(crate) fn gpu(&self) -> &GpuStagingBuffer {
        &self.gpu
    }

    pub(crate) fn into_gpu(self) -> GpuStagingBuffer {
        self.gpu
    }

    pub(crate) fn start_map(&mut self, data: Vec<u8>) {
        self.mapped = Some(data);
        self.state = MapState::Mapped;
        self.cursor = 0;
    }

    /// Take the mapped bytes back for unmapping.
    pub(crate) fn take_mapped(&mut self) -> Option<Vec<u8>> {
        self.state = MapState::Unmapped;
        self.cursor = 0;
        self.mapped.take()
    }

    pub(crate) fn mark_used(&mut self, frame: u64) {
        self.last_frame_used = frame;
    }
}

impl std::fmt::Debug for StagingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingBuffer")
            .field("id", &self.id)
            .field("extent", &(self.width, self.height, self.depth, self.num_slices))
            .field("format", &self.format)
            .field("size_bytes", &self.size_bytes)
            .field("state", &self.state)
            .field("cursor", &self.cursor)
            .field("last_frame_used", &self.last_frame_used)
            .finish()
    }
}
