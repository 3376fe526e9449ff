//! Staging-to-texture copy descriptions.
//!
//! A [`StagingRegion`] is a slice of a mapped staging buffer holding one
//! work item; the backend copies it into a texture at a
//! [`TextureCopyLocation`] using the region's [`BufferTextureLayout`].

use texstream_core::{Extent3d, PixelFormat, TextureBox};

/// Origin point within a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TextureOrigin {
    /// X coordinate.
    pub x: u32,
    /// Y coordinate.
    pub y: u32,
    /// Z coordinate or array slice.
    pub z: u32,
}

impl TextureOrigin {
    pub fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// Origin at (0, 0, 0).
    pub fn zero() -> Self {
        Self::default()
    }

    /// The same origin pushed `slices` slices further along z.
    pub fn offset_z(self, slices: u32) -> Self {
        Self {
            z: self.z + slices,
            ..self
        }
    }
}

/// Specifies a location within a texture for copy operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextureCopyLocation {
    /// Mip level to copy into.
    pub mip_level: u8,
    /// Origin within that mip.
    pub origin: TextureOrigin,
}

impl TextureCopyLocation {
    pub fn new(mip_level: u8, origin: TextureOrigin) -> Self {
        Self { mip_level, origin }
    }

    /// Location at a specific mip level, origin (0, 0, 0).
    pub fn mip(mip_level: u8) -> Self {
        Self {
            mip_level,
            origin: TextureOrigin::default(),
        }
    }
}

/// Layout of texel data inside a staging buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferTextureLayout {
    /// Offset in bytes from the start of the buffer.
    pub offset: u64,
    /// Bytes between two rows (block rows for compressed formats).
    pub bytes_per_row: u32,
    /// Rows between two depth layers or slices.
    pub rows_per_image: u32,
}

impl BufferTextureLayout {
    pub fn new(offset: u64, bytes_per_row: u32, rows_per_image: u32) -> Self {
        Self {
            offset,
            bytes_per_row,
            rows_per_image,
        }
    }
}

/// A sub-allocated piece of a mapped staging buffer.
///
/// Regions are handed out by [`StagingBuffer::map_region`](crate::StagingBuffer::map_region)
/// and stay valid until the buffer is unmapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingRegion {
    /// Byte offset of the region inside the buffer.
    pub offset: usize,
    /// Bytes between two rows, aligned to the backend's staging row alignment.
    pub bytes_per_row: usize,
    /// Rows (block rows) of one layer.
    pub rows_per_image: u32,
    pub width: u32,
    pub height: u32,
    /// Depth or slices held by the region.
    pub depth_or_slices: u32,
    pub format: PixelFormat,
    /// Total bytes reserved for the region.
    pub size_bytes: usize,
}

impl StagingRegion {
    /// Box addressing the region inside the mapped buffer bytes.
    pub fn texture_box(&self) -> TextureBox {
        TextureBox {
            x: 0,
            y: 0,
            z: 0,
            slice_start: 0,
            width: self.width,
            height: self.height,
            depth: 1,
            num_slices: self.depth_or_slices,
            format: self.format,
            bytes_per_row: self.bytes_per_row,
            bytes_per_image: self.bytes_per_row * self.rows_per_image as usize,
            offset: self.offset,
        }
    }

    /// Layout the backend needs to copy this region into a texture.
    pub fn layout(&self) -> BufferTextureLayout {
        BufferTextureLayout::new(
            self.offset as u64,
            self.bytes_per_row as u32,
            self.rows_per_image,
        )
    }

    /// Extent of the copy.
    pub fn extent(&self) -> Extent3d {
        Extent3d::new_3d(self.width, self.height, self.depth_or_slices)
    }
}
