//! Addressing a rectangular region of pixel memory.

use crate::error::ImageError;
use crate::format::PixelFormat;

/// A region of pixel memory: extent, origin and the pitches needed to walk it.
///
/// A box does not own bytes. It describes where a region lives inside some
/// backing slice (a decoded [`Image`](super::Image), a mapped staging
/// buffer), so the same box can be copied between the two with
/// [`TextureBox::copy`].
///
/// The third axis is either depth (3D textures) or array slices; one of
/// `depth` / `num_slices` is always 1. Layer `i` of the box lives at
/// `offset + (z + slice_start + i) * bytes_per_image`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureBox {
    /// X origin in pixels.
    pub x: u32,
    /// Y origin in pixels.
    pub y: u32,
    /// Z origin (3D textures).
    pub z: u32,
    /// First array slice.
    pub slice_start: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Depth in pixels.
    pub depth: u32,
    /// Number of array slices.
    pub num_slices: u32,
    /// Pixel format.
    pub format: PixelFormat,
    /// Distance in bytes between two rows (block rows when compressed).
    pub bytes_per_row: usize,
    /// Distance in bytes between two depth layers or slices.
    pub bytes_per_image: usize,
    /// Byte offset of layer 0, row 0, column 0 in the backing slice.
    pub offset: usize,
}

impl TextureBox {
    /// A box covering a whole tightly-packed region laid out with the
    /// given row alignment, starting at `offset`.
    pub fn packed(
        format: PixelFormat,
        width: u32,
        height: u32,
        depth: u32,
        num_slices: u32,
        row_alignment: u32,
        offset: usize,
    ) -> Self {
        let bytes_per_row = format.bytes_per_row(width, row_alignment);
        let bytes_per_image = bytes_per_row * format.rows(height) as usize;
        Self {
            x: 0,
            y: 0,
            z: 0,
            slice_start: 0,
            width,
            height,
            depth,
            num_slices,
            format,
            bytes_per_row,
            bytes_per_image,
            offset,
        }
    }

    /// A sub-region of this box. `layer` and `layers` address depth for 3D
    /// boxes and slices otherwise.
    pub fn sub_box(
        &self,
        x: u32,
        y: u32,
        layer: u32,
        width: u32,
        height: u32,
        layers: u32,
    ) -> Self {
        let mut sub = *self;
        sub.x = self.x + x;
        sub.y = self.y + y;
        sub.width = width;
        sub.height = height;
        if self.depth > 1 {
            sub.z = self.z + layer;
            sub.depth = layers;
        } else {
            sub.slice_start = self.slice_start + layer;
            sub.num_slices = layers;
        }
        sub
    }

    /// `depth` or `num_slices`, whichever is in use.
    pub fn depth_or_slices(&self) -> u32 {
        self.depth.max(self.num_slices)
    }

    /// Bytes actually covered by one row of this box (no padding).
    pub fn row_bytes(&self) -> usize {
        let (block_w, _) = self.format.block_dimensions();
        self.width.div_ceil(block_w) as usize * self.format.block_size() as usize
    }

    /// Number of rows (block rows for compressed formats).
    pub fn block_rows(&self) -> u32 {
        self.format.rows(self.height)
    }

    /// Returns true if both boxes have the same extent and format family.
    pub fn equal_size(&self, other: &TextureBox) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.depth_or_slices() == other.depth_or_slices()
            && self.format.family() == other.format.family()
    }

    /// Byte offset of a given row within a given layer of this box.
    pub fn row_offset(&self, row: u32, layer: u32) -> usize {
        let (block_w, block_h) = self.format.block_dimensions();
        let layer_index = (self.z + self.slice_start + layer) as usize;
        let row_index = (self.y / block_h + row) as usize;
        let column = (self.x / block_w) as usize * self.format.block_size() as usize;
        self.offset + layer_index * self.bytes_per_image + row_index * self.bytes_per_row + column
    }

    /// One past the last byte this box touches.
    pub fn end_offset(&self) -> usize {
        let rows = self.block_rows();
        let layers = self.depth_or_slices();
        if rows == 0 || layers == 0 {
            return self.offset;
        }
        self.row_offset(rows - 1, layers - 1) + self.row_bytes()
    }

    /// Copy the pixels described by `src_box` inside `src` into the region
    /// described by `dst_box` inside `dst`, row by row.
    pub fn copy(
        src: &[u8],
        src_box: &TextureBox,
        dst: &mut [u8],
        dst_box: &TextureBox,
    ) -> Result<(), ImageError> {
        if !src_box.equal_size(dst_box) {
            return Err(ImageError::BoxMismatch(format!(
                "{}x{}x{} {:?} vs {}x{}x{} {:?}",
                src_box.width,
                src_box.height,
                src_box.depth_or_slices(),
                src_box.format,
                dst_box.width,
                dst_box.height,
                dst_box.depth_or_slices(),
                dst_box.format
            )));
        }
        if src_box.end_offset() > src.len() {
            return Err(ImageError::SizeMismatch {
                expected: src_box.end_offset(),
                actual: src.len(),
            });
        }
        if dst_box.end_offset() > dst.len() {
            return Err(ImageError::SizeMismatch {
                expected: dst_box.end_offset(),
                actual: dst.len(),
            });
        }

        let row_bytes = src_box.row_bytes();
        for layer in 0..src_box.depth_or_slices() {
            for row in 0..src_box.block_rows() {
                let s = src_box.row_offset(row, layer);
                let d = dst_box.row_offset(row, layer);
                dst[d..d + row_bytes].copy_from_slice(&src[s..s + row_bytes]);
            }
        }
        Ok(())
    }
}
