//! Pixel formats and their size math.

use serde::{Deserialize, Serialize};

/// Pixel format of a texture or decoded image.
///
/// The discriminants are stable: they are written into `.oitd` files and
/// the metadata cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u16)]
#[non_exhaustive]
pub enum PixelFormat {
    /// Unknown / not yet decided.
    Unknown = 0,

    // 8-bit formats
    /// 8-bit red channel, unsigned normalized.
    R8Unorm = 1,
    /// 8-bit red channel, signed normalized.
    R8Snorm = 2,
    /// 8-bit RG channels, unsigned normalized.
    Rg8Unorm = 3,
    /// 8-bit RGBA channels, unsigned normalized.
    #[default]
    Rgba8Unorm = 4,
    /// 8-bit RGBA channels, sRGB.
    Rgba8UnormSrgb = 5,
    /// 8-bit RGBA channels, signed normalized.
    Rgba8Snorm = 6,
    /// 8-bit BGRA channels, unsigned normalized.
    Bgra8Unorm = 7,
    /// 8-bit BGRA channels, sRGB.
    Bgra8UnormSrgb = 8,

    // 16-bit formats
    /// 16-bit red channel, unsigned normalized.
    R16Unorm = 9,
    /// 16-bit red channel, float.
    R16Float = 10,
    /// 16-bit RG channels, float.
    Rg16Float = 11,
    /// 16-bit RGBA channels, float.
    Rgba16Float = 12,

    // 32-bit formats
    /// 32-bit red channel, float.
    R32Float = 13,
    /// 32-bit RG channels, float.
    Rg32Float = 14,
    /// 32-bit RGBA channels, float.
    Rgba32Float = 15,

    // Block compressed
    /// BC1 (DXT1) RGBA, unsigned normalized.
    Bc1RgbaUnorm = 16,
    /// BC1 (DXT1) RGBA, sRGB.
    Bc1RgbaUnormSrgb = 17,
    /// BC3 (DXT5) RGBA, unsigned normalized.
    Bc3RgbaUnorm = 18,
    /// BC3 (DXT5) RGBA, sRGB.
    Bc3RgbaUnormSrgb = 19,
    /// BC4 single channel, unsigned normalized.
    Bc4RUnorm = 20,
    /// BC5 two channels, unsigned normalized.
    Bc5RgUnorm = 21,
}

impl PixelFormat {
    /// Every known format, in discriminant order.
    pub const ALL: [PixelFormat; 22] = [
        Self::Unknown,
        Self::R8Unorm,
        Self::R8Snorm,
        Self::Rg8Unorm,
        Self::Rgba8Unorm,
        Self::Rgba8UnormSrgb,
        Self::Rgba8Snorm,
        Self::Bgra8Unorm,
        Self::Bgra8UnormSrgb,
        Self::R16Unorm,
        Self::R16Float,
        Self::Rg16Float,
        Self::Rgba16Float,
        Self::R32Float,
        Self::Rg32Float,
        Self::Rgba32Float,
        Self::Bc1RgbaUnorm,
        Self::Bc1RgbaUnormSrgb,
        Self::Bc3RgbaUnorm,
        Self::Bc3RgbaUnormSrgb,
        Self::Bc4RUnorm,
        Self::Bc5RgUnorm,
    ];

    /// Look a format up by its stable numeric id.
    pub fn from_id(id: u16) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    /// Stable numeric id of this format.
    pub fn id(self) -> u16 {
        self as u16
    }

    /// Returns true for block compressed formats.
    pub fn is_compressed(self) -> bool {
        matches!(
            self,
            Self::Bc1RgbaUnorm
                | Self::Bc1RgbaUnormSrgb
                | Self::Bc3RgbaUnorm
                | Self::Bc3RgbaUnormSrgb
                | Self::Bc4RUnorm
                | Self::Bc5RgUnorm
        )
    }

    /// Returns true if the format stores sRGB-encoded color.
    pub fn is_srgb(self) -> bool {
        matches!(
            self,
            Self::Rgba8UnormSrgb
                | Self::Bgra8UnormSrgb
                | Self::Bc1RgbaUnormSrgb
                | Self::Bc3RgbaUnormSrgb
        )
    }

    /// The sRGB variant of this format, or the format itself if it has none.
    pub fn to_srgb(self) -> Self {
        match self {
            Self::Rgba8Unorm => Self::Rgba8UnormSrgb,
            Self::Bgra8Unorm => Self::Bgra8UnormSrgb,
            Self::Bc1RgbaUnorm => Self::Bc1RgbaUnormSrgb,
            Self::Bc3RgbaUnorm => Self::Bc3RgbaUnormSrgb,
            other => other,
        }
    }

    /// The linear variant of this format, or the format itself if it has none.
    pub fn to_linear(self) -> Self {
        match self {
            Self::Rgba8UnormSrgb => Self::Rgba8Unorm,
            Self::Bgra8UnormSrgb => Self::Bgra8Unorm,
            Self::Bc1RgbaUnormSrgb => Self::Bc1RgbaUnorm,
            Self::Bc3RgbaUnormSrgb => Self::Bc3RgbaUnorm,
            other => other,
        }
    }

    /// Representative of the set of formats sharing one memory layout.
    ///
    /// Staging buffers are grouped and budgeted per family: a buffer sized
    /// for `Rgba8Unorm` can hold `Bgra8UnormSrgb` data just as well.
    pub fn family(self) -> Self {
        match self {
            Self::R8Unorm | Self::R8Snorm => Self::R8Unorm,
            Self::Rgba8Unorm
            | Self::Rgba8UnormSrgb
            | Self::Rgba8Snorm
            | Self::Bgra8Unorm
            | Self::Bgra8UnormSrgb => Self::Rgba8Unorm,
            Self::Bc1RgbaUnorm | Self::Bc1RgbaUnormSrgb => Self::Bc1RgbaUnorm,
            Self::Bc3RgbaUnorm | Self::Bc3RgbaUnormSrgb => Self::Bc3RgbaUnorm,
            other => other,
        }
    }

    /// Number of color channels.
    pub fn components(self) -> u32 {
        match self {
            Self::Unknown => 0,
            Self::R8Unorm
            | Self::R8Snorm
            | Self::R16Unorm
            | Self::R16Float
            | Self::R32Float
            | Self::Bc4RUnorm => 1,
            Self::Rg8Unorm | Self::Rg16Float | Self::Rg32Float | Self::Bc5RgUnorm => 2,
            _ => 4,
        }
    }

    /// Width and height of one block in pixels (1x1 for uncompressed).
    pub fn block_dimensions(self) -> (u32, u32) {
        if self.is_compressed() { (4, 4) } else { (1, 1) }
    }

    /// Returns the size in bytes per pixel/block.
    pub fn block_size(self) -> u32 {
        match self {
            Self::Unknown => 0,
            Self::R8Unorm | Self::R8Snorm => 1,
            Self::R16Unorm | Self::R16Float | Self::Rg8Unorm => 2,
            Self::R32Float
            | Self::Rg16Float
            | Self::Rgba8Unorm
            | Self::Rgba8UnormSrgb
            | Self::Rgba8Snorm
            | Self::Bgra8Unorm
            | Self::Bgra8UnormSrgb => 4,
            Self::Rgba16Float | Self::Rg32Float => 8,
            Self::Rgba32Float => 16,
            Self::Bc1RgbaUnorm | Self::Bc1RgbaUnormSrgb | Self::Bc4RUnorm => 8,
            Self::Bc3RgbaUnorm | Self::Bc3RgbaUnormSrgb | Self::Bc5RgUnorm => 16,
        }
    }

    /// Bytes in one row of `width` pixels.
    ///
    /// Uncompressed rows are padded to `row_alignment`; compressed rows are
    /// whole blocks and never padded.
    pub fn bytes_per_row(self, width: u32, row_alignment: u32) -> usize {
        let (block_w, _) = self.block_dimensions();
        let blocks = width.div_ceil(block_w) as usize;
        let raw = blocks * self.block_size() as usize;
        if self.is_compressed() || row_alignment <= 1 {
            raw
        } else {
            align_up(raw, row_alignment as usize)
        }
    }

    /// Number of rows (block rows for compressed formats) in `height` pixels.
    pub fn rows(self, height: u32) -> u32 {
        let (_, block_h) = self.block_dimensions();
        height.div_ceil(block_h)
    }

    /// Bytes of a single mip: `depth` and `slices` multiply the 2D image size.
    pub fn size_bytes(
        self,
        width: u32,
        height: u32,
        depth: u32,
        slices: u32,
        row_alignment: u32,
    ) -> usize {
        self.bytes_per_row(width, row_alignment)
            * self.rows(height) as usize
            * depth as usize
            * slices as usize
    }

    /// Bytes of a full mip chain. Width, height and depth halve per mip
    /// (clamped at 1); slices do not.
    pub fn size_bytes_with_mips(
        self,
        width: u32,
        height: u32,
        depth: u32,
        slices: u32,
        mip_count: u8,
        row_alignment: u32,
    ) -> usize {
        (0..mip_count as u32)
            .map(|mip| {
                self.size_bytes(
                    mip_extent(width, mip),
                    mip_extent(height, mip),
                    mip_extent(depth, mip),
                    slices,
                    row_alignment,
                )
            })
            .sum()
    }
}

/// Size of a dimension at a given mip level, clamped at 1.
pub fn mip_extent(base: u32, mip: u32) -> u32 {
    (base >> mip.min(31)).max(1)
}

/// Mip count of a complete chain for the given extents.
pub fn max_mip_count(width: u32, height: u32, depth: u32) -> u8 {
    let largest = width.max(height).max(depth).max(1);
    (32 - largest.leading_zeros()) as u8
}

/// Align `value` up to the next multiple of `alignment`.
pub fn align_up(value: usize, alignment: usize) -> usize {
    if alignment <= 1 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}
