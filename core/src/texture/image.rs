//! Decoded images.

use crate::error::ImageError;
use crate::format::{PixelFormat, max_mip_count, mip_extent};

use super::{TextureBox, TextureKind};

/// Row alignment, in bytes, of every [`Image`] mip.
pub const ROW_ALIGNMENT: u32 = 4;

/// A decoded image: a full or partial mip chain for every slice.
///
/// Mips are stored back to back, biggest first. Inside a mip the layers
/// (depth for 3D, slices otherwise) are consecutive 2D images whose rows are
/// padded to [`ROW_ALIGNMENT`].
#[derive(Clone, PartialEq, Eq)]
pub struct Image {
    width: u32,
    height: u32,
    depth_or_slices: u32,
    kind: TextureKind,
    format: PixelFormat,
    mip_count: u8,
    data: Vec<u8>,
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("depth_or_slices", &self.depth_or_slices)
            .field("kind", &self.kind)
            .field("format", &self.format)
            .field("mip_count", &self.mip_count)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl Image {
    /// Create an image with all pixels set to zero.
    pub fn new_zeroed(
        width: u32,
        height: u32,
        depth_or_slices: u32,
        kind: TextureKind,
        format: PixelFormat,
        mip_count: u8,
    ) -> Result<Self, ImageError> {
        validate(width, height, depth_or_slices, kind, format, mip_count)?;
        let size = total_size(width, height, depth_or_slices, kind, format, mip_count);
        Ok(Self {
            width,
            height,
            depth_or_slices,
            kind,
            format,
            mip_count,
            data: vec![0; size],
        })
    }

    /// Wrap existing pixel data laid out as described on [`Image`].
    pub fn from_data(
        width: u32,
        height: u32,
        depth_or_slices: u32,
        kind: TextureKind,
        format: PixelFormat,
        mip_count: u8,
        data: Vec<u8>,
    ) -> Result<Self, ImageError> {
        validate(width, height, depth_or_slices, kind, format, mip_count)?;
        let expected = total_size(width, height, depth_or_slices, kind, format, mip_count);
        if data.len() != expected {
            return Err(ImageError::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            depth_or_slices,
            kind,
            format,
            mip_count,
            data,
        })
    }

    /// Build a single-mip 2D image from rows with no padding between them.
    pub fn from_tight_rows(
        width: u32,
        height: u32,
        format: PixelFormat,
        tight: &[u8],
    ) -> Result<Self, ImageError> {
        if format.is_compressed() {
            return Err(ImageError::UnsupportedFormat(format));
        }
        let mut image = Self::new_zeroed(width, height, 1, TextureKind::Type2D, format, 1)?;
        let tight_box = TextureBox::packed(format, width, height, 1, 1, 1, 0);
        let dst_box = image.mip_box(0);
        TextureBox::copy(tight, &tight_box, &mut image.data, &dst_box)?;
        Ok(image)
    }

    /// The 2x2 magenta/black RGBA8 checkerboard used in place of textures
    /// that failed to load.
    pub fn checkerboard(slices: u32, kind: TextureKind) -> Self {
        const MAGENTA: [u8; 4] = [255, 0, 255, 255];
        const BLACK: [u8; 4] = [0, 0, 0, 255];
        let slices = slices.max(1);
        let mut data = Vec::with_capacity(16 * slices as usize);
        for _ in 0..slices {
            data.extend_from_slice(&MAGENTA);
            data.extend_from_slice(&BLACK);
            data.extend_from_slice(&BLACK);
            data.extend_from_slice(&MAGENTA);
        }
        Self {
            width: 2,
            height: 2,
            depth_or_slices: slices,
            kind,
            format: PixelFormat::Rgba8Unorm,
            mip_count: 1,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Depth of a 3D image; 1 for everything else.
    pub fn depth(&self) -> u32 {
        if self.kind.has_slices() { 1 } else { self.depth_or_slices }
    }

    /// Array slices (6 per cube); 1 for 3D images.
    pub fn num_slices(&self) -> u32 {
        if self.kind.has_slices() { self.depth_or_slices } else { 1 }
    }

    pub fn depth_or_slices(&self) -> u32 {
        self.depth_or_slices
    }

    pub fn kind(&self) -> TextureKind {
        self.kind
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn mip_count(&self) -> u8 {
        self.mip_count
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Total bytes of all mips and slices.
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }

    pub fn mip_width(&self, mip: u8) -> u32 {
        mip_extent(self.width, mip as u32)
    }

    pub fn mip_height(&self, mip: u8) -> u32 {
        mip_extent(self.height, mip as u32)
    }

    pub fn mip_depth(&self, mip: u8) -> u32 {
        mip_extent(self.depth(), mip as u32)
    }

    /// Bytes of one mip, all layers included.
    pub fn mip_size_bytes(&self, mip: u8) -> usize {
        self.format.size_bytes(
            self.mip_width(mip),
            self.mip_height(mip),
            self.mip_depth(mip),
            self.num_slices(),
            ROW_ALIGNMENT,
        )
    }

    /// Byte offset where `mip` starts.
    pub fn mip_offset(&self, mip: u8) -> usize {
        (0..mip).map(|m| self.mip_size_bytes(m)).sum()
    }

    /// Box covering the whole of `mip`, all layers.
    pub fn mip_box(&self, mip: u8) -> TextureBox {
        TextureBox::packed(
            self.format,
            self.mip_width(mip),
            self.mip_height(mip),
            self.mip_depth(mip),
            self.num_slices(),
            ROW_ALIGNMENT,
            self.mip_offset(mip),
        )
    }

    /// Bytes of `mip`.
    pub fn mip_bytes(&self, mip: u8) -> &[u8] {
        let offset = self.mip_offset(mip);
        &self.data[offset..offset + self.mip_size_bytes(mip)]
    }

    /// Re-tag the pixels with another format of identical memory layout
    /// (e.g. linear to sRGB).
    pub fn reinterpret_format(&mut self, format: PixelFormat) -> Result<(), ImageError> {
        if format.block_size() != self.format.block_size()
            || format.block_dimensions() != self.format.block_dimensions()
        {
            return Err(ImageError::UnsupportedFormat(format));
        }
        self.format = format;
        Ok(())
    }

    /// Returns true if [`Image::generate_mipmaps`] can handle this format and kind.
    pub fn supports_sw_mipmaps(format: PixelFormat, kind: TextureKind) -> bool {
        kind.has_slices()
            && matches!(
                format,
                PixelFormat::R8Unorm
                    | PixelFormat::Rg8Unorm
                    | PixelFormat::Rgba8Unorm
                    | PixelFormat::Rgba8UnormSrgb
                    | PixelFormat::Bgra8Unorm
                    | PixelFormat::Bgra8UnormSrgb
            )
    }

    /// Replace the mip chain with a complete one box-filtered from mip 0.
    pub fn generate_mipmaps(&mut self) -> Result<(), ImageError> {
        if !Self::supports_sw_mipmaps(self.format, self.kind) {
            return Err(ImageError::UnsupportedFormat(self.format));
        }
        let mip_count = max_mip_count(self.width, self.height, 1);
        let slices = self.num_slices();
        let srgb = self.format.is_srgb();
        let channels = self.format.block_size() as usize;

        let mut chain = Self::new_zeroed(
            self.width,
            self.height,
            self.depth_or_slices,
            self.kind,
            self.format,
            mip_count,
        )?;
        let base = self.mip_size_bytes(0);
        chain.data[..base].copy_from_slice(&self.data[..base]);

        for mip in 1..mip_count {
            let src_box = chain.mip_box(mip - 1);
            let dst_box = chain.mip_box(mip);
            let (head, tail) = chain.data.split_at_mut(dst_box.offset);
            for slice in 0..slices {
                for y in 0..dst_box.height {
                    for x in 0..dst_box.width {
                        let sx0 = (x * 2).min(src_box.width - 1);
                        let sx1 = (x * 2 + 1).min(src_box.width - 1);
                        let sy0 = (y * 2).min(src_box.height - 1);
                        let sy1 = (y * 2 + 1).min(src_box.height - 1);
                        let texel = |sx: u32, sy: u32| {
                            src_box.row_offset(sy, slice) + sx as usize * channels
                        };
                        let taps = [texel(sx0, sy0), texel(sx1, sy0), texel(sx0, sy1), texel(sx1, sy1)];
                        let out = dst_box.row_offset(y, slice) - dst_box.offset
                            + x as usize * channels;
                        for c in 0..channels {
                            let color = srgb && c < 3;
                            let sum: f32 = taps
                                .iter()
                                .map(|&t| {
                                    let v = head[t + c] as f32 / 255.0;
                                    if color { srgb_to_linear(v) } else { v }
                                })
                                .sum();
                            let avg = sum / 4.0;
                            let avg = if color { linear_to_srgb(avg) } else { avg };
                            tail[out + c] = (avg * 255.0 + 0.5).clamp(0.0, 255.0) as u8;
                        }
                    }
                }
            }
        }

        *self = chain;
        Ok(())
    }
}

fn validate(
    width: u32,
    height: u32,
    depth_or_slices: u32,
    kind: TextureKind,
    format: PixelFormat,
    mip_count: u8,
) -> Result<(), ImageError> {
    if width == 0 || height == 0 || depth_or_slices == 0 {
        return Err(ImageError::InvalidDimensions(format!(
            "{width}x{height}x{depth_or_slices}"
        )));
    }
    if format == PixelFormat::Unknown {
        return Err(ImageError::UnsupportedFormat(format));
    }
    if kind == TextureKind::Unknown {
        return Err(ImageError::InvalidDimensions("unknown texture kind".into()));
    }
    if kind.is_cube() && depth_or_slices % 6 != 0 {
        return Err(ImageError::InvalidDimensions(format!(
            "cubemap with {depth_or_slices} faces"
        )));
    }
    let depth = if kind.has_slices() { 1 } else { depth_or_slices };
    let max_mips = max_mip_count(width, height, depth);
    if mip_count == 0 || mip_count > max_mips {
        return Err(ImageError::InvalidDimensions(format!(
            "{mip_count} mips for {width}x{height}x{depth} (max {max_mips})"
        )));
    }
    Ok(())
}

fn total_size(
    width: u32,
    height: u32,
    depth_or_slices: u32,
    kind: TextureKind,
    format: PixelFormat,
    mip_count: u8,
) -> usize {
    let (depth, slices) = if kind.has_slices() {
        (1, depth_or_slices)
    } else {
        (depth_or_slices, 1)
    };
    format.size_bytes_with_mips(width, height, depth, slices, mip_count, ROW_ALIGNMENT)
}

fn srgb_to_linear(v: f32) -> f32 {
    if v <= 0.04045 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(v: f32) -> f32 {
    if v <= 0.003_130_8 {
        v * 12.92
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_zeroed_layout() {
        let image =
            Image::new_zeroed(4, 4, 6, TextureKind::TypeCube, PixelFormat::Rgba8Unorm, 3).unwrap();
        assert_eq!(image.num_slices(), 6);
        assert_eq!(image.depth(), 1);
        assert_eq!(image.mip_size_bytes(0), 4 * 4 * 4 * 6);
        assert_eq!(image.mip_offset(1), 4 * 4 * 4 * 6);
        assert_eq!(image.size_bytes(), (16 + 4 + 1) * 4 * 6);
    }

    #[test]
    fn test_validation() {
        assert!(Image::new_zeroed(0, 4, 1, TextureKind::Type2D, PixelFormat::R8Unorm, 1).is_err());
        assert!(Image::new_zeroed(4, 4, 5, TextureKind::TypeCube, PixelFormat::R8Unorm, 1).is_err());
        assert!(Image::new_zeroed(4, 4, 1, TextureKind::Type2D, PixelFormat::R8Unorm, 4).is_err());
        assert!(Image::new_zeroed(4, 4, 1, TextureKind::Type2D, PixelFormat::Unknown, 1).is_err());
    }

    #[test]
    fn test_from_data_size_mismatch() {
        let result = Image::from_data(
            2,
            2,
            1,
            TextureKind::Type2D,
            PixelFormat::Rgba8Unorm,
            1,
            vec![0; 12],
        );
        assert_eq!(
            result.unwrap_err(),
            ImageError::SizeMismatch {
                expected: 16,
                actual: 12
            }
        );
    }

    #[test]
    fn test_from_tight_rows_pads() {
        let tight = [1u8, 2, 3, 4, 5, 6];
        let image = Image::from_tight_rows(3, 2, PixelFormat::R8Unorm, &tight).unwrap();
        assert_eq!(image.data(), &[1, 2, 3, 0, 4, 5, 6, 0]);
    }

    #[test]
    fn test_checkerboard() {
        let image = Image::checkerboard(6, TextureKind::TypeCube);
        assert_eq!(image.width(), 2);
        assert_eq!(image.num_slices(), 6);
        assert_eq!(image.size_bytes(), 16 * 6);
        assert_eq!(&image.data()[0..4], &[255, 0, 255, 255]);
        assert_eq!(&image.data()[4..8], &[0, 0, 0, 255]);
    }

    #[test]
    fn test_generate_mipmaps_averages() {
        let mut tight = Vec::new();
        for _ in 0..4 {
            tight.extend_from_slice(&[200, 100, 0, 255]);
        }
        let mut image = Image::from_tight_rows(2, 2, PixelFormat::Rgba8Unorm, &tight).unwrap();
        image.generate_mipmaps().unwrap();
        assert_eq!(image.mip_count(), 2);
        assert_eq!(image.mip_bytes(1), &[200, 100, 0, 255]);
    }

    #[test]
    fn test_generate_mipmaps_srgb_keeps_alpha_linear() {
        let tight = [
            255, 255, 255, 255, 0, 0, 0, 0, //
            255, 255, 255, 255, 0, 0, 0, 0,
        ];
        let mut image = Image::from_tight_rows(2, 2, PixelFormat::Rgba8UnormSrgb, &tight).unwrap();
        image.generate_mipmaps().unwrap();
        let mip = image.mip_bytes(1);
        // Half intensity in linear space is ~188 in sRGB
        assert!((186..=190).contains(&mip[0]));
        assert_eq!(mip[3], 128);
    }

    #[test]
    fn test_generate_mipmaps_unsupported() {
        let mut image =
            Image::new_zeroed(4, 4, 1, TextureKind::Type2D, PixelFormat::Rgba32Float, 1).unwrap();
        assert!(image.generate_mipmaps().is_err());
    }

    #[test]
    fn test_reinterpret_format() {
        let mut image = Image::checkerboard(1, TextureKind::Type2D);
        image.reinterpret_format(PixelFormat::Rgba8UnormSrgb).unwrap();
        assert_eq!(image.format(), PixelFormat::Rgba8UnormSrgb);
        assert!(image.reinterpret_format(PixelFormat::R8Unorm).is_err());
    }
}
