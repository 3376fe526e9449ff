//! Load-time image filters.
//!
//! Filters run on the worker right after decoding, before any byte goes to
//! a staging buffer. Because they can change the format and mip count, the
//! same decisions are also available without pixels through [`simulate`], so
//! cached metadata matches what a real load will produce.

use bitflags::bitflags;

use crate::error::ImageError;
use crate::format::{PixelFormat, max_mip_count};
use crate::texture::{Image, TextureKind};

bitflags! {
    /// Filters requested for a load.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TextureFilters: u32 {
        /// Build a full mip chain on the CPU when the file has only some mips.
        const GENERATE_SW_MIPMAPS = 1 << 0;
        /// Keep only the red channel (single channel masks, heightmaps).
        const LEAVE_CHANNEL_R = 1 << 1;
    }
}

/// Run every filter in `filters` on `image`, in a fixed order: channel
/// reduction, sRGB preference, mipmap generation.
pub fn apply(
    image: Image,
    filters: TextureFilters,
    prefer_srgb: bool,
) -> Result<Image, ImageError> {
    let mut image = image;

    if filters.contains(TextureFilters::LEAVE_CHANNEL_R)
        && let Some((target, channel_offset)) = red_channel_target(image.format())
    {
        image = leave_channel_r(&image, target, channel_offset)?;
    }

    if prefer_srgb {
        let srgb = image.format().to_srgb();
        if srgb != image.format() {
            image.reinterpret_format(srgb)?;
        }
    }

    if filters.contains(TextureFilters::GENERATE_SW_MIPMAPS) {
        let max_mips = max_mip_count(image.width(), image.height(), image.depth());
        if image.mip_count() < max_mips {
            if Image::supports_sw_mipmaps(image.format(), image.kind()) {
                image.generate_mipmaps()?;
            } else {
                log::debug!(
                    "Skipping software mipmaps for {:?} {:?} image",
                    image.kind(),
                    image.format()
                );
            }
        }
    }

    Ok(image)
}

/// Format and mip count [`apply`] would produce, without touching pixels.
#[allow(clippy::too_many_arguments)]
pub fn simulate(
    filters: TextureFilters,
    prefer_srgb: bool,
    width: u32,
    height: u32,
    depth: u32,
    kind: TextureKind,
    format: PixelFormat,
    mip_count: u8,
) -> (PixelFormat, u8) {
    let mut format = format;
    let mut mip_count = mip_count;

    if filters.contains(TextureFilters::LEAVE_CHANNEL_R)
        && let Some((target, _)) = red_channel_target(format)
    {
        format = target;
    }
    if prefer_srgb {
        format = format.to_srgb();
    }
    if filters.contains(TextureFilters::GENERATE_SW_MIPMAPS)
        && Image::supports_sw_mipmaps(format, kind)
    {
        mip_count = mip_count.max(max_mip_count(width, height, depth));
    }
    (format, mip_count)
}

/// Single channel format for `format` and the byte offset of its red channel.
fn red_channel_target(format: PixelFormat) -> Option<(PixelFormat, usize)> {
    match format {
        PixelFormat::Rgba8Unorm | PixelFormat::Rgba8UnormSrgb | PixelFormat::Rg8Unorm => {
            Some((PixelFormat::R8Unorm, 0))
        }
        PixelFormat::Rgba8Snorm => Some((PixelFormat::R8Snorm, 0)),
        PixelFormat::Bgra8Unorm | PixelFormat::Bgra8UnormSrgb => Some((PixelFormat::R8Unorm, 2)),
        PixelFormat::Rg16Float | PixelFormat::Rgba16Float => Some((PixelFormat::R16Float, 0)),
        PixelFormat::Rg32Float | PixelFormat::Rgba32Float => Some((PixelFormat::R32Float, 0)),
        _ => None,
    }
}

fn leave_channel_r(
    image: &Image,
    target: PixelFormat,
    channel_offset: usize,
) -> Result<Image, ImageError> {
    let mut out = Image::new_zeroed(
        image.width(),
        image.height(),
        image.depth_or_slices(),
        image.kind(),
        target,
        image.mip_count(),
    )?;
    let src_bpp = image.format().block_size() as usize;
    let dst_bpp = target.block_size() as usize;

    for mip in 0..image.mip_count() {
        let src_box = image.mip_box(mip);
        let dst_box = out.mip_box(mip);
        for layer in 0..src_box.depth_or_slices() {
            for row in 0..src_box.block_rows() {
                let src_row = src_box.row_offset(row, layer);
                let dst_row = dst_box.row_offset(row, layer);
                for x in 0..src_box.width as usize {
                    let s = src_row + x * src_bpp + channel_offset;
                    let d = dst_row + x * dst_bpp;
                    out.data_mut()[d..d + dst_bpp].copy_from_slice(&image.data()[s..s + dst_bpp]);
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgba_2x2(pixels: [[u8; 4]; 4]) -> Image {
        Image::from_tight_rows(2, 2, PixelFormat::Rgba8Unorm, pixels.as_flattened()).unwrap()
    }

    #[test]
    fn test_no_filters_is_identity() {
        let image = rgba_2x2([[1, 2, 3, 4]; 4]);
        let out = apply(image.clone(), TextureFilters::empty(), false).unwrap();
        assert_eq!(out, image);
    }

    #[test]
    fn test_leave_channel_r() {
        let image = rgba_2x2([[10, 1, 1, 1], [20, 1, 1, 1], [30, 1, 1, 1], [40, 1, 1, 1]]);
        let out = apply(image, TextureFilters::LEAVE_CHANNEL_R, false).unwrap();
        assert_eq!(out.format(), PixelFormat::R8Unorm);
        // 2 pixels per row, padded to 4 bytes
        assert_eq!(out.data(), &[10, 20, 0, 0, 30, 40, 0, 0]);
    }

    #[test]
    fn test_leave_channel_r_bgra() {
        let tight = [1u8, 2, 99, 4];
        let mut image = Image::from_tight_rows(1, 1, PixelFormat::Rgba8Unorm, &tight).unwrap();
        image.reinterpret_format(PixelFormat::Bgra8Unorm).unwrap();
        let out = apply(image, TextureFilters::LEAVE_CHANNEL_R, false).unwrap();
        assert_eq!(out.data()[0], 99);
    }

    #[test]
    fn test_prefer_srgb() {
        let image = rgba_2x2([[0; 4]; 4]);
        let out = apply(image, TextureFilters::empty(), true).unwrap();
        assert_eq!(out.format(), PixelFormat::Rgba8UnormSrgb);
    }

    #[test]
    fn test_generate_mipmaps_filter() {
        let image = rgba_2x2([[8; 4]; 4]);
        let out = apply(image, TextureFilters::GENERATE_SW_MIPMAPS, false).unwrap();
        assert_eq!(out.mip_count(), 2);
    }

    #[test]
    fn test_simulate_matches_apply() {
        let filters = TextureFilters::GENERATE_SW_MIPMAPS | TextureFilters::LEAVE_CHANNEL_R;
        let image = Image::new_zeroed(
            16,
            8,
            1,
            TextureKind::Type2D,
            PixelFormat::Rgba8Unorm,
            1,
        )
        .unwrap();
        let simulated = simulate(
            filters,
            true,
            16,
            8,
            1,
            TextureKind::Type2D,
            PixelFormat::Rgba8Unorm,
            1,
        );
        let out = apply(image, filters, true).unwrap();
        assert_eq!(simulated, (out.format(), out.mip_count()));
        assert_eq!(simulated, (PixelFormat::R8Unorm, 5));
    }

    #[test]
    fn test_simulate_compressed_untouched() {
        let simulated = simulate(
            TextureFilters::all(),
            false,
            256,
            256,
            1,
            TextureKind::Type2D,
            PixelFormat::Bc1RgbaUnorm,
            1,
        );
        assert_eq!(simulated, (PixelFormat::Bc1RgbaUnorm, 1));
    }
}
