//! Common file formats through the `image` crate.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat};

use super::ImageCodec;
use crate::error::ImageError;
use crate::format::PixelFormat;
use crate::texture::{Image, TextureKind};

/// Codec for PNG, JPEG, TGA, BMP and Radiance HDR files.
///
/// Decodes to a single-mip 2D image: 8-bit grayscale stays `R8Unorm`, float
/// images become `Rgba32Float`, everything else is expanded to `Rgba8Unorm`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardCodec;

impl ImageCodec for StandardCodec {
    fn name(&self) -> &'static str {
        "image"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["png", "jpg", "jpeg", "tga", "bmp", "hdr"]
    }

    fn sniff(&self, header: &[u8]) -> bool {
        // TGA has no magic; it is matched by extension only.
        image::guess_format(header).is_ok()
    }

    fn decode(&self, bytes: &[u8]) -> Result<Image, ImageError> {
        let decoded = image::load_from_memory(bytes).map_err(|e| ImageError::Codec(e.to_string()))?;
        decoded_to_image(decoded)
    }

    fn encode(&self, image: &Image) -> Result<Vec<u8>, ImageError> {
        if !matches!(
            image.format(),
            PixelFormat::Rgba8Unorm | PixelFormat::Rgba8UnormSrgb
        ) {
            return Err(ImageError::UnsupportedFormat(image.format()));
        }
        // Mip 0 of slice 0, rows are already tight for 4-byte pixels.
        let size = (image.width() * image.height() * 4) as usize;
        let pixels = image.data()[..size].to_vec();
        let rgba = image::RgbaImage::from_raw(image.width(), image.height(), pixels)
            .ok_or_else(|| ImageError::Codec("pixel buffer too small".into()))?;
        let mut out = Cursor::new(Vec::new());
        rgba.write_to(&mut out, ImageFormat::Png)
            .map_err(|e| ImageError::Codec(e.to_string()))?;
        Ok(out.into_inner())
    }
}

fn decoded_to_image(decoded: DynamicImage) -> Result<Image, ImageError> {
    let (width, height) = (decoded.width(), decoded.height());
    match decoded {
        DynamicImage::ImageLuma8(gray) => {
            Image::from_tight_rows(width, height, PixelFormat::R8Unorm, gray.as_raw())
        }
        DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => {
            let rgba = decoded.to_rgba32f();
            Image::from_data(
                width,
                height,
                1,
                TextureKind::Type2D,
                PixelFormat::Rgba32Float,
                1,
                bytemuck::cast_slice(rgba.as_raw()).to_vec(),
            )
        }
        other => {
            let rgba = other.to_rgba8();
            Image::from_data(
                width,
                height,
                1,
                TextureKind::Type2D,
                PixelFormat::Rgba8Unorm,
                1,
                rgba.into_raw(),
            )
        }
    }
}
