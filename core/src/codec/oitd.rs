//! The OITD container: a tiny header followed by a raw mip chain.
//!
//! Layout (little endian, no padding):
//!
//! | bytes | field                |
//! |-------|----------------------|
//! | 4     | magic `OITD`         |
//! | 4     | width                |
//! | 4     | height               |
//! | 4     | depth or slices      |
//! | 1     | mip count            |
//! | 1     | texture kind id      |
//! | 2     | pixel format id      |
//! | 1     | version (1)          |
//!
//! The pixel data that follows is exactly [`Image::data`].

use bytemuck::{Pod, Zeroable};

use super::ImageCodec;
use crate::error::ImageError;
use crate::format::PixelFormat;
use crate::texture::{Image, TextureKind};

const MAGIC: [u8; 4] = *b"OITD";
const VERSION: u8 = 1;
const HEADER_SIZE: usize = std::mem::size_of::<OitdHeader>();

#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct OitdHeader {
    magic: [u8; 4],
    width: u32,
    height: u32,
    depth_or_slices: u32,
    mip_count: u8,
    kind: u8,
    format: u16,
    version: u8,
}

/// Codec for `.oitd` files.
#[derive(Debug, Clone, Copy, Default)]
pub struct OitdCodec;

impl ImageCodec for OitdCodec {
    fn name(&self) -> &'static str {
        "OITD"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["oitd"]
    }

    fn sniff(&self, header: &[u8]) -> bool {
        header.starts_with(&MAGIC)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Image, ImageError> {
        if bytes.len() < HEADER_SIZE {
            return Err(ImageError::Corrupt(format!(
                "OITD file is {} bytes, header needs {}",
                bytes.len(),
                HEADER_SIZE
            )));
        }
        let header: OitdHeader = bytemuck::pod_read_unaligned(&bytes[..HEADER_SIZE]);
        if header.magic != MAGIC {
            return Err(ImageError::Corrupt("bad OITD magic".into()));
        }
        if header.version != VERSION {
            return Err(ImageError::Corrupt(format!(
                "unsupported OITD version {}",
                header.version
            )));
        }

        let kind = TextureKind::from_id(header.kind)
            .ok_or_else(|| ImageError::Corrupt(format!("unknown texture kind {}", header.kind)))?;
        let OitdHeader {
            width,
            height,
            depth_or_slices,
            format: format_id,
            ..
        } = header;
        let format_id = u16::from_le(format_id);
        let format = PixelFormat::from_id(format_id)
            .ok_or_else(|| ImageError::Corrupt(format!("unknown pixel format {format_id}")))?;

        Image::from_data(
            u32::from_le(width),
            u32::from_le(height),
            u32::from_le(depth_or_slices),
            kind,
            format,
            header.mip_count,
            bytes[HEADER_SIZE..].to_vec(),
        )
    }

    fn encode(&self, image: &Image) -> Result<Vec<u8>, ImageError> {
        let header = OitdHeader {
            magic: MAGIC,
            width: image.width().to_le(),
            height: image.height().to_le(),
            depth_or_slices: image.depth_or_slices().to_le(),
            mip_count: image.mip_count(),
            kind: image.kind() as u8,
            format: image.format().id().to_le(),
            version: VERSION,
        };
        let mut out = Vec::with_capacity(HEADER_SIZE + image.size_bytes());
        out.extend_from_slice(bytemuck::bytes_of(&header));
        out.extend_from_slice(image.data());
        Ok(out)
    }
}
