//! # texstream core
//!
//! CPU-side building blocks shared by the texture streamer: pixel formats and
//! their size math, decoded images with per-mip [`TextureBox`] views, the
//! codecs that turn file bytes into images, and load-time filters.
//!
//! Nothing in this crate touches a GPU or spawns threads.

pub mod codec;
mod error;
pub mod filters;
pub mod format;
pub mod profiling;
pub mod texture;

pub use codec::{CodecRegistry, ImageCodec, OitdCodec};
#[cfg(feature = "standard-codecs")]
pub use codec::StandardCodec;
pub use error::ImageError;
pub use filters::TextureFilters;
pub use format::PixelFormat;
pub use texture::{Extent3d, Image, ROW_ALIGNMENT, TextureBox, TextureKind};

/// Core library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
