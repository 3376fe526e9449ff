//! Image and codec error types.

use thiserror::Error;

use crate::format::PixelFormat;

/// Errors produced while building, converting or decoding images.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    /// Width, height, depth/slices or mip count is zero or out of range.
    #[error("invalid image dimensions: {0}")]
    InvalidDimensions(String),
    /// The pixel buffer does not match the size implied by the metadata.
    #[error("image data size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
    /// The operation does not support this pixel format.
    #[error("unsupported pixel format {0:?}")]
    UnsupportedFormat(PixelFormat),
    /// The file contents are malformed.
    #[error("corrupt image data: {0}")]
    Corrupt(String),
    /// No registered codec recognizes the file.
    #[error("no codec registered for '{0}'")]
    NoCodec(String),
    /// The codec itself reported a failure.
    #[error("codec error: {0}")]
    Codec(String),
    /// Two texture boxes passed to a copy do not describe the same extent.
    #[error("texture box mismatch: {0}")]
    BoxMismatch(String),
}
