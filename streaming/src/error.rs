//! Streaming error types.

use texstream_core::ImageError;
use texstream_vfs::ResourceError;
use thiserror::Error;

use crate::handle::TextureHandle;

/// Errors reported by a [`GpuBackend`](crate::backend::GpuBackend).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Failed to create a resource.
    #[error("resource creation failed: {0}")]
    ResourceCreationFailed(String),
    /// Out of GPU memory.
    #[error("out of GPU memory")]
    OutOfMemory,
    /// The device was lost.
    #[error("GPU device lost")]
    DeviceLost,
    /// Invalid parameter.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// The resource was already destroyed or belongs to another backend.
    #[error("unknown resource: {0}")]
    UnknownResource(String),
    /// Internal backend error.
    #[error("internal backend error: {0}")]
    Internal(String),
}

/// Why a texture could not be loaded. Listeners receive this through
/// [`TextureListener::on_load_error`](crate::TextureListener::on_load_error);
/// the texture itself is still made resident with a fallback image.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// The file could not be found or read.
    #[error("could not read '{name}' from group '{group}': {reason}")]
    Resource {
        name: String,
        group: String,
        reason: String,
    },
    /// The bytes were read but could not be decoded or filtered.
    #[error("could not decode '{name}': {source}")]
    Decode {
        name: String,
        #[source]
        source: ImageError,
    },
    /// The content was loaded but GPU storage could not be created or
    /// filled, or the transition could not start.
    #[error("could not create storage for '{name}': {reason}")]
    Storage { name: String, reason: String },
}

impl LoadError {
    /// Name of the file the failed load was reading.
    pub fn resource_name(&self) -> &str {
        match self {
            LoadError::Resource { name, .. }
            | LoadError::Decode { name, .. }
            | LoadError::Storage { name, .. } => name,
        }
    }
}

/// Errors returned by [`TextureStreamingManager`](crate::TextureStreamingManager).
#[derive(Debug, Error)]
pub enum StreamingError {
    /// The handle does not refer to a live texture.
    #[error("invalid or destroyed texture handle {0}")]
    InvalidHandle(TextureHandle),
    /// A texture with that name already exists.
    #[error("a texture named '{0}' already exists")]
    DuplicateName(String),
    /// A caller-supplied argument is out of range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// The texture needs metadata (size, format) that nobody provided.
    #[error("texture '{0}' has no usable metadata")]
    MissingMetadata(String),
    /// The configuration failed validation or could not be parsed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The metadata cache could not be parsed or written.
    #[error("metadata cache: {0}")]
    MetadataCache(String),
    /// GPU backend failure.
    #[error(transparent)]
    Backend(#[from] BackendError),
    /// Image construction or decoding failure.
    #[error(transparent)]
    Image(#[from] ImageError),
    /// Resource group failure.
    #[error(transparent)]
    Resource(#[from] ResourceError),
    /// Filesystem failure (config, metadata cache) or thread spawn failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
