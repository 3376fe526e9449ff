//! GPU backend abstraction layer.
//!
//! The streamer never talks to a graphics API directly. Everything it needs
//! from the GPU (texture storage, mappable staging memory, buffer-to-texture
//! copies, readbacks and frame fences) goes through the [`GpuBackend`]
//! trait, and every call is made from the thread that created the
//! [`TextureStreamingManager`](crate::TextureStreamingManager).
//!
//! # Available Backends
//!
//! - `dummy` (default): host-RAM backend for tests and headless tools

#[cfg(feature = "dummy")]
pub mod dummy;

use texstream_core::{Extent3d, PixelFormat, TextureKind};

use crate::error::BackendError;
use crate::transfer::{BufferTextureLayout, TextureCopyLocation};

/// Handle to GPU texture storage.
pub enum GpuTexture {
    /// Dummy backend texture (host memory).
    Dummy { id: u64 },
}

impl std::fmt::Debug for GpuTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy { id } => write!(f, "GpuTexture::Dummy({id})"),
        }
    }
}

/// Handle to a mappable upload buffer.
pub enum GpuStagingBuffer {
    /// Dummy backend buffer (host memory).
    Dummy { id: u64 },
}

impl std::fmt::Debug for GpuStagingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy { id } => write!(f, "GpuStagingBuffer::Dummy({id})"),
        }
    }
}

/// Handle to an asynchronous texture-to-host copy.
pub enum GpuReadback {
    /// Dummy backend readback.
    Dummy { id: u64 },
}

impl std::fmt::Debug for GpuReadback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy { id } => write!(f, "GpuReadback::Dummy({id})"),
        }
    }
}

/// Everything needed to allocate texture storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDescriptor {
    /// Debug label.
    pub label: String,
    pub kind: TextureKind,
    pub width: u32,
    pub height: u32,
    /// Depth for 3D textures, array slices otherwise (6 per cube).
    pub depth_or_slices: u32,
    pub format: PixelFormat,
    pub mip_count: u8,
}

impl TextureDescriptor {
    /// Size of mip 0.
    pub fn extent(&self) -> Extent3d {
        Extent3d::new_3d(self.width, self.height, self.depth_or_slices)
    }
}

/// GPU backend trait for abstracting different GPU APIs.
///
/// Frames are numbered by the backend. A resource used during frame `F`
/// may be touched by the CPU again once [`is_frame_finished`](Self::is_frame_finished)
/// returns true for `F`.
pub trait GpuBackend: Send + Sync + 'static {
    /// Get the backend name.
    fn name(&self) -> &'static str;

    /// Allocate texture storage. Contents start zeroed.
    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<GpuTexture, BackendError>;

    /// Free texture storage.
    fn destroy_texture(&self, texture: GpuTexture);

    /// Allocate a host-visible upload buffer.
    fn create_staging_buffer(&self, size_bytes: usize) -> Result<GpuStagingBuffer, BackendError>;

    /// Free an upload buffer.
    fn destroy_staging_buffer(&self, buffer: GpuStagingBuffer);

    /// Row pitch alignment the backend requires in staging buffers.
    fn staging_row_alignment(&self) -> u32;

    /// Map a staging buffer for writing. The returned bytes are the whole
    /// buffer and must come back through [`unmap_staging_buffer`](Self::unmap_staging_buffer).
    fn map_staging_buffer(&self, buffer: &GpuStagingBuffer) -> Result<Vec<u8>, BackendError>;

    /// Unmap a staging buffer, making the written bytes visible to the GPU.
    fn unmap_staging_buffer(
        &self,
        buffer: &GpuStagingBuffer,
        data: Vec<u8>,
    ) -> Result<(), BackendError>;

    /// Record a copy from an unmapped staging buffer into a texture.
    fn copy_staging_to_texture(
        &self,
        source: &GpuStagingBuffer,
        layout: &BufferTextureLayout,
        destination: &GpuTexture,
        location: &TextureCopyLocation,
        extent: Extent3d,
    ) -> Result<(), BackendError>;

    /// Start copying one mip (a range of slices) of a texture back to host memory.
    fn create_readback(
        &self,
        texture: &GpuTexture,
        mip: u8,
        first_slice: u32,
        num_slices: u32,
    ) -> Result<GpuReadback, BackendError>;

    /// Returns true once the readback bytes can be fetched without stalling.
    fn is_readback_ready(&self, readback: &GpuReadback) -> bool;

    /// Fetch the bytes of a readback, laid out like a mip of an
    /// [`Image`](texstream_core::Image) holding just those slices.
    fn read_readback(&self, readback: GpuReadback) -> Result<Vec<u8>, BackendError>;

    /// Number of the frame currently being recorded.
    fn frame_count(&self) -> u64;

    /// Returns true if the GPU is done with every command of `frame`.
    fn is_frame_finished(&self, frame: u64) -> bool;

    /// Block until the GPU is done with `frame`.
    fn wait_for_frame(&self, frame: u64);

    /// Frames the CPU may run ahead of the GPU.
    fn frame_latency(&self) -> u64;
}

/// Selects and creates the appropriate backend based on available features.
#[cfg(feature = "dummy")]
pub fn create_backend() -> Result<Box<dyn GpuBackend>, BackendError> {
    log::info!("Using dummy backend");
    Ok(Box::new(dummy::DummyBackend::new()))
}

/// Selects and creates the appropriate backend based on available features.
#[cfg(not(feature = "dummy"))]
pub fn create_backend() -> Result<Box<dyn GpuBackend>, BackendError> {
    Err(BackendError::Internal(
        "no GPU backend compiled in, enable the `dummy` feature or supply one".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_output() {
        assert_eq!(format!("{:?}", GpuTexture::Dummy { id: 3 }), "GpuTexture::Dummy(3)");
        assert_eq!(
            format!("{:?}", GpuStagingBuffer::Dummy { id: 1 }),
            "GpuStagingBuffer::Dummy(1)"
        );
    }

    #[cfg(feature = "dummy")]
    #[test]
    fn test_create_backend() {
        let backend = create_backend().unwrap();
        assert_eq!(backend.name(), "Dummy Backend");
    }
}
