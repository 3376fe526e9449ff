//! # texstream
//!
//! Asynchronous GPU texture streaming with bounded staging memory.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`TextureStreamingManager`] - owns textures and drives their residency
//!   between storage, system RAM and the GPU
//! - [`GpuBackend`] - trait the streamer uses for every GPU operation
//! - [`StagingPool`] - budgeted recycling of mappable upload buffers
//! - [`MetadataCache`] - persisted texture sizes and formats, so storage can
//!   be created before a file is decoded
//!
//! Files are read and decoded on a worker thread (and optionally a pool of
//! decode threads). The worker writes pixels into mapped staging buffers and
//! leaves commands for the main thread, which applies them in
//! [`TextureStreamingManager::update`].
//!
//! ## Example
//!
//! ```ignore
//! use texstream::{Residency, StreamingConfig, TextureStreamingManager, create_backend};
//! use texstream_vfs::{DirectoryProvider, ResourceGroups};
//!
//! let resources = ResourceGroups::new();
//! resources.add_location("General", DirectoryProvider::new("assets"));
//!
//! let mut manager =
//!     TextureStreamingManager::new(create_backend()?, resources, StreamingConfig::default())?;
//! let handle = manager.create_texture(
//!     "brick.png",
//!     "",
//!     PageOutStrategy::SaveToSystemRam,
//!     TextureFlags::AUTOMATIC_BATCHING,
//!     TextureKind::Type2D,
//!     "",
//! )?;
//! manager.schedule_transition(handle, Residency::Resident)?;
//! manager.wait_for_streaming_completion();
//! ```

pub mod backend;
mod command;
pub mod config;
mod decode_pool;
mod error;
mod event;
mod handle;
mod manager;
mod metadata_cache;
mod queue;
pub mod staging;
mod stats;
mod task;
pub mod texture;
pub mod transfer;
mod worker;

pub use backend::{
    GpuBackend, GpuReadback, GpuStagingBuffer, GpuTexture, TextureDescriptor, create_backend,
};
#[cfg(feature = "dummy")]
pub use backend::dummy::{DummyBackend, DummyStats};
pub use config::{BudgetEntry, StreamingConfig};
pub use error::{BackendError, LoadError, StreamingError};
pub use handle::TextureHandle;
pub use manager::{CUBEMAP_FACE_SUFFIXES, TextureStreamingManager};
pub use metadata_cache::{CachedMetadata, MetadataCache};
pub use staging::{PoolStats, StagingBuffer, StagingPool};
pub use stats::StreamingStats;
pub use task::TransitionTask;
pub use texture::{
    PageOutStrategy, Residency, ResidencyReason, TextureFlags, TextureListener, TextureMetadata,
    TextureObject,
};
pub use transfer::{StagingRegion, TextureOrigin};

pub use texstream_core::{Image, PixelFormat, TextureFilters, TextureKind};

/// Streaming library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

static_assertions::assert_impl_all!(StagingBuffer: Send);
static_assertions::assert_impl_all!(TextureHandle: Send, Sync, Copy);
static_assertions::assert_impl_all!(StreamingConfig: Send, Sync, Clone);
static_assertions::assert_impl_all!(LoadError: Send, Sync);
static_assertions::assert_impl_all!(StreamingError: Send, Sync);
