//! Messages from the worker to the main thread.
//!
//! The worker appends commands while it holds the streaming lock; the main
//! thread swaps the whole list out in `update` and runs it in order, so for
//! any one texture its storage command always precedes its uploads.

use std::sync::Arc;

use texstream_core::Image;

use crate::error::LoadError;
use crate::handle::TextureHandle;
use crate::texture::TextureMetadata;
use crate::transfer::{StagingRegion, TextureOrigin};

#[derive(Debug)]
pub(crate) enum Command {
    /// Metadata is final: allocate (or fix up) GPU storage.
    TransitionToResident {
        texture: TextureHandle,
        metadata: TextureMetadata,
        /// Metadata of the file before filters, for the metadata cache.
        source_metadata: TextureMetadata,
        host_copy: Option<Arc<Image>>,
        cacheable: bool,
    },
    /// Content decoded into host memory; no GPU work.
    TransitionToSysRam {
        texture: TextureHandle,
        image: Arc<Image>,
        source_metadata: TextureMetadata,
        cacheable: bool,
    },
    /// Copy a filled staging region into the texture.
    Upload {
        texture: TextureHandle,
        staging_id: u64,
        region: StagingRegion,
        mip: u8,
        origin: TextureOrigin,
    },
    /// Every region of the texture was handed over.
    NotifyDataReady { texture: TextureHandle },
    /// The load failed; a fallback image is being used instead.
    LoadFailed {
        texture: TextureHandle,
        error: LoadError,
    },
    /// Staging the content failed part way; the texture gets no data.
    TransferFailed {
        texture: TextureHandle,
        error: LoadError,
    },
}

impl Command {
    pub fn texture(&self) -> TextureHandle {
        match self {
            Command::TransitionToResident { texture, .. }
            | Command::TransitionToSysRam { texture, .. }
            | Command::Upload { texture, .. }
            | Command::NotifyDataReady { texture }
            | Command::LoadFailed { texture, .. }
            | Command::TransferFailed { texture, .. } => *texture,
        }
    }
}
