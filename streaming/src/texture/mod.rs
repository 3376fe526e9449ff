//! Texture objects and their residency model.
//!
//! A [`TextureObject`] is the manager-side record of one texture: where its
//! content lives ([`Residency`]), what it is made of ([`TextureMetadata`]),
//! where it is loaded from, the transitions queued on it and the listeners
//! watching it. Objects are owned by the manager and addressed through
//! [`TextureHandle`]s.

mod listener;
pub(crate) mod pool;

use std::collections::VecDeque;
use std::sync::Arc;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use texstream_core::format::max_mip_count;
use texstream_core::{Extent3d, Image, PixelFormat, TextureFilters, TextureKind};

use crate::backend::{GpuTexture, TextureDescriptor};
use crate::handle::TextureHandle;
use crate::task::ScheduledTask;

pub use listener::{ResidencyReason, TextureListener};
pub(crate) use listener::ListenerSet;

/// Where a texture's content currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Residency {
    /// Only on storage; nothing is loaded.
    #[default]
    OnStorage,
    /// Loaded into host memory, no GPU storage.
    OnSystemRam,
    /// GPU storage exists (its data may still be streaming in).
    Resident,
}

/// What happens to a texture's content when it leaves the GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PageOutStrategy {
    /// Drop the content; going to system RAM reloads it from its source.
    Discard,
    /// Read the GPU copy back into system RAM.
    #[default]
    SaveToSystemRam,
    /// Keep a host copy at all times; paging out is free.
    AlwaysKeepSystemRamCopy,
}

bitflags! {
    /// Per-texture behaviour flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TextureFlags: u32 {
        /// Place 2D textures into a shared array texture with others of the
        /// same size, format, mip count and pool id.
        const AUTOMATIC_BATCHING = 1 << 0;
        /// Load colour data as sRGB when the format has an sRGB twin.
        const PREFERS_LOADING_AS_SRGB = 1 << 1;
        /// Content is provided by the application, never read from storage.
        const MANUAL = 1 << 2;
    }
}

/// Shape and format of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TextureMetadata {
    pub kind: TextureKind,
    pub width: u32,
    pub height: u32,
    /// Depth for 3D textures, array slices otherwise (6 per cube).
    pub depth_or_slices: u32,
    pub format: PixelFormat,
    pub mip_count: u8,
}

impl TextureMetadata {
    pub fn new(
        kind: TextureKind,
        width: u32,
        height: u32,
        depth_or_slices: u32,
        format: PixelFormat,
        mip_count: u8,
    ) -> Self {
        Self {
            kind,
            width,
            height,
            depth_or_slices,
            format,
            mip_count,
        }
    }

    /// Metadata describing `image`.
    pub fn from_image(image: &Image) -> Self {
        Self {
            kind: image.kind(),
            width: image.width(),
            height: image.height(),
            depth_or_slices: image.depth_or_slices(),
            format: image.format(),
            mip_count: image.mip_count(),
        }
    }

    /// Returns true if storage could be created from this metadata.
    pub fn is_valid(&self) -> bool {
        self.kind != TextureKind::Unknown
            && self.format != PixelFormat::Unknown
            && self.width > 0
            && self.height > 0
            && self.depth_or_slices > 0
            && self.mip_count > 0
            && self.mip_count <= max_mip_count(self.width, self.height, self.depth())
            && (!self.kind.is_cube() || self.depth_or_slices % 6 == 0)
    }

    pub fn depth(&self) -> u32 {
        if self.kind.has_slices() {
            1
        } else {
            self.depth_or_slices
        }
    }

    pub fn num_slices(&self) -> u32 {
        if self.kind.has_slices() {
            self.depth_or_slices
        } else {
            1
        }
    }

    pub fn extent(&self) -> Extent3d {
        Extent3d::new_3d(self.width, self.height, self.depth_or_slices)
    }

    /// Returns true if textures with these two metadata can share one
    /// array texture.
    pub fn is_pool_compatible(&self, other: &TextureMetadata) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.format == other.format
            && self.mip_count == other.mip_count
    }

    pub(crate) fn descriptor(&self, label: &str) -> TextureDescriptor {
        TextureDescriptor {
            label: label.to_owned(),
            kind: self.kind,
            width: self.width,
            height: self.height,
            depth_or_slices: self.depth_or_slices,
            format: self.format,
            mip_count: self.mip_count,
        }
    }
}

/// Where a resident texture's GPU bytes live.
#[derive(Debug, Default)]
pub(crate) enum GpuStorage {
    #[default]
    None,
    /// A texture of its own.
    Owned(GpuTexture),
    /// One slice of a shared array texture.
    Pooled { pool: u64, slice: u32 },
}

impl GpuStorage {
    pub fn is_none(&self) -> bool {
        matches!(self, GpuStorage::None)
    }
}

/// Asynchronous copy of every mip back into host memory.
pub(crate) struct PendingReadback {
    /// Frame the copies were recorded in.
    pub frame: u64,
    pub tickets: Vec<(u8, crate::backend::GpuReadback)>,
    pub image: Image,
}

/// Manager-side record of one texture.
pub struct TextureObject {
    handle: TextureHandle,
    name: String,
    alias: String,
    pub(crate) resource_group: String,
    pub(crate) source_name: Option<String>,
    pub(crate) filters: TextureFilters,
    pub(crate) residency: Residency,
    pub(crate) page_out: PageOutStrategy,
    pub(crate) flags: TextureFlags,
    pub(crate) metadata: TextureMetadata,
    pub(crate) pool_id: u32,
    pub(crate) metadata_ready: bool,
    pub(crate) data_ready: bool,
    pub(crate) host_copy: Option<Arc<Image>>,
    pub(crate) storage: GpuStorage,
    pub(crate) listeners: ListenerSet,
    pub(crate) tasks: VecDeque<ScheduledTask>,
    /// Target of the transition in flight, if any.
    pub(crate) in_flight: Option<Residency>,
    pub(crate) readback: Option<PendingReadback>,
}

impl TextureObject {
    pub(crate) fn new(
        handle: TextureHandle,
        name: String,
        alias: String,
        page_out: PageOutStrategy,
        flags: TextureFlags,
        kind: TextureKind,
        resource_group: String,
    ) -> Self {
        Self {
            handle,
            name,
            alias,
            resource_group,
            source_name: None,
            filters: TextureFilters::empty(),
            residency: Residency::OnStorage,
            page_out,
            flags,
            metadata: TextureMetadata {
                kind,
                ..TextureMetadata::default()
            },
            pool_id: 0,
            metadata_ready: false,
            data_ready: false,
            host_copy: None,
            storage: GpuStorage::None,
            listeners: ListenerSet::default(),
            tasks: VecDeque::new(),
            in_flight: None,
            readback: None,
        }
    }

    pub fn handle(&self) -> TextureHandle {
        self.handle
    }

    /// Unique name the texture was created with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Display name; defaults to the name.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn resource_group(&self) -> &str {
        &self.resource_group
    }

    /// File the content is loaded from: the scheduled source, or the name.
    pub fn source_name(&self) -> &str {
        self.source_name.as_deref().unwrap_or(&self.name)
    }

    pub fn filters(&self) -> TextureFilters {
        self.filters
    }

    pub fn residency(&self) -> Residency {
        self.residency
    }

    pub fn page_out_strategy(&self) -> PageOutStrategy {
        self.page_out
    }

    pub fn flags(&self) -> TextureFlags {
        self.flags
    }

    pub fn metadata(&self) -> &TextureMetadata {
        &self.metadata
    }

    pub fn kind(&self) -> TextureKind {
        self.metadata.kind
    }

    pub fn width(&self) -> u32 {
        self.metadata.width
    }

    pub fn height(&self) -> u32 {
        self.metadata.height
    }

    pub fn depth_or_slices(&self) -> u32 {
        self.metadata.depth_or_slices
    }

    pub fn format(&self) -> PixelFormat {
        self.metadata.format
    }

    pub fn mip_count(&self) -> u8 {
        self.metadata.mip_count
    }

    /// Batching pool the texture may share storage with.
    pub fn pool_id(&self) -> u32 {
        self.pool_id
    }

    /// Returns true once the shape and format are known.
    pub fn is_metadata_ready(&self) -> bool {
        self.metadata_ready
    }

    /// Returns true once every byte reached the GPU.
    pub fn is_data_ready(&self) -> bool {
        self.data_ready
    }

    /// Host copy of the content, if one is kept.
    pub fn host_copy(&self) -> Option<&Arc<Image>> {
        self.host_copy.as_ref()
    }

    /// Slice of the shared array texture this texture occupies, if batched.
    pub fn pool_slice(&self) -> Option<u32> {
        match self.storage {
            GpuStorage::Pooled { slice, .. } => Some(slice),
            _ => None,
        }
    }

    pub fn has_gpu_storage(&self) -> bool {
        !self.storage.is_none()
    }

    /// Returns true while a transition runs or is queued.
    pub fn has_pending_work(&self) -> bool {
        self.in_flight.is_some() || !self.tasks.is_empty()
    }

    pub fn is_manual(&self) -> bool {
        self.flags.contains(TextureFlags::MANUAL)
    }

    pub(crate) fn prefers_srgb(&self) -> bool {
        self.flags.contains(TextureFlags::PREFERS_LOADING_AS_SRGB)
    }

    /// Batched storage applies to single-slice 2D textures only.
    pub(crate) fn wants_pool(&self) -> bool {
        self.flags.contains(TextureFlags::AUTOMATIC_BATCHING)
            && self.metadata.kind == TextureKind::Type2D
            && self.metadata.depth_or_slices == 1
    }
}

impl std::fmt::Debug for TextureObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureObject")
            .field("handle", &self.handle)
            .field("name", &self.name)
            .field("residency", &self.residency)
            .field("metadata", &self.metadata)
            .field("in_flight", &self.in_flight)
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_validity() {
        let meta = TextureMetadata::new(TextureKind::Type2D, 64, 64, 1, PixelFormat::Rgba8Unorm, 7);
        assert!(meta.is_valid());
        assert_eq!(meta.depth(), 1);
        assert_eq!(meta.num_slices(), 1);

        let cube = TextureMetadata::new(TextureKind::TypeCube, 32, 32, 5, PixelFormat::Rgba8Unorm, 1);
        assert!(!cube.is_valid());

        let volume = TextureMetadata::new(TextureKind::Type3D, 8, 8, 4, PixelFormat::R8Unorm, 1);
        assert_eq!(volume.depth(), 4);
        assert_eq!(volume.num_slices(), 1);

        assert!(!TextureMetadata::default().is_valid());

        let too_many_mips =
            TextureMetadata::new(TextureKind::Type2D, 4, 4, 1, PixelFormat::Rgba8Unorm, 9);
        assert!(!too_many_mips.is_valid());
        let slices_do_not_shrink =
            TextureMetadata::new(TextureKind::Type2DArray, 4, 4, 64, PixelFormat::Rgba8Unorm, 3);
        assert!(slices_do_not_shrink.is_valid());
    }

    #[test]
    fn test_metadata_from_image() {
        let image = Image::checkerboard(6, TextureKind::TypeCube);
        let meta = TextureMetadata::from_image(&image);
        assert_eq!(meta.kind, TextureKind::TypeCube);
        assert_eq!(meta.depth_or_slices, 6);
        assert_eq!(meta.format, PixelFormat::Rgba8Unorm);
        assert!(meta.is_valid());
    }

    #[test]
    fn test_pool_compatibility() {
        let a = TextureMetadata::new(TextureKind::Type2D, 64, 64, 1, PixelFormat::Rgba8Unorm, 1);
        let b = TextureMetadata { mip_count: 2, ..a };
        assert!(a.is_pool_compatible(&a));
        assert!(!a.is_pool_compatible(&b));
    }

    #[test]
    fn test_object_defaults() {
        let mut arena = crate::handle::Arena::new();
        let handle = arena.insert_with(|h| {
            TextureObject::new(
                h,
                "brick.png".into(),
                "brick".into(),
                PageOutStrategy::default(),
                TextureFlags::AUTOMATIC_BATCHING,
                TextureKind::Type2D,
                "General".into(),
            )
        });
        let obj = arena.get(handle).unwrap();
        assert_eq!(obj.residency(), Residency::OnStorage);
        assert_eq!(obj.source_name(), "brick.png");
        assert_eq!(obj.alias(), "brick");
        assert!(!obj.is_metadata_ready());
        assert!(!obj.has_pending_work());
        assert!(obj.pool_slice().is_none());
    }
}
