//! Load requests and the transfers they turn into.
//!
//! A [`LoadRequest`] asks the worker to produce a texture's content. Once
//! decoded, content bound for the GPU becomes a [`QueuedTransfer`]: the
//! image cut into work items (one mip layer, tiled), each copied into a
//! staging region whenever one is available. Smallest mips go first so a
//! texture becomes usable at low resolution as early as possible.

use std::sync::Arc;

use fixedbitset::FixedBitSet;
use texstream_core::{Image, ImageError, PixelFormat, ROW_ALIGNMENT, TextureFilters, TextureKind};

use crate::command::Command;
use crate::handle::TextureHandle;
use crate::staging::{StagingBuffer, usage};
use crate::texture::Residency;
use crate::transfer::{StagingRegion, TextureOrigin};
use crate::worker::StreamingState;

/// Where a request's content comes from.
#[derive(Debug, Clone)]
pub(crate) enum LoadSource {
    /// One file holding every slice.
    File(String),
    /// Six files holding one cubemap face each, +X -X +Y -Y +Z -Z.
    CubeFaces(Box<[String; 6]>),
    /// Content already in memory (caller image or host copy).
    Image(Arc<Image>),
}

impl LoadSource {
    /// Name used in logs and errors.
    pub fn describe(&self) -> &str {
        match self {
            LoadSource::File(name) => name,
            LoadSource::CubeFaces(names) => &names[0],
            LoadSource::Image(_) => "<image>",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct LoadRequest {
    pub texture: TextureHandle,
    pub source: LoadSource,
    pub group: String,
    pub filters: TextureFilters,
    pub prefer_srgb: bool,
    /// `Resident` or `OnSystemRam`.
    pub target: Residency,
    /// Shape of the fallback image when the load fails.
    pub fallback_kind: TextureKind,
    /// Hand the decoded image back as the texture's host copy.
    pub keep_host_copy: bool,
}

impl LoadRequest {
    pub fn fallback_image(&self) -> Image {
        if self.fallback_kind.is_cube() {
            Image::checkerboard(6, TextureKind::TypeCube)
        } else {
            Image::checkerboard(1, TextureKind::Type2D)
        }
    }
}

/// One tile of one mip layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WorkItem {
    pub mip: u8,
    /// Depth slice for 3D images, array slice otherwise.
    pub layer: u32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Decoded content waiting for staging space.
pub(crate) struct QueuedTransfer {
    pub texture: TextureHandle,
    /// What the content was loaded from, for errors.
    pub source_name: String,
    pub image: Arc<Image>,
    items: Vec<WorkItem>,
    pending: FixedBitSet,
}

impl QueuedTransfer {
    pub fn new(
        texture: TextureHandle,
        source_name: impl Into<String>,
        image: Arc<Image>,
        max_split_resolution: u32,
        max_bytes_per_item: usize,
    ) -> Self {
        let items = work_items(&image, max_split_resolution, max_bytes_per_item);
        let mut pending = FixedBitSet::with_capacity(items.len());
        pending.insert_range(..);
        Self {
            texture,
            source_name: source_name.into(),
            image,
            items,
            pending,
        }
    }

    pub fn is_done(&self) -> bool {
        self.pending.is_clear()
    }

    #[cfg(test)]
    pub fn pending_items(&self) -> usize {
        self.pending.count_ones(..)
    }

    pub fn total_items(&self) -> usize {
        self.items.len()
    }

    /// Copy as many pending items as staging space allows, emitting one
    /// upload command per item. Returns `Ok(false)` if it ran out of space.
    ///
    /// An item that cannot be written stays pending and the error is
    /// returned; the transfer cannot complete after that.
    pub fn drain(&mut self, state: &mut StreamingState) -> Result<bool, ImageError> {
        let format = self.image.format();
        let pending: Vec<usize> = self.pending.ones().collect();
        for index in pending {
            let item = self.items[index];
            usage::record(&mut state.usage_stats, format, item.width, item.height, 1);

            let Some((slot, region)) = acquire_region(state, item.width, item.height, format)
            else {
                return Ok(false);
            };

            let src_box = self.image.mip_box(item.mip).sub_box(
                item.x,
                item.y,
                item.layer,
                item.width,
                item.height,
                1,
            );
            let buffer = &mut state.worker_used[slot];
            buffer.write_region(&region, self.image.data(), &src_box)?;
            state.bytes_preloaded += region.size_bytes;
            state.commands.push(Command::Upload {
                texture: self.texture,
                staging_id: buffer.id(),
                region,
                mip: item.mip,
                origin: TextureOrigin::new(item.x, item.y, item.layer),
            });
            self.pending.set(index, false);
        }
        Ok(self.is_done())
    }
}

/// Find space for a `width` x `height` region, first in buffers the worker
/// already writes to, then in the fresh buffers the main thread mapped.
fn acquire_region(
    state: &mut StreamingState,
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Option<(usize, StagingRegion)> {
    for (slot, buffer) in state.worker_used.iter_mut().enumerate() {
        if let Some(region) = buffer.map_region(width, height, 1, 1, format) {
            return Some((slot, region));
        }
    }

    let index = state
        .streaming_buffers
        .iter()
        .position(|b| b.supports_format(width, height, 1, 1, format))?;
    let mut buffer: StagingBuffer = state.streaming_buffers.swap_remove(index);
    let region = buffer.map_region(width, height, 1, 1, format)?;
    state.worker_used.push(buffer);
    Some((state.worker_used.len() - 1, region))
}

/// Largest tile that respects both the resolution and the byte limit and
/// stays aligned to the format's blocks.
pub(crate) fn tile_size(
    format: PixelFormat,
    width: u32,
    height: u32,
    max_split_resolution: u32,
    max_bytes: usize,
) -> (u32, u32) {
    let (bw, bh) = format.block_dimensions();
    let snap = |value: u32, full: u32, block: u32| {
        if value >= full {
            full
        } else {
            ((value / block).max(1) * block).min(full)
        }
    };

    let mut tw = snap(width.min(max_split_resolution.max(1)), width, bw);
    let mut th = snap(height.min(max_split_resolution.max(1)), height, bh);
    while format.size_bytes(tw, th, 1, 1, ROW_ALIGNMENT) > max_bytes {
        if tw >= th && tw > bw {
            tw = snap(tw / 2, width, bw);
        } else if th > bh {
            th = snap(th / 2, height, bh);
        } else {
            break;
        }
    }
    (tw, th)
}

fn work_items(image: &Image, max_split_resolution: u32, max_bytes: usize) -> Vec<WorkItem> {
    let mut items = Vec::new();
    for mip in (0..image.mip_count()).rev() {
        let width = image.mip_width(mip);
        let height = image.mip_height(mip);
        let layers = if image.kind().has_slices() {
            image.num_slices()
        } else {
            image.mip_depth(mip)
        };
        let (tw, th) = tile_size(image.format(), width, height, max_split_resolution, max_bytes);
        for layer in 0..layers {
            for y in (0..height).step_by(th as usize) {
                for x in (0..width).step_by(tw as usize) {
                    items.push(WorkItem {
                        mip,
                        layer,
                        x,
                        y,
                        width: tw.min(width - x),
                        height: th.min(height - y),
                    });
                }
            }
        }
    }
    items
}
