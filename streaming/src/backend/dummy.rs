//! Dummy GPU backend for testing and headless tools.
//!
//! Textures and staging buffers live in host memory, copies are performed
//! immediately and frames only finish when [`DummyBackend::advance_frame`]
//! (or a wait) says so. That is enough to exercise every path of the
//! streamer, including stalls on in-flight frames, without GPU hardware.
//!
//! `Clone` shares the same state, so a test can keep a handle to the
//! backend it gave to the manager.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use texstream_core::{Extent3d, Image, ROW_ALIGNMENT, TextureBox};

use crate::error::BackendError;
use crate::transfer::{BufferTextureLayout, TextureCopyLocation};

use super::{GpuBackend, GpuReadback, GpuStagingBuffer, GpuTexture, TextureDescriptor};

const DEFAULT_ROW_ALIGNMENT: u32 = 256;
const DEFAULT_FRAME_LATENCY: u64 = 3;

/// Counters exposed for tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DummyStats {
    /// Textures currently allocated.
    pub live_textures: usize,
    /// Staging buffers currently allocated.
    pub live_staging_buffers: usize,
    /// Bytes of all allocated staging buffers.
    pub staging_bytes: usize,
    /// Highest value `staging_bytes` ever reached.
    pub peak_staging_bytes: usize,
    /// Staging-to-texture copies performed.
    pub uploads: u64,
    /// Bytes copied into textures.
    pub bytes_uploaded: u64,
}

struct StagingStorage {
    data: Vec<u8>,
    mapped: bool,
}

struct PendingReadback {
    frame: u64,
    data: Vec<u8>,
}

struct DummyState {
    next_id: u64,
    textures: HashMap<u64, Image>,
    staging: HashMap<u64, StagingStorage>,
    readbacks: HashMap<u64, PendingReadback>,
    frame: u64,
    /// Every frame below this one is finished.
    completed: u64,
    latency: u64,
    row_alignment: u32,
    stats: DummyStats,
}

impl DummyState {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn retire_old_frames(&mut self) {
        self.completed = self
            .completed
            .max((self.frame + 1).saturating_sub(self.latency));
    }
}

/// Dummy GPU backend.
#[derive(Clone)]
pub struct DummyBackend {
    state: Arc<Mutex<DummyState>>,
}

impl DummyBackend {
    /// Create a new dummy backend.
    pub fn new() -> Self {
        let mut state = DummyState {
            next_id: 0,
            textures: HashMap::new(),
            staging: HashMap::new(),
            readbacks: HashMap::new(),
            frame: 0,
            completed: 0,
            latency: DEFAULT_FRAME_LATENCY,
            row_alignment: DEFAULT_ROW_ALIGNMENT,
            stats: DummyStats::default(),
        };
        state.retire_old_frames();
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Frames the GPU lags behind. 0 makes every frame finish immediately.
    pub fn with_frame_latency(self, latency: u64) -> Self {
        {
            let mut state = self.state.lock();
            state.latency = latency;
            state.retire_old_frames();
        }
        self
    }

    /// Row pitch alignment reported for staging buffers.
    pub fn with_row_alignment(self, alignment: u32) -> Self {
        self.state.lock().row_alignment = alignment.max(1);
        self
    }

    /// End the current frame.
    pub fn advance_frame(&self) {
        let mut state = self.state.lock();
        state.frame += 1;
        state.retire_old_frames();
        log::trace!(
            "DummyBackend: frame {} (finished below {})",
            state.frame,
            state.completed
        );
    }

    pub fn stats(&self) -> DummyStats {
        self.state.lock().stats
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DummyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("DummyBackend")
            .field("frame", &state.frame)
            .field("latency", &state.latency)
            .field("stats", &state.stats)
            .finish_non_exhaustive()
    }
}

fn dummy_id_of_texture(texture: &GpuTexture) -> u64 {
    match texture {
        GpuTexture::Dummy { id } => *id,
    }
}

fn dummy_id_of_buffer(buffer: &GpuStagingBuffer) -> u64 {
    match buffer {
        GpuStagingBuffer::Dummy { id } => *id,
    }
}

impl GpuBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy Backend"
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<GpuTexture, BackendError> {
        log::trace!(
            "DummyBackend: creating texture {:?} ({}x{}x{} {:?}, {} mips)",
            descriptor.label,
            descriptor.width,
            descriptor.height,
            descriptor.depth_or_slices,
            descriptor.format,
            descriptor.mip_count
        );
        let storage = Image::new_zeroed(
            descriptor.width,
            descriptor.height,
            descriptor.depth_or_slices,
            descriptor.kind,
            descriptor.format,
            descriptor.mip_count,
        )
        .map_err(|e| BackendError::InvalidParameter(format!("{}: {e}", descriptor.label)))?;

        let mut state = self.state.lock();
        let id = state.allocate_id();
        state.textures.insert(id, storage);
        state.stats.live_textures += 1;
        Ok(GpuTexture::Dummy { id })
    }

    fn destroy_texture(&self, texture: GpuTexture) {
        let id = dummy_id_of_texture(&texture);
        let mut state = self.state.lock();
        if state.textures.remove(&id).is_some() {
            state.stats.live_textures -= 1;
        } else {
            log::warn!("DummyBackend: destroying unknown texture {id}");
        }
    }

    fn create_staging_buffer(&self, size_bytes: usize) -> Result<GpuStagingBuffer, BackendError> {
        if size_bytes == 0 {
            return Err(BackendError::InvalidParameter(
                "zero-sized staging buffer".into(),
            ));
        }
        log::trace!("DummyBackend: creating staging buffer ({size_bytes} bytes)");
        let mut state = self.state.lock();
        let id = state.allocate_id();
        state.staging.insert(
            id,
            StagingStorage {
                data: vec![0; size_bytes],
                mapped: false,
            },
        );
        state.stats.live_staging_buffers += 1;
        state.stats.staging_bytes += size_bytes;
        state.stats.peak_staging_bytes = state
            .stats
            .peak_staging_bytes
            .max(state.stats.staging_bytes);
        Ok(GpuStagingBuffer::Dummy { id })
    }

    fn destroy_staging_buffer(&self, buffer: GpuStagingBuffer) {
        let id = dummy_id_of_buffer(&buffer);
        let mut state = self.state.lock();
        match state.staging.remove(&id) {
            Some(storage) => {
                state.stats.live_staging_buffers -= 1;
                state.stats.staging_bytes -= storage.data.len();
            }
            None => log::warn!("DummyBackend: destroying unknown staging buffer {id}"),
        }
    }

    fn staging_row_alignment(&self) -> u32 {
        self.state.lock().row_alignment
    }

    fn map_staging_buffer(&self, buffer: &GpuStagingBuffer) -> Result<Vec<u8>, BackendError> {
        let id = dummy_id_of_buffer(buffer);
        let mut state = self.state.lock();
        let storage = state
            .staging
            .get_mut(&id)
            .ok_or_else(|| BackendError::UnknownResource(format!("staging buffer {id}")))?;
        if storage.mapped {
            return Err(BackendError::InvalidParameter(format!(
                "staging buffer {id} is already mapped"
            )));
        }
        storage.mapped = true;
        Ok(std::mem::take(&mut storage.data))
    }

    fn unmap_staging_buffer(
        &self,
        buffer: &GpuStagingBuffer,
        data: Vec<u8>,
    ) -> Result<(), BackendError> {
        let id = dummy_id_of_buffer(buffer);
        let mut state = self.state.lock();
        let storage = state
            .staging
            .get_mut(&id)
            .ok_or_else(|| BackendError::UnknownResource(format!("staging buffer {id}")))?;
        if !storage.mapped {
            return Err(BackendError::InvalidParameter(format!(
                "staging buffer {id} is not mapped"
            )));
        }
        storage.mapped = false;
        storage.data = data;
        Ok(())
    }

    fn copy_staging_to_texture(
        &self,
        source: &GpuStagingBuffer,
        layout: &BufferTextureLayout,
        destination: &GpuTexture,
        location: &TextureCopyLocation,
        extent: Extent3d,
    ) -> Result<(), BackendError> {
        let buffer_id = dummy_id_of_buffer(source);
        let texture_id = dummy_id_of_texture(destination);
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let storage = state
            .staging
            .get(&buffer_id)
            .ok_or_else(|| BackendError::UnknownResource(format!("staging buffer {buffer_id}")))?;
        if storage.mapped {
            return Err(BackendError::InvalidParameter(format!(
                "staging buffer {buffer_id} is still mapped"
            )));
        }
        let texture = state
            .textures
            .get_mut(&texture_id)
            .ok_or_else(|| BackendError::UnknownResource(format!("texture {texture_id}")))?;
        if location.mip_level >= texture.mip_count() {
            return Err(BackendError::InvalidParameter(format!(
                "mip {} of a {} mip texture",
                location.mip_level,
                texture.mip_count()
            )));
        }

        let format = texture.format();
        let has_slices = texture.kind().has_slices();
        let layers = extent.depth_or_array_layers;
        let src_box = TextureBox {
            x: 0,
            y: 0,
            z: 0,
            slice_start: 0,
            width: extent.width,
            height: extent.height,
            depth: if has_slices { 1 } else { layers },
            num_slices: if has_slices { layers } else { 1 },
            format,
            bytes_per_row: layout.bytes_per_row as usize,
            bytes_per_image: layout.bytes_per_row as usize * layout.rows_per_image as usize,
            offset: layout.offset as usize,
        };
        let dst_box = texture.mip_box(location.mip_level).sub_box(
            location.origin.x,
            location.origin.y,
            location.origin.z,
            extent.width,
            extent.height,
            layers,
        );
        let mip_box = texture.mip_box(location.mip_level);
        if dst_box.x + dst_box.width > mip_box.width
            || dst_box.y + dst_box.height > mip_box.height
            || location.origin.z + layers > mip_box.depth_or_slices()
        {
            return Err(BackendError::InvalidParameter(format!(
                "copy {extent:?} at {:?} exceeds mip {} of texture {texture_id}",
                location.origin, location.mip_level
            )));
        }

        TextureBox::copy(&storage.data, &src_box, texture.data_mut(), &dst_box)
            .map_err(|e| BackendError::InvalidParameter(e.to_string()))?;
        state.stats.uploads += 1;
        state.stats.bytes_uploaded += (src_box.row_bytes()
            * src_box.block_rows() as usize
            * src_box.depth_or_slices() as usize) as u64;
        log::trace!(
            "DummyBackend: uploaded {}x{}x{} into texture {} mip {} at {:?}",
            extent.width,
            extent.height,
            layers,
            texture_id,
            location.mip_level,
            location.origin
        );
        Ok(())
    }

    fn create_readback(
        &self,
        texture: &GpuTexture,
        mip: u8,
        first_slice: u32,
        num_slices: u32,
    ) -> Result<GpuReadback, BackendError> {
        let texture_id = dummy_id_of_texture(texture);
        let mut state = self.state.lock();
        let image = state
            .textures
            .get(&texture_id)
            .ok_or_else(|| BackendError::UnknownResource(format!("texture {texture_id}")))?;
        if mip >= image.mip_count() || first_slice + num_slices > image.num_slices() {
            return Err(BackendError::InvalidParameter(format!(
                "readback of mip {mip} slices {first_slice}..{} out of range",
                first_slice + num_slices
            )));
        }

        let mip_box = image.mip_box(mip);
        let layers = if image.kind().has_slices() {
            num_slices
        } else {
            image.mip_depth(mip)
        };
        let first = if image.kind().has_slices() { first_slice } else { 0 };
        let src_box = mip_box.sub_box(0, 0, first, mip_box.width, mip_box.height, layers);
        let dst_box = TextureBox::packed(
            image.format(),
            mip_box.width,
            mip_box.height,
            src_box.depth,
            src_box.num_slices,
            ROW_ALIGNMENT,
            0,
        );
        let mut data = vec![0; dst_box.bytes_per_image * layers as usize];
        TextureBox::copy(image.data(), &src_box, &mut data, &dst_box)
            .map_err(|e| BackendError::Internal(e.to_string()))?;

        let id = state.allocate_id();
        let frame = state.frame;
        state.readbacks.insert(id, PendingReadback { frame, data });
        Ok(GpuReadback::Dummy { id })
    }

    fn is_readback_ready(&self, readback: &GpuReadback) -> bool {
        let GpuReadback::Dummy { id } = readback;
        let state = self.state.lock();
        state
            .readbacks
            .get(id)
            .is_some_and(|pending| pending.frame < state.completed)
    }

    fn read_readback(&self, readback: GpuReadback) -> Result<Vec<u8>, BackendError> {
        let GpuReadback::Dummy { id } = readback;
        let mut state = self.state.lock();
        let pending = state
            .readbacks
            .remove(&id)
            .ok_or_else(|| BackendError::UnknownResource(format!("readback {id}")))?;
        if pending.frame >= state.completed {
            // Reading early stalls until the frame is done
            state.completed = pending.frame + 1;
        }
        Ok(pending.data)
    }

    fn frame_count(&self) -> u64 {
        self.state.lock().frame
    }

    fn is_frame_finished(&self, frame: u64) -> bool {
        frame < self.state.lock().completed
    }

    fn wait_for_frame(&self, frame: u64) {
        let mut state = self.state.lock();
        if frame >= state.completed {
            log::trace!("DummyBackend: stalling on frame {frame}");
            state.completed = frame + 1;
        }
    }

    fn frame_latency(&self) -> u64 {
        self.state.lock().latency
    }
}
