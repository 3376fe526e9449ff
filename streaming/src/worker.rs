//! The streaming worker thread.
//!
//! One pass of the worker, all under the streaming lock:
//!
//! 1. Move new requests out of the inbox and drop work for destroyed textures.
//! 2. Continue queued transfers while the preload limit allows.
//! 3. Start up to `entries_per_iteration` new requests: read, decode,
//!    filter, then stage as much of the result as fits.
//! 4. Fold this pass's staging demand into the usage history.
//!
//! Then it wakes the main thread and sleeps until woken again.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use parking_lot::Mutex;
use texstream_core::profiling::{profile_scope, set_thread_name};
use texstream_core::{CodecRegistry, Image, ImageError, TextureBox, TextureKind, filters};
use texstream_vfs::ResourceGroups;

use crate::command::Command;
use crate::config::StreamingConfig;
use crate::decode_pool::{DecodePool, worker_waker};
use crate::error::{LoadError, StreamingError};
use crate::event::WaitableEvent;
use crate::handle::TextureHandle;
use crate::queue::{LoadRequest, LoadSource, QueuedTransfer};
use crate::staging::{StagingBuffer, UsageStat, usage};
use crate::texture::{Residency, TextureMetadata};

/// Everything the worker and the main thread share under one lock.
#[derive(Default)]
pub(crate) struct StreamingState {
    /// Requests taken from the inbox, not started yet.
    pub requests: VecDeque<LoadRequest>,
    pub transfers: VecDeque<QueuedTransfer>,
    /// Mapped buffers the main thread prepared for this pass.
    pub streaming_buffers: Vec<StagingBuffer>,
    /// Buffers the worker wrote into; the main thread uploads and recycles them.
    pub worker_used: Vec<StagingBuffer>,
    pub commands: Vec<Command>,
    pub usage_stats: Vec<UsageStat>,
    pub prev_usage_stats: Vec<UsageStat>,
    pub bytes_preloaded: usize,
    /// Destroyed textures whose work may still be in the pipeline.
    pub cancelled: HashSet<TextureHandle>,
    pub decodes_in_flight: usize,
}

impl StreamingState {
    /// Returns true if the worker has nothing left to do.
    pub fn is_idle(&self) -> bool {
        self.requests.is_empty()
            && self.transfers.is_empty()
            && self.decodes_in_flight == 0
            && self.commands.is_empty()
    }

    /// Drop every request and transfer of a destroyed texture.
    pub fn cancel(&mut self, texture: TextureHandle) {
        self.requests.retain(|r| r.texture != texture);
        self.transfers.retain(|t| t.texture != texture);
        self.cancelled.insert(texture);
    }

    fn purge_cancelled(&mut self) {
        if self.cancelled.is_empty() {
            return;
        }
        let cancelled = &self.cancelled;
        self.requests.retain(|r| !cancelled.contains(&r.texture));
        self.transfers.retain(|t| !cancelled.contains(&t.texture));
    }
}

pub(crate) struct Shared {
    pub streaming: Mutex<StreamingState>,
    /// New requests from the main thread. Kept apart from the streaming
    /// lock so scheduling never waits on a worker pass.
    pub inbox: Mutex<Vec<LoadRequest>>,
    pub worker_event: WaitableEvent,
    pub main_event: WaitableEvent,
    pub shutdown: AtomicBool,
}

impl Shared {
    pub fn new() -> Self {
        Self {
            streaming: Mutex::new(StreamingState::default()),
            inbox: Mutex::new(Vec::new()),
            worker_event: WaitableEvent::new(),
            main_event: WaitableEvent::new(),
            shutdown: AtomicBool::new(false),
        }
    }
}

/// A decoded, filtered image plus the file's own metadata.
#[derive(Debug)]
pub(crate) struct LoadedImage {
    pub image: Arc<Image>,
    pub source_metadata: TextureMetadata,
}

pub(crate) struct Worker {
    shared: Arc<Shared>,
    resources: ResourceGroups,
    codecs: Arc<CodecRegistry>,
    decode_pool: Option<DecodePool>,
    max_preload_bytes: usize,
    max_split_resolution: u32,
    max_bytes_per_item: usize,
    entries_per_iteration: usize,
    no_reorder: bool,
}

impl Worker {
    pub fn new(
        shared: Arc<Shared>,
        resources: ResourceGroups,
        codecs: Arc<CodecRegistry>,
        config: &StreamingConfig,
    ) -> Result<Self, StreamingError> {
        let decode_pool = if config.decode_threads > 0 && !config.no_reorder {
            Some(DecodePool::new(
                config.decode_threads,
                resources.clone(),
                codecs.clone(),
                worker_waker(shared.clone()),
            )?)
        } else {
            None
        };
        Ok(Self {
            shared,
            resources,
            codecs,
            decode_pool,
            max_preload_bytes: config.max_preload_bytes,
            max_split_resolution: config.max_split_resolution,
            max_bytes_per_item: config.max_bytes_per_staging_request,
            entries_per_iteration: config.entries_per_iteration,
            no_reorder: config.no_reorder,
        })
    }

    pub fn spawn(self) -> Result<JoinHandle<()>, StreamingError> {
        let handle = std::thread::Builder::new()
            .name("texstream-worker".into())
            .spawn(move || self.run())?;
        Ok(handle)
    }

    fn run(mut self) {
        set_thread_name!("texstream worker");
        log::debug!("Streaming worker started");
        let shared = self.shared.clone();
        while !shared.shutdown.load(Ordering::Acquire) {
            {
                let mut state = shared.streaming.lock();
                self.process(&mut state);
            }
            shared.main_event.wake();
            shared.worker_event.wait();
        }
        log::debug!("Streaming worker stopped");
    }

    /// One worker pass.
    pub fn process(&mut self, state: &mut StreamingState) {
        profile_scope!("streaming_pass");

        {
            let mut inbox = self.shared.inbox.lock();
            state.requests.extend(inbox.drain(..));
        }
        state.purge_cancelled();

        let stalled = self.process_transfers(state);
        if !(self.no_reorder && stalled) {
            self.process_requests(state);
        }

        usage::merge_into_previous(&mut state.usage_stats, &mut state.prev_usage_stats);
        if state.decodes_in_flight == 0 {
            state.cancelled.clear();
        }
    }

    /// Continue transfers in arrival order. Returns true if one of them ran
    /// out of staging space.
    fn process_transfers(&self, state: &mut StreamingState) -> bool {
        let mut pending = std::mem::take(&mut state.transfers);
        let mut remaining = VecDeque::with_capacity(pending.len());
        let mut stalled = false;

        while let Some(mut transfer) = pending.pop_front() {
            if (self.no_reorder && stalled) || state.bytes_preloaded >= self.max_preload_bytes {
                remaining.push_back(transfer);
                continue;
            }
            match transfer.drain(state) {
                Ok(true) => state.commands.push(Command::NotifyDataReady {
                    texture: transfer.texture,
                }),
                Ok(false) => {
                    stalled = true;
                    remaining.push_back(transfer);
                }
                Err(error) => fail_transfer(state, &transfer, error),
            }
        }
        state.transfers = remaining;
        stalled
    }

    fn process_requests(&mut self, state: &mut StreamingState) {
        if let Some(pool) = &self.decode_pool {
            while state.decodes_in_flight < self.entries_per_iteration
                && let Some(request) = state.requests.pop_front()
            {
                state.decodes_in_flight += 1;
                pool.submit(request);
            }
            for result in pool.poll_results() {
                state.decodes_in_flight -= 1;
                if state.cancelled.contains(&result.request.texture) {
                    log::trace!("Dropping decode of destroyed {}", result.request.texture);
                    continue;
                }
                self.finish_request(state, result.request, result.outcome);
            }
            return;
        }

        let mut processed = 0;
        while processed < self.entries_per_iteration
            && state.bytes_preloaded < self.max_preload_bytes
        {
            let Some(request) = state.requests.pop_front() else {
                break;
            };
            let outcome = {
                profile_scope!("decode");
                load_image(&self.resources, &self.codecs, &request)
            };
            processed += 1;
            if !self.finish_request(state, request, outcome) && self.no_reorder {
                break;
            }
        }
    }

    /// Turn a decoded (or failed) request into commands and, for GPU
    /// targets, a transfer. Returns false if the transfer had to be queued
    /// for lack of staging space.
    fn finish_request(
        &self,
        state: &mut StreamingState,
        request: LoadRequest,
        outcome: Result<LoadedImage, LoadError>,
    ) -> bool {
        let texture = request.texture;
        let (loaded, cacheable) = match outcome {
            Ok(loaded) => (loaded, !matches!(request.source, LoadSource::Image(_))),
            Err(error) => {
                log::warn!("Failed to load texture {texture}: {error}. Using fallback image.");
                state.commands.push(Command::LoadFailed { texture, error });
                let image = Arc::new(request.fallback_image());
                let source_metadata = TextureMetadata::from_image(&image);
                (
                    LoadedImage {
                        image,
                        source_metadata,
                    },
                    false,
                )
            }
        };

        if request.target == Residency::OnSystemRam {
            state.commands.push(Command::TransitionToSysRam {
                texture,
                image: loaded.image,
                source_metadata: loaded.source_metadata,
                cacheable,
            });
            return true;
        }

        state.commands.push(Command::TransitionToResident {
            texture,
            metadata: TextureMetadata::from_image(&loaded.image),
            source_metadata: loaded.source_metadata,
            host_copy: request.keep_host_copy.then(|| loaded.image.clone()),
            cacheable,
        });

        let mut transfer = QueuedTransfer::new(
            texture,
            request.source.describe(),
            loaded.image,
            self.max_split_resolution,
            self.max_bytes_per_item,
        );
        log::trace!(
            "Queued {} work items for {}",
            transfer.total_items(),
            texture
        );
        match transfer.drain(state) {
            Ok(true) => {
                state.commands.push(Command::NotifyDataReady { texture });
                true
            }
            Ok(false) => {
                state.transfers.push_back(transfer);
                false
            }
            Err(error) => {
                fail_transfer(state, &transfer, error);
                true
            }
        }
    }
}

/// Give up on a transfer whose content could not be staged.
fn fail_transfer(state: &mut StreamingState, transfer: &QueuedTransfer, error: ImageError) {
    log::error!(
        "Failed to stage '{}' for {}: {}",
        transfer.source_name,
        transfer.texture,
        error
    );
    state.commands.push(Command::TransferFailed {
        texture: transfer.texture,
        error: LoadError::Storage {
            name: transfer.source_name.clone(),
            reason: error.to_string(),
        },
    });
}

/// Produce the content of a request: read, decode and filter its file(s),
/// or pass an in-memory image through.
pub(crate) fn load_image(
    resources: &ResourceGroups,
    codecs: &CodecRegistry,
    request: &LoadRequest,
) -> Result<LoadedImage, LoadError> {
    let (image, name) = match &request.source {
        LoadSource::Image(image) => {
            return Ok(LoadedImage {
                source_metadata: TextureMetadata::from_image(image),
                image: image.clone(),
            });
        }
        LoadSource::File(name) => (read_and_decode(resources, codecs, &request.group, name)?, name),
        LoadSource::CubeFaces(names) => {
            let mut faces = Vec::with_capacity(names.len());
            for name in names.iter() {
                faces.push(read_and_decode(resources, codecs, &request.group, name)?);
            }
            let cube = assemble_cube(&faces).map_err(|source| LoadError::Decode {
                name: names[0].clone(),
                source,
            })?;
            (cube, &names[0])
        }
    };

    let source_metadata = TextureMetadata::from_image(&image);
    let image = filters::apply(image, request.filters, request.prefer_srgb).map_err(|source| {
        LoadError::Decode {
            name: name.clone(),
            source,
        }
    })?;
    Ok(LoadedImage {
        image: Arc::new(image),
        source_metadata,
    })
}

fn read_and_decode(
    resources: &ResourceGroups,
    codecs: &CodecRegistry,
    group: &str,
    name: &str,
) -> Result<Image, LoadError> {
    let bytes = resources
        .read_blocking(group, name)
        .map_err(|e| LoadError::Resource {
            name: name.to_owned(),
            group: group.to_owned(),
            reason: e.to_string(),
        })?;
    codecs.decode(name, &bytes).map_err(|source| LoadError::Decode {
        name: name.to_owned(),
        source,
    })
}

/// Stack six single-slice faces into one cubemap image. The first face
/// decides size, format and mip count.
fn assemble_cube(faces: &[Image]) -> Result<Image, ImageError> {
    let first = faces
        .first()
        .ok_or_else(|| ImageError::InvalidDimensions("no cubemap faces".into()))?;
    let mut cube = Image::new_zeroed(
        first.width(),
        first.height(),
        6,
        TextureKind::TypeCube,
        first.format(),
        first.mip_count(),
    )?;

    for (slice, face) in faces.iter().enumerate() {
        if face.width() != first.width()
            || face.height() != first.height()
            || face.format() != first.format()
            || face.mip_count() != first.mip_count()
            || face.depth_or_slices() != 1
        {
            return Err(ImageError::InvalidDimensions(format!(
                "cubemap face {slice} is {}x{}x{} {:?} with {} mips, expected {}x{} {:?} with {}",
                face.width(),
                face.height(),
                face.depth_or_slices(),
                face.format(),
                face.mip_count(),
                first.width(),
                first.height(),
                first.format(),
                first.mip_count()
            )));
        }
        for mip in 0..cube.mip_count() {
            let src = face.mip_box(mip);
            let dst = cube
                .mip_box(mip)
                .sub_box(0, 0, slice as u32, src.width, src.height, 1);
            TextureBox::copy(face.data(), &src, cube.data_mut(), &dst)?;
        }
    }
    Ok(cube)
}

#[cfg(test)]
mod tests {
    use super::*;
    use texstream_core::{ImageCodec, OitdCodec, PixelFormat, TextureFilters};
    use texstream_vfs::MemoryProvider;

    fn face(value: u8, width: u32) -> Image {
        let mut image =
            Image::new_zeroed(width, width, 1, TextureKind::Type2D, PixelFormat::Rgba8Unorm, 1)
                .unwrap();
        image.data_mut().fill(value);
        image
    }

    fn request(source: LoadSource) -> LoadRequest {
        LoadRequest {
            texture: crate::handle::Arena::new().insert_with(|_| ()),
            source,
            group: String::new(),
            filters: TextureFilters::empty(),
            prefer_srgb: false,
            target: Residency::Resident,
            fallback_kind: TextureKind::Type2D,
            keep_host_copy: false,
        }
    }

    #[test]
    fn test_assemble_cube_places_faces_in_slices() {
        let faces: Vec<Image> = (0..6).map(|i| face(i * 10, 4)).collect();
        let cube = assemble_cube(&faces).unwrap();
        assert_eq!(cube.kind(), TextureKind::TypeCube);
        assert_eq!(cube.num_slices(), 6);
        let slice_bytes = 4 * 4 * 4;
        for i in 0..6 {
            let start = i * slice_bytes;
            assert!(cube.data()[start..start + slice_bytes].iter().all(|&b| b == i as u8 * 10));
        }
    }

    #[test]
    fn test_assemble_cube_rejects_mismatched_face() {
        let mut faces: Vec<Image> = (0..6).map(|_| face(1, 4)).collect();
        faces[3] = face(1, 8);
        assert!(matches!(
            assemble_cube(&faces),
            Err(ImageError::InvalidDimensions(_))
        ));
    }

    #[test]
    fn test_load_image_reads_decodes_and_filters() {
        let resources = ResourceGroups::new();
        let provider = MemoryProvider::new();
        let bytes = OitdCodec.encode(&face(7, 8)).unwrap();
        provider.insert("stone.oitd", bytes);
        resources.add_location(texstream_vfs::DEFAULT_GROUP, provider);
        let codecs = CodecRegistry::with_default_codecs();

        let mut req = request(LoadSource::File("stone.oitd".into()));
        req.prefer_srgb = true;
        let loaded = load_image(&resources, &codecs, &req).unwrap();
        assert_eq!(loaded.source_metadata.format, PixelFormat::Rgba8Unorm);
        assert_eq!(loaded.image.format(), PixelFormat::Rgba8UnormSrgb);

        let missing = request(LoadSource::File("missing.oitd".into()));
        let err = load_image(&resources, &codecs, &missing).unwrap_err();
        assert!(matches!(err, LoadError::Resource { .. }));
        assert_eq!(err.resource_name(), "missing.oitd");
    }

    #[test]
    fn test_failed_request_uses_fallback() {
        let shared = Arc::new(Shared::new());
        let config = StreamingConfig::default().with_decode_threads(0);
        let mut worker = Worker::new(
            shared,
            ResourceGroups::new(),
            Arc::new(CodecRegistry::with_default_codecs()),
            &config,
        )
        .unwrap();

        let mut state = StreamingState::default();
        let mut req = request(LoadSource::File("nowhere.png".into()));
        req.fallback_kind = TextureKind::TypeCube;
        state.requests.push_back(req);
        worker.process(&mut state);

        assert!(matches!(state.commands[0], Command::LoadFailed { .. }));
        match &state.commands[1] {
            Command::TransitionToResident {
                metadata,
                cacheable,
                ..
            } => {
                assert_eq!(metadata.kind, TextureKind::TypeCube);
                assert_eq!(metadata.depth_or_slices, 6);
                assert!(!cacheable);
            }
            other => panic!("unexpected command {other:?}"),
        }
        // no staging buffers yet: the transfer waits and demand is recorded
        assert_eq!(state.transfers.len(), 1);
        assert_eq!(state.prev_usage_stats.len(), 1);
        assert!(!state.is_idle());
    }

    #[test]
    fn test_staging_failure_fails_the_transfer() {
        let shared = Arc::new(Shared::new());
        let config = StreamingConfig::default().with_decode_threads(0);
        let mut worker = Worker::new(
            shared,
            ResourceGroups::new(),
            Arc::new(CodecRegistry::with_default_codecs()),
            &config,
        )
        .unwrap();

        let mut state = StreamingState::default();
        let mut buffer = StagingBuffer::new(
            1,
            crate::backend::GpuStagingBuffer::Dummy { id: 1 },
            16,
            16,
            1,
            1,
            PixelFormat::Rgba8Unorm,
            256,
        );
        // claims room for a 16x16 tile but holds only a few bytes
        buffer.start_map(vec![0; 8]);
        state.streaming_buffers.push(buffer);
        let image = Arc::new(face(9, 16));
        state.requests.push_back(request(LoadSource::Image(image)));
        worker.process(&mut state);

        assert!(matches!(state.commands[0], Command::TransitionToResident { .. }));
        match &state.commands[1] {
            Command::TransferFailed { error, .. } => {
                assert!(matches!(error, LoadError::Storage { .. }));
                assert_eq!(error.resource_name(), "<image>");
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(state.commands.len(), 2);
        assert!(state.transfers.is_empty());
    }
}
