//! The texture streaming manager: the main-thread half of the streamer.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::thread::{JoinHandle, ThreadId};
use std::time::Duration;

use texstream_core::profiling::{frame_mark, profile_plot, profile_scope};
use texstream_core::{CodecRegistry, Image, PixelFormat, TextureFilters, TextureKind, codec, filters};
use texstream_vfs::{ResourceGroups, name};

use crate::backend::{GpuBackend, GpuTexture};
use crate::command::Command;
use crate::config::{BudgetEntry, StreamingConfig};
use crate::error::{LoadError, StreamingError};
use crate::handle::{Arena, TextureHandle};
use crate::metadata_cache::{CachedMetadata, MetadataCache};
use crate::queue::{LoadRequest, LoadSource};
use crate::staging::{StagingBuffer, StagingPool};
use crate::stats::StreamingStats;
use crate::task::{DestroyTask, ScheduledTask, SourceOverride, TransitionTask};
use crate::texture::pool::TexturePools;
use crate::texture::{
    GpuStorage, PageOutStrategy, PendingReadback, Residency, ResidencyReason, TextureFlags,
    TextureListener, TextureMetadata, TextureObject,
};
use crate::transfer::{StagingRegion, TextureCopyLocation, TextureOrigin};
use crate::worker::{Shared, StreamingState, Worker};

/// Suffixes of the six files of a cubemap stored one face per file,
/// in slice order +X -X +Y -Y +Z -Z.
pub const CUBEMAP_FACE_SUFFIXES: [&str; 6] = ["_rt", "_lf", "_up", "_dn", "_fr", "_bk"];

/// Extensions whose files hold every cubemap face themselves.
const CUBEMAP_CONTAINER_EXTENSIONS: [&str; 1] = ["oitd"];

/// Owns every texture, schedules residency transitions and feeds the
/// streaming worker.
///
/// All methods must be called from the thread that created the manager.
/// Work is asynchronous: scheduling returns at once, and results are
/// applied (and listeners notified) from [`update`](Self::update), which
/// the application calls once per frame.
///
/// # Example
///
/// ```ignore
/// let backend = create_backend()?;
/// let mut manager = TextureStreamingManager::new(backend, resources, StreamingConfig::default())?;
///
/// let brick = manager.create_texture(
///     "brick.png",
///     "",
///     PageOutStrategy::SaveToSystemRam,
///     TextureFlags::AUTOMATIC_BATCHING,
///     TextureKind::Type2D,
///     "General",
/// )?;
/// manager.schedule_transition(brick, Residency::Resident)?;
///
/// loop {
///     manager.update(false);
///     // render...
/// }
/// ```
pub struct TextureStreamingManager {
    backend: Box<dyn GpuBackend>,
    resources: ResourceGroups,
    codecs: Arc<CodecRegistry>,
    config: StreamingConfig,
    minimum_budget: Vec<BudgetEntry>,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    owner: ThreadId,
    textures: Arena<TextureObject>,
    names: HashMap<String, TextureHandle>,
    staging: StagingPool,
    texture_pools: TexturePools,
    metadata_cache: MetadataCache,
    /// Buffers the worker filled, uploaded and recycled during `update`.
    main_used: Vec<StagingBuffer>,
    spare_commands: Vec<Command>,
    try_lock_failures: u32,
    is_done: bool,
    stats: StreamingStats,
}

impl TextureStreamingManager {
    /// Create a manager with the default codecs and start its worker.
    pub fn new(
        backend: Box<dyn GpuBackend>,
        resources: ResourceGroups,
        config: StreamingConfig,
    ) -> Result<Self, StreamingError> {
        Self::with_codecs(
            backend,
            resources,
            CodecRegistry::with_default_codecs(),
            config,
        )
    }

    /// Create a manager decoding with `codecs`.
    pub fn with_codecs(
        backend: Box<dyn GpuBackend>,
        resources: ResourceGroups,
        codecs: CodecRegistry,
        config: StreamingConfig,
    ) -> Result<Self, StreamingError> {
        config.validate()?;

        let metadata_cache = match &config.metadata_cache_path {
            Some(path) => MetadataCache::load(path).unwrap_or_else(|e| {
                log::warn!(
                    "Ignoring unreadable metadata cache {}: {}",
                    path.display(),
                    e
                );
                MetadataCache::new()
            }),
            None => MetadataCache::new(),
        };

        let codecs = Arc::new(codecs);
        let shared = Arc::new(Shared::new());
        let worker =
            Worker::new(shared.clone(), resources.clone(), codecs.clone(), &config)?.spawn()?;
        let minimum_budget = config.sorted_minimum_budget(backend.staging_row_alignment());

        log::info!(
            "Texture streaming started on {} ({} decode threads, {} codecs)",
            backend.name(),
            if config.no_reorder { 0 } else { config.decode_threads },
            codecs.len()
        );

        Ok(Self {
            staging: StagingPool::new(config.staging_max_budget_bytes),
            texture_pools: TexturePools::new(config.texture_pool_slices),
            backend,
            resources,
            codecs,
            minimum_budget,
            shared,
            worker: Some(worker),
            owner: std::thread::current().id(),
            textures: Arena::new(),
            names: HashMap::new(),
            metadata_cache,
            main_used: Vec::new(),
            spare_commands: Vec::new(),
            try_lock_failures: 0,
            is_done: true,
            stats: StreamingStats::default(),
            config,
        })
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    pub fn backend(&self) -> &dyn GpuBackend {
        &*self.backend
    }

    /// Resource groups the worker reads from. Locations added later are
    /// visible to the worker right away.
    pub fn resources(&self) -> &ResourceGroups {
        &self.resources
    }

    pub fn codecs(&self) -> &CodecRegistry {
        &self.codecs
    }

    pub fn metadata_cache(&self) -> &MetadataCache {
        &self.metadata_cache
    }

    /// Write the metadata cache to the configured path.
    pub fn save_metadata_cache(&mut self) -> Result<(), StreamingError> {
        let path = self.config.metadata_cache_path.clone().ok_or_else(|| {
            StreamingError::InvalidConfig("no metadata_cache_path configured".into())
        })?;
        self.metadata_cache.save(&path)
    }

    // ---- texture objects ----

    /// Create a texture. `alias` defaults to `name` when empty; an empty
    /// `group` means the default resource group.
    pub fn create_texture(
        &mut self,
        name: &str,
        alias: &str,
        page_out: PageOutStrategy,
        flags: TextureFlags,
        kind: TextureKind,
        group: &str,
    ) -> Result<TextureHandle, StreamingError> {
        self.assert_owner_thread();
        if name.is_empty() {
            return Err(StreamingError::InvalidParameter(
                "texture name must not be empty".into(),
            ));
        }
        if self.names.contains_key(name) {
            return Err(StreamingError::DuplicateName(name.to_owned()));
        }
        let alias = if alias.is_empty() { name } else { alias };
        let handle = self.textures.insert_with(|handle| {
            TextureObject::new(
                handle,
                name.to_owned(),
                alias.to_owned(),
                page_out,
                flags,
                kind,
                group.to_owned(),
            )
        });
        self.names.insert(name.to_owned(), handle);
        log::debug!("Created texture '{name}' {handle}");
        Ok(handle)
    }

    /// Return the texture called `name`, creating it if needed. The other
    /// arguments only apply to a newly created texture.
    pub fn create_or_retrieve_texture(
        &mut self,
        name: &str,
        alias: &str,
        page_out: PageOutStrategy,
        flags: TextureFlags,
        kind: TextureKind,
        group: &str,
    ) -> Result<TextureHandle, StreamingError> {
        match self.names.get(name) {
            Some(&handle) => Ok(handle),
            None => self.create_texture(name, alias, page_out, flags, kind, group),
        }
    }

    pub fn find_texture(&self, name: &str) -> Option<TextureHandle> {
        self.names.get(name).copied()
    }

    pub fn texture(&self, handle: TextureHandle) -> Option<&TextureObject> {
        self.textures.get(handle)
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn texture_handles(&self) -> Vec<TextureHandle> {
        self.textures.handles()
    }

    /// Describe a texture that is still on storage, e.g. a manual texture
    /// before it becomes resident.
    pub fn set_texture_metadata(
        &mut self,
        handle: TextureHandle,
        metadata: TextureMetadata,
    ) -> Result<(), StreamingError> {
        let obj = self.object_mut(handle)?;
        if obj.residency != Residency::OnStorage || obj.has_pending_work() {
            return Err(StreamingError::InvalidParameter(format!(
                "metadata of '{}' can only change while it is idle on storage",
                obj.name()
            )));
        }
        if !metadata.is_valid() {
            return Err(StreamingError::InvalidParameter(format!(
                "invalid metadata {metadata:?}"
            )));
        }
        obj.metadata = metadata;
        obj.metadata_ready = true;
        Ok(())
    }

    /// Choose the batching pool of a texture that is still on storage.
    pub fn set_pool_id(&mut self, handle: TextureHandle, pool_id: u32) -> Result<(), StreamingError> {
        let obj = self.object_mut(handle)?;
        if obj.residency != Residency::OnStorage {
            return Err(StreamingError::InvalidParameter(format!(
                "pool id of '{}' can only change while it is on storage",
                obj.name()
            )));
        }
        obj.pool_id = pool_id;
        Ok(())
    }

    pub fn add_listener(
        &mut self,
        handle: TextureHandle,
        listener: Weak<dyn TextureListener>,
    ) -> Result<(), StreamingError> {
        self.object_mut(handle)?.listeners.add(listener);
        Ok(())
    }

    /// Returns true if the listener was registered.
    pub fn remove_listener(
        &mut self,
        handle: TextureHandle,
        listener: &Weak<dyn TextureListener>,
    ) -> Result<bool, StreamingError> {
        Ok(self.object_mut(handle)?.listeners.remove(listener))
    }

    // ---- scheduling ----

    /// Queue a residency transition. It starts right away if the texture
    /// is idle, otherwise after the tasks queued before it.
    pub fn schedule_transition_to(
        &mut self,
        handle: TextureHandle,
        task: TransitionTask,
    ) -> Result<(), StreamingError> {
        self.assert_owner_thread();
        let obj = self.object_mut(handle)?;
        let starts_now = !obj.has_pending_work();
        if starts_now {
            check_transition(obj, &task)?;
        }
        obj.tasks.push_back(task.into());
        let started = self.run_tasks(handle);
        // a task queued behind others fails through the listeners only
        if starts_now { started } else { Ok(()) }
    }

    /// Shorthand for [`schedule_transition_to`](Self::schedule_transition_to)
    /// without an image.
    pub fn schedule_transition(
        &mut self,
        handle: TextureHandle,
        target: Residency,
    ) -> Result<(), StreamingError> {
        self.schedule_transition_to(handle, TransitionTask::new(target))
    }

    /// Load `source_name` from `group` into the texture and make it
    /// resident. Content already loaded from another source is dropped
    /// first. An empty `group` keeps the texture's group.
    pub fn schedule_load(
        &mut self,
        handle: TextureHandle,
        source_name: &str,
        group: &str,
        filters: TextureFilters,
    ) -> Result<(), StreamingError> {
        let obj = self.object(handle)?;
        let group = if group.is_empty() {
            obj.resource_group().to_owned()
        } else {
            group.to_owned()
        };
        let task = TransitionTask::new(Residency::Resident).with_source(SourceOverride {
            name: source_name.to_owned(),
            group,
            filters,
        });
        self.schedule_transition_to(handle, task)
    }

    /// Destroy the texture once the tasks queued on it have run.
    pub fn schedule_destroy(&mut self, handle: TextureHandle) -> Result<(), StreamingError> {
        self.assert_owner_thread();
        self.object_mut(handle)?
            .tasks
            .push_back(ScheduledTask::Destroy(DestroyTask));
        self.run_tasks(handle)
    }

    /// Destroy a texture now. Work in flight for it is dropped and its
    /// listeners get [`ResidencyReason::Deleted`].
    pub fn destroy_texture(&mut self, handle: TextureHandle) -> Result<(), StreamingError> {
        self.assert_owner_thread();
        if !self.textures.contains(handle) {
            return Err(StreamingError::InvalidHandle(handle));
        }
        self.destroy_now(handle);
        Ok(())
    }

    // ---- frame loop ----

    /// Apply the worker's results, recycle staging memory and hand the
    /// worker fresh buffers. Call once per frame. With `sync` the call waits
    /// for the worker's lock instead of skipping the frame when it is busy.
    ///
    /// Returns true when nothing is left to stream.
    pub fn update(&mut self, sync: bool) -> bool {
        self.assert_owner_thread();
        profile_scope!("texture_streaming_update");
        self.stats.updates += 1;

        let shared = self.shared.clone();
        let guard = if sync {
            Some(shared.streaming.lock())
        } else {
            match shared.streaming.try_lock() {
                Some(guard) => Some(guard),
                None => {
                    self.try_lock_failures += 1;
                    if self.try_lock_failures >= self.config.try_lock_failure_limit {
                        log::debug!(
                            "Worker held the lock for {} updates; blocking",
                            self.try_lock_failures
                        );
                        Some(shared.streaming.lock())
                    } else {
                        None
                    }
                }
            }
        };
        let Some(mut guard) = guard else {
            self.stats.skipped_updates += 1;
            self.is_done = false;
            return false;
        };
        self.try_lock_failures = 0;

        let worker_idle = {
            let state: &mut StreamingState = &mut guard;
            std::mem::swap(&mut self.spare_commands, &mut state.commands);
            self.main_used.append(&mut state.worker_used);
            self.staging.fulfill_budget(
                &*self.backend,
                &mut state.streaming_buffers,
                &mut state.prev_usage_stats,
                &self.minimum_budget,
                self.config.max_bytes_per_staging_request,
            );
            state.bytes_preloaded = 0;
            state.is_idle()
        };
        drop(guard);

        for buffer in &mut self.main_used {
            if let Err(e) = self.staging.unmap(&*self.backend, buffer) {
                log::error!("Failed to unmap staging buffer #{}: {}", buffer.id(), e);
            }
        }
        self.staging.trim_idle(&*self.backend);

        let mut commands = std::mem::take(&mut self.spare_commands);
        for command in commands.drain(..) {
            self.execute(command);
        }
        self.spare_commands = commands;

        for buffer in std::mem::take(&mut self.main_used) {
            self.staging.release(&*self.backend, buffer);
        }
        self.staging.enforce_budget(&*self.backend);
        profile_plot!("staging_available_bytes", self.staging.available_bytes());

        self.poll_readbacks();
        for handle in self.textures.handles() {
            // failures were already sent to the texture's listeners
            let _ = self.run_tasks(handle);
        }

        let inbox_empty = self.shared.inbox.lock().is_empty();
        let busy = self.textures.iter().any(|(_, obj)| obj.has_pending_work());
        self.is_done = worker_idle && inbox_empty && !busy;
        self.shared.worker_event.wake();
        frame_mark!();
        self.is_done
    }

    /// Result of the last [`update`](Self::update).
    pub fn is_done(&self) -> bool {
        self.is_done
    }

    /// Run `update` until everything scheduled has finished.
    pub fn wait_for_streaming_completion(&mut self) {
        profile_scope!("wait_for_streaming_completion");
        let timeout = Duration::from_millis(self.config.wait_timeout_ms);
        while !self.update(true) {
            self.stall_on_readbacks();
            self.shared.main_event.wait_timeout(timeout);
        }
    }

    /// Run `update` until the texture's metadata (or all of its pending
    /// work) is done.
    pub fn wait_for(&mut self, handle: TextureHandle, metadata_only: bool) -> Result<(), StreamingError> {
        profile_scope!("wait_for");
        let timeout = Duration::from_millis(self.config.wait_timeout_ms);
        loop {
            let obj = self.object(handle)?;
            let ready = !obj.has_pending_work() || (metadata_only && obj.is_metadata_ready());
            if ready {
                return Ok(());
            }
            if self.update(true) {
                continue;
            }
            self.stall_on_readbacks();
            self.shared.main_event.wait_timeout(timeout);
        }
    }

    // ---- staging for callers ----

    /// Get a mapped staging buffer to fill manually. Give it back with
    /// [`release_staging_buffer`](Self::release_staging_buffer).
    pub fn get_staging_buffer(
        &mut self,
        width: u32,
        height: u32,
        depth: u32,
        num_slices: u32,
        format: PixelFormat,
        min_fill_ratio: u32,
    ) -> Result<StagingBuffer, StreamingError> {
        self.assert_owner_thread();
        let mut buffer = self.staging.acquire(
            &*self.backend,
            width,
            height,
            depth,
            num_slices,
            format,
            min_fill_ratio,
        )?;
        if let Err(e) = self.staging.map(&*self.backend, &mut buffer) {
            self.staging.release(&*self.backend, buffer);
            return Err(e.into());
        }
        Ok(buffer)
    }

    pub fn release_staging_buffer(&mut self, buffer: StagingBuffer) {
        self.assert_owner_thread();
        self.staging.release(&*self.backend, buffer);
    }

    /// Copy a filled region of `buffer` into a resident texture. The buffer
    /// is unmapped first, so map every region before the first upload.
    pub fn upload_from_staging(
        &mut self,
        buffer: &mut StagingBuffer,
        region: &StagingRegion,
        handle: TextureHandle,
        mip: u8,
        origin: TextureOrigin,
    ) -> Result<(), StreamingError> {
        self.assert_owner_thread();
        self.staging.unmap(&*self.backend, buffer)?;
        let obj = self.object(handle)?;
        if mip >= obj.mip_count() {
            return Err(StreamingError::InvalidParameter(format!(
                "mip {mip} of '{}' which has {} mips",
                obj.name(),
                obj.mip_count()
            )));
        }
        let (texture, slice) = storage_location(&obj.storage, &self.texture_pools)
            .ok_or_else(|| no_storage(obj))?;
        self.backend.copy_staging_to_texture(
            buffer.gpu(),
            &region.layout(),
            texture,
            &TextureCopyLocation::new(mip, origin.offset_z(slice)),
            region.extent(),
        )?;
        self.stats.uploads += 1;
        self.stats.bytes_uploaded += region.size_bytes as u64;
        Ok(())
    }

    /// Read one mip of a resident texture back to the host, stalling until
    /// the GPU is done. Bytes follow the [`Image`] mip layout.
    pub fn read_texture_contents(
        &mut self,
        handle: TextureHandle,
        mip: u8,
    ) -> Result<Vec<u8>, StreamingError> {
        self.assert_owner_thread();
        let obj = self.object(handle)?;
        let (texture, slice) = storage_location(&obj.storage, &self.texture_pools)
            .ok_or_else(|| no_storage(obj))?;
        let num_slices = obj.metadata.num_slices();
        let ticket = self.backend.create_readback(texture, mip, slice, num_slices)?;
        self.backend.wait_for_frame(self.backend.frame_count());
        Ok(self.backend.read_readback(ticket)?)
    }

    pub fn stats(&self) -> StreamingStats {
        let mut stats = self.stats;
        stats.textures = self.textures.len();
        stats.resident_textures = self
            .textures
            .iter()
            .filter(|(_, obj)| obj.residency == Residency::Resident)
            .count();
        stats.active_transitions = self
            .textures
            .iter()
            .filter(|(_, obj)| obj.in_flight.is_some())
            .count();
        stats.metadata_cache_entries = self.metadata_cache.len();
        stats.available_staging_bytes = self.staging.available_bytes();
        stats.available_staging_buffers = self.staging.available_len();
        stats.staging = self.staging.stats();
        stats.texture_pools = self.texture_pools.len();
        stats
    }

    // ---- internals ----

    fn assert_owner_thread(&self) {
        debug_assert_eq!(
            std::thread::current().id(),
            self.owner,
            "TextureStreamingManager used off the thread that created it"
        );
    }

    fn object(&self, handle: TextureHandle) -> Result<&TextureObject, StreamingError> {
        self.textures
            .get(handle)
            .ok_or(StreamingError::InvalidHandle(handle))
    }

    fn object_mut(&mut self, handle: TextureHandle) -> Result<&mut TextureObject, StreamingError> {
        self.textures
            .get_mut(handle)
            .ok_or(StreamingError::InvalidHandle(handle))
    }

    fn notify(&mut self, handle: TextureHandle, reason: ResidencyReason) {
        let Some(obj) = self.textures.get_mut(handle) else {
            return;
        };
        log::trace!("{} '{}': {:?}", handle, obj.name(), reason);
        for listener in obj.listeners.snapshot() {
            listener.on_residency_changed(handle, reason);
        }
    }

    fn notify_error(&mut self, handle: TextureHandle, error: &LoadError) {
        let Some(obj) = self.textures.get_mut(handle) else {
            return;
        };
        for listener in obj.listeners.snapshot() {
            listener.on_load_error(handle, error);
        }
    }

    /// Start queued tasks until one of them leaves work in flight.
    ///
    /// A transition that cannot start is reported to the listeners as a
    /// [`LoadError::Storage`] and the next task runs. Returns the first such
    /// failure.
    fn run_tasks(&mut self, handle: TextureHandle) -> Result<(), StreamingError> {
        let mut first_error = None;
        loop {
            let Some(obj) = self.textures.get_mut(handle) else {
                break;
            };
            if obj.in_flight.is_some() {
                break;
            }
            let Some(task) = obj.tasks.pop_front() else {
                break;
            };
            match task {
                ScheduledTask::Destroy(_) => {
                    self.destroy_now(handle);
                    break;
                }
                ScheduledTask::Transition(task) => {
                    let target = task.target;
                    if let Err(e) = self.begin_transition(handle, task) {
                        self.fail_transition(handle, target, &e);
                        first_error.get_or_insert(e);
                    }
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn fail_transition(&mut self, handle: TextureHandle, target: Residency, e: &StreamingError) {
        let name = self
            .textures
            .get(handle)
            .map(|o| o.name().to_owned())
            .unwrap_or_default();
        log::error!("Transition of '{name}' {handle} to {target:?} failed: {e}");
        let error = LoadError::Storage {
            name,
            reason: e.to_string(),
        };
        self.stats.load_failures += 1;
        self.notify_error(handle, &error);
    }

    fn begin_transition(
        &mut self,
        handle: TextureHandle,
        task: TransitionTask,
    ) -> Result<(), StreamingError> {
        let obj = self.object_mut(handle)?;
        check_transition(obj, &task)?;

        if let Some(source) = &task.source {
            let changed = obj.source_name() != source.name
                || obj.resource_group != source.group
                || obj.filters != source.filters;
            if changed {
                if obj.residency != Residency::OnStorage {
                    log::debug!("Reloading '{}' from '{}'", obj.name(), source.name);
                    self.release_content(handle);
                }
                let obj = self.object_mut(handle)?;
                obj.source_name = Some(source.name.clone());
                obj.resource_group = source.group.clone();
                obj.filters = source.filters;
            }
        }

        let current = self.object(handle)?.residency;
        let target = task.target;
        if current == target && task.image.is_none() {
            log::trace!("{handle} already {target:?}");
            return Ok(());
        }

        match (current, target) {
            (_, Residency::OnStorage) => {
                self.release_content(handle);
                Ok(())
            }
            (Residency::OnStorage, Residency::Resident) => self.load_to_resident(handle, task),
            (Residency::OnStorage, Residency::OnSystemRam) => self.load_to_sysram(handle, task),
            (Residency::OnSystemRam, Residency::Resident) => self.upload_host_copy(handle, task),
            (Residency::Resident, Residency::OnSystemRam) => self.page_out_to_sysram(handle, task),
            (Residency::Resident, Residency::Resident) => {
                // new content for a resident texture
                self.release_content(handle);
                self.load_to_resident(handle, task)
            }
            (Residency::OnSystemRam, Residency::OnSystemRam) => self.load_to_sysram(handle, task),
        }
    }

    /// OnStorage -> Resident.
    fn load_to_resident(
        &mut self,
        handle: TextureHandle,
        task: TransitionTask,
    ) -> Result<(), StreamingError> {
        let obj = self
            .textures
            .get_mut(handle)
            .ok_or(StreamingError::InvalidHandle(handle))?;
        let mut keep_host_copy = obj.page_out == PageOutStrategy::AlwaysKeepSystemRamCopy;

        let source = match task.image {
            Some(image) => {
                keep_host_copy |= !task.auto_delete;
                LoadSource::Image(Arc::new(image))
            }
            None if obj.is_manual() => {
                self.create_storage(handle)?;
                let obj = self.object_mut(handle)?;
                obj.data_ready = true;
                self.notify(handle, ResidencyReason::ReadyForRendering);
                return Ok(());
            }
            None => file_source(obj),
        };

        if !matches!(source, LoadSource::Image(_))
            && let Some(cached) = self.metadata_cache.get(obj.name()).copied()
        {
            let hint = cached.metadata();
            let (format, mip_count) = filters::simulate(
                obj.filters,
                obj.prefers_srgb(),
                hint.width,
                hint.height,
                hint.depth(),
                hint.kind,
                hint.format,
                hint.mip_count,
            );
            let predicted = TextureMetadata {
                format,
                mip_count,
                ..hint
            };
            let name = obj.name().to_owned();
            if predicted.is_valid() {
                let (previous, previous_pool) = (obj.metadata, obj.pool_id);
                obj.metadata = predicted;
                if obj.pool_id == 0 {
                    obj.pool_id = cached.pool_id;
                }
                match self.create_storage(handle) {
                    Ok(()) => {
                        log::trace!("Metadata cache hit for '{name}'");
                        self.stats.metadata_cache_hits += 1;
                    }
                    Err(e) => {
                        // decode the file instead; the entry is rewritten afterwards
                        log::warn!("Ignoring cached metadata for '{name}': {e}");
                        self.metadata_cache.remove(&name);
                        let obj = self.object_mut(handle)?;
                        obj.metadata = previous;
                        obj.pool_id = previous_pool;
                    }
                }
            } else {
                log::warn!("Ignoring invalid cached metadata for '{name}': {predicted:?}");
                self.metadata_cache.remove(&name);
            }
        }

        let request = self.load_request(handle, source, Residency::Resident, keep_host_copy)?;
        self.begin_in_flight(handle, Residency::Resident);
        self.enqueue(request);
        Ok(())
    }

    /// OnStorage -> OnSystemRam.
    fn load_to_sysram(
        &mut self,
        handle: TextureHandle,
        task: TransitionTask,
    ) -> Result<(), StreamingError> {
        let obj = self.object_mut(handle)?;
        if let Some(image) = task.image {
            obj.metadata = TextureMetadata::from_image(&image);
            obj.metadata_ready = true;
            obj.host_copy = Some(Arc::new(image));
            obj.residency = Residency::OnSystemRam;
            self.notify(handle, ResidencyReason::FromStorageToSysRam);
            return Ok(());
        }
        let source = file_source(obj);
        let request = self.load_request(handle, source, Residency::OnSystemRam, true)?;
        self.begin_in_flight(handle, Residency::OnSystemRam);
        self.enqueue(request);
        Ok(())
    }

    /// OnSystemRam -> Resident: upload the host copy.
    fn upload_host_copy(
        &mut self,
        handle: TextureHandle,
        task: TransitionTask,
    ) -> Result<(), StreamingError> {
        let obj = self.object_mut(handle)?;
        let mut keep_host_copy = obj.page_out == PageOutStrategy::AlwaysKeepSystemRamCopy;
        let image = match task.image {
            Some(image) => {
                keep_host_copy |= !task.auto_delete;
                Arc::new(image)
            }
            None => obj
                .host_copy
                .clone()
                .ok_or_else(|| StreamingError::MissingMetadata(obj.name().to_owned()))?,
        };
        let request =
            self.load_request(handle, LoadSource::Image(image), Residency::Resident, keep_host_copy)?;
        self.begin_in_flight(handle, Residency::Resident);
        self.enqueue(request);
        Ok(())
    }

    /// Resident -> OnSystemRam.
    fn page_out_to_sysram(
        &mut self,
        handle: TextureHandle,
        task: TransitionTask,
    ) -> Result<(), StreamingError> {
        let obj = self
            .textures
            .get_mut(handle)
            .ok_or(StreamingError::InvalidHandle(handle))?;

        if obj.host_copy.is_some()
            && (obj.page_out == PageOutStrategy::AlwaysKeepSystemRamCopy || task.resync_only)
        {
            release_storage(&*self.backend, &mut self.texture_pools, &mut obj.storage);
            obj.residency = Residency::OnSystemRam;
            obj.data_ready = false;
            self.notify(handle, ResidencyReason::LostResidency);
            return Ok(());
        }

        if obj.page_out == PageOutStrategy::Discard && !obj.is_manual() {
            release_storage(&*self.backend, &mut self.texture_pools, &mut obj.storage);
            obj.residency = Residency::OnStorage;
            obj.data_ready = false;
            obj.host_copy = None;
            self.notify(handle, ResidencyReason::LostResidency);
            return self.load_to_sysram(handle, TransitionTask::new(Residency::OnSystemRam));
        }

        let (texture, slice) = storage_location(&obj.storage, &self.texture_pools)
            .ok_or_else(|| no_storage(obj))?;
        let meta = obj.metadata;
        let image = Image::new_zeroed(
            meta.width,
            meta.height,
            meta.depth_or_slices,
            meta.kind,
            meta.format,
            meta.mip_count,
        )?;
        let mut tickets = Vec::with_capacity(meta.mip_count as usize);
        for mip in 0..meta.mip_count {
            tickets.push((
                mip,
                self.backend
                    .create_readback(texture, mip, slice, meta.num_slices())?,
            ));
        }
        obj.readback = Some(PendingReadback {
            frame: self.backend.frame_count(),
            tickets,
            image,
        });
        log::debug!("Reading back '{}' ({} mips)", obj.name(), meta.mip_count);
        self.begin_in_flight(handle, Residency::OnSystemRam);
        Ok(())
    }

    /// Drop GPU storage and host copy; the texture ends up on storage.
    fn release_content(&mut self, handle: TextureHandle) {
        let Some(obj) = self.textures.get_mut(handle) else {
            return;
        };
        let was = obj.residency;
        release_storage(&*self.backend, &mut self.texture_pools, &mut obj.storage);
        obj.host_copy = None;
        obj.data_ready = false;
        obj.residency = Residency::OnStorage;
        if was != Residency::OnStorage {
            self.notify(handle, ResidencyReason::LostResidency);
        }
    }

    /// Allocate GPU storage from the texture's metadata and make it resident.
    fn create_storage(&mut self, handle: TextureHandle) -> Result<(), StreamingError> {
        self.allocate_storage(handle)?;
        self.notify(handle, ResidencyReason::GainedResidency);
        Ok(())
    }

    fn allocate_storage(&mut self, handle: TextureHandle) -> Result<(), StreamingError> {
        let obj = self
            .textures
            .get_mut(handle)
            .ok_or(StreamingError::InvalidHandle(handle))?;
        if !obj.metadata.is_valid() {
            return Err(StreamingError::MissingMetadata(obj.name().to_owned()));
        }
        let storage = if obj.wants_pool() {
            let (pool, slice) =
                self.texture_pools
                    .reserve(&*self.backend, &obj.metadata, obj.pool_id)?;
            GpuStorage::Pooled { pool, slice }
        } else {
            let texture = self
                .backend
                .create_texture(&obj.metadata.descriptor(obj.name()))?;
            GpuStorage::Owned(texture)
        };
        release_storage(&*self.backend, &mut self.texture_pools, &mut obj.storage);
        obj.storage = storage;
        obj.residency = Residency::Resident;
        obj.metadata_ready = true;
        Ok(())
    }

    fn load_request(
        &self,
        handle: TextureHandle,
        source: LoadSource,
        target: Residency,
        keep_host_copy: bool,
    ) -> Result<LoadRequest, StreamingError> {
        let obj = self.object(handle)?;
        Ok(LoadRequest {
            texture: handle,
            source,
            group: obj.resource_group.clone(),
            filters: obj.filters,
            prefer_srgb: obj.prefers_srgb(),
            target,
            fallback_kind: obj.metadata.kind,
            keep_host_copy,
        })
    }

    fn enqueue(&mut self, request: LoadRequest) {
        log::trace!(
            "Requesting '{}' for {} ({:?})",
            request.source.describe(),
            request.texture,
            request.target
        );
        self.shared.inbox.lock().push(request);
        self.shared.worker_event.wake();
        self.stats.loads_scheduled += 1;
    }

    fn begin_in_flight(&mut self, handle: TextureHandle, target: Residency) {
        if let Some(obj) = self.textures.get_mut(handle) {
            let concurrent = 1 + u32::from(obj.in_flight.is_some());
            self.stats.peak_transitions_per_texture =
                self.stats.peak_transitions_per_texture.max(concurrent);
            debug_assert!(obj.in_flight.is_none(), "two transitions in flight on {handle}");
            obj.in_flight = Some(target);
            self.stats.transitions_started += 1;
        }
    }

    fn end_in_flight(&mut self, handle: TextureHandle) {
        if let Some(obj) = self.textures.get_mut(handle)
            && obj.in_flight.take().is_some()
        {
            self.stats.transitions_completed += 1;
        }
    }

    fn destroy_now(&mut self, handle: TextureHandle) {
        {
            let mut state = self.shared.streaming.lock();
            state.cancel(handle);
        }
        self.shared.inbox.lock().retain(|r| r.texture != handle);

        self.notify(handle, ResidencyReason::Deleted);
        let Some(mut obj) = self.textures.remove(handle) else {
            return;
        };
        release_storage(&*self.backend, &mut self.texture_pools, &mut obj.storage);
        if let Some(readback) = obj.readback.take() {
            for (_, ticket) in readback.tickets {
                if self.backend.is_readback_ready(&ticket) {
                    let _ = self.backend.read_readback(ticket);
                }
            }
        }
        self.names.remove(obj.name());
        log::debug!("Destroyed texture '{}' {}", obj.name(), handle);
    }

    fn execute(&mut self, command: Command) {
        let handle = command.texture();
        let Some(obj) = self.textures.get(handle) else {
            log::trace!("Dropping command for destroyed texture {handle}");
            return;
        };
        let in_flight = obj.in_flight;

        match command {
            Command::LoadFailed { error, .. } => {
                self.stats.load_failures += 1;
                self.notify_error(handle, &error);
            }
            Command::TransferFailed { error, .. } => {
                if in_flight != Some(Residency::Resident) {
                    return;
                }
                self.stats.load_failures += 1;
                self.notify_error(handle, &error);
                self.release_content(handle);
                self.end_in_flight(handle);
            }
            Command::TransitionToResident {
                metadata,
                source_metadata,
                host_copy,
                cacheable,
                ..
            } => {
                if in_flight != Some(Residency::Resident) {
                    return;
                }
                if let Err(e) =
                    self.apply_resident_metadata(handle, metadata, source_metadata, host_copy, cacheable)
                {
                    let name = self.textures.get(handle).map(|o| o.name().to_owned());
                    let name = name.unwrap_or_default();
                    log::error!("Could not create storage for '{name}': {e}");
                    let error = LoadError::Storage {
                        name,
                        reason: e.to_string(),
                    };
                    self.stats.load_failures += 1;
                    self.notify_error(handle, &error);
                    self.end_in_flight(handle);
                }
            }
            Command::Upload {
                staging_id,
                region,
                mip,
                origin,
                ..
            } => {
                if in_flight != Some(Residency::Resident) {
                    return;
                }
                self.apply_upload(handle, staging_id, &region, mip, origin);
            }
            Command::NotifyDataReady { .. } => {
                if in_flight != Some(Residency::Resident) {
                    return;
                }
                if let Some(obj) = self.textures.get_mut(handle) {
                    obj.data_ready = true;
                }
                self.stats.loads_completed += 1;
                self.end_in_flight(handle);
                self.notify(handle, ResidencyReason::ReadyForRendering);
            }
            Command::TransitionToSysRam {
                image,
                source_metadata,
                cacheable,
                ..
            } => {
                if in_flight != Some(Residency::OnSystemRam) {
                    return;
                }
                if let Some(obj) = self.textures.get_mut(handle) {
                    if cacheable {
                        self.metadata_cache.insert(
                            obj.name(),
                            CachedMetadata::new(&source_metadata, obj.pool_id),
                        );
                    }
                    obj.metadata = TextureMetadata::from_image(&image);
                    obj.metadata_ready = true;
                    obj.host_copy = Some(image);
                    obj.residency = Residency::OnSystemRam;
                }
                self.stats.loads_completed += 1;
                self.end_in_flight(handle);
                self.notify(handle, ResidencyReason::FromStorageToSysRam);
            }
        }
    }

    fn apply_resident_metadata(
        &mut self,
        handle: TextureHandle,
        metadata: TextureMetadata,
        source_metadata: TextureMetadata,
        host_copy: Option<Arc<Image>>,
        cacheable: bool,
    ) -> Result<(), StreamingError> {
        let obj = self
            .textures
            .get_mut(handle)
            .ok_or(StreamingError::InvalidHandle(handle))?;
        if cacheable {
            self.metadata_cache.insert(
                obj.name(),
                CachedMetadata::new(&source_metadata, obj.pool_id),
            );
        }
        obj.host_copy = host_copy;

        if obj.has_gpu_storage() {
            if obj.metadata == metadata {
                return Ok(());
            }
            log::warn!(
                "Metadata cache out of date for '{}': expected {:?}, got {:?}",
                obj.name(),
                obj.metadata,
                metadata
            );
            obj.metadata = metadata;
            self.stats.metadata_cache_mismatches += 1;
            self.allocate_storage(handle)?;
            self.notify(handle, ResidencyReason::MetadataCacheOutOfDate);
            return Ok(());
        }

        obj.metadata = metadata;
        self.create_storage(handle)
    }

    fn apply_upload(
        &mut self,
        handle: TextureHandle,
        staging_id: u64,
        region: &StagingRegion,
        mip: u8,
        origin: TextureOrigin,
    ) {
        let Some(buffer) = self.main_used.iter().find(|b| b.id() == staging_id) else {
            log::error!("Upload for {handle} references unknown staging buffer #{staging_id}");
            return;
        };
        let Some(obj) = self.textures.get(handle) else {
            return;
        };
        let Some((texture, slice)) = storage_location(&obj.storage, &self.texture_pools) else {
            log::warn!("Dropping upload for '{}': no GPU storage", obj.name());
            return;
        };
        match self.backend.copy_staging_to_texture(
            buffer.gpu(),
            &region.layout(),
            texture,
            &TextureCopyLocation::new(mip, origin.offset_z(slice)),
            region.extent(),
        ) {
            Ok(()) => {
                self.stats.uploads += 1;
                self.stats.bytes_uploaded += region.size_bytes as u64;
            }
            Err(e) => log::error!("Upload of mip {} of '{}' failed: {}", mip, obj.name(), e),
        }
    }

    /// Finish readbacks whose frame the GPU completed.
    fn poll_readbacks(&mut self) {
        let pending: Vec<TextureHandle> = self
            .textures
            .iter()
            .filter(|(_, obj)| obj.readback.is_some())
            .map(|(handle, _)| handle)
            .collect();

        for handle in pending {
            let Some(obj) = self.textures.get_mut(handle) else {
                continue;
            };
            let ready = obj.readback.as_ref().is_some_and(|readback| {
                readback
                    .tickets
                    .iter()
                    .all(|(_, ticket)| self.backend.is_readback_ready(ticket))
            });
            if !ready {
                continue;
            }
            let Some(readback) = obj.readback.take() else {
                continue;
            };

            match collect_readback(&*self.backend, readback) {
                Ok(image) => {
                    release_storage(&*self.backend, &mut self.texture_pools, &mut obj.storage);
                    obj.host_copy = Some(Arc::new(image));
                    obj.residency = Residency::OnSystemRam;
                    obj.data_ready = false;
                    self.end_in_flight(handle);
                    self.notify(handle, ResidencyReason::LostResidency);
                }
                Err(e) => {
                    log::error!("Readback of '{}' failed: {}", obj.name(), e);
                    self.end_in_flight(handle);
                }
            }
        }
    }

    fn stall_on_readbacks(&self) {
        for (_, obj) in self.textures.iter() {
            if let Some(readback) = &obj.readback {
                self.backend.wait_for_frame(readback.frame);
            }
        }
    }
}

impl Drop for TextureStreamingManager {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.worker_event.wake();
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            log::error!("Streaming worker panicked");
        }

        if let Some(path) = self.config.metadata_cache_path.clone()
            && self.metadata_cache.is_dirty()
            && let Err(e) = self.metadata_cache.save(&path)
        {
            log::warn!("Could not save metadata cache: {e}");
        }

        let backend = &*self.backend;
        {
            let mut guard = self.shared.streaming.lock();
            let state: &mut StreamingState = &mut guard;
            for buffer in state.streaming_buffers.drain(..) {
                self.staging.destroy(backend, buffer);
            }
            for buffer in state.worker_used.drain(..) {
                self.staging.destroy(backend, buffer);
            }
        }
        for buffer in self.main_used.drain(..) {
            self.staging.destroy(backend, buffer);
        }
        self.staging.shutdown(backend);

        for handle in self.textures.handles() {
            if let Some(obj) = self.textures.get_mut(handle) {
                release_storage(backend, &mut self.texture_pools, &mut obj.storage);
            }
        }
        self.texture_pools.shutdown(backend);
        log::info!("Texture streaming stopped");
    }
}

/// Errors a transition can be rejected with before it starts.
fn check_transition(obj: &TextureObject, task: &TransitionTask) -> Result<(), StreamingError> {
    let manual_without_content = obj.is_manual()
        && task.image.is_none()
        && obj.host_copy.is_none()
        && obj.residency == Residency::OnStorage;
    match task.target {
        Residency::Resident if manual_without_content && !obj.metadata.is_valid() => {
            Err(StreamingError::MissingMetadata(obj.name().to_owned()))
        }
        Residency::OnSystemRam if manual_without_content => Err(StreamingError::InvalidParameter(
            format!("manual texture '{}' has no content to load", obj.name()),
        )),
        _ => Ok(()),
    }
}

/// The file(s) a texture loads from.
fn file_source(obj: &TextureObject) -> LoadSource {
    let source = obj.source_name();
    let container = codec::extension(source)
        .is_some_and(|ext| CUBEMAP_CONTAINER_EXTENSIONS.contains(&ext.as_str()));
    if obj.metadata.kind == TextureKind::TypeCube && !container {
        LoadSource::CubeFaces(Box::new(
            CUBEMAP_FACE_SUFFIXES.map(|suffix| name::with_suffix(source, suffix)),
        ))
    } else {
        LoadSource::File(source.to_owned())
    }
}

fn storage_location<'a>(
    storage: &'a GpuStorage,
    pools: &'a TexturePools,
) -> Option<(&'a GpuTexture, u32)> {
    match storage {
        GpuStorage::None => None,
        GpuStorage::Owned(texture) => Some((texture, 0)),
        GpuStorage::Pooled { pool, slice } => pools.texture(*pool).map(|t| (t, *slice)),
    }
}

fn release_storage(backend: &dyn GpuBackend, pools: &mut TexturePools, storage: &mut GpuStorage) {
    match std::mem::take(storage) {
        GpuStorage::None => {}
        GpuStorage::Owned(texture) => backend.destroy_texture(texture),
        GpuStorage::Pooled { pool, slice } => pools.release(backend, pool, slice),
    }
}

fn no_storage(obj: &TextureObject) -> StreamingError {
    StreamingError::InvalidParameter(format!("texture '{}' has no GPU storage", obj.name()))
}

/// Copy every finished readback into the image waiting for it.
fn collect_readback(
    backend: &dyn GpuBackend,
    readback: PendingReadback,
) -> Result<Image, StreamingError> {
    let PendingReadback {
        tickets, mut image, ..
    } = readback;
    for (mip, ticket) in tickets {
        let bytes = backend.read_readback(ticket)?;
        let offset = image.mip_offset(mip);
        let size = image.mip_size_bytes(mip);
        if bytes.len() != size {
            return Err(texstream_core::ImageError::SizeMismatch {
                expected: size,
                actual: bytes.len(),
            }
            .into());
        }
        image.data_mut()[offset..offset + size].copy_from_slice(&bytes);
    }
    Ok(image)
}
