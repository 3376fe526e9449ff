//! Common utilities for streaming integration tests.
//!
//! Every test runs the real manager and worker thread against the dummy
//! backend and an in-memory resource location.

#![allow(dead_code)]

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use texstream::{
    BudgetEntry, DummyBackend, Image, LoadError, PageOutStrategy, PixelFormat, ResidencyReason,
    StreamingConfig, TextureFlags, TextureHandle, TextureKind, TextureListener,
    TextureStreamingManager,
};
use texstream_core::{ImageCodec, OitdCodec};
use texstream_vfs::{MemoryProvider, ResourceGroups};

pub const MIB: usize = 1024 * 1024;

/// Updates a test pumps before giving up.
pub const MAX_UPDATES: usize = 10_000;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Small budgets so tests do not allocate the production defaults.
pub fn test_config() -> StreamingConfig {
    StreamingConfig::default()
        .with_minimum_budget(vec![BudgetEntry::new(PixelFormat::Rgba8Unorm, 64, 1)])
        .with_staging_max_budget_bytes(4 * MIB)
        .with_max_bytes_per_staging_request(MIB)
        .with_max_preload_bytes(16 * MIB)
        .with_max_split_resolution(256)
        .with_try_lock_failure_limit(4)
}

/// An Rgba8 image whose every byte is derived from `seed` and its offset.
pub fn pattern_image(
    width: u32,
    height: u32,
    depth_or_slices: u32,
    kind: TextureKind,
    mip_count: u8,
    seed: u8,
) -> Image {
    let mut image = Image::new_zeroed(
        width,
        height,
        depth_or_slices,
        kind,
        PixelFormat::Rgba8Unorm,
        mip_count,
    )
    .unwrap();
    for (i, byte) in image.data_mut().iter_mut().enumerate() {
        *byte = seed.wrapping_add((i % 251) as u8);
    }
    image
}

pub fn encode(image: &Image) -> Vec<u8> {
    OitdCodec.encode(image).unwrap()
}

/// Backend, resource location and the files in it.
pub struct Scene {
    pub backend: DummyBackend,
    pub files: MemoryProvider,
    pub resources: ResourceGroups,
}

impl Scene {
    pub fn new() -> Self {
        init_logging();
        let files = MemoryProvider::new();
        let resources = ResourceGroups::new();
        resources.add_location("General", files.clone());
        Self {
            backend: DummyBackend::new().with_frame_latency(1),
            files,
            resources,
        }
    }

    pub fn add(&self, name: &str, image: &Image) {
        self.files.insert(name, encode(image));
    }

    pub fn manager(&self, config: StreamingConfig) -> TextureStreamingManager {
        TextureStreamingManager::new(
            Box::new(self.backend.clone()),
            self.resources.clone(),
            config,
        )
        .unwrap()
    }
}

pub fn create_2d(manager: &mut TextureStreamingManager, name: &str) -> TextureHandle {
    manager
        .create_texture(
            name,
            "",
            PageOutStrategy::SaveToSystemRam,
            TextureFlags::empty(),
            TextureKind::Type2D,
            "",
        )
        .unwrap()
}

/// Run frames until the manager reports it is done.
/// Returns the number of updates it took.
pub fn pump(manager: &mut TextureStreamingManager, backend: &DummyBackend) -> usize {
    pump_with(manager, backend, |_, _| {})
}

/// Like [`pump`], calling `after_update` once per frame.
pub fn pump_with(
    manager: &mut TextureStreamingManager,
    backend: &DummyBackend,
    mut after_update: impl FnMut(&mut TextureStreamingManager, &DummyBackend),
) -> usize {
    for updates in 1..=MAX_UPDATES {
        let done = manager.update(false);
        after_update(manager, backend);
        backend.advance_frame();
        if done {
            return updates;
        }
        std::thread::sleep(Duration::from_micros(200));
    }
    panic!("streaming did not finish within {MAX_UPDATES} updates");
}

/// Listener that records everything it hears.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<(TextureHandle, ResidencyReason)>>,
    errors: Mutex<Vec<(TextureHandle, String)>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn weak(self: &Arc<Self>) -> Weak<dyn TextureListener> {
        let listener: Arc<dyn TextureListener> = self.clone();
        Arc::downgrade(&listener)
    }

    pub fn events(&self) -> Vec<(TextureHandle, ResidencyReason)> {
        self.events.lock().clone()
    }

    pub fn reasons(&self, texture: TextureHandle) -> Vec<ResidencyReason> {
        self.events
            .lock()
            .iter()
            .filter(|(t, _)| *t == texture)
            .map(|(_, r)| *r)
            .collect()
    }

    /// Textures in the order they became ready for rendering.
    pub fn ready_order(&self) -> Vec<TextureHandle> {
        self.events
            .lock()
            .iter()
            .filter(|(_, r)| *r == ResidencyReason::ReadyForRendering)
            .map(|(t, _)| *t)
            .collect()
    }

    pub fn errors(&self) -> Vec<(TextureHandle, String)> {
        self.errors.lock().clone()
    }
}

impl TextureListener for RecordingListener {
    fn on_residency_changed(&self, texture: TextureHandle, reason: ResidencyReason) {
        self.events.lock().push((texture, reason));
    }

    fn on_load_error(&self, texture: TextureHandle, error: &LoadError) {
        self.errors.lock().push((texture, error.resource_name().to_owned()));
    }
}
