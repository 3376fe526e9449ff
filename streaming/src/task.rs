//! Work queued on a texture behind the transition in flight.

use texstream_core::{Image, TextureFilters};

use crate::texture::Residency;

/// Where to load a texture from, replacing its current source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SourceOverride {
    pub name: String,
    pub group: String,
    pub filters: TextureFilters,
}

/// Move a texture to another residency.
#[derive(Debug)]
pub struct TransitionTask {
    pub(crate) target: Residency,
    pub(crate) image: Option<Image>,
    pub(crate) auto_delete: bool,
    pub(crate) resync_only: bool,
    pub(crate) source: Option<SourceOverride>,
}

impl TransitionTask {
    pub fn new(target: Residency) -> Self {
        Self {
            target,
            image: None,
            auto_delete: true,
            resync_only: false,
            source: None,
        }
    }

    /// Use `image` as the content instead of reading the source. With
    /// `auto_delete` off the image is kept as the texture's host copy.
    pub fn with_image(mut self, image: Image, auto_delete: bool) -> Self {
        self.image = Some(image);
        self.auto_delete = auto_delete;
        self
    }

    /// The host copy is already up to date; leaving the GPU needs no readback.
    pub fn resync_only(mut self) -> Self {
        self.resync_only = true;
        self
    }

    pub fn target(&self) -> Residency {
        self.target
    }

    pub(crate) fn with_source(mut self, source: SourceOverride) -> Self {
        self.source = Some(source);
        self
    }
}

/// Destroy the texture once the tasks before it ran.
#[derive(Debug, Default)]
pub struct DestroyTask;

/// A queued unit of per-texture work. Tasks run strictly one after another.
#[derive(Debug)]
pub enum ScheduledTask {
    Transition(TransitionTask),
    Destroy(DestroyTask),
}

impl From<TransitionTask> for ScheduledTask {
    fn from(task: TransitionTask) -> Self {
        ScheduledTask::Transition(task)
    }
}

impl From<DestroyTask> for ScheduledTask {
    fn from(task: DestroyTask) -> Self {
        ScheduledTask::Destroy(task)
    }
}
