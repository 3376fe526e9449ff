use std::sync::{Arc, Weak};

use crate::error::LoadError;
use crate::handle::TextureHandle;

/// Why a listener is being notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResidencyReason {
    /// GPU storage was allocated; metadata is known.
    GainedResidency,
    /// The texture's content arrived in system RAM.
    FromStorageToSysRam,
    /// GPU storage (or the host copy) was released.
    LostResidency,
    /// Every byte was uploaded; the texture can be sampled.
    ReadyForRendering,
    /// The metadata cache predicted the wrong shape; storage was rebuilt.
    MetadataCacheOutOfDate,
    /// The texture was destroyed. The handle is invalid from now on.
    Deleted,
}

/// Observer of a texture's lifecycle.
///
/// Listeners are held weakly and called on the main thread from inside
/// [`update`](crate::TextureStreamingManager::update) and the other
/// manager entry points.
pub trait TextureListener: Send + Sync {
    fn on_residency_changed(&self, texture: TextureHandle, reason: ResidencyReason);

    /// A load failed; the texture still becomes resident with a fallback image.
    fn on_load_error(&self, texture: TextureHandle, error: &LoadError) {
        let _ = (texture, error);
    }
}

/// Weak listener set of one texture.
#[derive(Default)]
pub(crate) struct ListenerSet {
    listeners: Vec<Weak<dyn TextureListener>>,
}

impl ListenerSet {
    pub fn add(&mut self, listener: Weak<dyn TextureListener>) {
        if !self.listeners.iter().any(|l| Weak::ptr_eq(l, &listener)) {
            self.listeners.push(listener);
        }
    }

    pub fn remove(&mut self, listener: &Weak<dyn TextureListener>) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|l| !Weak::ptr_eq(l, listener));
        self.listeners.len() != before
    }

    /// Live listeners; dead ones are dropped from the set.
    pub fn snapshot(&mut self) -> Vec<Arc<dyn TextureListener>> {
        self.listeners.retain(|l| l.strong_count() > 0);
        self.listeners.iter().filter_map(Weak::upgrade).collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }
}
