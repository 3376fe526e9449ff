//! Image codecs.
//!
//! A codec turns the raw bytes of a file into an [`Image`]. The
//! [`CodecRegistry`] picks a codec by sniffing the file header first and
//! falling back to the file extension.

mod oitd;
#[cfg(feature = "standard-codecs")]
mod standard;

pub use oitd::OitdCodec;
#[cfg(feature = "standard-codecs")]
pub use standard::StandardCodec;

use std::sync::Arc;

use crate::error::ImageError;
use crate::texture::Image;

/// Decodes (and optionally encodes) one family of image files.
pub trait ImageCodec: Send + Sync {
    /// Human readable codec name, used in logs.
    fn name(&self) -> &'static str;

    /// Lowercase file extensions this codec handles, without the dot.
    fn extensions(&self) -> &'static [&'static str];

    /// Returns true if `header` (the first bytes of a file) belongs to this codec.
    fn sniff(&self, header: &[u8]) -> bool;

    /// Decode a whole file.
    fn decode(&self, bytes: &[u8]) -> Result<Image, ImageError>;

    /// Encode an image into this codec's file format.
    fn encode(&self, image: &Image) -> Result<Vec<u8>, ImageError> {
        let _ = image;
        Err(ImageError::Codec(format!("{} cannot encode", self.name())))
    }
}

/// Set of available codecs.
#[derive(Clone, Default)]
pub struct CodecRegistry {
    codecs: Vec<Arc<dyn ImageCodec>>,
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.codecs.iter().map(|c| c.name()))
            .finish()
    }
}

impl CodecRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the OITD codec and, when the `standard-codecs`
    /// feature is enabled, the common formats (PNG, JPEG, TGA, BMP, HDR).
    pub fn with_default_codecs() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(OitdCodec));
        #[cfg(feature = "standard-codecs")]
        registry.register(Arc::new(StandardCodec));
        registry
    }

    /// Add a codec. Codecs registered earlier win ties.
    pub fn register(&mut self, codec: Arc<dyn ImageCodec>) {
        log::debug!("Registered image codec '{}'", codec.name());
        self.codecs.push(codec);
    }

    /// Find the codec for a file, by header first and extension second.
    pub fn find(&self, name: &str, bytes: &[u8]) -> Option<&Arc<dyn ImageCodec>> {
        self.codecs.iter().find(|c| c.sniff(bytes)).or_else(|| {
            let ext = extension(name)?;
            self.codecs.iter().find(|c| c.extensions().contains(&ext.as_str()))
        })
    }

    /// Find a codec by file extension only.
    pub fn find_by_extension(&self, name: &str) -> Option<&Arc<dyn ImageCodec>> {
        let ext = extension(name)?;
        self.codecs.iter().find(|c| c.extensions().contains(&ext.as_str()))
    }

    /// Decode `bytes`, picking the codec from the header or `name`.
    pub fn decode(&self, name: &str, bytes: &[u8]) -> Result<Image, ImageError> {
        let codec = self
            .find(name, bytes)
            .ok_or_else(|| ImageError::NoCodec(name.to_string()))?;
        log::trace!("Decoding '{}' with {}", name, codec.name());
        codec.decode(bytes)
    }

    /// Returns true if `name` has an extension some codec can decode.
    pub fn is_supported_name(&self, name: &str) -> bool {
        self.find_by_extension(name).is_some()
    }

    /// Number of registered codecs.
    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }
}

/// Lowercase extension of a file name.
pub fn extension(name: &str) -> Option<String> {
    let file = name.rsplit(['/', '\\']).next()?;
    let (_, ext) = file.rsplit_once('.')?;
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_ascii_lowercase())
    }
}
