use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::ResourceError;
use crate::provider::{ResourceFuture, ResourceProvider};

/// In-memory resource location for tests and embedded textures.
///
/// Thread-safe and mutable even after being added to a group; clones share
/// the same storage.
///
/// # Example
///
/// ```ignore
/// let mem = MemoryProvider::new();
/// mem.insert("brick.png", png_bytes);
///
/// let groups = ResourceGroups::new();
/// groups.add_location("General", mem.clone());
/// ```
#[derive(Clone, Default)]
pub struct MemoryProvider {
    files: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryProvider {
    /// Create an empty in-memory provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a resource, overwriting any existing one with the same name.
    pub fn insert(&self, name: impl Into<String>, data: Vec<u8>) {
        self.files.write().insert(name.into(), data);
    }

    /// Remove a resource, returning its data if it existed.
    pub fn remove(&self, name: &str) -> Option<Vec<u8>> {
        self.files.write().remove(name)
    }

    /// Number of stored resources.
    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

impl ResourceProvider for MemoryProvider {
    fn describe(&self) -> String {
        format!("memory ({} resources)", self.len())
    }

    fn read(&self, name: &str) -> ResourceFuture<Vec<u8>> {
        let files = self.files.clone();
        let name = name.to_owned();
        Box::pin(async move {
            let map = files.read();
            map.get(&name).cloned().ok_or(ResourceError::NotFound(name))
        })
    }

    fn exists(&self, name: &str) -> ResourceFuture<bool> {
        let files = self.files.clone();
        let name = name.to_owned();
        Box::pin(async move { Ok(files.read().contains_key(&name)) })
    }

    fn list(&self) -> ResourceFuture<Vec<String>> {
        let files = self.files.clone();
        Box::pin(async move {
            let mut names: Vec<String> = files.read().keys().cloned().collect();
            names.sort();
            Ok(names)
        })
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn write(&self, name: &str, data: Vec<u8>) -> ResourceFuture<()> {
        let files = self.files.clone();
        let name = name.to_owned();
        Box::pin(async move {
            files.write().insert(name, data);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pollster::block_on;

    #[test]
    fn read_existing() {
        let mem = MemoryProvider::new();
        mem.insert("brick.png", b"png".to_vec());
        assert_eq!(block_on(mem.read("brick.png")).unwrap(), b"png");
    }

    #[test]
    fn read_missing() {
        let mem = MemoryProvider::new();
        let err = block_on(mem.read("nope.png")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn exists() {
        let mem = MemoryProvider::new();
        mem.insert("a.oitd", vec![]);
        assert!(block_on(mem.exists("a.oitd")).unwrap());
        assert!(!block_on(mem.exists("b.oitd")).unwrap());
    }

    #[test]
    fn list_is_sorted() {
        let mem = MemoryProvider::new();
        mem.insert("b.png", vec![]);
        mem.insert("a.png", vec![]);
        assert_eq!(block_on(mem.list()).unwrap(), vec!["a.png", "b.png"]);
    }

    #[test]
    fn write_then_read() {
        let mem = MemoryProvider::new();
        assert!(!mem.is_read_only());
        block_on(mem.write("cache.ron", b"()".to_vec())).unwrap();
        assert_eq!(block_on(mem.read("cache.ron")).unwrap(), b"()");
    }

    #[test]
    fn clones_share_storage() {
        let mem = MemoryProvider::new();
        let other = mem.clone();
        other.insert("x.png", vec![1]);
        assert_eq!(mem.len(), 1);
        assert_eq!(mem.remove("x.png"), Some(vec![1]));
        assert!(other.is_empty());
    }
}
