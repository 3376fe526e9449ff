use std::path::{Path, PathBuf};

use crate::provider::{ResourceFuture, ResourceProvider};

/// A directory on the native filesystem.
///
/// Resource names are joined onto the root. All I/O is blocking (`std::fs`)
/// inside the returned futures, which the streaming worker runs on its own
/// thread. `..` never reaches the provider: names are normalized first.
///
/// # Example
///
/// ```ignore
/// let groups = ResourceGroups::new();
/// groups.add_location("General", DirectoryProvider::new("./media/textures"));
/// ```
pub struct DirectoryProvider {
    root: PathBuf,
}

impl DirectoryProvider {
    /// Create a provider rooted at the given directory.
    ///
    /// The directory does not need to exist yet.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else if let Ok(relative) = path.strip_prefix(root)
            && let Some(name) = relative.to_str()
        {
            out.push(name.replace('\\', "/"));
        }
    }
    Ok(())
}

impl ResourceProvider for DirectoryProvider {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    fn read(&self, name: &str) -> ResourceFuture<Vec<u8>> {
        let full_path = self.resolve(name);
        Box::pin(async move { Ok(std::fs::read(full_path)?) })
    }

    fn exists(&self, name: &str) -> ResourceFuture<bool> {
        let full_path = self.resolve(name);
        Box::pin(async move { Ok(full_path.is_file()) })
    }

    fn list(&self) -> ResourceFuture<Vec<String>> {
        let root = self.root.clone();
        Box::pin(async move {
            let mut names = Vec::new();
            if root.is_dir() {
                collect_files(&root, &root, &mut names)?;
            }
            names.sort();
            Ok(names)
        })
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn write(&self, name: &str, data: Vec<u8>) -> ResourceFuture<()> {
        let full_path = self.resolve(name);
        Box::pin(async move {
            if let Some(parent) = full_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(full_path, data)?;
            Ok(())
        })
    }
}
