use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::ResourceError;
use crate::name;
use crate::provider::{ResourceFuture, ResourceProvider};

/// Group used when a request names no group and no default was set.
pub const DEFAULT_GROUP: &str = "General";

/// Router from `(group, name)` to the storage locations of that group.
///
/// A group holds an ordered list of locations; reads try them in order and
/// return the first location holding the resource. An empty group name
/// means the default group.
///
/// `Clone` is cheap (Arc internals) and clones share the same groups, so
/// locations may be added after the streamer has been created.
///
/// # Example
///
/// ```ignore
/// let groups = ResourceGroups::new();
/// groups.add_location("General", DirectoryProvider::new("./media"));
/// groups.add_location("General", embedded);
///
/// // Reads ./media/brick.png, or the embedded copy if it is not on disk
/// let bytes = groups.read_blocking("", "brick.png")?;
/// ```
#[derive(Clone)]
pub struct ResourceGroups {
    inner: Arc<RwLock<GroupsInner>>,
}

struct GroupsInner {
    groups: BTreeMap<String, Vec<Arc<dyn ResourceProvider>>>,
    default_group: String,
}

impl ResourceGroups {
    /// Create a router with no groups.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(GroupsInner {
                groups: BTreeMap::new(),
                default_group: DEFAULT_GROUP.to_owned(),
            })),
        }
    }

    /// Append a location to a group, creating the group if needed.
    pub fn add_location(&self, group: impl Into<String>, provider: impl ResourceProvider) {
        let group = group.into();
        log::debug!(
            "Adding location '{}' to resource group '{}'",
            provider.describe(),
            group
        );
        self.inner
            .write()
            .groups
            .entry(group)
            .or_default()
            .push(Arc::new(provider));
    }

    /// Drop a group and all its locations. Returns false if it did not exist.
    pub fn remove_group(&self, group: &str) -> bool {
        self.inner.write().groups.remove(group).is_some()
    }

    /// Set the group used for requests with an empty group name.
    pub fn set_default_group(&self, group: impl Into<String>) {
        self.inner.write().default_group = group.into();
    }

    pub fn default_group(&self) -> String {
        self.inner.read().default_group.clone()
    }

    /// Returns true if a group with that name exists.
    pub fn has_group(&self, group: &str) -> bool {
        let group = self.resolve_name(group);
        self.inner.read().groups.contains_key(&group)
    }

    /// Names of all groups, sorted.
    pub fn group_names(&self) -> Vec<String> {
        self.inner.read().groups.keys().cloned().collect()
    }

    /// Read a resource from the first location of `group` that has it.
    pub fn read(&self, group: &str, raw_name: &str) -> ResourceFuture<Vec<u8>> {
        let (locations, normalized) = match self.locations(group, raw_name) {
            Ok(v) => v,
            Err(e) => return Box::pin(async move { Err(e) }),
        };
        let group = self.resolve_name(group);
        Box::pin(async move {
            for location in &locations {
                match location.read(&normalized).await {
                    Ok(bytes) => return Ok(bytes),
                    Err(e) if e.is_not_found() => continue,
                    Err(e) => return Err(e),
                }
            }
            Err(ResourceError::NotFound(format!("{normalized} (group '{group}')")))
        })
    }

    /// Check whether any location of `group` has the resource.
    pub fn exists(&self, group: &str, raw_name: &str) -> ResourceFuture<bool> {
        let (locations, normalized) = match self.locations(group, raw_name) {
            Ok(v) => v,
            Err(e) => return Box::pin(async move { Err(e) }),
        };
        Box::pin(async move {
            for location in &locations {
                if location.exists(&normalized).await? {
                    return Ok(true);
                }
            }
            Ok(false)
        })
    }

    /// Write a resource into the first writable location of `group`.
    pub fn write(&self, group: &str, raw_name: &str, data: Vec<u8>) -> ResourceFuture<()> {
        let (locations, normalized) = match self.locations(group, raw_name) {
            Ok(v) => v,
            Err(e) => return Box::pin(async move { Err(e) }),
        };
        match locations.into_iter().find(|l| !l.is_read_only()) {
            Some(location) => location.write(&normalized, data),
            None => Box::pin(async { Err(ResourceError::ReadOnly) }),
        }
    }

    /// [`read`](Self::read), driven to completion on the calling thread.
    pub fn read_blocking(&self, group: &str, raw_name: &str) -> Result<Vec<u8>, ResourceError> {
        pollster::block_on(self.read(group, raw_name))
    }

    /// [`exists`](Self::exists), driven to completion on the calling thread.
    pub fn exists_blocking(&self, group: &str, raw_name: &str) -> Result<bool, ResourceError> {
        pollster::block_on(self.exists(group, raw_name))
    }

    /// [`write`](Self::write), driven to completion on the calling thread.
    pub fn write_blocking(
        &self,
        group: &str,
        raw_name: &str,
        data: Vec<u8>,
    ) -> Result<(), ResourceError> {
        pollster::block_on(self.write(group, raw_name, data))
    }

    fn resolve_name(&self, group: &str) -> String {
        if group.is_empty() {
            self.inner.read().default_group.clone()
        } else {
            group.to_owned()
        }
    }

    /// Snapshot of a group's locations plus the normalized resource name.
    fn locations(
        &self,
        group: &str,
        raw_name: &str,
    ) -> Result<(Vec<Arc<dyn ResourceProvider>>, String), ResourceError> {
        let normalized = name::normalize(raw_name)?;
        let group = self.resolve_name(group);
        let inner = self.inner.read();
        let locations = inner
            .groups
            .get(&group)
            .ok_or(ResourceError::NoSuchGroup(group.clone()))?;
        Ok((locations.clone(), normalized))
    }
}

impl Default for ResourceGroups {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ResourceGroups {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("ResourceGroups")
            .field("groups", &inner.groups.keys().collect::<Vec<_>>())
            .field("default_group", &inner.default_group)
            .finish()
    }
}
