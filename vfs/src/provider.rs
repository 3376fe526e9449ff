use std::future::Future;
use std::pin::Pin;

use crate::ResourceError;

/// A boxed, `Send` future returning a `Result`.
pub type ResourceFuture<T> = Pin<Box<dyn Future<Output = Result<T, ResourceError>> + Send>>;

/// One storage location of a resource group.
///
/// Names passed to provider methods are already normalized by
/// [`ResourceGroups`](crate::ResourceGroups): forward slashes, no leading or
/// trailing slash, no `..` or `.` segments.
pub trait ResourceProvider: Send + Sync + 'static {
    /// Short description for logs, e.g. the directory path.
    fn describe(&self) -> String;

    /// Read the entire contents of a resource.
    fn read(&self, name: &str) -> ResourceFuture<Vec<u8>>;

    /// Check whether a resource exists.
    fn exists(&self, name: &str) -> ResourceFuture<bool>;

    /// Names of every resource in this location, sorted.
    fn list(&self) -> ResourceFuture<Vec<String>>;

    /// Whether this provider is read-only. `true` by default.
    fn is_read_only(&self) -> bool {
        true
    }

    /// Write a resource, creating or overwriting it.
    fn write(&self, _name: &str, _data: Vec<u8>) -> ResourceFuture<()> {
        Box::pin(async { Err(ResourceError::ReadOnly) })
    }
}
