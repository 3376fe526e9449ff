use thiserror::Error;

/// Errors that can occur while locating or reading a resource.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// No location of the group holds the resource.
    #[error("resource not found: {0}")]
    NotFound(String),
    /// An IO error occurred while accessing a provider.
    #[error("IO error: {0}")]
    Io(std::io::Error),
    /// The name is invalid (empty, contains `..`).
    #[error("invalid resource name: {0}")]
    InvalidName(String),
    /// No group is registered under that name.
    #[error("no such resource group: {0}")]
    NoSuchGroup(String),
    /// The provider does not support write operations.
    #[error("resource location is read-only")]
    ReadOnly,
}

impl ResourceError {
    /// Returns true if the resource simply does not exist, as opposed to
    /// failing to read.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ResourceError::NotFound(_))
    }
}

impl From<std::io::Error> for ResourceError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            ResourceError::NotFound(err.to_string())
        } else {
            ResourceError::Io(err)
        }
    }
}
