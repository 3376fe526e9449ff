//! Resource groups for the texstream texture streamer.
//!
//! Textures are requested by `(name, group)`. A group is an ordered list of
//! storage locations, each a [`ResourceProvider`]; a read walks the locations
//! in order and returns the first hit. [`ResourceGroups`] is the router the
//! streaming worker reads through.
//!
//! # Providers
//!
//! - [`MemoryProvider`] - In-memory storage for tests and embedded textures (read-write)
//! - [`DirectoryProvider`] - A directory on the native filesystem (read-write)
//!
//! Custom providers (packed archives, HTTP fetch) implement
//! [`ResourceProvider`].
//!
//! # Futures
//!
//! Providers return boxed `Send` futures. The streamer drives them with
//! [`ResourceGroups::read_blocking`] from its worker thread; both bundled
//! providers complete on the first poll.

#[cfg(all(feature = "filesystem", not(target_arch = "wasm32")))]
mod directory;
mod error;
mod groups;
mod memory;
pub mod name;
mod provider;

#[cfg(all(feature = "filesystem", not(target_arch = "wasm32")))]
pub use directory::DirectoryProvider;
pub use error::ResourceError;
pub use groups::{DEFAULT_GROUP, ResourceGroups};
pub use memory::MemoryProvider;
pub use provider::{ResourceFuture, ResourceProvider};
