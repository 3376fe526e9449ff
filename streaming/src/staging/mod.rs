//! Staging buffers and the pool that recycles them.
//!
//! Bytes reach a texture through a staging buffer: the worker writes
//! decoded pixels into a mapped buffer, the main thread unmaps it and asks
//! the backend to copy it into the texture. The [`StagingPool`] keeps the
//! total memory spent on idle buffers under a budget and decides how many
//! mapped buffers the worker gets each update, from the demand recorded in
//! [`UsageStat`]s and the configured minimum budget.

mod buffer;
mod pool;
pub(crate) mod usage;

pub use buffer::{MapState, StagingBuffer};
pub use pool::{PoolStats, StagingPool};
pub use usage::UsageStat;
