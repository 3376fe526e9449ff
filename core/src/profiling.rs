//! Tracy instrumentation for the streamer.
//!
//! Build with the `profiling` feature to connect to Tracy:
//!
//! ```toml
//! [dependencies]
//! texstream = { version = "0.1", features = ["profiling"] }
//! ```
//!
//! The main-thread update emits one frame mark and plots the free staging
//! memory; the worker and decode threads register their names and wrap
//! each pass in a span. Without the feature every macro expands to nothing
//! (plotted values are still evaluated).

#[cfg(feature = "profiling")]
pub use tracy_client::{self, frame_mark as tracy_frame_mark, plot as tracy_plot, span};

/// End of one streaming update.
#[cfg(feature = "profiling")]
#[macro_export]
macro_rules! frame_mark {
    () => {
        $crate::profiling::tracy_frame_mark()
    };
}

#[cfg(not(feature = "profiling"))]
#[macro_export]
macro_rules! frame_mark {
    () => {};
}

/// Span covering the rest of the enclosing scope.
#[cfg(feature = "profiling")]
#[macro_export]
macro_rules! profile_scope {
    ($name:expr) => {
        let _texstream_span = $crate::profiling::span!($name);
    };
}

#[cfg(not(feature = "profiling"))]
#[macro_export]
macro_rules! profile_scope {
    ($name:expr) => {};
}

/// Sample a numeric value, e.g. staging bytes still free.
#[cfg(feature = "profiling")]
#[macro_export]
macro_rules! profile_plot {
    ($name:expr, $value:expr) => {
        $crate::profiling::tracy_plot!($name, $value as f64)
    };
}

#[cfg(not(feature = "profiling"))]
#[macro_export]
macro_rules! profile_plot {
    ($name:expr, $value:expr) => {
        let _ = $value;
    };
}

/// Label the calling thread in the Tracy timeline.
#[cfg(feature = "profiling")]
#[macro_export]
macro_rules! set_thread_name {
    ($name:expr) => {
        $crate::profiling::tracy_client::set_thread_name!($name)
    };
}

#[cfg(not(feature = "profiling"))]
#[macro_export]
macro_rules! set_thread_name {
    ($name:expr) => {};
}

pub use frame_mark;
pub use profile_plot;
pub use profile_scope;
pub use set_thread_name;
