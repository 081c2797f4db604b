//! Name-keyed builder and linker for media processing pipelines
//!
//! Stages supplied by a media runtime are created under human-readable names,
//! optionally paired with a format filter, linked in caller-specified chains,
//! configured by name, and driven through the runtime's lifecycle states.
//! The runtime sits behind the [`Backend`] trait; GStreamer support lives in
//! the `gst` module behind the `gstreamer` feature.

pub mod backend;
pub mod config;
pub mod error;
pub mod guard;
pub mod linker;
pub mod pipeline;
pub mod recording;
pub mod registry;
pub mod state;

#[cfg(feature = "gstreamer")]
pub mod gst;


// Re-export commonly used types
pub use backend::*;
pub use config::*;
pub use error::*;
pub use pipeline::*;
pub use registry::*;
pub use state::*;

#[cfg(feature = "gstreamer")]
pub use gst::{GstBackend, GstLoop};
