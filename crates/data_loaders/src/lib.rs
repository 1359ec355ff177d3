//! Asynchronous prefetching loaders for 3D-vision datasets.
//!
//! Each [`DataLoader`] runs one background thread that decodes samples
//! (images with poses and intrinsics, or LiDAR scans) into a bounded buffer
//! while the training loop drains it.

pub mod dataloader;
pub mod datasets;
pub mod error;
pub mod geometry;
pub mod readers;
pub mod sample;
pub mod source;

/// Default capacity of the prefetch buffer.
pub const DEFAULT_BUFFER_CAPACITY: usize = 5;

pub use dataloader::{DataLoader, LoaderConfig, LoaderState, Mode};
pub use error::{LoaderError, Result};
pub use sample::{Frame, FrameKind, PointCloud, Sample};
pub use source::{SampleSource, Scope};
