//! src/dataloader/mod.rs
//!
//! This module implements the asynchronous `DataLoader`.
//!
//! A `DataLoader` reads one dataset through a `SampleSource` and keeps a small
//! buffer of decoded samples ahead of the consumer, so that disk I/O and
//! decoding overlap with training.
//!
//! # Architecture Overview
//!
//! ```text
//!                  ┌──────────────┐
//!                  │ SampleSource │ (VolRef, KITTI, DTU, ShapeNet, ...)
//!                  └──────┬───────┘
//!                         │ enumerate(scope)
//!                         ↓
//!                 ┌────────────────┐
//!                 │ PathEnumerator │ sort → subsample → order → skip/limit
//!                 └───────┬────────┘
//!                         │ DatasetIndex (Arc<[Id]>)
//!                         ↓
//!                 ┌────────────────┐
//!                 │ PrefetchWorker │ ←── Progress (epoch | cursor, AtomicU64)
//!                 └───────┬────────┘
//!                         │ decode(id) → Sample, push with retry
//!                         ↓
//!                 ┌────────────────┐
//!                 │ BoundedBuffer  │ (capacity C, holds C-1)
//!                 └───────┬────────┘
//!                         │ pop
//!                         ↓
//!                  ┌──────────────┐
//!                  │  DataLoader  │ ←───── LoaderConfig
//!                  └──────────────┘
//!                    get_sample / get_color_frame / get_cloud ...
//! ```
//!
//! # Module Structure
//!
//! ```text
//! src/dataloader/
//! ├── mod.rs             # Public API exports + module-level architecture docs
//! ├── config.rs          # LoaderConfig, builder, Mode, Filters
//! ├── loader.rs          # DataLoader facade and LoaderState
//! ├── enumerator.rs      # PathEnumerator, DatasetIndex, ordering helpers
//! ├── buffer.rs          # BoundedBuffer (SPSC, one slot kept free)
//! └── worker.rs          # PrefetchWorker, PrefetchJob, shared Progress
//! ```
//!
//! # Epochs
//!
//! `reset()` bumps the epoch and rewinds the cursor. With shuffling on, each
//! epoch reads the same selected identifiers in a fresh seeded order, so
//! `nr_samples()` never changes across resets. Samples already in the buffer
//! are kept.
//!
//! # Example Usage
//! ```ignore
//! let source = KittiSource::new("/data/semantic_kitti", KittiOptions::default())?;
//! let config = LoaderConfig::builder().mode(Mode::Validation).build();
//! let mut loader = DataLoader::new(source, config)?;
//! loader.start()?;
//!
//! while !loader.is_finished() {
//!     match loader.get_cloud() {
//!         Ok(cloud) => train_step(cloud),
//!         Err(e) if e.is_retryable() => std::thread::yield_now(),
//!         Err(e) => return Err(e),
//!     }
//! }
//! ```

pub mod buffer;
pub mod config;
pub mod enumerator;
pub mod loader;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use buffer::BoundedBuffer;
pub use config::{Filters, LoaderConfig, LoaderConfigBuilder, Mode};
pub use enumerator::{DatasetIndex, PathEnumerator};
pub use loader::{DataLoader, LoaderState};
pub use worker::{PrefetchJob, PrefetchWorker, Progress, WorkerState};
