//! src/dataloader/loader.rs
//!
//! The `DataLoader` facade: owns the index, the buffer and the worker of one
//! dataset, and exposes the consumer API.

use crate::dataloader::buffer::BoundedBuffer;
use crate::dataloader::config::{LoaderConfig, Mode};
use crate::dataloader::enumerator::{scene_order, DatasetIndex, PathEnumerator};
use crate::dataloader::worker::{PrefetchJob, PrefetchWorker, Progress, SampleBuffer};
use crate::error::{LoaderError, Result};
use crate::sample::{Frame, FrameKind, PointCloud, Sample};
use crate::source::{SampleSource, Scope};
use std::sync::Arc;
use tracing::{debug, info};

/// Observable state of a loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderState {
    /// `start()` has not been called yet
    Idle,
    /// The worker runs and the current epoch is not fully read
    Reading,
    /// The worker was stopped with `stop()`
    Paused,
    /// Every sample of the epoch was read and dequeued; waiting for `reset()`
    Exhausted,
    /// A fatal decode error stopped the worker
    Failed,
}

/// Asynchronous loader over one `SampleSource`.
///
/// A single background thread decodes samples into a bounded buffer while the
/// caller drains it with `get_sample()` and friends. Calls never block on
/// I/O, except `get_frame_at_idx()`, which decodes on the calling thread.
///
/// # Example
/// ```ignore
/// let source = VolRefSource::new("/data/vol_ref")?;
/// let config = LoaderConfig::builder().shuffle(true).build();
/// let mut loader = DataLoader::new(source, config)?;
/// loader.start()?;
///
/// loop {
///     if loader.is_finished() {
///         loader.reset();
///     }
///     if loader.has_data() {
///         let frame = loader.get_color_frame()?;
///     }
/// }
/// ```
pub struct DataLoader<S: SampleSource> {
    source: Arc<S>,
    config: LoaderConfig,
    buffer: Arc<SampleBuffer>,
    progress: Arc<Progress>,
    worker: PrefetchWorker,
    index: Option<DatasetIndex<S::Id>>,
    nr_resets: u32,
    scene_cursor: usize,
    scene_order: Option<Vec<usize>>,
    started: bool,
}

impl<S: SampleSource> DataLoader<S> {
    /// Creates a loader; starts reading right away when `config.autostart`.
    pub fn new(source: S, config: LoaderConfig) -> Result<Self> {
        config.validate()?;
        let buffer = Arc::new(BoundedBuffer::new(config.buffer_capacity)?);
        let autostart = config.autostart;
        let mut loader = Self {
            source: Arc::new(source),
            config,
            buffer,
            progress: Arc::new(Progress::new()),
            worker: PrefetchWorker::new(),
            index: None,
            nr_resets: 0,
            scene_cursor: 0,
            scene_order: None,
            started: false,
        };
        if autostart {
            loader.start()?;
        }
        Ok(loader)
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    // ========================================================================
    // Lifecycle

    /// Enumerates the current scope and launches the worker.
    ///
    /// Any samples still buffered from an earlier run are discarded.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_running() {
            return Err(LoaderError::AlreadyRunning);
        }
        // Join a worker that exited on its own (fatal error)
        self.worker.stop()?;
        self.buffer.clear();
        self.rebuild_index()?;
        self.launch()?;
        self.started = true;
        Ok(())
    }

    /// Stops and joins the worker. Buffered samples stay available.
    pub fn stop(&mut self) -> Result<()> {
        self.worker.stop()
    }

    /// Starts the next epoch: bumps the epoch counter, which reshuffles the
    /// index when shuffling is on, and rewinds the cursor. The buffer keeps
    /// whatever is already decoded.
    pub fn reset(&mut self) {
        self.nr_resets = self.nr_resets.wrapping_add(1);
        self.progress.rewind(self.nr_resets);
        debug!(source = self.source.name(), epoch = self.nr_resets, "reset");
    }

    fn launch(&mut self) -> Result<()> {
        let index = self.index.clone().ok_or(LoaderError::NotStarted)?;
        self.worker.start(PrefetchJob {
            source: self.source.clone(),
            index,
            buffer: self.buffer.clone(),
            progress: self.progress.clone(),
            overfit: self.config.overfit,
            poll_interval: self.config.poll_interval,
            backoff_interval: self.config.backoff_interval,
        })
    }

    /// Scene the next index is built for.
    fn current_scene(&mut self) -> Result<usize> {
        if let Some(scene) = self.config.filters.restrict_to_scene {
            return Ok(scene);
        }
        let nr_scenes = self.nr_scenes()?;
        if nr_scenes == 0 {
            return Err(LoaderError::not_found(
                self.source.root(),
                format!("no scenes for mode '{}'", self.config.mode),
            ));
        }
        let order = match self.scene_order.take() {
            Some(order) if order.len() == nr_scenes => order,
            _ => scene_order(nr_scenes, self.config.shuffle, self.config.seed, 0),
        };
        let scene = order[self.scene_cursor % nr_scenes];
        self.scene_order = Some(order);
        Ok(scene)
    }

    fn rebuild_index(&mut self) -> Result<()> {
        let scene = self.current_scene()?;
        let scope = Scope {
            mode: self.config.mode,
            scene,
            filters: &self.config.filters,
        };
        let index = PathEnumerator::new(&*self.source, scope).build(&self.config, self.nr_resets)?;
        if index.len() > u32::MAX as usize {
            return Err(LoaderError::InvalidConfig {
                reason: format!("{} samples exceed the cursor range", index.len()),
            });
        }
        self.progress.install(self.nr_resets, index.len());
        self.index = Some(index);
        Ok(())
    }

    /// Applies a scope change: stop, change, drop stale samples, re-enumerate,
    /// and resume if the worker was running.
    fn rescope(&mut self, change: impl FnOnce(&mut Self)) -> Result<()> {
        let was_running = self.worker.is_running();
        self.worker.stop()?;
        change(self);
        self.buffer.clear();
        if self.started {
            self.rebuild_index()?;
            if was_running {
                self.launch()?;
            }
        }
        Ok(())
    }

    // ========================================================================
    // Queries

    /// True if a sample (or a fatal error) is ready to be dequeued.
    pub fn has_data(&self) -> bool {
        self.buffer.peek_nonempty()
    }

    /// True once the worker has read every sample of the epoch, whether or not
    /// they were dequeued yet.
    pub fn is_finished_reading(&self) -> bool {
        self.started && self.progress.is_consumed()
    }

    /// Same as `is_finished_reading`, for scene-scoped datasets.
    pub fn finished_reading_scene(&self) -> bool {
        self.is_finished_reading()
    }

    /// True once every sample of the epoch was read and dequeued.
    pub fn is_finished(&self) -> bool {
        self.is_finished_reading() && !self.progress.in_flight() && self.buffer.is_empty()
    }

    /// Size of the current index (0 before `start()`).
    pub fn nr_samples(&self) -> usize {
        self.progress.len()
    }

    pub fn nr_scenes(&self) -> Result<usize> {
        let scope = Scope {
            mode: self.config.mode,
            scene: 0,
            filters: &self.config.filters,
        };
        self.source.nr_scenes(&scope)
    }

    /// Number of resets so far.
    pub fn epoch(&self) -> u32 {
        self.nr_resets
    }

    pub fn mode(&self) -> Mode {
        self.config.mode
    }

    pub fn state(&self) -> LoaderState {
        if !self.started {
            LoaderState::Idle
        } else if self.progress.has_failed() {
            LoaderState::Failed
        } else if self.is_finished() {
            LoaderState::Exhausted
        } else if !self.worker.is_running() {
            LoaderState::Paused
        } else {
            LoaderState::Reading
        }
    }

    // ========================================================================
    // Getters

    /// Dequeues the next sample.
    ///
    /// Returns `EmptyBuffer` when nothing is ready, and the worker's fatal
    /// error in its FIFO position.
    pub fn get_sample(&self) -> Result<Sample> {
        self.buffer.pop().unwrap_or(Err(LoaderError::EmptyBuffer))
    }

    pub fn get_color_frame(&self) -> Result<Frame> {
        self.get_sample()?
            .into_frame(FrameKind::Color)
            .ok_or(LoaderError::MissingView {
                view: "color frame",
            })
    }

    pub fn get_depth_frame(&self) -> Result<Frame> {
        self.get_sample()?
            .into_frame(FrameKind::Depth)
            .ok_or(LoaderError::MissingView {
                view: "depth frame",
            })
    }

    /// Next frame of a shuffled loader. The buffer is FIFO; randomness comes
    /// from the index order.
    pub fn get_random_frame(&self) -> Result<Frame> {
        self.get_sample()?
            .into_first_frame()
            .ok_or(LoaderError::MissingView { view: "frame" })
    }

    pub fn get_cloud(&self) -> Result<PointCloud> {
        self.get_sample()?
            .into_cloud()
            .ok_or(LoaderError::MissingView {
                view: "point cloud",
            })
    }

    /// Decodes the sample at position `idx` of the index on the calling thread.
    pub fn get_frame_at_idx(&self, idx: usize) -> Result<Sample> {
        let index = self.index.as_ref().ok_or(LoaderError::NotStarted)?;
        let id = index.get(idx).ok_or(LoaderError::IndexOutOfRange {
            index: idx,
            len: index.len(),
        })?;
        self.source.decode(id)
    }

    /// Decodes the view of the current scene whose camera is nearest to
    /// `frame`'s, skipping `frame` itself. Runs on the calling thread.
    ///
    /// `Unsupported` for sources without per-view poses, `MissingView` when
    /// the scene has no other view.
    pub fn get_closest_frame(&self, frame: &Frame) -> Result<Sample> {
        let index = self.index.as_ref().ok_or(LoaderError::NotStarted)?;
        let pos = self
            .source
            .closest_view(index.ids(), frame)?
            .ok_or(LoaderError::MissingView {
                view: "neighbouring view",
            })?;
        let id = index.get(pos).ok_or(LoaderError::IndexOutOfRange {
            index: pos,
            len: index.len(),
        })?;
        self.source.decode(id)
    }

    // ========================================================================
    // Rescoping

    pub fn set_mode_train(&mut self) -> Result<()> {
        self.set_mode(Mode::Train)
    }

    pub fn set_mode_test(&mut self) -> Result<()> {
        self.set_mode(Mode::Test)
    }

    pub fn set_mode_validation(&mut self) -> Result<()> {
        self.set_mode(Mode::Validation)
    }

    pub fn set_mode(&mut self, mode: Mode) -> Result<()> {
        info!(source = self.source.name(), %mode, "switching mode");
        self.rescope(|loader| {
            loader.config.mode = mode;
            loader.reset_scene_cursor();
        })
    }

    /// Moves on to the next scene, wrapping around after the last one.
    /// In overfit mode the loader stays on its scene.
    pub fn start_reading_next_scene(&mut self) -> Result<()> {
        if self.config.overfit {
            debug!("overfit is set; staying on the current scene");
            return Ok(());
        }
        self.rescope(|loader| loader.scene_cursor += 1)
    }

    pub fn set_restrict_to_scene(&mut self, scene: Option<usize>) -> Result<()> {
        self.rescope(|loader| {
            loader.config.filters.restrict_to_scene = scene;
            loader.reset_scene_cursor();
        })
    }

    pub fn set_object_name(&mut self, name: Option<String>) -> Result<()> {
        self.rescope(|loader| {
            loader.config.filters.object_name = name;
            loader.reset_scene_cursor();
        })
    }

    pub fn set_sequence(&mut self, sequence: Option<String>) -> Result<()> {
        self.rescope(|loader| {
            loader.config.filters.sequence = sequence;
            loader.reset_scene_cursor();
        })
    }

    fn reset_scene_cursor(&mut self) {
        self.scene_cursor = 0;
        self.scene_order = None;
    }
}
