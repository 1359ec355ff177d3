//! src/dataloader/worker.rs
//!
//! The background prefetch thread.
//!
//! # Shared state
//! The consumer and the worker share exactly three things:
//! - the `BoundedBuffer` of decoded samples,
//! - `Progress`: epoch and read cursor packed into one `AtomicU64`, the index
//!   length, and two flags (`in_flight`, `failed`),
//! - the stop flag.
//!
//! The worker only ever moves the cursor forward with a compare-and-swap on
//! the packed word. A `reset()` on the consumer side bumps the epoch in the
//! same word, so a sample decoded for an epoch that has since been reset fails
//! its CAS and is dropped instead of being delivered twice.
//!
//! # Lifecycle
//! ```text
//! Stopped --start()--> Running --stop()--> Stopping --join--> Stopped
//!                         |
//!                         +--fatal decode error / panic--> Stopped
//! ```

use crate::dataloader::buffer::BoundedBuffer;
use crate::dataloader::enumerator::DatasetIndex;
use crate::error::{LoaderError, Result};
use crate::sample::Sample;
use crate::source::SampleSource;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error};

/// Items travelling through the prefetch buffer.
pub type SampleBuffer = BoundedBuffer<Result<Sample>>;

// ============================================================================
// Progress

fn pack(epoch: u32, cursor: u32) -> u64 {
    ((epoch as u64) << 32) | cursor as u64
}

fn unpack(word: u64) -> (u32, u32) {
    ((word >> 32) as u32, word as u32)
}

/// Read position shared between consumer and worker.
#[derive(Debug, Default)]
pub struct Progress {
    /// epoch in the high half, cursor in the low half
    word: AtomicU64,
    len: AtomicUsize,
    /// A sample has claimed its cursor slot but is not in the buffer yet
    in_flight: AtomicBool,
    failed: AtomicBool,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current `(epoch, cursor)`.
    pub fn load(&self) -> (u32, u32) {
        unpack(self.word.load(Ordering::SeqCst))
    }

    pub fn epoch(&self) -> u32 {
        self.load().0
    }

    pub fn cursor(&self) -> usize {
        self.load().1 as usize
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Installs a new index length and rewinds to `(epoch, 0)`.
    /// Only call while the worker is stopped.
    pub fn install(&self, epoch: u32, len: usize) {
        self.len.store(len, Ordering::SeqCst);
        self.word.store(pack(epoch, 0), Ordering::SeqCst);
        self.in_flight.store(false, Ordering::SeqCst);
        self.failed.store(false, Ordering::SeqCst);
    }

    /// Starts `epoch` at cursor 0. Safe while the worker runs.
    pub fn rewind(&self, epoch: u32) {
        self.word.store(pack(epoch, 0), Ordering::SeqCst);
    }

    /// True once every slot of the current epoch has been claimed.
    pub fn is_consumed(&self) -> bool {
        self.cursor() >= self.len()
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    fn advance(&self, epoch: u32, cursor: u32) -> bool {
        self.word
            .compare_exchange(
                pack(epoch, cursor),
                pack(epoch, cursor + 1),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Gives back a claimed slot; no-op if a reset happened in between.
    fn retreat(&self, epoch: u32, cursor: u32) {
        let _ = self.word.compare_exchange(
            pack(epoch, cursor + 1),
            pack(epoch, cursor),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }
}

// ============================================================================
// Worker state

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Stopped = 0,
    Running = 1,
    Stopping = 2,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => WorkerState::Running,
            2 => WorkerState::Stopping,
            _ => WorkerState::Stopped,
        }
    }
}

/// Marks the worker Stopped when its thread exits, including by panic.
struct ExitGuard(Arc<AtomicU8>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let _ = self.0.compare_exchange(
            WorkerState::Running as u8,
            WorkerState::Stopped as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }
}

// ============================================================================
// Job

/// Everything one run of the worker thread needs.
pub struct PrefetchJob<S: SampleSource> {
    pub source: Arc<S>,
    pub index: DatasetIndex<S::Id>,
    pub buffer: Arc<SampleBuffer>,
    pub progress: Arc<Progress>,
    pub overfit: bool,
    pub poll_interval: Duration,
    pub backoff_interval: Duration,
}

impl<S: SampleSource> PrefetchJob<S> {
    /// Main loop. Returns when `stop` is raised or after a fatal decode error.
    fn run(self, stop: &AtomicBool) {
        let mut order: Option<(u32, Vec<usize>)> = None;

        while !stop.load(Ordering::SeqCst) {
            let (epoch, cursor) = self.progress.load();
            if cursor as usize >= self.progress.len() {
                // Epoch exhausted; wait for a reset
                thread::sleep(self.poll_interval);
                continue;
            }
            if !self.buffer.has_spare_capacity() {
                thread::sleep(self.backoff_interval);
                continue;
            }

            let pos = if self.overfit {
                0
            } else {
                if order.as_ref().map_or(true, |(e, _)| *e != epoch) {
                    order = Some((epoch, self.index.for_epoch(epoch)));
                }
                match order.as_ref().and_then(|(_, p)| p.get(cursor as usize)) {
                    Some(&pos) => pos,
                    None => {
                        thread::sleep(self.poll_interval);
                        continue;
                    }
                }
            };
            let Some(id) = self.index.get(pos) else {
                thread::sleep(self.poll_interval);
                continue;
            };

            match self.source.decode(id) {
                Ok(sample) => {
                    if self.overfit {
                        self.push(Ok(sample), stop);
                        continue;
                    }
                    self.progress.in_flight.store(true, Ordering::SeqCst);
                    if !self.progress.advance(epoch, cursor) {
                        // reset() rewound the cursor while we were decoding
                        self.progress.in_flight.store(false, Ordering::SeqCst);
                        debug!(?id, epoch, "dropping sample decoded for a stale epoch");
                        continue;
                    }
                    if !self.push(Ok(sample), stop) {
                        self.progress.retreat(epoch, cursor);
                    }
                    self.progress.in_flight.store(false, Ordering::SeqCst);
                }
                Err(err) => {
                    error!(source = self.source.name(), ?id, "fatal decode error: {}", err);
                    self.progress.failed.store(true, Ordering::SeqCst);
                    self.push(Err(err), stop);
                    break;
                }
            }
        }
        debug!(source = self.source.name(), "prefetch loop finished");
    }

    /// Pushes with retry. Returns false if `stop` was raised first.
    fn push(&self, item: Result<Sample>, stop: &AtomicBool) -> bool {
        let mut item = item;
        loop {
            match self.buffer.push(item) {
                Ok(()) => return true,
                Err(back) => {
                    if stop.load(Ordering::SeqCst) {
                        return false;
                    }
                    item = back;
                    thread::sleep(self.backoff_interval);
                }
            }
        }
    }
}

// ============================================================================
// Worker

/// Owns the background thread of one loader.
///
/// Joined on `stop()` and on drop, so once either returns the thread no longer
/// touches the buffer.
pub struct PrefetchWorker {
    state: Arc<AtomicU8>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Default for PrefetchWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl PrefetchWorker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(WorkerState::Stopped as u8)),
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_running(&self) -> bool {
        self.state() == WorkerState::Running
    }

    /// Spawns the thread for `job`.
    pub fn start<S: SampleSource>(&mut self, job: PrefetchJob<S>) -> Result<()> {
        if self.state() != WorkerState::Stopped {
            return Err(LoaderError::AlreadyRunning);
        }
        // A thread that exited by itself still needs joining
        self.join()?;

        let name = format!("prefetch-{}", job.source.name());
        let stop = Arc::new(AtomicBool::new(false));
        self.stop = stop.clone();
        self.state.store(WorkerState::Running as u8, Ordering::SeqCst);

        let guard = ExitGuard(self.state.clone());
        let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
            let _guard = guard;
            job.run(&stop);
        });
        match spawned {
            Ok(handle) => {
                debug!(thread = %name, "prefetch worker started");
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.state.store(WorkerState::Stopped as u8, Ordering::SeqCst);
                Err(LoaderError::Spawn(e))
            }
        }
    }

    /// Raises the stop flag and blocks until the thread has exited.
    pub fn stop(&mut self) -> Result<()> {
        if self.handle.is_none() {
            return Ok(());
        }
        self.state.store(WorkerState::Stopping as u8, Ordering::SeqCst);
        self.stop.store(true, Ordering::SeqCst);
        let joined = self.join();
        self.state.store(WorkerState::Stopped as u8, Ordering::SeqCst);
        joined
    }

    fn join(&mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => {
                let name = handle.thread().name().unwrap_or("prefetch").to_string();
                handle.join().map_err(|_| LoaderError::WorkerPanicked)?;
                debug!(thread = %name, "prefetch worker joined");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for PrefetchWorker {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("prefetch worker shutdown failed: {}", e);
        }
    }
}
