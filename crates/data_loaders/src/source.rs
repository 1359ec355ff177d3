use crate::dataloader::config::{Filters, Mode};
use crate::error::{LoaderError, Result};
use crate::sample::{Frame, Sample};
use std::fmt::Debug;
use std::path::Path;

/// What part of a dataset an enumeration should cover.
///
/// Built by the loader from its current mode, scene cursor and filters, and
/// handed to the source on every (re)enumeration.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    pub mode: Mode,
    /// Resolved scene position; ignored by datasets without scenes.
    pub scene: usize,
    pub filters: &'a Filters,
}

/// A `SampleSource` knows one on-disk dataset layout.
///
/// It lists the identifiers of a scope (`enumerate`) and turns a single
/// identifier into a `Sample` (`decode`). Both run on different threads: the
/// loader enumerates on the caller thread and the prefetch worker decodes, so
/// implementations must be `Send + Sync`.
///
/// Identifiers are ordered; the loader sorts them before any subsampling or
/// shuffling so that results never depend on directory listing order.
pub trait SampleSource: Send + Sync + 'static {
    /// Identifier of one sample (a path, a scan index, ...).
    type Id: Clone + Ord + Debug + Send + Sync + 'static;

    /// Short name used for thread names and log lines.
    fn name(&self) -> &str;

    /// Dataset root directory.
    fn root(&self) -> &Path;

    /// Number of scenes available for `scope` (1 for flat datasets).
    fn nr_scenes(&self, _scope: &Scope<'_>) -> Result<usize> {
        Ok(1)
    }

    /// Lists every identifier matching `scope`, in any order.
    ///
    /// An empty list is not an error here; the loader turns it into
    /// `LoaderError::NotFound` with the dataset root attached.
    fn enumerate(&self, scope: &Scope<'_>) -> Result<Vec<Self::Id>>;

    /// Reads all files belonging to `id` and assembles a sample.
    /// Missing or malformed files produce `LoaderError::Decode`.
    fn decode(&self, id: &Self::Id) -> Result<Sample>;

    /// Position in `ids` of the view whose camera centre is nearest to
    /// `frame`'s, never the frame itself. `Ok(None)` when no other view
    /// qualifies.
    ///
    /// Only sources that know every view's pose without decoding implement
    /// this.
    fn closest_view(&self, _ids: &[Self::Id], _frame: &Frame) -> Result<Option<usize>> {
        Err(LoaderError::Unsupported {
            source_name: self.name().to_string(),
            operation: "closest view lookup",
        })
    }
}
