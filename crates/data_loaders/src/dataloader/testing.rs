//! Synthetic source for unit tests of the worker and loader.

use crate::error::{LoaderError, Result};
use crate::sample::{PointCloud, Sample};
use crate::source::{SampleSource, Scope};
use std::path::{Path, PathBuf};

/// Serves ids `0..len` per scene; sample name is the id.
pub(crate) struct CountingSource {
    root: PathBuf,
    len: u32,
    nr_scenes: usize,
    fail_on: Option<u32>,
}

impl CountingSource {
    pub(crate) fn new() -> Self {
        Self {
            root: PathBuf::from("memory"),
            len: 0,
            nr_scenes: 1,
            fail_on: None,
        }
    }

    pub(crate) fn with_len(mut self, len: u32) -> Self {
        self.len = len;
        self
    }

    pub(crate) fn with_scenes(mut self, nr_scenes: usize) -> Self {
        self.nr_scenes = nr_scenes;
        self
    }

    pub(crate) fn failing_on(mut self, id: u32) -> Self {
        self.fail_on = Some(id);
        self
    }
}

impl SampleSource for CountingSource {
    type Id = u32;

    fn name(&self) -> &str {
        "counting"
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn nr_scenes(&self, _scope: &Scope<'_>) -> Result<usize> {
        Ok(self.nr_scenes)
    }

    /// Scene `s` owns ids `s*1000 .. s*1000 + len`.
    fn enumerate(&self, scope: &Scope<'_>) -> Result<Vec<u32>> {
        let base = scope.scene as u32 * 1000;
        Ok((base..base + self.len).rev().collect())
    }

    fn decode(&self, id: &u32) -> Result<Sample> {
        if self.fail_on == Some(*id) {
            return Err(LoaderError::decode(
                id.to_string(),
                anyhow::anyhow!("synthetic failure"),
            ));
        }
        Sample::builder(id.to_string(), id.to_string())
            .cloud(PointCloud::new(vec![[*id as f32, 0.0, 0.0]]))
            .build()
            .map_err(|e| LoaderError::decode(id.to_string(), e))
    }
}
