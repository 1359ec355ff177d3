//! src/dataloader/enumerator.rs
//!
//! Turns a `SampleSource` scan into the `DatasetIndex` the worker reads from.
//!
//! Pipeline, applied in this order on every rebuild:
//! 1. `enumerate` the scope through the source
//! 2. sort, then keep every `subsample_factor`-th identifier
//! 3. `order`: seeded shuffle or keep sorted
//! 4. `select`: skip N, take M
//!
//! The index of a later epoch re-shuffles the same selected set, so
//! `nr_samples` never changes across resets.

use crate::dataloader::config::LoaderConfig;
use crate::error::{LoaderError, Result};
use crate::source::{SampleSource, Scope};
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};
use std::sync::Arc;
use tracing::{debug, info};

/// Derives the RNG for a given shuffle round.
fn derive_rng(base_seed: u64, round: u64) -> StdRng {
    StdRng::seed_from_u64(base_seed.wrapping_add(round))
}

/// Sorts `ids`, then shuffles them with `base_seed + seed` when `shuffle` is set.
///
/// Sorting first makes the permutation independent of directory listing order.
pub fn order<Id: Ord>(mut ids: Vec<Id>, shuffle: bool, base_seed: u64, seed: u64) -> Vec<Id> {
    ids.sort();
    if shuffle {
        ids.shuffle(&mut derive_rng(base_seed, seed));
    }
    ids
}

/// Skip-N then take-M.
pub fn select<Id>(ids: Vec<Id>, skip: usize, limit: Option<usize>) -> Vec<Id> {
    let iter = ids.into_iter().skip(skip);
    match limit {
        Some(limit) => iter.take(limit).collect(),
        None => iter.collect(),
    }
}

/// Keeps every `factor`-th identifier, starting with the first.
pub fn subsample<Id>(ids: Vec<Id>, factor: usize) -> Vec<Id> {
    if factor <= 1 {
        return ids;
    }
    ids.into_iter().step_by(factor).collect()
}

/// Order in which scenes are visited: sorted, or a seeded permutation.
pub fn scene_order(nr_scenes: usize, shuffle: bool, base_seed: u64, seed: u64) -> Vec<usize> {
    order((0..nr_scenes).collect(), shuffle, base_seed, seed)
}

/// Ordered, truncated identifiers of the current scope.
///
/// `ids` is immutable and shared with the worker; the per-epoch order is a
/// permutation of positions into it.
#[derive(Debug, Clone)]
pub struct DatasetIndex<Id> {
    ids: Arc<[Id]>,
    shuffle: bool,
    base_seed: u64,
    first_epoch: u32,
}

impl<Id> DatasetIndex<Id> {
    /// Wraps an already ordered list. `first_epoch` is the epoch whose order
    /// `ids` already is.
    pub fn new(ids: Vec<Id>, shuffle: bool, base_seed: u64, first_epoch: u32) -> Self {
        Self {
            ids: ids.into(),
            shuffle,
            base_seed,
            first_epoch,
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn get(&self, pos: usize) -> Option<&Id> {
        self.ids.get(pos)
    }

    /// Identifiers in the order of the epoch the index was built for.
    pub fn ids(&self) -> &[Id] {
        &self.ids
    }

    /// Positions into `ids()` in the order they are read during `epoch`.
    ///
    /// The build epoch (and every epoch without shuffle) reads `ids()` in
    /// order; later epochs re-shuffle with `base_seed + epoch`.
    ///
    /// With two or more ids, the parity of the permutation follows the parity
    /// of `epoch - first_epoch`, so an epoch never repeats the order of the
    /// one before it.
    pub fn for_epoch(&self, epoch: u32) -> Vec<usize> {
        let mut positions: Vec<usize> = (0..self.ids.len()).collect();
        if !self.shuffle || epoch == self.first_epoch {
            return positions;
        }
        positions.shuffle(&mut derive_rng(self.base_seed, epoch as u64));
        let odd_epoch = epoch.wrapping_sub(self.first_epoch) % 2 == 1;
        if positions.len() >= 2 && is_odd(&positions) != odd_epoch {
            positions.swap(0, 1);
        }
        positions
    }
}

/// Parity of a permutation of `0..len`: a cycle of length k is k - 1
/// transpositions.
fn is_odd(permutation: &[usize]) -> bool {
    let mut visited = vec![false; permutation.len()];
    let mut cycles = 0;
    for start in 0..permutation.len() {
        if visited[start] {
            continue;
        }
        cycles += 1;
        let mut i = start;
        while !visited[i] {
            visited[i] = true;
            i = permutation[i];
        }
    }
    (permutation.len() - cycles) % 2 == 1
}

/// Builds a `DatasetIndex` for one scope of a source.
pub struct PathEnumerator<'a, S: SampleSource> {
    source: &'a S,
    scope: Scope<'a>,
}

impl<'a, S: SampleSource> PathEnumerator<'a, S> {
    pub fn new(source: &'a S, scope: Scope<'a>) -> Self {
        Self { source, scope }
    }

    /// Lists the scope, sorted and subsampled. Fails when nothing matches.
    pub fn enumerate(&self) -> Result<Vec<S::Id>> {
        let mut ids = self.source.enumerate(&self.scope)?;
        if ids.is_empty() {
            return Err(LoaderError::not_found(
                self.source.root(),
                format!(
                    "no {} samples for mode '{}'",
                    self.source.name(),
                    self.scope.mode
                ),
            ));
        }
        ids.sort();
        let factor = self.scope.filters.subsample_factor;
        let scanned = ids.len();
        let ids = subsample(ids, factor);
        debug!(
            source = self.source.name(),
            scanned,
            kept = ids.len(),
            factor,
            "enumerated identifiers"
        );
        Ok(ids)
    }

    /// Enumerates, orders and selects according to `config`.
    ///
    /// `nr_resets` seeds the shuffle so that every reset sees a new order.
    pub fn build(&self, config: &LoaderConfig, nr_resets: u32) -> Result<DatasetIndex<S::Id>> {
        let ids = self.enumerate()?;
        let total = ids.len();
        let ids = order(ids, config.shuffle, config.seed, nr_resets as u64);
        let ids = select(ids, config.nr_samples_to_skip, config.nr_samples_to_read);
        if ids.is_empty() {
            return Err(LoaderError::not_found(
                self.source.root(),
                format!(
                    "skipping {} of {} samples leaves nothing to read",
                    config.nr_samples_to_skip, total
                ),
            ));
        }
        info!(
            source = self.source.name(),
            mode = %self.scope.mode,
            scene = self.scope.scene,
            "About to read {} samples",
            ids.len()
        );
        Ok(DatasetIndex::new(ids, config.shuffle, config.seed, nr_resets))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_skip_and_limit() {
        let ids = vec!["a", "b", "c"];
        assert_eq!(select(ids.clone(), 1, Some(10)), vec!["b", "c"]);
        assert_eq!(select(ids.clone(), 0, Some(2)), vec!["a", "b"]);
        assert_eq!(select(ids.clone(), 5, None), Vec::<&str>::new());
        assert_eq!(select(ids, 0, None).len(), 3);
    }

    #[test]
    fn test_order_is_seeded() {
        let ids: Vec<u32> = (0..50).rev().collect();
        let sorted = order(ids.clone(), false, 7, 0);
        assert_eq!(sorted, (0..50).collect::<Vec<_>>());

        let a = order(ids.clone(), true, 7, 0);
        let b = order(ids.clone(), true, 7, 0);
        let c = order(ids.clone(), true, 7, 1);
        assert_eq!(a, b);
        assert_ne!(a, c);

        // Input order must not leak into the permutation
        let d = order((0..50).collect(), true, 7, 0);
        assert_eq!(a, d);
    }

    #[test]
    fn test_subsample_stride() {
        let ids: Vec<u32> = (0..10).collect();
        assert_eq!(subsample(ids.clone(), 3), vec![0, 3, 6, 9]);
        assert_eq!(subsample(ids.clone(), 1), ids);
    }

    #[test]
    fn test_for_epoch() {
        let index = DatasetIndex::new((0..20u32).collect(), true, 3, 0);
        let identity: Vec<usize> = (0..20).collect();
        assert_eq!(index.for_epoch(0), identity);

        let e1 = index.for_epoch(1);
        let e2 = index.for_epoch(2);
        assert_ne!(e1, identity);
        assert_ne!(e1, e2);
        assert_eq!(e1, index.for_epoch(1));

        let mut sorted = e1.clone();
        sorted.sort();
        assert_eq!(sorted, identity);

        let plain = DatasetIndex::new((0..20u32).collect(), false, 3, 0);
        assert_eq!(plain.for_epoch(5), identity);
    }

    #[test]
    fn test_consecutive_epochs_never_repeat() {
        for len in 2..6u32 {
            for first_epoch in [0, 7, u32::MAX - 3] {
                let index = DatasetIndex::new((0..len).collect(), true, 0, first_epoch);
                let mut previous = index.for_epoch(first_epoch);
                for step in 1..40 {
                    let current = index.for_epoch(first_epoch.wrapping_add(step));
                    assert_ne!(current, previous, "len {} step {}", len, step);
                    previous = current;
                }
            }
        }
        // A single id has only one order
        let single = DatasetIndex::new(vec![0u32], true, 0, 0);
        assert_eq!(single.for_epoch(1), vec![0]);
    }

    #[test]
    fn test_parity() {
        assert!(!is_odd(&[0, 1, 2]));
        assert!(is_odd(&[1, 0, 2]));
        assert!(!is_odd(&[1, 2, 0]));
        assert!(!is_odd(&[]));
    }

    #[test]
    fn test_scene_order() {
        assert_eq!(scene_order(4, false, 0, 0), vec![0, 1, 2, 3]);
        let mut shuffled = scene_order(16, true, 0, 2);
        shuffled.sort();
        assert_eq!(shuffled, (0..16).collect::<Vec<_>>());
    }
}
