use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use data_loaders::dataloader::enumerator;
use data_loaders::sample::{PointCloud, Sample};
use data_loaders::{DataLoader, LoaderConfig, LoaderError, SampleSource, Scope};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Benchmarks for the prefetching pipeline.
///
/// This measures:
/// 1. Index building: sort + seeded shuffle + skip/limit over plain ids
/// 2. Epoch throughput: a full epoch through the worker and the bounded
///    buffer, for several buffer capacities
///
/// To run these, use:
/// ```bash
/// cargo bench -p data_loaders
/// ```

const SIZES: [usize; 3] = [1_000, 10_000, 100_000];
const CAPACITIES: [usize; 3] = [2, 5, 32];
const EPOCH_LEN: usize = 2_000;

/// Serves `len` synthetic scans of `points` points each.
struct SyntheticSource {
    root: PathBuf,
    len: u32,
    points: usize,
}

impl SampleSource for SyntheticSource {
    type Id = u32;

    fn name(&self) -> &str {
        "synthetic"
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn enumerate(&self, _scope: &Scope<'_>) -> data_loaders::Result<Vec<u32>> {
        Ok((0..self.len).collect())
    }

    fn decode(&self, id: &u32) -> data_loaders::Result<Sample> {
        let positions = (0..self.points)
            .map(|i| [*id as f32, i as f32, 1.0])
            .collect();
        Sample::builder(id.to_string(), "synthetic")
            .cloud(PointCloud::new(positions))
            .build()
            .map_err(|e| LoaderError::decode(id.to_string(), e))
    }
}

/// Measure the cost of building an epoch index
fn bench_index(c: &mut Criterion) {
    let mut group = c.benchmark_group("Index Building");

    for &size in &SIZES {
        let ids: Vec<u64> = (0..size as u64).rev().collect();
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("sorted", size), &ids, |b, ids| {
            b.iter(|| {
                let ordered = enumerator::order(ids.clone(), false, 0, 0);
                black_box(enumerator::select(ordered, 10, None).len())
            })
        });

        group.bench_with_input(BenchmarkId::new("shuffled", size), &ids, |b, ids| {
            b.iter(|| {
                let ordered = enumerator::order(ids.clone(), true, 0, 1);
                black_box(enumerator::select(ordered, 10, None).len())
            })
        });
    }
    group.finish();
}

/// Measure samples per second through the worker and the buffer.
fn bench_epoch(c: &mut Criterion) {
    let mut group = c.benchmark_group("Epoch Throughput");
    group.throughput(Throughput::Elements(EPOCH_LEN as u64));

    for &capacity in &CAPACITIES {
        let source = SyntheticSource {
            root: PathBuf::from("synthetic"),
            len: EPOCH_LEN as u32,
            points: 64,
        };
        let config = LoaderConfig::builder()
            .shuffle(true)
            .buffer_capacity(capacity)
            .poll_interval(Duration::from_micros(50))
            .backoff_interval(Duration::from_micros(50))
            .autostart(true)
            .build();
        let mut loader = DataLoader::new(source, config).unwrap();

        group.bench_function(BenchmarkId::new("capacity", capacity), |b| {
            b.iter(|| {
                let mut read = 0;
                while read < EPOCH_LEN {
                    match loader.get_sample() {
                        Ok(sample) => {
                            black_box(sample);
                            read += 1;
                        }
                        Err(LoaderError::EmptyBuffer) => std::hint::spin_loop(),
                        Err(e) => panic!("worker failed: {e}"),
                    }
                }
                loader.reset();
            })
        });
    }
    group.finish();
}

criterion_group!(
    name = benches;
    config = Criterion::default()
        .warm_up_time(std::time::Duration::from_secs(2))
        .measurement_time(std::time::Duration::from_secs(5))
        .sample_size(20);
    targets = bench_index, bench_epoch
);
criterion_main!(benches);
