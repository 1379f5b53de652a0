//! Micro-benchmarks for the leveled compaction core.
//!
//! Uses Criterion for statistically rigorous measurement with regression
//! detection and HTML reports.
//!
//! # Running
//!
//! ```bash
//! cargo bench --bench micro              # run all micro-benchmarks
//! cargo bench --bench micro -- scan      # filter by name
//! ```
//!
//! Reports are generated in `target/criterion/report/index.html`.

use criterion::{
    BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main,
};

use ringtable::compaction::{CompactionInput, CompactionTask, LeveledScanner, resolve_inputs};
use ringtable::config::CompactionConfig;
use ringtable::manifest::{Manifest, ManifestSstEntry};
use ringtable::row::{PointEntry, Row};
use ringtable::sstable::{SSTable, SstHandle, SstWriter};
use ringtable::token::{DecoratedKey, OrderPreservingPartitioner, Partitioner};
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

/// Default value payload for benchmarks (128 bytes).
const VALUE_128B: &[u8; 128] = &[0xAB; 128];

/// Larger value payload (1 KiB).
const VALUE_1K: &[u8; 1024] = &[0xCD; 1024];

fn dk(p: &dyn Partitioner, key: &[u8]) -> DecoratedKey {
    DecoratedKey::new(p, key.to_vec())
}

/// Format a zero-padded key.
fn make_key(i: u64) -> Vec<u8> {
    format!("key-{i:012}").into_bytes()
}

fn point(p: &dyn Partitioner, key: &[u8], value: &[u8], lsn: u64) -> PointEntry {
    PointEntry {
        key: dk(p, key),
        value: Some(value.to_vec()),
        lsn,
        timestamp: lsn,
    }
}

/// Writes one real SSTable of `count` sequential keys to `dir/{id}.sst`
/// and registers it with `manifest` at `level`.
fn write_sst(
    dir: &std::path::Path,
    manifest: &Manifest,
    id: u64,
    level: i32,
    key_start: u64,
    count: u64,
    value: &[u8],
) {
    let p = OrderPreservingPartitioner;
    let points: Vec<PointEntry> = (0..count)
        .map(|i| point(&p, &make_key(key_start + i), value, key_start + i))
        .collect();
    let path = dir.join(format!("{id}.sst"));
    SstWriter::new(&path)
        .build(points.clone().into_iter(), points.len(), std::iter::empty(), 0)
        .expect("build sstable");
    let first = points.first().unwrap().key.clone();
    let last = points.last().unwrap().key.clone();
    manifest
        .add(ManifestSstEntry {
            id,
            path,
            level,
            first_key: first,
            last_key: last,
            uncompressed_length: count * (value.len() as u64 + 32),
        })
        .unwrap();
}

/// Populates `manifest`/`dir` with `num_ssts` non-overlapping L0 tables of
/// `keys_per_sst` sequential keys each.
fn populate_l0(dir: &std::path::Path, manifest: &Manifest, num_ssts: u64, keys_per_sst: u64, value: &[u8]) {
    for i in 0..num_ssts {
        write_sst(dir, manifest, i, 0, i * keys_per_sst, keys_per_sst, value);
    }
}

// ================================================================================================
// SSTable write benchmarks
// ================================================================================================

/// Benchmark group for `SstWriter::build` throughput.
///
/// # Sub-benchmarks
///
/// ## `build/{1000,10000}`
///
/// **Scenario:** Builds a single SSTable from N sorted, sequential point
/// entries with a 128 B value.
///
/// **What it measures:** The cost of encoding data blocks, the bloom
/// filter, and the index/footer for a complete SSTable — the write-side
/// half of every flush and compaction output.
///
/// **Expected behaviour:** Roughly linear in entry count; per-entry cost
/// dominated by block encoding and bloom filter insertion.
fn bench_sst_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("sst_build");

    for &count in &[1_000u64, 10_000] {
        group.throughput(Throughput::Elements(count));
        group.bench_function(BenchmarkId::new("build", count), |b| {
            let p = OrderPreservingPartitioner;
            let points: Vec<PointEntry> = (0..count).map(|i| point(&p, &make_key(i), VALUE_128B, i)).collect();

            b.iter_batched(
                || TempDir::new().unwrap(),
                |dir| {
                    let path = dir.path().join("out.sst");
                    SstWriter::new(&path)
                        .build(black_box(points.clone()).into_iter(), points.len(), std::iter::empty(), 0)
                        .unwrap();
                },
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

// ================================================================================================
// Leveled scan benchmarks
// ================================================================================================

/// Benchmark group for [`LeveledScanner`] merge throughput.
///
/// # Sub-benchmarks
///
/// ## `l0_sstables/{2,4,8}`
///
/// **Scenario:** Merges a full scan across N non-overlapping `L0`
/// SSTables, each holding 1,000 keys, via a single `LeveledScanner`.
///
/// **What it measures:** The cost of the one-open-SST-per-level heap
/// merge — opening each table's scanner and interleaving rows in
/// `(key ASC, LSN DESC)` order.
///
/// **Expected behaviour:** Roughly linear in total row count, with a
/// small per-level constant from opening/closing each table's scanner in
/// turn.
fn bench_leveled_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("leveled_scan");

    for &num_ssts in &[2u64, 4, 8] {
        let keys_per_sst = 1_000u64;
        group.throughput(Throughput::Elements(num_ssts * keys_per_sst));
        group.bench_function(BenchmarkId::new("l0_sstables", num_ssts), |b| {
            let dir = TempDir::new().unwrap();
            let manifest = Manifest::open(dir.path()).unwrap();
            populate_l0(dir.path(), &manifest, num_ssts, keys_per_sst, VALUE_128B);

            let handles: Vec<Arc<dyn SstHandle>> = manifest
                .sstables_in_level(0)
                .unwrap()
                .into_iter()
                .map(|e| Arc::new(SSTable::open(&e.path).unwrap()) as Arc<dyn SstHandle>)
                .collect();

            b.iter(|| {
                let levels: Vec<Vec<Arc<dyn SstHandle>>> = handles.iter().map(|h| vec![h.clone()]).collect();
                let scanner = LeveledScanner::new(levels, None);
                let rows: Vec<Row> = scanner.map(Result::unwrap).collect();
                black_box(&rows);
            });
        });
    }

    group.finish();
}

// ================================================================================================
// Compaction benchmarks
// ================================================================================================

/// Benchmark group for a full `L0` sweep through [`CompactionTask`].
///
/// # Sub-benchmarks
///
/// ## `l0_sweep/{4,8}`
///
/// **Scenario:** Prepopulates N non-overlapping `L0` SSTables of 1,000
/// keys each, resolves the manifest's `L0` sweep candidates, and runs the
/// full merge → dedup → write → promote pipeline.
///
/// **What it measures:** End-to-end compaction cost: opening every input
/// table, merging them, deduplicating rows, and writing the compacted
/// output(s) — the most expensive background operation this engine runs.
///
/// **Expected behaviour:** Roughly linear in total input row count, since
/// these fixtures have no overlapping keys to dedup away.
fn bench_compaction(c: &mut Criterion) {
    let mut group = c.benchmark_group("compaction");
    group.sample_size(10);

    for &num_ssts in &[4u64, 8] {
        group.bench_function(BenchmarkId::new("l0_sweep", num_ssts), |b| {
            b.iter_batched(
                || {
                    let dir = TempDir::new().unwrap();
                    let manifest = Manifest::open(dir.path()).unwrap();
                    populate_l0(dir.path(), &manifest, num_ssts, 1_000, VALUE_128B);
                    (dir, manifest)
                },
                |(dir, manifest)| {
                    let candidates = manifest.compaction_candidates().unwrap();
                    let mut entries_by_level: HashMap<i32, Vec<ManifestSstEntry>> = HashMap::new();
                    entries_by_level.insert(0, manifest.sstables_in_level(0).unwrap());
                    let level_groups: Vec<Vec<CompactionInput>> =
                        resolve_inputs(&candidates, &entries_by_level, |entry| {
                            Ok(Arc::new(SSTable::open(&entry.path)?) as Arc<dyn SstHandle>)
                        })
                        .unwrap();
                    let task = CompactionTask::new(
                        &manifest,
                        candidates,
                        level_groups,
                        dir.path(),
                        CompactionConfig::default(),
                        0,
                    );
                    black_box(task.run().unwrap());
                },
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

// ================================================================================================
// Manifest bookkeeping benchmarks
// ================================================================================================

/// Benchmark group for manifest add/candidate-selection cost.
///
/// # Sub-benchmarks
///
/// ## `add`
///
/// **Scenario:** Registers a single new SST entry with a manifest that
/// already has 1,000 `L1` entries.
///
/// **What it measures:** The cost of a single WAL-backed manifest
/// mutation — append the entry's record, update in-memory bookkeeping.
///
/// **Expected behaviour:** Low-microsecond range, dominated by the WAL
/// append's fsync.
///
/// ## `compaction_candidates`
///
/// **Scenario:** Computes compaction candidates against a manifest
/// holding 25 `L0` entries (past the `L0` sweep threshold) and several
/// populated higher levels.
///
/// **What it measures:** [`scheduler::select`](ringtable::manifest::scheduler)'s
/// cost: scoring every level and picking the highest-scoring candidate.
///
/// **Expected behaviour:** Linear in level count, since each level is
/// scored once per call.
fn bench_manifest(c: &mut Criterion) {
    let mut group = c.benchmark_group("manifest");

    group.bench_function("add", |b| {
        let dir = TempDir::new().unwrap();
        let manifest = Manifest::open(dir.path()).unwrap();
        let p = OrderPreservingPartitioner;
        for id in 0..1_000u64 {
            manifest
                .add(ManifestSstEntry {
                    id,
                    path: dir.path().join(format!("{id}.sst")),
                    level: 1,
                    first_key: dk(&p, b"a"),
                    last_key: dk(&p, b"z"),
                    uncompressed_length: VALUE_1K.len() as u64,
                })
                .unwrap();
        }
        let mut next_id = 1_000u64;
        b.iter(|| {
            manifest
                .add(ManifestSstEntry {
                    id: next_id,
                    path: dir.path().join(format!("{next_id}.sst")),
                    level: 1,
                    first_key: dk(&p, b"a"),
                    last_key: dk(&p, b"z"),
                    uncompressed_length: VALUE_1K.len() as u64,
                })
                .unwrap();
            next_id += 1;
        });
    });

    group.bench_function("compaction_candidates", |b| {
        let dir = TempDir::new().unwrap();
        let manifest = Manifest::open(dir.path()).unwrap();
        populate_l0(dir.path(), &manifest, 25, 10, VALUE_128B);

        b.iter(|| {
            let candidates = black_box(manifest.compaction_candidates().unwrap());
            manifest.abort_compaction(&candidates.inputs);
        });
    });

    group.finish();
}

// ================================================================================================
// Group registration
// ================================================================================================

criterion_group!(
    benches,
    bench_sst_build,
    bench_leveled_scan,
    bench_compaction,
    bench_manifest,
);

criterion_main!(benches);
