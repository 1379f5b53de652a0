//! Macro-benchmarks for a full anti-entropy repair session, end to end.
//!
//! Measures sustained throughput under realistic replica-divergence
//! scenarios: building Merkle trees over a table's rows, diffing a pair
//! (or a whole quorum) of replicas, and driving a [`Session`] through its
//! complete `New -> ... -> Done` lifecycle via the in-process transport
//! and streaming test doubles.
//!
//! # Scenarios
//!
//! | Name | Shape | Description |
//! |------|-------|-------------|
//! | **tree_build** | N rows, depth D | Cost of `Validator::prepare`/`add`/`complete` |
//! | **two_replica_diff** | N rows, X% divergent | Pairwise diff cost as disagreement grows |
//! | **quorum_diff** | N replicas | `C(n,2)` pairwise differencing across a repair quorum |
//! | **session_lifecycle** | N rows, 2 endpoints | Full `Session`/`Job` rendezvous + streaming |
//!
//! # Running
//!
//! ```bash
//! cargo bench --bench ycsb                    # all scenarios
//! cargo bench --bench ycsb -- tree_build       # filter by name
//! ```

use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use ringtable::merkle::MerkleTree;
use ringtable::repair::failure_detector::FakeFailureDetector;
use ringtable::repair::stream::RecordingStreamExecutor;
use ringtable::repair::transport::LoopbackTransport;
use ringtable::repair::{Job, Policy, Session, Transport, Validator};
use ringtable::row::Row;
use ringtable::token::{DecoratedKey, Murmur3Partitioner, Partitioner, Range, Token};
use std::hint::black_box;
use std::time::Duration;
use uuid::Uuid;

const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(5);

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Default tree depth used across scenarios unless noted otherwise.
const MAX_DEPTH: usize = 10;

/// Full token ring range used for every fixture's table.
fn full_range() -> Range<Token> {
    Range::new(Token::MIN, Token::MAX)
}

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

fn make_key(i: u64) -> Vec<u8> {
    format!("row{i:012}").into_bytes()
}

/// Builds `count` ascending-keyed put rows suitable for feeding a
/// [`Validator`] in a single pass.
fn make_rows(p: &dyn Partitioner, count: u64) -> Vec<Row> {
    let mut keys: Vec<DecoratedKey> = (0..count).map(|i| DecoratedKey::new(p, make_key(i))).collect();
    keys.sort();
    keys.into_iter()
        .enumerate()
        .map(|(i, key)| Row::Put {
            key,
            value: vec![0xAB; 64],
            lsn: i as u64 + 1,
            timestamp: i as u64 + 1,
        })
        .collect()
}

/// Builds a [`MerkleTree`] from `rows` via [`Validator`].
fn build_tree(rows: &[Row]) -> MerkleTree {
    let mut v = Validator::prepare(full_range(), MAX_DEPTH, &[], 0);
    for row in rows {
        v.add(row);
    }
    v.complete()
}

/// Builds two row sets over the same keyspace that disagree on `pct`
/// percent of their keys (every `100/pct`-th row gets a different value
/// on the second replica).
fn make_divergent_rows(p: &dyn Partitioner, count: u64, pct: u32) -> (Vec<Row>, Vec<Row>) {
    let a = make_rows(p, count);
    let mut b = a.clone();
    if pct > 0 {
        let every = (100 / pct).max(1) as u64;
        for (i, row) in b.iter_mut().enumerate() {
            if i as u64 % every == 0 {
                if let Row::Put { value, lsn, timestamp, .. } = row {
                    value[0] ^= 0xFF;
                    *lsn += 1;
                    *timestamp += 1;
                }
            }
        }
    }
    (a, b)
}

// ================================================================================================
// Tree build benchmarks
// ================================================================================================

/// Benchmark group for [`Validator`]'s single-pass tree build.
///
/// # Sub-benchmarks
///
/// ## `tree_build/{1000,10000,50000}`
///
/// **Scenario:** Feeds N ascending rows through `Validator::prepare` /
/// `add` / `complete` over the full token range.
///
/// **What it measures:** The per-row cost of folding a row's digest into
/// its leaf accumulator — the cost every repair job pays once per
/// endpoint per table before any differencing happens.
///
/// **Expected behaviour:** Linear in row count; dominated by SHA-256
/// hashing and the leaf-boundary scan.
fn bench_tree_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree_build");
    let p = Murmur3Partitioner;

    for &count in &[1_000u64, 10_000, 50_000] {
        group.throughput(Throughput::Elements(count));
        group.bench_function(BenchmarkId::new("rows", count), |b| {
            let rows = make_rows(&p, count);
            b.iter(|| {
                black_box(build_tree(&rows));
            });
        });
    }

    group.finish();
}

// ================================================================================================
// Pairwise differencing benchmarks
// ================================================================================================

/// Benchmark group for [`MerkleTree::difference`] between two replicas at
/// varying divergence.
///
/// # Sub-benchmarks
///
/// ## `two_replica_diff/{0,5,25,50}pct`
///
/// **Scenario:** Builds two 10,000-row trees whose underlying data
/// disagrees on the given percentage of keys, then diffs them.
///
/// **What it measures:** How disagreement density affects `difference`'s
/// cost — it must walk every leaf pair, so the asymptotic cost is the
/// same regardless of divergence, but the size of the returned range list
/// (and any downstream streaming work) grows with it.
///
/// **Expected behaviour:** Roughly constant per-call latency across
/// divergence levels, since `difference` always visits every leaf; the
/// *output* size grows with divergence, which downstream benchmarks
/// (`session_lifecycle`) reflect instead.
fn bench_two_replica_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("two_replica_diff");
    let p = Murmur3Partitioner;
    let count = 10_000u64;

    for &pct in &[0u32, 5, 25, 50] {
        group.bench_function(BenchmarkId::new("pct", pct), |b| {
            let (rows_a, rows_b) = make_divergent_rows(&p, count, pct);
            let tree_a = build_tree(&rows_a);
            let tree_b = build_tree(&rows_b);
            b.iter(|| {
                black_box(tree_a.difference(&tree_b));
            });
        });
    }

    group.finish();
}

/// Benchmark group for [`differencer::pairwise`](ringtable::repair::differencer::pairwise)
/// across a repair quorum larger than two.
///
/// # Sub-benchmarks
///
/// ## `quorum_diff/{3,5,10}`
///
/// **Scenario:** Builds N independent 1,000-row trees (one per replica,
/// each differing on 5% of keys from replica 0) and runs the full
/// `C(n,2)` pairwise comparison a multi-replica repair job performs.
///
/// **What it measures:** How pairwise differencing scales with quorum
/// size — `C(n,2)` comparisons, each walking a full tree pair.
///
/// **Expected behaviour:** Quadratic in replica count, since every pair
/// must be compared once.
fn bench_quorum_diff(c: &mut Criterion) {
    use ringtable::repair::differencer;

    let mut group = c.benchmark_group("quorum_diff");
    let p = Murmur3Partitioner;
    let rows_per_replica = 1_000u64;

    for &n in &[3u64, 5, 10] {
        group.bench_function(BenchmarkId::new("replicas", n), |b| {
            let trees: Vec<(String, MerkleTree)> = (0..n)
                .map(|i| {
                    let (_, rows) = make_divergent_rows(&p, rows_per_replica, if i == 0 { 0 } else { 5 });
                    (format!("replica-{i}"), build_tree(&rows))
                })
                .collect();
            let session_id = Uuid::new_v4();

            b.iter(|| {
                black_box(differencer::pairwise(session_id, &trees));
            });
        });
    }

    group.finish();
}

// ================================================================================================
// Full session lifecycle benchmark
// ================================================================================================

/// Benchmark group for a complete [`Session`] repair, end to end.
///
/// # Sub-benchmarks
///
/// ## `session_lifecycle/{0,25}pct`
///
/// **Scenario:** Two endpoints, `a` and `b`, hold 5,000-row tables that
/// agree (0%) or disagree (25%) on keys. Drives `Session::start`, both
/// endpoints' tree responses via [`LoopbackTransport`], `begin_streaming`,
/// and every resulting [`SyncRequest`](ringtable::wire::SyncRequest)
/// through a [`RecordingStreamExecutor`] until `Done`.
///
/// **What it measures:** The full coordinator-level cost of one repair
/// session: tree-response rendezvous, differencing, and the streaming
/// dispatch loop — everything short of real network I/O.
///
/// **Expected behaviour:** The divergent case costs more than the
/// identical case because it has sync requests to stream, but both are
/// dominated by the tree build each endpoint must already have done
/// before the session starts (bench is restricted to session-only work;
/// tree build is amortised outside the measured closure).
fn bench_session_lifecycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("session_lifecycle");
    group.sample_size(20);
    let p = Murmur3Partitioner;
    let count = 5_000u64;

    for &pct in &[0u32, 25] {
        group.bench_function(BenchmarkId::new("pct", pct), |b| {
            let (rows_a, rows_b) = make_divergent_rows(&p, count, pct);

            b.iter_batched(
                || {
                    // `MerkleTree` isn't `Clone`, so each iteration's
                    // fixture rebuilds its own pair of trees; this setup
                    // cost is excluded from the measured routine by
                    // `iter_batched`.
                    let transport = LoopbackTransport::new();
                    transport.register("a", build_tree(&rows_a));
                    transport.register("b", build_tree(&rows_b));
                    let fd = FakeFailureDetector::new();
                    let stream_exec = RecordingStreamExecutor::new();
                    let session_id = Uuid::new_v4();
                    let job = Job::new(
                        session_id,
                        "ks",
                        "t",
                        full_range(),
                        vec!["a".into(), "b".into()],
                        0,
                        Policy::Parallel,
                    );
                    let session = Session::new(session_id, vec!["a".into(), "b".into()], vec![job]);
                    (transport, fd, stream_exec, session)
                },
                |(transport, fd, stream_exec, mut session)| {
                    session.start(&fd, &transport, SNAPSHOT_TIMEOUT, |_, _| {}).unwrap();
                    for endpoint in ["a", "b"] {
                        let response = transport
                            .request_tree(
                                endpoint,
                                &ringtable::wire::TreeRequest {
                                    session_id: Some(session.id()),
                                    endpoint: endpoint.to_string(),
                                    gc_before: 0,
                                    keyspace: "ks".into(),
                                    table: "t".into(),
                                    range: full_range(),
                                },
                            )
                            .unwrap();
                        session.add_tree(endpoint, response.tree.to_tree(), |_, _| {});
                    }

                    let sync_requests = session.begin_streaming();
                    for req in &sync_requests {
                        stream_exec.stream(req).unwrap();
                    }
                    session.stream_task_completed(0);
                    black_box(&session);
                },
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

// ================================================================================================
// Group registration
// ================================================================================================

criterion_group!(
    benches,
    bench_tree_build,
    bench_two_replica_diff,
    bench_quorum_diff,
    bench_session_lifecycle,
);

criterion_main!(benches);
