//! Builds one replica's [`MerkleTree`] from a local row stream.
//!
//! Grounded on [`row::MergeIterator`](crate::row::MergeIterator)'s
//! single-pass-over-sorted-input shape: `Validator` consumes exactly one
//! ascending `(key, token)` pass, folding each row's digest into whichever
//! leaf its token falls in and emitting the empty-leaf marker for any leaf
//! no row touched, so a table with no local data still produces a tree
//! that compares correctly against a peer's.

use crate::merkle::{MerkleTree, EMPTY_HASH};
use crate::row::{RangeTombstone, Row, RowEntry};
use crate::token::{DecoratedKey, Range, Token};
use sha2::{Digest, Sha256};

/// Digests one [`Row`] for the tree, unless `gc_before` says a peer
/// building the same tree would already have dropped it — mirrors
/// [`CompactionTask::drop_expired`](crate::compaction::task::CompactionTask)'s
/// cutoff so an already-collectible tombstone never produces a spurious
/// mismatch. Range tombstones fold their `start` key's canonical bytes;
/// point rows fold their own `PointEntry::canonical_bytes`.
fn row_digest(row: &Row, gc_before: u64) -> Option<[u8; 32]> {
    let entry = row.clone().into_entry();
    let retained = match &entry {
        RowEntry::Point(p) => p.value.is_some() || p.timestamp >= gc_before,
        RowEntry::Range(r) => r.timestamp >= gc_before,
    };
    if !retained {
        return None;
    }
    let bytes = match entry {
        RowEntry::Point(p) => p.canonical_bytes(),
        RowEntry::Range(r) => range_canonical_bytes(&r),
    };
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Some(hasher.finalize().into())
}

fn range_canonical_bytes(r: &RangeTombstone) -> Vec<u8> {
    use crate::encoding::Encode;
    let mut buf = Vec::new();
    let _ = r.start.key.encode_to(&mut buf);
    let _ = r.end.key.encode_to(&mut buf);
    let _ = r.lsn.encode_to(&mut buf);
    let _ = r.timestamp.encode_to(&mut buf);
    buf
}

/// Builds a [`MerkleTree`] over `range` from a single ascending pass of
/// local rows.
pub struct Validator {
    range: Range<Token>,
    tree: MerkleTree,
    leaves: Vec<Range<Token>>,
    current_leaf: usize,
    current_acc: [u8; 32],
    last_key: Option<DecoratedKey>,
    gc_before: u64,
}

impl Validator {
    /// Samples `sample_tokens` (if any) as early split points and then
    /// evenly refines the rest, up to `max_depth`. Stops consuming samples
    /// the moment `split` reports the tree has nothing left to divide,
    /// rather than feeding it the remainder for no effect. `gc_before` is
    /// the same drop-time cutoff `CompactionTask` uses locally: a row
    /// `add` receives that is already collectible below it folds in as if
    /// it were never passed at all.
    pub fn prepare(range: Range<Token>, max_depth: usize, sample_tokens: &[Token], gc_before: u64) -> Self {
        let mut tree = MerkleTree::new(range, max_depth);
        for &t in sample_tokens {
            if !tree.split(t) {
                break;
            }
        }
        tree.init();
        let leaves = tree.leaf_ranges();
        Self {
            range,
            tree,
            leaves,
            current_leaf: 0,
            current_acc: EMPTY_HASH,
            last_key: None,
            gc_before,
        }
    }

    /// Folds one row into the tree. Rows must arrive in strictly
    /// ascending `(key, lsn)` order — the order a [`LeveledScanner`](
    /// crate::compaction::scanner::LeveledScanner) or any other single
    /// merged-scan already produces. Any violation is a programmer error:
    /// it panics rather than silently building a tree that doesn't match
    /// what was actually stored.
    pub fn add(&mut self, row: &Row) {
        let key = row.key();
        if !self.range.contains(key.token) {
            panic!("Validator::add: row token {:?} outside range {:?}", key.token, self.range);
        }
        if let Some(last) = &self.last_key {
            assert!(key > last, "Validator::add: rows must strictly increase; got {key:?} after {last:?}");
        }
        self.last_key = Some(key.clone());

        while self.current_leaf < self.leaves.len()
            && !self.leaves[self.current_leaf].contains(key.token)
        {
            self.flush_leaf();
        }
        if self.current_leaf >= self.leaves.len() {
            panic!("Validator::add: row token {:?} past the last leaf", key.token);
        }
        if let Some(digest) = row_digest(row, self.gc_before) {
            self.current_acc = xor(&self.current_acc, &digest);
        }
    }

    fn flush_leaf(&mut self) {
        // An untouched leaf folds the empty marker, which is a no-op XOR —
        // kept explicit to mirror the "emit EMPTY_ROW" step even though it
        // never changes the accumulator.
        self.current_acc = xor(&self.current_acc, &EMPTY_HASH);
        self.tree.fold_leaf(self.current_leaf, self.current_acc);
        self.current_leaf += 1;
        self.current_acc = EMPTY_HASH;
    }

    /// Flushes the final leaf (and any untouched trailing leaves) and
    /// returns the completed tree.
    pub fn complete(mut self) -> MerkleTree {
        while self.current_leaf < self.leaves.len() {
            self.flush_leaf();
        }
        self.tree
    }
}

fn xor(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for i in 0..32 {
        out[i] = a[i] ^ b[i];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{OrderPreservingPartitioner, Partitioner};

    fn dk(p: &dyn Partitioner, key: &[u8]) -> DecoratedKey {
        DecoratedKey::new(p, key.to_vec())
    }

    fn put(p: &dyn Partitioner, key: &[u8], lsn: u64) -> Row {
        Row::Put {
            key: dk(p, key),
            value: vec![lsn as u8],
            lsn,
            timestamp: lsn,
        }
    }

    #[test]
    fn empty_table_produces_all_empty_leaves() {
        let v = Validator::prepare(Range::new(Token(0), Token(1000)), 3, &[], 0);
        let tree = v.complete();
        assert_eq!(tree.digest(), EMPTY_HASH);
    }

    #[test]
    fn two_validators_over_identical_data_match() {
        let p = OrderPreservingPartitioner;
        let range = Range::new(Token(0), Token(1000));
        let rows = vec![put(&p, b"aaa", 1), put(&p, b"bbb", 2), put(&p, b"ccc", 3)];

        let mut v1 = Validator::prepare(range, 4, &[], 0);
        for r in &rows {
            v1.add(r);
        }
        let t1 = v1.complete();

        let mut v2 = Validator::prepare(range, 4, &[], 0);
        for r in &rows {
            v2.add(r);
        }
        let t2 = v2.complete();

        assert_eq!(t1.digest(), t2.digest());
        assert!(t1.difference(&t2).is_empty());
    }

    #[test]
    fn divergent_single_row_is_detected() {
        let p = OrderPreservingPartitioner;
        let range = Range::new(Token(0), Token(1000));

        let mut v1 = Validator::prepare(range, 4, &[], 0);
        v1.add(&put(&p, b"aaa", 1));
        v1.add(&put(&p, b"bbb", 2));
        let t1 = v1.complete();

        let mut v2 = Validator::prepare(range, 4, &[], 0);
        v2.add(&put(&p, b"aaa", 1));
        v2.add(&put(&p, b"bbb", 99)); // different LSN -> different digest
        let t2 = v2.complete();

        assert_ne!(t1.digest(), t2.digest());
        assert!(!t1.difference(&t2).is_empty());
    }

    #[test]
    #[should_panic(expected = "strictly increase")]
    fn out_of_order_add_panics() {
        let p = OrderPreservingPartitioner;
        let mut v = Validator::prepare(Range::new(Token(0), Token(1000)), 4, &[], 0);
        v.add(&put(&p, b"bbb", 1));
        v.add(&put(&p, b"aaa", 1));
    }

    #[test]
    #[should_panic(expected = "outside range")]
    fn out_of_range_add_panics() {
        let p = OrderPreservingPartitioner;
        let mut v = Validator::prepare(Range::new(Token(500), Token(600)), 4, &[], 0);
        v.add(&put(&p, b"aaa", 1));
    }

    fn delete(p: &dyn Partitioner, key: &[u8], lsn: u64, timestamp: u64) -> Row {
        Row::Delete {
            key: dk(p, key),
            lsn,
            timestamp,
        }
    }

    /// A tombstone older than `gc_before` folds as if it were never added,
    /// so a replica that has already compacted it away still matches one
    /// that is still carrying it locally.
    #[test]
    fn tombstones_older_than_gc_before_do_not_affect_the_digest() {
        let p = OrderPreservingPartitioner;
        let range = Range::new(Token(0), Token(1000));

        let mut with_stale_tombstone = Validator::prepare(range, 4, &[], 100);
        with_stale_tombstone.add(&put(&p, b"aaa", 1));
        with_stale_tombstone.add(&delete(&p, b"bbb", 2, 50)); // timestamp 50 < gc_before 100
        let t1 = with_stale_tombstone.complete();

        let mut already_dropped = Validator::prepare(range, 4, &[], 100);
        already_dropped.add(&put(&p, b"aaa", 1));
        let t2 = already_dropped.complete();

        assert_eq!(t1.digest(), t2.digest());
        assert!(t1.difference(&t2).is_empty());
    }

    /// The same tombstone, still within the grace period, does affect the
    /// digest and a replica missing it is flagged divergent.
    #[test]
    fn tombstones_within_gc_grace_still_affect_the_digest() {
        let p = OrderPreservingPartitioner;
        let range = Range::new(Token(0), Token(1000));

        let mut with_tombstone = Validator::prepare(range, 4, &[], 10);
        with_tombstone.add(&put(&p, b"aaa", 1));
        with_tombstone.add(&delete(&p, b"bbb", 2, 50)); // timestamp 50 >= gc_before 10
        let t1 = with_tombstone.complete();

        let mut without_tombstone = Validator::prepare(range, 4, &[], 10);
        without_tombstone.add(&put(&p, b"aaa", 1));
        let t2 = without_tombstone.complete();

        assert_ne!(t1.digest(), t2.digest());
        assert!(!t1.difference(&t2).is_empty());
    }
}
