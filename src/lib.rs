//! # ringtable
//!
//! Storage-engine internals for a wide-column, token-ring-partitioned
//! store: leveled SST compaction and Merkle-tree anti-entropy repair.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                    Leveled Compaction Core                │
//! │  ┌────────────┐   ┌──────────────────┐   ┌──────────────┐ │
//! │  │  Manifest  │──▶│ scheduler::select │──▶│ CompactionTask│ │
//! │  │ (levels)   │   │  (candidates)      │   │ (merge+write) │ │
//! │  └────────────┘   └──────────────────┘   └──────┬───────┘ │
//! │         ▲                                        │         │
//! │         └──────────────── promote ────────────────┘         │
//! │                                                             │
//! │  LeveledScanner: lazy, one-SST-open-per-level merged reads  │
//! └───────────────────────────────────────────────────────────┘
//!
//! ┌───────────────────────────────────────────────────────────┐
//! │                 Anti-Entropy Repair Core                  │
//! │  Session ─▶ Job ─▶ RequestCoordinator ─▶ Validator (SHA-256│
//! │     │          │         (tree req)         + MerkleTree)  │
//! │     │          └────────▶ Differencer ─▶ StreamExecutor    │
//! │     └── FailureDetector convicts session members           │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`token`] | Ring tokens, partitioners, and wrapping `Range`/`Bounds` |
//! | [`row`] | `Row`, `PointEntry`, `RangeTombstone`, and the merge iterator |
//! | [`encoding`] | Hand-rolled `Encode`/`Decode` framing shared by every durable/wire format |
//! | [`sstable`] | Immutable on-disk sorted tables and the `SstHandle` contract |
//! | [`manifest`] | Per-level SST bookkeeping and candidate scheduling |
//! | [`compaction`] | `LeveledScanner` and `CompactionTask` |
//! | [`merkle`] | Per-replica Merkle tree over a token range |
//! | [`repair`] | Validator, session/job state machine, differencer, streaming |
//! | [`wire`] | Versioned wire messages between repair session peers |
//! | [`config`] | Tunables for compaction and repair |
//! | [`pool`] | Worker pool, single-consumer stage, and one-shot latch |
//! | [`wal`] | Generic, CRC-protected write-ahead log |
//!
//! ## Key properties
//!
//! - **Leveled compaction.** Candidate selection scores each level by
//!   overflow ratio; L0 is swept as a whole once it crosses a configured
//!   threshold, L1+ candidates are chosen by score and promoted to
//!   `max(input levels) + 1` automatically.
//! - **Deterministic Merkle trees.** Leaf boundaries come from pure
//!   midpoint bisection of a leaf's own range, so two replicas' trees
//!   built independently still agree on where leaves fall, letting
//!   [`merkle::MerkleTree::difference`] localize disagreement even across
//!   mismatched tree depths.
//! - **Crash-loud invariants.** Out-of-order rows reaching
//!   [`repair::Validator::add`], or any other broken internal invariant,
//!   panics rather than silently producing a tree or SSTable that doesn't
//!   match what was stored.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use ringtable::merkle::MerkleTree;
//! use ringtable::repair::Validator;
//! use ringtable::row::Row;
//! use ringtable::token::{DecoratedKey, Murmur3Partitioner, Partitioner, Range, Token};
//!
//! let partitioner = Murmur3Partitioner;
//! let range = Range::new(Token::MIN, Token::MAX);
//!
//! // Build replica A's tree from its local rows (must be fed in ascending
//! // (key, token) order — e.g. from a LeveledScanner over that replica's
//! // SSTs for `range`).
//! let mut validator = Validator::prepare(range, /* max_depth */ 10, &[], /* gc_before */ 0);
//! let row = Row::Put {
//!     key: DecoratedKey::new(&partitioner, b"user#42".to_vec()),
//!     value: b"alice".to_vec(),
//!     lsn: 1,
//!     timestamp: 1_700_000_000,
//! };
//! validator.add(&row);
//! let tree_a: MerkleTree = validator.complete();
//!
//! // A peer validator run independently over the same range produces a
//! // tree whose leaf boundaries agree with `tree_a`'s wherever both split
//! // that far, so the two can be diffed directly.
//! let tree_b = Validator::prepare(range, 10, &[], 0).complete();
//! let disagreements = tree_a.difference(&tree_b);
//! assert!(!disagreements.is_empty(), "replica b never saw row user#42");
//! ```

#![allow(dead_code)]

pub mod compaction;
pub mod config;
pub mod encoding;
pub mod manifest;
pub mod merkle;
pub mod pool;
pub mod repair;
pub mod row;
pub mod sstable;
pub mod token;
pub mod wal;
pub mod wire;
