//! Compares one pair of replica trees and, if they disagree, produces the
//! [`SyncRequest`] describing what to stream to reconcile them.
//!
//! Grounded directly on [`MerkleTree::difference`]; this module is the thin
//! rendezvous layer around it — [`Job`](super::job::Job) builds one
//! `C(n,2)` pair per pair of endpoints that answered a tree request.

use crate::merkle::MerkleTree;
use crate::wire::SyncRequest;
use uuid::Uuid;

/// Diffs `a`'s and `b`'s trees; `None` means they already agree and no
/// streaming is needed for this pair.
pub fn run(session_id: Uuid, src: &str, a: &MerkleTree, dst: &str, b: &MerkleTree) -> Option<SyncRequest> {
    let ranges = a.difference(b);
    if ranges.is_empty() {
        return None;
    }
    Some(SyncRequest {
        session_id,
        src: src.to_string(),
        dst: dst.to_string(),
        ranges,
    })
}

/// Runs [`run`] over every unordered pair in `trees` (`C(n,2)` pairs
/// total), skipping pairs whose trees agree.
pub fn pairwise(session_id: Uuid, trees: &[(String, MerkleTree)]) -> Vec<SyncRequest> {
    let mut out = Vec::new();
    for i in 0..trees.len() {
        for j in (i + 1)..trees.len() {
            let (src, a) = &trees[i];
            let (dst, b) = &trees[j];
            if let Some(req) = run(session_id, src, a, dst, b) {
                out.push(req);
            }
        }
    }
    out
}
