//! One table's worth of tree-request rendezvous within a repair session.
//!
//! A job fans a `TreeRequest` out to every endpoint sharing its range,
//! waits for every `TreeResponse`, then builds one [`differencer::pairwise`]
//! worth of `C(n,2)` comparisons before releasing the trees.

use super::coordinator::{Policy, RequestCoordinator};
use super::differencer;
use super::transport::Transport;
use crate::merkle::MerkleTree;
use crate::pool::Latch;
use crate::token::{Range, Token};
use crate::wire::{SnapshotCommand, SyncRequest, TreeRequest};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("snapshot pre-phase for {keyspace}.{table} timed out waiting for acks")]
    SnapshotLatchTimedOut { keyspace: String, table: String },
}

/// Tracks one job's endpoints and builds its `TreeRequest`s. The
/// coordinator and the endpoint list are kept in the same order, so a
/// dispatch index always names the right peer.
pub struct Job {
    session_id: Uuid,
    keyspace: String,
    table: String,
    range: Range<Token>,
    endpoints: Vec<String>,
    coordinator: RequestCoordinator<TreeRequest>,
    trees: HashMap<String, MerkleTree>,
    snapshot_latch: Option<Arc<Latch>>,
}

impl Job {
    /// `gc_before` is the same drop-time cutoff
    /// [`CompactionTask`](crate::compaction::task::CompactionTask) uses on
    /// the local side — carried here so the peer's validator drops
    /// already-expired tombstones the same way before building its tree,
    /// rather than flagging a spurious mismatch over data every replica
    /// would garbage-collect identically on its next compaction.
    pub fn new(
        session_id: Uuid,
        keyspace: impl Into<String>,
        table: impl Into<String>,
        range: Range<Token>,
        endpoints: Vec<String>,
        gc_before: i32,
        policy: Policy,
    ) -> Self {
        let keyspace = keyspace.into();
        let table = table.into();
        let mut coordinator = RequestCoordinator::new(policy);
        for endpoint in &endpoints {
            coordinator.add(TreeRequest {
                session_id: Some(session_id),
                endpoint: endpoint.clone(),
                gc_before,
                keyspace: keyspace.clone(),
                table: table.clone(),
                range,
            });
        }
        Self {
            session_id,
            keyspace,
            table,
            range,
            endpoints,
            coordinator,
            trees: HashMap::new(),
            snapshot_latch: None,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn range(&self) -> Range<Token> {
        self.range
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Snapshot pre-phase: sends a `SnapshotCommand` to every endpoint,
    /// sequentially, and waits for all of them to ack (or `timeout` to
    /// elapse) before this job's tree requests may go out. An endpoint
    /// whose send fails never counts its ack down, so a single
    /// unreachable peer surfaces as a latch timeout rather than hanging
    /// forever.
    pub fn run_snapshot_phase(&mut self, transport: &dyn Transport, timeout: Duration) -> Result<(), JobError> {
        let latch = Arc::new(Latch::new(self.endpoints.len()));
        self.snapshot_latch = Some(latch.clone());
        let command = SnapshotCommand {
            session_id: self.session_id,
            keyspace: self.keyspace.clone(),
            table: self.table.clone(),
        };
        for endpoint in &self.endpoints {
            if transport.send_snapshot(endpoint, &command).is_ok() {
                latch.count_down();
            }
        }
        let acked = latch.wait_timeout(timeout);
        self.snapshot_latch = None;
        if acked {
            Ok(())
        } else {
            Err(JobError::SnapshotLatchTimedOut {
                keyspace: self.keyspace.clone(),
                table: self.table.clone(),
            })
        }
    }

    /// Drains this job's snapshot latch, if one is currently being waited
    /// on, unblocking whichever thread called
    /// [`run_snapshot_phase`](Self::run_snapshot_phase) instead of making
    /// it ride out the full timeout. A no-op once the phase has already
    /// resolved.
    pub(crate) fn drain_snapshot_latch(&self) {
        if let Some(latch) = &self.snapshot_latch {
            latch.drain();
        }
    }

    /// Dispatches the job's tree requests (all at once or one at a time,
    /// per the job's policy), handing each to `send` alongside the
    /// endpoint it targets.
    pub fn start(&mut self, mut send: impl FnMut(&str, &TreeRequest)) {
        let endpoints = self.endpoints.clone();
        self.coordinator.start(|idx, req| send(&endpoints[idx], req));
    }

    /// Records `endpoint`'s tree response. Once every endpoint in this job
    /// has reported, returns the job's `C(n,2)` sync requests (possibly
    /// empty, if every pair already agreed) and clears the trees. Returns
    /// `None` while the job is still awaiting responses.
    ///
    /// Panics if `endpoint` was not one of this job's expected endpoints,
    /// or if every response has already been recorded — both are
    /// programmer errors in the caller's dispatch bookkeeping, not data
    /// conditions this job should paper over.
    pub fn add_tree(
        &mut self,
        endpoint: &str,
        tree: MerkleTree,
        mut send_next: impl FnMut(&str, &TreeRequest),
    ) -> Option<Vec<SyncRequest>> {
        assert!(
            self.endpoints.iter().any(|e| e == endpoint),
            "job for table {} received a tree from unexpected endpoint {endpoint}",
            self.table
        );
        self.trees.insert(endpoint.to_string(), tree);
        let endpoints = self.endpoints.clone();
        let outstanding = self.coordinator.completed(|idx, req| send_next(&endpoints[idx], req));
        if outstanding > 0 {
            return None;
        }
        let trees: Vec<(String, MerkleTree)> = self.trees.drain().collect();
        Some(differencer::pairwise(self.session_id, &trees))
    }
}
