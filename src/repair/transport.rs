//! Abstracts sending repair verbs to a peer endpoint, so [`Session`](super::session::Session)
//! and [`Job`](super::job::Job) never depend on a real socket layer.
//!
//! Grounded on the same seam style as [`crate::sstable::SstHandle`]: a
//! small trait plus an in-process test double, here a loopback registry
//! that answers tree requests from pre-seeded trees instead of a real
//! verb handler.

use crate::merkle::MerkleTree;
use crate::wire::{SnapshotCommand, TreeRequest, TreeResponse, WireMerkleTree};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no such endpoint: {0}")]
    UnknownEndpoint(String),

    #[error("send to {endpoint} failed: {reason}")]
    SendFailed { endpoint: String, reason: String },
}

/// Sends repair verbs to a named endpoint and returns the peer's reply.
pub trait Transport: Send + Sync {
    fn request_tree(&self, endpoint: &str, request: &TreeRequest) -> Result<TreeResponse, TransportError>;

    fn send_snapshot(&self, endpoint: &str, command: &SnapshotCommand) -> Result<(), TransportError>;
}

/// An in-process transport: every "endpoint" is really just a key into a
/// table of pre-built trees, answering as if the remote validator had
/// already run. Used by tests exercising [`Session`](super::session::Session)
/// end to end without real sockets.
#[derive(Default)]
pub struct LoopbackTransport {
    trees: Mutex<HashMap<String, MerkleTree>>,
    unreachable: Mutex<HashMap<String, String>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, endpoint: &str, tree: MerkleTree) {
        self.trees.lock().unwrap().insert(endpoint.to_string(), tree);
    }

    /// Makes subsequent requests to `endpoint` fail with `reason`, simulating
    /// a down peer.
    pub fn cut(&self, endpoint: &str, reason: &str) {
        self.unreachable
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), reason.to_string());
    }
}

impl Transport for LoopbackTransport {
    fn request_tree(&self, endpoint: &str, request: &TreeRequest) -> Result<TreeResponse, TransportError> {
        if let Some(reason) = self.unreachable.lock().unwrap().get(endpoint) {
            return Err(TransportError::SendFailed {
                endpoint: endpoint.to_string(),
                reason: reason.clone(),
            });
        }
        let trees = self.trees.lock().unwrap();
        let tree = trees
            .get(endpoint)
            .ok_or_else(|| TransportError::UnknownEndpoint(endpoint.to_string()))?;
        Ok(TreeResponse {
            session_id: request.session_id,
            tree: WireMerkleTree::from_tree(tree, 0),
        })
    }

    fn send_snapshot(&self, endpoint: &str, _command: &SnapshotCommand) -> Result<(), TransportError> {
        if let Some(reason) = self.unreachable.lock().unwrap().get(endpoint) {
            return Err(TransportError::SendFailed {
                endpoint: endpoint.to_string(),
                reason: reason.clone(),
            });
        }
        if !self.trees.lock().unwrap().contains_key(endpoint) {
            return Err(TransportError::UnknownEndpoint(endpoint.to_string()));
        }
        Ok(())
    }
}
