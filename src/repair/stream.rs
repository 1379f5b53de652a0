//! Executes one [`SyncRequest`]'s worth of row streaming between two
//! endpoints.
//!
//! Grounded on the same trait-plus-test-double seam as
//! [`transport::Transport`](super::transport::Transport); the actual byte
//! transfer is a peripheral concern (owned by whatever real network layer
//! a deployment plugs in), so only the contract
//! [`Differencer`](super::differencer) depends on is captured here.

use crate::wire::SyncRequest;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("streaming {src} -> {dst} failed: {reason}")]
    Failed { src: String, dst: String, reason: String },
}

/// Runs the row transfer a [`SyncRequest`] describes and reports success or
/// failure. Each call is one `src -> dst` leg of a repair job's differencer
/// output.
pub trait StreamExecutor: Send + Sync {
    fn stream(&self, request: &SyncRequest) -> Result<(), StreamError>;
}

/// Records every request it was asked to stream instead of moving any
/// bytes, for tests that only care about which pairs were told to sync.
#[derive(Default)]
pub struct RecordingStreamExecutor {
    requests: Mutex<Vec<SyncRequest>>,
    fail_pairs: Mutex<Vec<(String, String)>>,
}

impl RecordingStreamExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subsequent streams between `src` and `dst` fail instead of
    /// succeeding.
    pub fn fail_pair(&self, src: &str, dst: &str) {
        self.fail_pairs.lock().unwrap().push((src.to_string(), dst.to_string()));
    }

    pub fn requests(&self) -> Vec<SyncRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl StreamExecutor for RecordingStreamExecutor {
    fn stream(&self, request: &SyncRequest) -> Result<(), StreamError> {
        let should_fail = self
            .fail_pairs
            .lock()
            .unwrap()
            .iter()
            .any(|(s, d)| *s == request.src && *d == request.dst);
        self.requests.lock().unwrap().push(request.clone());
        if should_fail {
            return Err(StreamError::Failed {
                src: request.src.clone(),
                dst: request.dst.clone(),
                reason: "simulated streaming failure".into(),
            });
        }
        Ok(())
    }
}
