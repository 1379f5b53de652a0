//! The repair session state machine: `New -> AwaitingTrees -> Differencing
//! -> Streaming -> Done`, with failure-detector convictions or terminate()
//! able to force `Failed` from any non-terminal state.

use super::coordinator::Policy;
use super::failure_detector::FailureDetector;
use super::job::Job;
use super::transport::Transport;
use crate::wire::{SyncRequest, TreeRequest};
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("endpoint {0} is not alive; session cannot start")]
    EndpointNotAlive(String),

    #[error("endpoint {0} died")]
    EndpointDied(String),

    #[error("session was terminated")]
    Terminated,

    #[error("{0}")]
    SnapshotPhaseFailed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    New,
    AwaitingTrees,
    Differencing,
    Streaming,
    Done,
    Failed(String),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Done | SessionState::Failed(_))
    }
}

/// Coordinates anti-entropy repair of a token range across a fixed set of
/// endpoints, one table ([`Job`]) at a time.
pub struct Session {
    id: Uuid,
    endpoints: Vec<String>,
    jobs: VecDeque<Job>,
    state: SessionState,
    pending_sync_requests: Vec<SyncRequest>,
    terminated: bool,
}

impl Session {
    pub fn new(id: Uuid, endpoints: Vec<String>, jobs: Vec<Job>) -> Self {
        let state = if endpoints.is_empty() {
            SessionState::Done
        } else {
            SessionState::New
        };
        Self {
            id,
            endpoints,
            jobs: jobs.into_iter().collect(),
            state,
            pending_sync_requests: Vec::new(),
            terminated: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Verifies every endpoint is alive, runs the current job's snapshot
    /// pre-phase (one `SnapshotCommand` per endpoint via `transport`,
    /// sequentially, awaiting every ack within `snapshot_latch_timeout`),
    /// then dispatches its tree requests via `send`. A no-op (stays
    /// `Done`) if the session has no endpoints to repair against.
    pub fn start(
        &mut self,
        failure_detector: &dyn FailureDetector,
        transport: &dyn Transport,
        snapshot_latch_timeout: Duration,
        send: impl FnMut(&str, &TreeRequest),
    ) -> Result<(), SessionError> {
        if matches!(self.state, SessionState::Done) {
            return Ok(());
        }
        assert_eq!(self.state, SessionState::New, "Session::start called twice");

        for endpoint in &self.endpoints {
            if !failure_detector.is_alive(endpoint) {
                let reason = format!("endpoint {endpoint} is not alive");
                self.state = SessionState::Failed(reason.clone());
                return Err(SessionError::EndpointNotAlive(endpoint.clone()));
            }
        }

        if self.jobs.is_empty() {
            self.state = SessionState::Done;
            return Ok(());
        }

        let job = self.jobs.front_mut().unwrap();
        if let Err(e) = job.run_snapshot_phase(transport, snapshot_latch_timeout) {
            let reason = e.to_string();
            self.state = SessionState::Failed(reason.clone());
            self.terminate();
            return Err(SessionError::SnapshotPhaseFailed(reason));
        }

        self.state = SessionState::AwaitingTrees;
        self.jobs.front_mut().unwrap().start(send);
        Ok(())
    }

    /// Records a tree response for the current job's `endpoint`. When the
    /// current job's rendezvous completes, advances to the next job (still
    /// `AwaitingTrees`) or, if that was the last job, to `Differencing`.
    pub fn add_tree(
        &mut self,
        endpoint: &str,
        tree: crate::merkle::MerkleTree,
        send_next: impl FnMut(&str, &TreeRequest),
    ) {
        if self.terminated {
            return;
        }
        assert_eq!(
            self.state,
            SessionState::AwaitingTrees,
            "Session::add_tree called outside AwaitingTrees"
        );
        let job = self.jobs.front_mut().expect("AwaitingTrees session has no active job");
        if let Some(mut sync_requests) = job.add_tree(endpoint, tree, send_next) {
            self.pending_sync_requests.append(&mut sync_requests);
            self.jobs.pop_front();
            if self.jobs.is_empty() {
                self.state = SessionState::Differencing;
            } else {
                // Next job's own `start` must be driven by the caller —
                // rendezvous state lives per-job, dispatch does not.
            }
        }
    }

    /// Runs the next queued job's snapshot pre-phase, moves it to
    /// `AwaitingTrees`, and dispatches its tree requests. Only valid while
    /// more jobs remain.
    pub fn start_next_job(
        &mut self,
        transport: &dyn Transport,
        snapshot_latch_timeout: Duration,
        send: impl FnMut(&str, &TreeRequest),
    ) -> Result<(), SessionError> {
        assert_eq!(self.state, SessionState::AwaitingTrees);
        let job = self.jobs.front_mut().expect("no next job to start");
        if let Err(e) = job.run_snapshot_phase(transport, snapshot_latch_timeout) {
            let reason = e.to_string();
            self.state = SessionState::Failed(reason.clone());
            self.terminate();
            return Err(SessionError::SnapshotPhaseFailed(reason));
        }
        job.start(send);
        Ok(())
    }

    pub fn has_more_jobs(&self) -> bool {
        !self.jobs.is_empty()
    }

    /// Transitions `Differencing -> Streaming` and hands back every sync
    /// request accumulated across this session's jobs.
    pub fn begin_streaming(&mut self) -> Vec<SyncRequest> {
        assert_eq!(self.state, SessionState::Differencing);
        self.state = SessionState::Streaming;
        std::mem::take(&mut self.pending_sync_requests)
    }

    /// Call once for every streaming task dispatched by
    /// [`begin_streaming`](Self::begin_streaming) as it completes.
    /// Transitions to `Done` once `remaining` reaches zero.
    pub fn stream_task_completed(&mut self, remaining: usize) {
        if self.terminated {
            return;
        }
        assert_eq!(self.state, SessionState::Streaming);
        if remaining == 0 {
            self.state = SessionState::Done;
        }
    }

    /// Session-membership-gated conviction: `phi >=
    /// convict_threshold_multiplier * base_threshold` for an endpoint that
    /// is a member of this session fails it.
    pub fn convict(&mut self, endpoint: &str, phi: f64, base_threshold: f64, convict_threshold_multiplier: f64) {
        if self.state.is_terminal() || !self.endpoints.iter().any(|e| e == endpoint) {
            return;
        }
        if phi >= convict_threshold_multiplier * base_threshold {
            self.state = SessionState::Failed(format!("Endpoint {endpoint} died"));
            self.terminate();
        }
    }

    /// Forced shutdown: flags the session terminated and, if it was not
    /// already `Done`, marks it `Failed`. In-flight remote operations are
    /// not cancelled, but their results are ignored because `terminated` is
    /// checked before any further state mutation.
    pub fn terminate(&mut self) {
        self.terminated = true;
        if !self.state.is_terminal() {
            self.state = SessionState::Failed("terminated".into());
        }
        if let Some(job) = self.jobs.front() {
            job.drain_snapshot_latch();
        }
        self.jobs.clear();
        self.pending_sync_requests.clear();
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }
}
