//! Anti-entropy repair: validates replicas against each other via Merkle
//! trees ([`crate::merkle`]) and streams the differences.
//!
//! - [`validator`] builds one replica's tree from a local row stream.
//! - [`coordinator`] fans tree requests out, sequentially or in parallel.
//! - [`job`] rendezvous-es one table's tree responses into `C(n,2)` diffs.
//! - [`differencer`] computes one pair's sync request from two trees.
//! - [`session`] is the per-repair state machine tying jobs together.
//! - [`stream`] and [`transport`] are the pluggable I/O seams a real
//!   deployment backs with actual sockets; here, test doubles only.
//! - [`failure_detector`] is the liveness contract sessions convict against.

pub mod coordinator;
pub mod differencer;
pub mod failure_detector;
pub mod job;
pub mod session;
pub mod stream;
pub mod transport;
pub mod validator;

pub use coordinator::{Policy, RequestCoordinator};
pub use failure_detector::FailureDetector;
pub use job::Job;
pub use session::{Session, SessionError, SessionState};
pub use stream::{StreamError, StreamExecutor};
pub use transport::{Transport, TransportError};
pub use validator::Validator;

use dashmap::DashMap;
use uuid::Uuid;

/// `gc_before = now_seconds - gc_grace_seconds`, the cutoff below which a
/// tombstone is no longer worth comparing (it would be dropped by the next
/// compaction on every replica anyway).
pub fn gc_before(now_seconds: u64, gc_grace_seconds: u64) -> u64 {
    now_seconds.saturating_sub(gc_grace_seconds)
}

/// The active-sessions map: a concurrent registry keyed by session id,
/// with get-or-insert idempotency so two racing callers asking about the
/// same session id converge on one [`Session`].
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<Uuid, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `session` if its id is not already registered; a no-op
    /// otherwise, matching the "per-key operations use get-or-insert
    /// idempotency" rule.
    pub fn register(&self, session: Session) {
        self.sessions.entry(session.id()).or_insert(session);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Forced shutdown of every active session.
    pub fn terminate_all(&self) {
        for mut entry in self.sessions.iter_mut() {
            entry.value_mut().terminate();
        }
    }

    /// Convicts `endpoint` across every session that has it as a member.
    pub fn convict_everywhere(&self, endpoint: &str, phi: f64, base_threshold: f64, convict_threshold_multiplier: f64) {
        for mut entry in self.sessions.iter_mut() {
            entry
                .value_mut()
                .convict(endpoint, phi, base_threshold, convict_threshold_multiplier);
        }
    }

    /// Removes every session that has reached a terminal state, freeing
    /// their slot in the map (sessions outlive only as long as they are
    /// active).
    pub fn reap_finished(&self) {
        self.sessions.retain(|_, s| !s.state().is_terminal());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gc_before_subtracts_grace_period() {
        assert_eq!(gc_before(1_000_000, 864_000), 136_000);
    }

    #[test]
    fn gc_before_saturates_instead_of_underflowing() {
        assert_eq!(gc_before(100, 864_000), 0);
    }

    #[test]
    fn registry_get_or_insert_is_idempotent() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        registry.register(Session::new(id, vec![], vec![]));
        registry.register(Session::new(id, vec!["should-be-ignored".into()], vec![]));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(id));
    }

    #[test]
    fn terminate_all_fails_every_registered_session() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        registry.register(Session::new(id, vec!["a".into()], vec![]));
        registry.terminate_all();
        assert!(registry.sessions.get(&id).unwrap().is_terminated());
    }

    #[test]
    fn reap_finished_removes_terminal_sessions_only() {
        let registry = SessionRegistry::new();
        let done_id = Uuid::new_v4();
        let active_id = Uuid::new_v4();
        registry.register(Session::new(done_id, vec![], vec![])); // empty endpoints -> Done
        registry.register(Session::new(active_id, vec!["a".into()], vec![]));
        registry.reap_finished();
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(active_id));
    }
}
