//! Dispatches a batch of requests either all at once or one at a time,
//! waiting for each to finish before sending the next.
//!
//! Grounded on the manifest's own claim-then-release pattern
//! (`Manifest::compaction_candidates`/`abort_compaction`): a small stateful
//! struct guarding a count, mutated only through its own methods, rather
//! than a generic async combinator library.

/// How a [`RequestCoordinator`] fans requests out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Every request in the batch is dispatched immediately.
    Parallel,
    /// One request is dispatched at a time; the next is sent only once the
    /// previous [`RequestCoordinator::completed`] call fires. Bounds load on
    /// the replicas being asked for trees.
    Sequential,
}

/// Tracks outstanding requests in a batch and decides, per [`Policy`], when
/// the next one should go out.
///
/// Requests may only be added before [`start`](RequestCoordinator::start);
/// the dispatch closure is supplied fresh to each call rather than stored,
/// since the coordinator itself never needs to outlive a single dispatch.
pub struct RequestCoordinator<R> {
    policy: Policy,
    requests: Vec<R>,
    started: bool,
    next_index: usize,
    outstanding: usize,
}

impl<R> RequestCoordinator<R> {
    pub fn new(policy: Policy) -> Self {
        Self {
            policy,
            requests: Vec::new(),
            started: false,
            next_index: 0,
            outstanding: 0,
        }
    }

    /// Queues `request`. Panics if called after [`start`](Self::start).
    pub fn add(&mut self, request: R) {
        assert!(!self.started, "RequestCoordinator::add called after start()");
        self.requests.push(request);
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Begins dispatch: for [`Policy::Parallel`] every request is handed to
    /// `dispatch` immediately; for [`Policy::Sequential`] only the first is.
    /// `dispatch` receives each request's index in the batch alongside the
    /// request itself, so a caller can associate requests with whatever
    /// external identity (e.g. an endpoint name) it tracks in parallel.
    pub fn start(&mut self, mut dispatch: impl FnMut(usize, &R)) {
        assert!(!self.started, "RequestCoordinator::start called twice");
        self.started = true;
        self.outstanding = self.requests.len();
        match self.policy {
            Policy::Parallel => {
                for (i, r) in self.requests.iter().enumerate() {
                    dispatch(i, r);
                }
            }
            Policy::Sequential => {
                self.next_index = 1;
                if let Some(r) = self.requests.first() {
                    dispatch(0, r);
                }
            }
        }
    }

    /// Records one completion, dispatching the next sequential request if
    /// any remain, and returns the number still outstanding. Exactly one
    /// caller will observe `0` for a given batch.
    pub fn completed(&mut self, mut dispatch: impl FnMut(usize, &R)) -> usize {
        assert!(self.outstanding > 0, "completed() called more times than requests were outstanding");
        self.outstanding -= 1;
        if self.policy == Policy::Sequential && self.outstanding > 0 {
            if let Some(r) = self.requests.get(self.next_index) {
                dispatch(self.next_index, r);
                self.next_index += 1;
            }
        }
        self.outstanding
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn parallel_dispatches_every_request_on_start() {
        let mut c = RequestCoordinator::new(Policy::Parallel);
        c.add(1);
        c.add(2);
        c.add(3);
        let sent = AtomicUsize::new(0);
        c.start(|_, _| {
            sent.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(sent.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn sequential_dispatches_one_at_a_time() {
        let mut c = RequestCoordinator::new(Policy::Sequential);
        c.add("a");
        c.add("b");
        c.add("c");
        let mut sent = Vec::new();
        c.start(|_, r: &&str| sent.push(*r));
        assert_eq!(sent, vec!["a"]);

        assert_eq!(c.completed(|_, r| sent.push(*r)), 1);
        assert_eq!(sent, vec!["a", "b"]);

        assert_eq!(c.completed(|_, r| sent.push(*r)), 0);
        assert_eq!(sent, vec!["a", "b", "c"]);
    }

    #[test]
    fn exactly_one_completed_call_observes_zero() {
        let mut c = RequestCoordinator::new(Policy::Parallel);
        c.add(1);
        c.add(2);
        c.start(|_, _| {});
        assert_eq!(c.completed(|_, _| {}), 1);
        assert_eq!(c.completed(|_, _| {}), 0);
    }

    #[test]
    #[should_panic(expected = "add called after start")]
    fn add_after_start_panics() {
        let mut c = RequestCoordinator::new(Policy::Parallel);
        c.start(|_, _: &i32| {});
        c.add(1);
    }
}
