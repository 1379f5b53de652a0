//! Ambient concurrency primitives shared by the repair subsystem: a
//! bounded worker pool for streaming/differencing tasks, a single-consumer
//! staged queue for serializing per-session state transitions, and a
//! one-shot latch for "wait until N things finish" join points (the
//! snapshot latch, the session-completion latch).
//!
//! Matches `manifest/mod.rs`'s own synchronization style (`Mutex`-guarded
//! shared state, no hand-rolled atomics beyond what `std::sync::atomic`
//! already offers) and builds on `crossbeam`'s channel, already a
//! dependency for its MPMC queue semantics.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A fixed-size pool of worker threads pulling boxed closures off a shared
/// channel. Used to bound how many repair streaming/differencing jobs run
/// concurrently, favoring explicit, inspectable concurrency over a
/// runtime-managed thread pool.
pub struct WorkerPool {
    sender: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
}

type Job = Box<dyn FnOnce() + Send + 'static>;

impl WorkerPool {
    /// Spawns `size` worker threads, each looping on the shared job
    /// channel until it is dropped.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "WorkerPool requires at least one worker");
        let (sender, receiver) = channel::unbounded::<Job>();
        let workers = (0..size)
            .map(|idx| {
                let receiver: Receiver<Job> = receiver.clone();
                thread::Builder::new()
                    .name(format!("ringtable-pool-{idx}"))
                    .spawn(move || {
                        while let Ok(job) = receiver.recv() {
                            job();
                        }
                    })
                    .expect("failed to spawn pool worker thread")
            })
            .collect();
        Self { sender, workers }
    }

    /// Enqueues `job` to run on the next free worker. Panics if every
    /// worker thread has already exited (a programmer error — the pool
    /// outlived its own threads).
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) {
        self.sender
            .send(Box::new(job))
            .expect("pool worker threads have all exited");
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Dropping `sender`'s only live clone (the pool struct holds the
        // original) closes the channel; each worker's `recv()` then
        // returns `Err` and the loop exits. `workers` is joined so
        // in-flight jobs finish before the pool itself is gone.
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// Routes items to a single background consumer, serializing state
/// transitions that must not interleave (e.g. a [`crate::repair::job::Job`]'s
/// own event log) without forcing every producer to share a lock.
pub struct SingleConsumerStage<T: Send + 'static> {
    sender: Sender<T>,
    consumer: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> SingleConsumerStage<T> {
    pub fn new(mut handle_item: impl FnMut(T) + Send + 'static) -> Self {
        let (sender, receiver) = channel::unbounded::<T>();
        let consumer = thread::Builder::new()
            .name("ringtable-stage".into())
            .spawn(move || {
                while let Ok(item) = receiver.recv() {
                    handle_item(item);
                }
            })
            .expect("failed to spawn stage consumer thread");
        Self {
            sender,
            consumer: Some(consumer),
        }
    }

    pub fn submit(&self, item: T) {
        let _ = self.sender.send(item);
    }
}

impl<T: Send + 'static> Drop for SingleConsumerStage<T> {
    fn drop(&mut self) {
        if let Some(consumer) = self.consumer.take() {
            let _ = consumer.join();
        }
    }
}

/// A one-shot, multi-waiter latch: counts down from `n`, wakes every
/// waiter once it reaches zero. Used for the snapshot latch (wait for
/// every replica's tree) and for session completion (wait for every
/// job).
pub struct Latch {
    state: Mutex<usize>,
    cv: Condvar,
}

impl Latch {
    pub fn new(count: usize) -> Self {
        Self {
            state: Mutex::new(count),
            cv: Condvar::new(),
        }
    }

    /// Decrements the count; wakes all waiters once it hits zero. A
    /// no-op once already at zero.
    pub fn count_down(&self) {
        let mut count = self.state.lock().unwrap();
        if *count == 0 {
            return;
        }
        *count -= 1;
        if *count == 0 {
            self.cv.notify_all();
        }
    }

    /// Blocks until the count reaches zero or `timeout` elapses; returns
    /// `false` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.state.lock().unwrap();
        let (guard, result) = self
            .cv
            .wait_timeout_while(guard, timeout, |count| *count > 0)
            .unwrap();
        let _ = guard;
        !result.timed_out()
    }

    pub fn count(&self) -> usize {
        *self.state.lock().unwrap()
    }

    /// Forces the count to zero and wakes every waiter immediately,
    /// regardless of how many `count_down` calls are still outstanding.
    /// Used to cancel an in-progress wait (e.g. `Session::terminate()`
    /// unblocking a session parked on its snapshot latch) rather than let
    /// it run out its full timeout.
    pub fn drain(&self) {
        let mut count = self.state.lock().unwrap();
        if *count == 0 {
            return;
        }
        *count = 0;
        self.cv.notify_all();
    }
}

/// A bounded-wait receive, used by transport/failure-detector test doubles
/// that need to poll a channel without blocking the whole session forever.
pub fn recv_timeout<T>(receiver: &Receiver<T>, timeout: Duration) -> Option<T> {
    match receiver.recv_timeout(timeout) {
        Ok(v) => Some(v),
        Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn worker_pool_runs_every_submitted_job() {
        let pool = WorkerPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = channel::unbounded::<()>();
        for _ in 0..20 {
            let counter = counter.clone();
            let done_tx = done_tx.clone();
            pool.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = done_tx.send(());
            });
        }
        for _ in 0..20 {
            done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn single_consumer_stage_processes_in_submission_order() {
        let (tx, rx) = channel::unbounded();
        let stage = SingleConsumerStage::new(move |item: u32| {
            let _ = tx.send(item);
        });
        for i in 0..10 {
            stage.submit(i);
        }
        drop(stage); // flushes and joins
        let received: Vec<u32> = rx.try_iter().collect();
        assert_eq!(received, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn latch_releases_all_waiters_at_zero() {
        let latch = Arc::new(Latch::new(3));
        let mut handles = Vec::new();
        for _ in 0..3 {
            let latch = latch.clone();
            handles.push(thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                latch.count_down();
            }));
        }
        assert!(latch.wait_timeout(Duration::from_secs(5)));
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn latch_wait_timeout_returns_false_when_never_released() {
        let latch = Latch::new(1);
        assert!(!latch.wait_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn latch_zero_count_is_immediately_satisfied() {
        let latch = Latch::new(0);
        assert!(latch.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn latch_drain_releases_a_waiter_that_would_otherwise_time_out() {
        let latch = Arc::new(Latch::new(3));
        let waiter = {
            let latch = latch.clone();
            thread::spawn(move || latch.wait_timeout(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        latch.drain();
        assert!(waiter.join().unwrap());
        assert_eq!(latch.count(), 0);
    }
}
