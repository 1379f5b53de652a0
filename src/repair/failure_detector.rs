//! Endpoint liveness, abstracted behind a trait so [`Session`](super::session::Session)
//! can be convicted deterministically in tests without a real phi-accrual
//! implementation.
//!
//! A small, mockable trait at an I/O seam, the same shape as
//! `sstable::SstHandle`; the phi-accrual detector itself is out of scope
//! — only the contract the session depends on (`is_alive`, `phi`) is
//! captured here.

use std::collections::HashMap;
use std::sync::Mutex;

/// A source of endpoint liveness and suspicion level. `phi` rises the
/// longer an endpoint goes unheard-from; a [`Session`](super::session::Session)
/// convicts a member once `phi >= convict_threshold_multiplier * base_threshold`.
pub trait FailureDetector: Send + Sync {
    fn is_alive(&self, endpoint: &str) -> bool;
    fn phi(&self, endpoint: &str) -> f64;
}

/// A test double with per-endpoint liveness and phi set explicitly by the
/// test, rather than derived from heartbeat timing.
#[derive(Default)]
pub struct FakeFailureDetector {
    alive: Mutex<HashMap<String, bool>>,
    phi: Mutex<HashMap<String, f64>>,
}

impl FakeFailureDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_dead(&self, endpoint: &str) {
        self.alive.lock().unwrap().insert(endpoint.to_string(), false);
    }

    pub fn mark_alive(&self, endpoint: &str) {
        self.alive.lock().unwrap().insert(endpoint.to_string(), true);
    }

    pub fn set_phi(&self, endpoint: &str, value: f64) {
        self.phi.lock().unwrap().insert(endpoint.to_string(), value);
    }
}

impl FailureDetector for FakeFailureDetector {
    fn is_alive(&self, endpoint: &str) -> bool {
        *self.alive.lock().unwrap().get(endpoint).unwrap_or(&true)
    }

    fn phi(&self, endpoint: &str) -> f64 {
        *self.phi.lock().unwrap().get(endpoint).unwrap_or(&0.0)
    }
}
