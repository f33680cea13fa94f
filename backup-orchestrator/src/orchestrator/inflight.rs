//! Tracks which keys (clusters, session ids) have a workflow in flight.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// At most one holder per key at a time.
#[derive(Clone, Default)]
pub struct InflightTracker {
    running: Arc<Mutex<HashSet<String>>>,
}

impl InflightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a key. Returns `None` if it is already claimed.
    pub fn try_acquire(&self, key: &str) -> Option<InflightGuard> {
        let mut running = lock(&self.running);
        if !running.insert(key.to_string()) {
            return None;
        }
        Some(InflightGuard {
            key: key.to_string(),
            running: Arc::clone(&self.running),
        })
    }

    pub fn is_running(&self, key: &str) -> bool {
        lock(&self.running).contains(key)
    }

    pub fn running_count(&self) -> usize {
        lock(&self.running).len()
    }
}

/// Releases the key when dropped.
pub struct InflightGuard {
    key: String,
    running: Arc<Mutex<HashSet<String>>>,
}

impl InflightGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        lock(&self.running).remove(&self.key);
    }
}

// The set stays consistent even if a holder panicked.
fn lock(running: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
