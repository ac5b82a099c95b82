//! Shared daemon state.
//!
//! Store mutations for one user must not interleave, and mapping-file
//! mutations must not interleave across users, so the state carries a keyed
//! per-user lock map plus one mapping lock. Lock order is always user lock
//! first, then mapping lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

/// State shared by every connection task.
pub struct DaemonState {
    user_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    mapping_lock: Mutex<()>,
    shutdown: AtomicBool,
}

impl DaemonState {
    /// Create fresh daemon state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            user_locks: Mutex::new(HashMap::new()),
            mapping_lock: Mutex::new(()),
            shutdown: AtomicBool::new(false),
        }
    }

    /// The mutation lock for one user's alias file.
    ///
    /// Lock entries are created on demand and never removed; the map is
    /// bounded by the number of distinct users seen since startup.
    pub async fn user_lock(&self, user: &str) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().await;
        locks
            .entry(user.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// The global mapping-file mutation lock.
    #[must_use]
    pub fn mapping_lock(&self) -> &Mutex<()> {
        &self.mapping_lock
    }

    /// Signal shutdown to accept loops.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

impl Default for DaemonState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn user_locks_are_stable_per_user() {
        let state = DaemonState::new();
        let a1 = state.user_lock("alice").await;
        let a2 = state.user_lock("alice").await;
        let b = state.user_lock("bob").await;
        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
    }

    #[test]
    fn shutdown_flag_latches() {
        let state = DaemonState::new();
        assert!(!state.is_shutting_down());
        state.request_shutdown();
        assert!(state.is_shutting_down());
    }
}
