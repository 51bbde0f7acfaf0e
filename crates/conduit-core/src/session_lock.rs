//! Per-session advisory locking (spec §5: "turns for the same session are
//! processed serially; turns for different sessions run concurrently").
//!
//! Grounded on `agent_manager.rs`'s `AgentManager`: a `tokio::sync::Mutex`
//! guarding a `HashMap` keyed by session id, handed out as a cloned
//! `Arc<tokio::sync::Mutex<()>>` per key exactly the way `AgentManager`
//! hands out a cloned `Arc<Mutex<SageAgent>>` per cached agent.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Hands out one advisory lock per session id, created on first use and
/// reused afterward so concurrent turns for the same session serialize
/// while turns for different sessions never block each other.
#[derive(Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquires the advisory lock for `session_id`, blocking until any other
    /// in-flight turn for the same session releases it. The returned guard
    /// releases the lock on drop.
    pub async fn acquire(&self, session_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(session_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        lock.lock_owned().await
    }

    /// Drops the entry for a session once it is known idle, so the map does
    /// not grow unbounded across the server's lifetime. Safe to call even
    /// while a guard is held elsewhere: that guard keeps its own `Arc`
    /// clone alive until it is dropped.
    pub async fn forget(&self, session_id: Uuid) {
        let mut locks = self.locks.lock().await;
        locks.remove(&session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_session_serializes() {
        let locks = Arc::new(SessionLocks::new());
        let session = Uuid::new_v4();

        let guard = locks.acquire(session).await;
        let locks2 = locks.clone();
        let handle = tokio::spawn(async move {
            let _guard2 = locks2.acquire(session).await;
        });

        tokio::task::yield_now().await;
        assert!(!handle.is_finished());
        drop(guard);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn different_sessions_do_not_block() {
        let locks = SessionLocks::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let _guard_a = locks.acquire(a).await;
        let guard_b = locks.acquire(b).await;
        drop(guard_b);
    }

    #[tokio::test]
    async fn forget_removes_idle_entry() {
        let locks = SessionLocks::new();
        let session = Uuid::new_v4();
        {
            let _guard = locks.acquire(session).await;
        }
        locks.forget(session).await;
        assert!(locks.locks.lock().await.is_empty());
    }
}
