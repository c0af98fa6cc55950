//! The set of currently active sessions.
//!
//! The registry is the single serialization point for session-set
//! mutations: insertion when a connection is activated, removal on
//! teardown. Removal is idempotent so every teardown path may call it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

/// One active session as seen by the registry.
#[derive(Debug, Clone, Serialize)]
pub struct SessionEntry {
    pub id: Uuid,
    pub user: String,
    pub connected_at: DateTime<Utc>,
}

/// Owned, process-wide active-session set.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly activated session.
    pub async fn insert(&self, id: Uuid, user: impl Into<String>) {
        let entry = SessionEntry {
            id,
            user: user.into(),
            connected_at: Utc::now(),
        };
        self.sessions.write().await.insert(id, entry);
    }

    /// Remove a session; returns false if it was already gone.
    pub async fn remove(&self, id: Uuid) -> bool {
        self.sessions.write().await.remove(&id).is_some()
    }

    /// Number of currently active sessions.
    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Point-in-time copy of the active set, oldest connection first.
    pub async fn snapshot(&self) -> Vec<SessionEntry> {
        let mut entries: Vec<_> = self.sessions.read().await.values().cloned().collect();
        entries.sort_by_key(|e| e.connected_at);
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn insert_and_remove() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();

        registry.insert(id, "alice").await;
        assert_eq!(registry.active_count().await, 1);

        assert!(registry.remove(id).await);
        assert_eq!(registry.active_count().await, 0);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();

        registry.insert(id, "alice").await;
        assert!(registry.remove(id).await);
        assert!(!registry.remove(id).await);
    }

    #[tokio::test]
    async fn concurrent_mutations_do_not_lose_entries() {
        let registry = Arc::new(SessionRegistry::new());
        let ids: Vec<Uuid> = (0..16).map(|_| Uuid::new_v4()).collect();

        let mut handles = Vec::new();
        for id in ids.clone() {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.insert(id, "user").await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(registry.active_count().await, 16);

        for id in ids {
            assert!(registry.remove(id).await);
        }
        assert_eq!(registry.active_count().await, 0);
    }

    #[tokio::test]
    async fn snapshot_is_ordered_by_connect_time() {
        let registry = SessionRegistry::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        registry.insert(first, "a").await;
        registry.insert(second, "b").await;

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot[0].connected_at <= snapshot[1].connected_at);
    }
}
