//! Open session bookkeeping

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bustrack_common::now_millis;
use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use crate::model::Role;

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: String,
    pub role: Role,
    /// Target bus for producers, filtered bus for single-bus consumers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bus: Option<String>,
    pub peer: String,
    pub opened_at: i64,
}

/// Registry of every session currently open on this node
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, SessionInfo>>,
    sequence: Arc<AtomicU64>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a unique session id: `{millis}_{peer}_{sequence}`
    pub fn next_session_id(&self, peer: &str) -> String {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{}_{}_{}", now_millis(), peer, sequence)
    }

    /// Register a session. It stays registered until the guard is dropped.
    pub fn register(&self, info: SessionInfo) -> SessionGuard {
        let session_id = info.session_id.clone();
        debug!(session_id = %session_id, role = %info.role, "Session registered");
        self.sessions.insert(session_id.clone(), info);

        SessionGuard {
            registry: self.clone(),
            session_id,
        }
    }

    pub fn unregister(&self, session_id: &str) -> Option<SessionInfo> {
        let removed = self.sessions.remove(session_id).map(|(_, info)| info);
        if removed.is_some() {
            debug!(session_id, "Session unregistered");
        }
        removed
    }

    pub fn get(&self, session_id: &str) -> Option<SessionInfo> {
        self.sessions.get(session_id).map(|e| e.value().clone())
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    pub fn count_by_role(&self, role: Role) -> usize {
        self.sessions.iter().filter(|e| e.value().role == role).count()
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> =
            self.sessions.iter().map(|e| e.value().clone()).collect();
        sessions.sort_by_key(|s| s.opened_at);
        sessions
    }
}

/// Removes its session from the registry when dropped
pub struct SessionGuard {
    registry: SessionRegistry,
    session_id: String,
}

impl SessionGuard {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.unregister(&self.session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(registry: &SessionRegistry, role: Role) -> SessionInfo {
        SessionInfo {
            session_id: registry.next_session_id("127.0.0.1:9000"),
            role,
            bus: None,
            peer: "127.0.0.1:9000".to_string(),
            opened_at: now_millis(),
        }
    }

    #[test]
    fn test_guard_unregisters_on_drop() {
        let registry = SessionRegistry::new();
        let guard = registry.register(info(&registry, Role::Producer));
        let id = guard.session_id().to_string();

        assert!(registry.get(&id).is_some());
        assert_eq!(registry.count(), 1);

        drop(guard);
        assert!(registry.get(&id).is_none());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_count_by_role() {
        let registry = SessionRegistry::new();
        let _p = registry.register(info(&registry, Role::Producer));
        let _c1 = registry.register(info(&registry, Role::Consumer));
        let _c2 = registry.register(info(&registry, Role::Consumer));

        assert_eq!(registry.count_by_role(Role::Producer), 1);
        assert_eq!(registry.count_by_role(Role::Consumer), 2);
        assert_eq!(registry.sessions().len(), 3);
    }

    #[test]
    fn test_session_ids_are_unique() {
        let registry = SessionRegistry::new();
        let a = registry.next_session_id("peer");
        let b = registry.next_session_id("peer");
        assert_ne!(a, b);
        assert!(a.contains("_peer_"));
    }
}
