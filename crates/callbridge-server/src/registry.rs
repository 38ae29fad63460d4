//! Tracks the live session for each `{api_key}/{robot_id}` slot.

use crate::session::SessionBridge;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// At most one session per slot; a newer session replaces the older one.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, SessionBridge>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the slot key for a credential pair.
    pub fn slot_key(api_key: &str, robot_id: i64) -> String {
        format!("{api_key}/{robot_id}")
    }

    /// Installs `session` in its slot and closes whatever it replaced.
    pub async fn replace(&self, session: SessionBridge) {
        let previous = {
            let mut sessions = self.sessions.write().await;
            sessions.insert(session.slot().to_string(), session.clone())
        };

        if let Some(previous) = previous {
            tracing::info!(
                slot = %session.slot(),
                replaced = %previous.id(),
                session_id = %session.id(),
                "replacing existing session"
            );
            previous.close("replaced by a newer session").await;
        }
    }

    /// Removes the slot entry only if it still belongs to `session_id`.
    ///
    /// A session that was replaced must not evict its replacement when it
    /// finishes tearing down.
    pub async fn remove(&self, slot: &str, session_id: Uuid) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(slot) {
            Some(current) if current.id() == session_id => {
                sessions.remove(slot);
                true
            }
            _ => false,
        }
    }

    pub async fn get(&self, slot: &str) -> Option<SessionBridge> {
        self.sessions.read().await.get(slot).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Closes every live session. Used at shutdown.
    pub async fn close_all(&self, reason: &str) {
        let drained: Vec<SessionBridge> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain().map(|(_, session)| session).collect()
        };
        if !drained.is_empty() {
            tracing::info!(count = drained.len(), reason, "closing all sessions");
        }
        for session in drained {
            session.close(reason).await;
        }
    }
}
