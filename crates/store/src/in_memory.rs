//! In-memory store: useful for testing and throwaway sessions.

use async_trait::async_trait;
use chrono::Utc;
use conduit_core::error::StoreError;
use conduit_core::message::Message;
use conduit_core::session::{Session, SessionId, SessionStatus, SessionStore, SessionSummary};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A store that keeps sessions in a map.
/// Nothing survives the process.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    sessions: Arc<RwLock<HashMap<SessionId, Session>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn create_session(&self) -> Result<Session, StoreError> {
        let session = Session::new(SessionId::new());
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn append_turn(&self, id: &SessionId, messages: &[Message]) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::SessionNotFound(id.to_string()))?;
        session.messages.extend_from_slice(messages);
        session.token_count += messages.iter().map(|m| m.token_cost).sum::<usize>();
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn load_session(&self, id: &SessionId) -> Result<Session, StoreError> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::SessionNotFound(id.to_string()))
    }

    async fn list_sessions(&self, limit: usize) -> Result<Vec<SessionSummary>, StoreError> {
        let sessions = self.sessions.read().await;
        let mut summaries: Vec<SessionSummary> = sessions.values().map(Session::summary).collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));
        summaries.truncate(limit);
        Ok(summaries)
    }

    async fn archive_session(&self, id: &SessionId) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::SessionNotFound(id.to_string()))?;
        session.status = SessionStatus::Archived;
        session.updated_at = Utc::now();
        Ok(())
    }
}
