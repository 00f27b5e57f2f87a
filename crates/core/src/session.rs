//! Session store contract: durable, append-only session logs.
//!
//! Sessions are referenced by identifier only; the store owns them. Message
//! rows are never updated in place.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::message::{Message, Role};

/// Opaque session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Archived,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

/// A full session with its message log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<Message>,
    /// Sum of the stored messages' token costs
    pub token_count: usize,
    pub status: SessionStatus,
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
            token_count: 0,
            status: SessionStatus::Active,
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            status: self.status,
            message_count: self.messages.len(),
            token_count: self.token_count,
            preview: self
                .messages
                .iter()
                .find(|m| m.role == Role::User)
                .map(|m| preview_text(&m.text())),
        }
    }
}

/// A row in the session listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub message_count: usize,
    pub token_count: usize,
    /// Start of the first user message
    pub preview: Option<String>,
}

/// Shorten text for listings.
pub fn preview_text(text: &str) -> String {
    const MAX_CHARS: usize = 60;
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() > MAX_CHARS {
        let cut: String = line.chars().take(MAX_CHARS).collect();
        format!("{cut}…")
    } else {
        line.to_string()
    }
}

/// Durable session persistence.
///
/// Implementations must make `append_turn` atomic: either every message of
/// the turn is durable when it returns `Ok`, or none is.
#[async_trait]
pub trait SessionStore: Send + Sync {
    fn name(&self) -> &str;

    async fn create_session(&self) -> Result<Session, StoreError>;

    /// Append a batch of messages in one transaction.
    async fn append_turn(&self, id: &SessionId, messages: &[Message]) -> Result<(), StoreError>;

    /// Append one message, durable before returning.
    async fn append_message(&self, id: &SessionId, message: &Message) -> Result<(), StoreError> {
        self.append_turn(id, std::slice::from_ref(message)).await
    }

    /// Fails with `SessionNotFound` if absent.
    async fn load_session(&self, id: &SessionId) -> Result<Session, StoreError>;

    /// Most recently updated first.
    async fn list_sessions(&self, limit: usize) -> Result<Vec<SessionSummary>, StoreError>;

    /// Mark a session archived. History is retained.
    async fn archive_session(&self, id: &SessionId) -> Result<(), StoreError>;
}
