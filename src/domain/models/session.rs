//! Domain models for conversational sessions.
//!
//! A [`Session`] is the registry's bookkeeping record; [`SessionState`] is
//! the persisted conversational content owned by a storage backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Longest client-supplied session id accepted verbatim.
pub const MAX_SESSION_ID_LEN: usize = 128;

/// Registry record for a known session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Immutable once assigned.
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_access_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            created_at: now,
            last_access_at: now,
        }
    }

    /// Mark the session as used now.
    pub fn touch(&mut self) {
        self.last_access_at = Utc::now();
    }
}

/// Generate a fresh, globally unique session id.
pub fn generate_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// Whether a client-supplied id may be used verbatim.
///
/// Ids double as storage keys (file names, object paths), so only
/// `[A-Za-z0-9._-]` is accepted and a leading dot is refused.
pub fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_SESSION_ID_LEN
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Who produced a conversational turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Agent,
}

/// One message in a session's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
    pub at: DateTime<Utc>,
}

/// Persisted conversational state for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    #[serde(default)]
    pub turns: Vec<Turn>,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    pub fn empty(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            turns: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Append a user message and the agent's reply.
    pub fn push_exchange(&mut self, user: &str, reply: &str) {
        let now = Utc::now();
        self.turns.push(Turn {
            role: TurnRole::User,
            content: user.to_string(),
            at: now,
        });
        self.turns.push(Turn {
            role: TurnRole::Agent,
            content: reply.to_string(),
            at: now,
        });
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_validation() {
        assert!(is_valid_session_id("abc-123_DEF.v2"));
        assert!(is_valid_session_id(&generate_session_id()));
        assert!(!is_valid_session_id(""));
        assert!(!is_valid_session_id("../etc/passwd"));
        assert!(!is_valid_session_id("has space"));
        assert!(!is_valid_session_id(".hidden"));
        assert!(!is_valid_session_id(&"x".repeat(MAX_SESSION_ID_LEN + 1)));
    }

    #[test]
    fn test_generated_ids_are_distinct() {
        assert_ne!(generate_session_id(), generate_session_id());
    }

    #[test]
    fn test_push_exchange() {
        let mut state = SessionState::empty("s1");
        state.push_exchange("hello", "hi there");
        assert_eq!(state.turns.len(), 2);
        assert_eq!(state.turns[0].role, TurnRole::User);
        assert_eq!(state.turns[1].content, "hi there");
    }
}
