//! Storage backend port (trait) for session persistence.
//!
//! Implementations persist [`SessionState`] keyed by session id. The
//! registry selects one backend at startup (local files or a remote
//! object store) and hands it to every lazily opened session handle.

use async_trait::async_trait;

use crate::domain::errors::StorageError;
use crate::domain::models::SessionState;

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short backend name for logs and health output.
    fn name(&self) -> &'static str;

    /// Load persisted state.
    ///
    /// # Returns
    /// - `Some(state)` if the session has been saved before
    /// - `None` if nothing is stored for this id
    async fn load(&self, session_id: &str) -> Result<Option<SessionState>, StorageError>;

    /// Persist state, replacing whatever was stored before.
    async fn save(&self, session_id: &str, state: &SessionState) -> Result<(), StorageError>;

    /// Remove persisted state. Deleting an unknown id is not an error.
    async fn delete(&self, session_id: &str) -> Result<(), StorageError>;

    /// Cheap reachability check used by health reporting.
    async fn ping(&self) -> Result<(), StorageError>;
}
