//! Session resolution and storage-handle caching.
//!
//! The registry assigns session ids, keeps a bookkeeping record per
//! session, and lazily opens one [`SessionStore`] per session through the
//! configured [`StorageBackend`]. Open stores live in a bounded moka cache
//! with LRU eviction; concurrent first use of a session coalesces onto a
//! single open. Eviction drops only the cache entry, never the persisted
//! state. A store still held by an in-flight request is reused when its
//! session comes back, so one session never has two live stores.

use moka::future::Cache;
use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};
use tokio::sync::{Mutex, RwLock};

use crate::domain::errors::{DispatchError, DispatchResult, StorageError};
use crate::domain::models::{generate_session_id, is_valid_session_id, Session, SessionState, Turn};
use crate::domain::ports::StorageBackend;
use crate::services::health::ComponentStatus;

/// Open storage handle for one session.
///
/// Holds the loaded state in memory; writes go through to the backend.
pub struct SessionStore {
    session_id: String,
    backend: Arc<dyn StorageBackend>,
    state: Mutex<SessionState>,
}

impl SessionStore {
    /// Load a session's state, starting empty if nothing was persisted.
    pub async fn open(
        session_id: &str,
        backend: Arc<dyn StorageBackend>,
    ) -> Result<Self, StorageError> {
        let state = backend
            .load(session_id)
            .await?
            .unwrap_or_else(|| SessionState::empty(session_id));

        Ok(Self {
            session_id: session_id.to_string(),
            backend,
            state: Mutex::new(state),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Conversation so far, oldest first.
    pub async fn history(&self) -> Vec<Turn> {
        self.state.lock().await.turns.clone()
    }

    /// Append a completed exchange and persist it.
    pub async fn record_exchange(&self, user: &str, reply: &str) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        state.push_exchange(user, reply);
        self.backend.save(&self.session_id, &state).await
    }
}

/// Health of the registry and its backend.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRegistryHealth {
    pub status: ComponentStatus,
    pub backend: &'static str,
    pub backend_reachable: bool,
    pub active_sessions: usize,
    pub cached_handles: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Maps session ids to records and cached storage handles.
pub struct SessionRegistry {
    backend: Arc<dyn StorageBackend>,
    sessions: RwLock<HashMap<String, Session>>,
    handles: Cache<String, Arc<SessionStore>>,
    live: StdMutex<HashMap<String, Weak<SessionStore>>>,
    opened: AtomicU64,
}

impl SessionRegistry {
    /// Create a registry caching up to `capacity` open handles.
    pub fn new(backend: Arc<dyn StorageBackend>, capacity: u64) -> Self {
        let handles = Cache::builder()
            .max_capacity(capacity.max(1))
            .eviction_policy(EvictionPolicy::lru())
            .eviction_listener(|session_id: Arc<String>, _store: Arc<SessionStore>, cause: RemovalCause| {
                tracing::debug!(session_id = %session_id, ?cause, "Session handle dropped from cache");
            })
            .build();

        Self {
            backend,
            sessions: RwLock::new(HashMap::new()),
            handles,
            live: StdMutex::new(HashMap::new()),
            opened: AtomicU64::new(0),
        }
    }

    /// Resolve the session id for a request.
    ///
    /// A well-formed client id is returned verbatim; an absent or blank one
    /// yields a freshly generated id. Ids are not trimmed, so surrounding
    /// whitespace makes an id malformed. Either way the session record is
    /// created on first use and its access time refreshed.
    pub async fn resolve(&self, client_supplied: Option<&str>) -> DispatchResult<String> {
        let id = match client_supplied.filter(|id| !id.trim().is_empty()) {
            Some(id) if is_valid_session_id(id) => id.to_string(),
            Some(_) => {
                return Err(DispatchError::Validation(
                    "Session id must be 1-128 characters of letters, digits, '-', '_' or '.'"
                        .to_string(),
                ));
            }
            None => generate_session_id(),
        };

        let mut sessions = self.sessions.write().await;
        sessions
            .entry(id.clone())
            .and_modify(Session::touch)
            .or_insert_with(|| {
                tracing::debug!(session_id = %id, "New session");
                Session::new(id.clone())
            });

        Ok(id)
    }

    /// Get the cached storage handle, opening it on first use.
    ///
    /// A store evicted from the cache while a request still holds it is
    /// put back instead of reloading a stale copy from the backend.
    pub async fn get_storage_handle(
        &self,
        session_id: &str,
    ) -> Result<Arc<SessionStore>, Arc<StorageError>> {
        self.handles
            .try_get_with(session_id.to_string(), async {
                if let Some(store) = self.live_store(session_id) {
                    tracing::debug!(session_id, "Reattached in-use session storage");
                    return Ok(store);
                }

                let store = Arc::new(SessionStore::open(session_id, self.backend.clone()).await?);
                self.opened.fetch_add(1, Ordering::Relaxed);
                self.track_live(session_id, &store);
                tracing::debug!(session_id, backend = self.backend.name(), "Opened session storage");
                Ok::<_, StorageError>(store)
            })
            .await
    }

    fn live_stores(&self) -> std::sync::MutexGuard<'_, HashMap<String, Weak<SessionStore>>> {
        // Map updates are single inserts/removes; a poisoned guard is still consistent.
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn live_store(&self, session_id: &str) -> Option<Arc<SessionStore>> {
        self.live_stores().get(session_id).and_then(Weak::upgrade)
    }

    fn track_live(&self, session_id: &str, store: &Arc<SessionStore>) {
        let mut live = self.live_stores();
        live.retain(|_, weak| weak.strong_count() > 0);
        live.insert(session_id.to_string(), Arc::downgrade(store));
    }

    /// Drop a session's handle, record and persisted state. Unknown ids are fine.
    pub async fn forget(&self, session_id: &str) -> Result<(), StorageError> {
        self.handles.invalidate(session_id).await;
        self.live_stores().remove(session_id);
        self.sessions.write().await.remove(session_id);
        self.backend.delete(session_id).await?;
        tracing::info!(session_id, "Session forgotten");
        Ok(())
    }

    /// Administrative clear of all in-memory session state.
    pub async fn clear(&self) {
        self.handles.invalidate_all();
        self.handles.run_pending_tasks().await;
        self.live_stores().clear();
        self.sessions.write().await.clear();
    }

    /// Look up a session record.
    pub async fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Number of known sessions.
    pub async fn active_sessions(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Number of open storage handles currently cached.
    pub async fn cached_handles(&self) -> u64 {
        self.handles.run_pending_tasks().await;
        self.handles.entry_count()
    }

    /// Whether a handle for this session is cached.
    pub fn is_cached(&self, session_id: &str) -> bool {
        self.handles.contains_key(session_id)
    }

    /// Total storage handles opened since startup.
    pub fn handles_opened(&self) -> u64 {
        self.opened.load(Ordering::Relaxed)
    }

    /// Component health: backend reachability and session counts.
    pub async fn health(&self) -> SessionRegistryHealth {
        let ping = self.backend.ping().await;
        SessionRegistryHealth {
            status: if ping.is_ok() {
                ComponentStatus::Operational
            } else {
                ComponentStatus::Down
            },
            backend: self.backend.name(),
            backend_reachable: ping.is_ok(),
            active_sessions: self.active_sessions().await,
            cached_handles: self.cached_handles().await,
            error: ping.err().map(|e| e.to_string()),
        }
    }
}
