//! Bounded cache of constructed agent handles.
//!
//! One [`AgentHandle`] per session id. Construction goes through moka's
//! `try_get_with`, so concurrent first use of a session waits on a single
//! in-progress construction and every caller receives the same handle or
//! the same error. Unrelated sessions never wait on each other.
//!
//! Invocations run under an [`InvocationLease`]. When a handle leaves the
//! cache (LRU eviction, invalidation, reset) it is retired: no new leases
//! are granted, in-flight ones finish normally, and the underlying
//! [`AgentSession`] is closed once the last lease drops.

use chrono::{DateTime, Utc};
use moka::future::Cache;
use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::domain::errors::InvocationError;
use crate::domain::models::AgentKind;
use crate::domain::ports::{AgentBackend, AgentBinding, AgentSession, SessionContext};
use crate::services::health::ComponentStatus;

/// Attempts to obtain a live handle before giving up.
const MAX_ACQUIRE_ATTEMPTS: usize = 3;

/// A cached, reusable invocation handle bound to one session.
pub struct AgentHandle {
    binding: AgentBinding,
    session: Box<dyn AgentSession>,
    created_at: DateTime<Utc>,
    last_used_ms: AtomicI64,
    in_flight: AtomicUsize,
    idle: Notify,
    retired: AtomicBool,
    closed: AtomicBool,
}

impl AgentHandle {
    fn new(binding: AgentBinding, session: Box<dyn AgentSession>) -> Self {
        let now = Utc::now();
        Self {
            binding,
            session,
            created_at: now,
            last_used_ms: AtomicI64::new(now.timestamp_millis()),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
            retired: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.binding.session_id
    }

    pub fn kind(&self) -> AgentKind {
        self.binding.kind
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_used_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.last_used_ms.load(Ordering::Relaxed))
            .unwrap_or(self.created_at)
    }

    /// Invocations currently holding a lease.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Whether the handle has left the cache.
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    /// Whether the underlying session has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Take a lease for one invocation. `None` once the handle is retired.
    pub fn lease(self: &Arc<Self>) -> Option<InvocationLease> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.is_retired() {
            self.release();
            return None;
        }

        self.last_used_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        Some(InvocationLease {
            handle: Arc::clone(self),
        })
    }

    fn release(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Close the session once every outstanding lease has dropped.
    async fn dispose(&self) {
        self.wait_idle().await;
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.session.close().await;
            tracing::debug!(
                session_id = %self.binding.session_id,
                agent_type = %self.binding.kind,
                "Agent handle closed"
            );
        }
    }
}

/// Proof that an invocation is in flight on a handle.
///
/// Keeps the handle's session open until dropped, even if the handle has
/// meanwhile been evicted.
pub struct InvocationLease {
    handle: Arc<AgentHandle>,
}

impl InvocationLease {
    pub fn handle(&self) -> &Arc<AgentHandle> {
        &self.handle
    }

    /// Run one prompt on the leased handle.
    pub async fn invoke(
        &self,
        prompt: &str,
        context: &SessionContext,
        budget: Duration,
    ) -> Result<String, InvocationError> {
        self.handle.session.invoke(prompt, context, budget).await
    }
}

impl Drop for InvocationLease {
    fn drop(&mut self) {
        self.handle.release();
    }
}

/// Health of the agent cache.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCacheHealth {
    pub status: ComponentStatus,
    pub backend: &'static str,
    /// False while the most recent construction attempt failed.
    pub ready: bool,
    pub cached_agents: u64,
    pub capacity: u64,
    /// `cached_agents / capacity`; a full cache is normal under load.
    pub fill_ratio: f64,
    pub constructions: u64,
}

/// Session id → agent handle cache with single-flight construction.
pub struct AgentCache {
    backend: Arc<dyn AgentBackend>,
    entries: Cache<String, Arc<AgentHandle>>,
    capacity: u64,
    constructed: AtomicU64,
    construction_failing: AtomicBool,
}

impl AgentCache {
    /// Create a cache holding up to `capacity` handles.
    pub fn new(backend: Arc<dyn AgentBackend>, capacity: u64) -> Self {
        let capacity = capacity.max(1);
        let entries = Cache::builder()
            .max_capacity(capacity)
            .eviction_policy(EvictionPolicy::lru())
            .eviction_listener(
                |session_id: Arc<String>, handle: Arc<AgentHandle>, cause: RemovalCause| {
                    tracing::debug!(session_id = %session_id, ?cause, in_flight = handle.in_flight(), "Agent handle evicted");
                    handle.retire();
                    match tokio::runtime::Handle::try_current() {
                        Ok(runtime) => {
                            runtime.spawn(async move { handle.dispose().await });
                        }
                        Err(_) => tracing::warn!(
                            session_id = %session_id,
                            "No runtime available, agent handle left to drop without close"
                        ),
                    }
                },
            )
            .build();

        Self {
            backend,
            entries,
            capacity,
            constructed: AtomicU64::new(0),
            construction_failing: AtomicBool::new(false),
        }
    }

    /// Get the handle for `binding.session_id`, constructing it on first use,
    /// and lease it for one invocation.
    ///
    /// A cached handle built for a different agent type is replaced.
    pub async fn get_or_create(&self, binding: &AgentBinding) -> Result<InvocationLease, InvocationError> {
        for _ in 0..MAX_ACQUIRE_ATTEMPTS {
            let handle = self
                .entries
                .try_get_with(binding.session_id.clone(), self.construct(binding))
                .await
                .map_err(|err| (*err).clone())?;

            if handle.kind() != binding.kind {
                tracing::info!(
                    session_id = %binding.session_id,
                    from = %handle.kind(),
                    to = %binding.kind,
                    "Agent type changed, rebuilding handle"
                );
                self.entries.invalidate(&binding.session_id).await;
                continue;
            }

            if let Some(lease) = handle.lease() {
                return Ok(lease);
            }
        }

        Err(InvocationError::Invocation(format!(
            "Could not acquire a live agent handle for session {}",
            binding.session_id
        )))
    }

    async fn construct(&self, binding: &AgentBinding) -> Result<Arc<AgentHandle>, InvocationError> {
        let started = std::time::Instant::now();
        let session = match self.backend.connect(binding).await {
            Ok(session) => session,
            Err(err) => {
                self.construction_failing.store(true, Ordering::SeqCst);
                tracing::warn!(session_id = %binding.session_id, error = %err, "Agent construction failed");
                return Err(err);
            }
        };
        self.construction_failing.store(false, Ordering::SeqCst);
        self.constructed.fetch_add(1, Ordering::SeqCst);

        tracing::info!(
            session_id = %binding.session_id,
            agent_type = %binding.kind,
            backend = self.backend.name(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Constructed agent handle"
        );
        Ok(Arc::new(AgentHandle::new(binding.clone(), session)))
    }

    /// Remove a session's handle. Unknown ids are fine.
    pub async fn invalidate(&self, session_id: &str) {
        self.entries.invalidate(session_id).await;
    }

    /// Remove every handle.
    pub async fn invalidate_all(&self) {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks().await;
        tracing::info!("Agent cache cleared");
    }

    /// Whether a handle for this session is cached.
    pub fn contains(&self, session_id: &str) -> bool {
        self.entries.contains_key(session_id)
    }

    /// Number of cached handles, after applying pending evictions.
    pub async fn len(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Total handles constructed since startup.
    pub fn constructions(&self) -> u64 {
        self.constructed.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub async fn health(&self) -> AgentCacheHealth {
        let cached_agents = self.len().await;
        let ready = !self.construction_failing.load(Ordering::SeqCst);
        AgentCacheHealth {
            status: if ready {
                ComponentStatus::Operational
            } else {
                ComponentStatus::Degraded
            },
            backend: self.backend.name(),
            ready,
            cached_agents,
            capacity: self.capacity,
            fill_ratio: cached_agents as f64 / self.capacity as f64,
            constructions: self.constructions(),
        }
    }
}
