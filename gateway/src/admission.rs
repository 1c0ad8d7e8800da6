//! Two-level admission control for tool execution
//!
//! A global semaphore bounds total concurrent executions; a per-session
//! semaphore keeps one session from starving the rest. A request holds both
//! slots for its whole execution; the permit releases them on drop, so every
//! exit path (success, error, timeout, cancel, panic unwind) releases
//! exactly once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gate_protocol::GatewayError;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Admission controller shared by all connection handlers
pub struct AdmissionController {
    global: Arc<Semaphore>,
    global_capacity: usize,
    session_capacity: usize,
    admission_timeout: Duration,
    per_session: Mutex<HashMap<String, Arc<Semaphore>>>,
}

/// RAII permit pairing one global and one session slot
#[derive(Debug)]
pub struct AdmissionPermit {
    _session: OwnedSemaphorePermit,
    _global: OwnedSemaphorePermit,
}

impl AdmissionController {
    pub fn new(global_capacity: usize, session_capacity: usize, admission_timeout: Duration) -> Self {
        Self {
            global: Arc::new(Semaphore::new(global_capacity)),
            global_capacity,
            session_capacity,
            admission_timeout,
            per_session: Mutex::new(HashMap::new()),
        }
    }

    fn session_semaphore(&self, session_id: &str) -> Arc<Semaphore> {
        let mut map = self.per_session.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            map.entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.session_capacity))),
        )
    }

    /// Acquire one session slot and one global slot.
    ///
    /// A session already at its own cap is rejected immediately without
    /// consuming a global slot. The global acquisition waits at most the
    /// configured admission timeout, then fails fast with
    /// `AdmissionRejected` - that bounded wait is the backpressure
    /// mechanism.
    pub async fn acquire(&self, session_id: &str) -> Result<AdmissionPermit, GatewayError> {
        // Fast-path rejection at the per-session cap. Holding the session
        // permit while waiting on the global pool cannot deadlock: session
        // permits are only ever taken non-blocking.
        let session_permit = self
            .session_semaphore(session_id)
            .try_acquire_owned()
            .map_err(|_| {
                GatewayError::AdmissionRejected(format!(
                    "session {session_id} is at its concurrency cap"
                ))
            })?;

        let global_permit = tokio::time::timeout(
            self.admission_timeout,
            Arc::clone(&self.global).acquire_owned(),
        )
        .await
        .map_err(|_| {
            GatewayError::AdmissionRejected("global capacity exhausted".to_string())
        })?
        .map_err(|_| {
            // Semaphore closed only happens on shutdown
            GatewayError::AdmissionRejected("gateway is shutting down".to_string())
        })?;

        Ok(AdmissionPermit {
            _session: session_permit,
            _global: global_permit,
        })
    }

    /// Drop the per-session semaphore entry once its session is removed.
    ///
    /// Outstanding permits keep the semaphore itself alive through their
    /// own `Arc`, so eviction is safe at any time.
    pub fn evict_session(&self, session_id: &str) {
        let mut map = self.per_session.lock().unwrap_or_else(|e| e.into_inner());
        map.remove(session_id);
    }

    /// Free global slots right now (health surface)
    pub fn available_global(&self) -> usize {
        self.global.available_permits()
    }

    /// Configured global capacity (health surface)
    pub fn global_capacity(&self) -> usize {
        self.global_capacity
    }

    /// Per-session semaphore entries currently tracked
    #[cfg(test)]
    pub(crate) fn tracked_sessions(&self) -> usize {
        let map = self.per_session.lock().unwrap_or_else(|e| e.into_inner());
        map.len()
    }
}
