//! Session registry with idle-sweep cleanup
//!
//! Sessions are created on the first valid hello, touched on every frame,
//! and removed either on socket close or by the periodic sweeper once idle
//! with no in-flight work. The registry is the only owner of Session
//! objects; everything else holds `Arc` handles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::admission::AdmissionController;

/// One authenticated client session
pub struct Session {
    pub id: String,
    pub created_at: Instant,
    authenticated: AtomicBool,
    last_activity: Mutex<Instant>,
    inflight: AtomicUsize,
}

impl Session {
    fn new(id: String) -> Arc<Self> {
        let now = Instant::now();
        Arc::new(Self {
            id,
            created_at: now,
            authenticated: AtomicBool::new(false),
            last_activity: Mutex::new(now),
            inflight: AtomicUsize::new(0),
        })
    }

    /// Set once the hello handshake has verified the token
    pub fn mark_authenticated(&self) {
        self.authenticated.store(true, Ordering::SeqCst);
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    /// Record activity on this session
    pub fn touch(&self) {
        if let Ok(mut at) = self.last_activity.lock() {
            *at = Instant::now();
        }
    }

    /// Time since the last frame seen on this session
    pub fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .map(|at| at.elapsed())
            .unwrap_or_default()
    }

    /// Current tool calls in progress for this session
    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::SeqCst)
    }

    /// Mark one request in flight; the returned guard decrements on drop,
    /// so the count is released exactly once on every exit path
    pub fn begin_request(self: &Arc<Self>) -> InflightGuard {
        self.inflight.fetch_add(1, Ordering::SeqCst);
        InflightGuard {
            session: Arc::clone(self),
        }
    }
}

/// RAII guard for a session's in-flight counter
pub struct InflightGuard {
    session: Arc<Session>,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.session.inflight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory store of active sessions
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get-or-create; never returns two different Session objects for the
    /// same id concurrently
    pub fn ensure(&self, id: &str) -> Arc<Session> {
        let mut map = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            map.entry(id.to_string())
                .or_insert_with(|| Session::new(id.to_string())),
        )
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        let map = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        map.get(id).cloned()
    }

    /// Update last_activity. Returns false when the session is absent
    /// (already swept) - callers treat that as "session expired", not an
    /// error.
    pub fn touch(&self, id: &str) -> bool {
        match self.get(id) {
            Some(session) => {
                session.touch();
                true
            }
            None => false,
        }
    }

    /// Remove a session unconditionally; no-op if already absent
    pub fn remove(&self, id: &str) {
        let mut map = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        map.remove(id);
    }

    /// Remove a session only if it has no in-flight work. Returns true if
    /// removed.
    pub fn remove_if_idle(&self, id: &str) -> bool {
        let mut map = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(session) = map.get(id) {
            if session.inflight() == 0 {
                map.remove(id);
                return true;
            }
        }
        false
    }

    /// Remove every session idle beyond `timeout` with zero in-flight work.
    /// Returns the removed ids so callers can release per-session state
    /// held elsewhere (admission semaphores).
    pub fn sweep_stale(&self, timeout: Duration) -> Vec<String> {
        let mut map = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let stale: Vec<String> = map
            .iter()
            .filter(|(_, session)| session.inflight() == 0 && session.idle_for() > timeout)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            map.remove(id);
        }
        stale
    }

    /// Number of active sessions
    pub fn len(&self) -> usize {
        let map = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Run the idle sweeper at a fixed interval until `shutdown` fires.
///
/// Sweeping is best-effort; the interval does not stretch under load. Each
/// swept session also has its per-session admission state evicted, so a
/// session that expires without a clean socket close leaves nothing behind.
pub fn spawn_sweeper(
    registry: Arc<SessionRegistry>,
    admission: Arc<AdmissionController>,
    interval: Duration,
    idle_timeout: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = registry.sweep_stale(idle_timeout);
                    for id in &removed {
                        admission.evict_session(id);
                    }
                    if !removed.is_empty() {
                        tracing::info!("Sweeper removed {} stale session(s)", removed.len());
                    }
                }
                _ = shutdown.cancelled() => {
                    tracing::debug!("Session sweeper stopping");
                    break;
                }
            }
        }
    })
}
