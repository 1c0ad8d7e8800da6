//! Fire-and-forget audit sink
//!
//! Events go through a bounded channel with `try_send`; a full or stopped
//! sink drops events and never blocks or fails a request. The default
//! consumer writes structured log lines.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One auditable gateway event
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    SessionOpened {
        session_id: String,
        at: DateTime<Utc>,
    },
    SessionClosed {
        session_id: String,
        at: DateTime<Utc>,
    },
    CallStarted {
        session_id: String,
        request_id: String,
        tool: String,
        at: DateTime<Utc>,
    },
    CallFinished {
        session_id: String,
        request_id: String,
        outcome: String,
        elapsed_ms: u64,
    },
    AdmissionRejected {
        session_id: String,
        at: DateTime<Utc>,
    },
}

/// Cheap cloneable handle for emitting audit events
#[derive(Clone)]
pub struct AuditSink {
    tx: mpsc::Sender<AuditEvent>,
}

impl AuditSink {
    /// Sink backed by a logging consumer task
    pub fn spawn_logger(shutdown: CancellationToken) -> Self {
        let (tx, mut rx) = mpsc::channel::<AuditEvent>(256);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = rx.recv() => match event {
                        Some(event) => match serde_json::to_string(&event) {
                            Ok(line) => tracing::info!(target: "audit", "{}", line),
                            Err(e) => tracing::debug!("Unserializable audit event: {}", e),
                        },
                        None => break,
                    },
                    _ = shutdown.cancelled() => break,
                }
            }
        });
        Self { tx }
    }

    /// Sink that discards everything (tests)
    pub fn disabled() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self { tx }
    }

    /// Emit an event; drops silently if the sink is full or gone
    pub fn emit(&self, event: AuditEvent) {
        let _ = self.tx.try_send(event);
    }
}
