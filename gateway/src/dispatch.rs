//! Request dispatcher
//!
//! Validates an inbound `call_tool`, acquires admission slots, runs the tool
//! as a cancellable background task, and emits frames in the guaranteed
//! order: ack, zero or more progress, exactly one terminal. The dispatcher
//! never retries; retry policy lives in the provider router.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use gate_protocol::{GatewayError, ServerFrame, ToolInfo};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::admission::AdmissionController;
use crate::audit::{AuditEvent, AuditSink};
use crate::session::Session;
use crate::tools::{ToolContext, ToolRegistry};

/// Grace period a cancelled invocation gets to finish on its own before the
/// future is dropped
const CANCEL_GRACE: Duration = Duration::from_millis(500);

/// Outbound frame queue for one connection. All frames for a request pass
/// through this single FIFO, which is what preserves per-request ordering.
#[derive(Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<ServerFrame>,
}

impl FrameSender {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ServerFrame>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Queue a frame; a closed connection swallows it
    pub async fn send(&self, frame: ServerFrame) {
        let _ = self.tx.send(frame).await;
    }

    /// Non-blocking variant for contexts that cannot await; a full or
    /// closed queue drops the frame
    pub fn try_send(&self, frame: ServerFrame) {
        let _ = self.tx.try_send(frame);
    }
}

/// Routes inbound frames to tool executions and frames back out
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    admission: Arc<AdmissionController>,
    audit: AuditSink,
    tool_timeout: Duration,
    inflight: Mutex<HashMap<(String, String), CancellationToken>>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ToolRegistry>,
        admission: Arc<AdmissionController>,
        audit: AuditSink,
        tool_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            admission,
            audit,
            tool_timeout,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Tool inventory for `list_tools`
    pub fn list_tools(&self) -> Vec<ToolInfo> {
        self.registry.list()
    }

    /// Signal cancellation for one in-flight request. Returns false if the
    /// request is unknown (already finished or never existed).
    pub fn cancel(&self, session_id: &str, request_id: &str) -> bool {
        let map = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        match map.get(&(session_id.to_string(), request_id.to_string())) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Reserve a request id; fails on duplicates within the session
    fn reserve(
        &self,
        session_id: &str,
        request_id: &str,
        conn_token: &CancellationToken,
    ) -> Result<CancellationToken, GatewayError> {
        let mut map = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        let key = (session_id.to_string(), request_id.to_string());
        if map.contains_key(&key) {
            return Err(GatewayError::DuplicateRequest(request_id.to_string()));
        }
        let token = conn_token.child_token();
        map.insert(key, token.clone());
        Ok(token)
    }

    fn unreserve(&self, session_id: &str, request_id: &str) {
        let mut map = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        map.remove(&(session_id.to_string(), request_id.to_string()));
    }
}

/// In-flight entry held by the execution task. Dropping without `release`
/// means the task unwound: the entry still comes out of the map (so the
/// request_id stays reusable) and the terminal frame the task never got to
/// send is queued in its place.
struct Reservation {
    dispatcher: Arc<Dispatcher>,
    session_id: String,
    request_id: String,
    conn: FrameSender,
    released: bool,
}

impl Reservation {
    /// Normal-path removal, ahead of the terminal frame
    fn release(mut self) {
        self.released = true;
        self.dispatcher.unreserve(&self.session_id, &self.request_id);
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.dispatcher.unreserve(&self.session_id, &self.request_id);
        let err = GatewayError::ToolExecution(format!(
            "tool task aborted for request {}",
            self.request_id
        ));
        self.conn
            .try_send(ServerFrame::request_error(&self.request_id, &err));
    }
}

impl Dispatcher {
    /// Handle one `call_tool` frame.
    ///
    /// Returns the handle of the spawned execution task so the connection
    /// handler can drain its work on close; `None` means the request was
    /// rejected before any work started.
    pub async fn dispatch_call(
        self: &Arc<Self>,
        session: Arc<Session>,
        request_id: String,
        tool_name: String,
        args: Value,
        conn: FrameSender,
        conn_token: &CancellationToken,
    ) -> Option<JoinHandle<()>> {
        // The ws handler only hands over sessions past their hello, but the
        // dispatcher does not execute for an unauthenticated one regardless
        // of the caller.
        if !session.is_authenticated() {
            let err = GatewayError::Auth("session not authenticated".to_string());
            conn.send(ServerFrame::request_error(&request_id, &err)).await;
            return None;
        }

        // Idempotency boundary: a reused request_id is rejected without
        // consuming an admission slot or starting a second execution.
        let cancel = match self.reserve(&session.id, &request_id, conn_token) {
            Ok(token) => token,
            Err(err) => {
                tracing::debug!(
                    "Duplicate request_id {} on session {}",
                    request_id,
                    session.id
                );
                conn.send(ServerFrame::request_error(&request_id, &err)).await;
                return None;
            }
        };

        let permit = match self.admission.acquire(&session.id).await {
            Ok(permit) => permit,
            Err(err) => {
                // Expected backpressure, not a system error
                tracing::debug!("Admission rejected for session {}: {}", session.id, err);
                self.unreserve(&session.id, &request_id);
                self.audit.emit(AuditEvent::AdmissionRejected {
                    session_id: session.id.clone(),
                    at: Utc::now(),
                });
                conn.send(ServerFrame::request_error(&request_id, &err)).await;
                return None;
            }
        };

        self.audit.emit(AuditEvent::CallStarted {
            session_id: session.id.clone(),
            request_id: request_id.clone(),
            tool: tool_name.clone(),
            at: Utc::now(),
        });

        // Ack is queued before the execution task exists, so it always
        // precedes that request's progress and terminal frames.
        conn.send(ServerFrame::CallToolAck {
            request_id: request_id.clone(),
        })
        .await;

        let inflight_guard = session.begin_request();
        let dispatcher = Arc::clone(self);
        let tool_timeout = self.tool_timeout;

        Some(tokio::spawn(async move {
            // Slot, counter, and in-flight entry ride in the task: every
            // exit path, including an unwind, releases them exactly once.
            let _permit = permit;
            let _inflight_guard = inflight_guard;
            let reservation = Reservation {
                dispatcher: Arc::clone(&dispatcher),
                session_id: session.id.clone(),
                request_id: request_id.clone(),
                conn: conn.clone(),
                released: false,
            };
            let started = Instant::now();

            let (progress_tx, mut progress_rx) = mpsc::channel::<String>(32);
            let ctx = ToolContext {
                cancel: cancel.clone(),
                progress: progress_tx,
            };

            let invoke = tokio::time::timeout(
                tool_timeout,
                dispatcher.registry.invoke(&tool_name, args, &ctx),
            );
            tokio::pin!(invoke);

            // Forward progress in production order until the tool settles
            let settled = loop {
                tokio::select! {
                    biased;
                    Some(note) = progress_rx.recv() => {
                        conn.send(ServerFrame::Progress {
                            request_id: request_id.clone(),
                            note,
                        })
                        .await;
                    }
                    res = &mut invoke => break Some(res),
                    _ = cancel.cancelled() => break None,
                }
            };

            let result = match settled {
                Some(Ok(result)) => result,
                Some(Err(_)) => Err(GatewayError::Timeout(format!(
                    "tool {tool_name} exceeded {}s",
                    tool_timeout.as_secs()
                ))),
                None => {
                    // Cancelled: give the invocation a bounded grace period
                    // to observe the token, then drop it.
                    match tokio::time::timeout(CANCEL_GRACE, &mut invoke).await {
                        Ok(Ok(result)) => result,
                        _ => Err(GatewayError::ToolExecution(format!(
                            "request {request_id} cancelled"
                        ))),
                    }
                }
            };

            // Flush progress produced before settling
            while let Ok(note) = progress_rx.try_recv() {
                conn.send(ServerFrame::Progress {
                    request_id: request_id.clone(),
                    note,
                })
                .await;
            }

            // The in-flight entry comes out before the terminal goes out;
            // once the terminal is queued the request_id is reusable.
            reservation.release();

            let outcome = match &result {
                Ok(_) => "ok".to_string(),
                Err(err) => format!("{:?}", err.kind()),
            };

            let terminal = match result {
                Ok(outputs) => ServerFrame::CallToolRes {
                    request_id: request_id.clone(),
                    outputs,
                },
                Err(err) => ServerFrame::request_error(&request_id, &err),
            };
            conn.send(terminal).await;

            dispatcher.audit.emit(AuditEvent::CallFinished {
                session_id: session.id.clone(),
                request_id,
                outcome,
                elapsed_ms: started.elapsed().as_millis() as u64,
            });
        }))
    }
}
