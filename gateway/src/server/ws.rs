//! WebSocket connection handler
//!
//! One task owns the socket's read side; a writer task drains the outbound
//! frame queue. The connection walks a fixed state machine: await-hello
//! (with a deadline), then active dispatch, then teardown that cancels all
//! in-flight work for the connection.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use gate_protocol::{ClientFrame, GatewayError, ServerFrame};
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::AppState;
use crate::audit::AuditEvent;
use crate::dispatch::FrameSender;
use crate::session::Session;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Pull the next text payload, skipping pings/pongs. `None` means the
/// socket closed or errored.
async fn next_text(stream: &mut SplitStream<WebSocket>) -> Option<String> {
    loop {
        match stream.next().await? {
            Ok(Message::Text(text)) => return Some(text),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

/// Handle one client connection end to end
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sink, mut stream) = socket.split();
    let (conn, outbound_rx) = FrameSender::channel(64);
    let writer = spawn_writer(sink, outbound_rx);

    // AWAIT_HELLO: nothing else is processed before authentication
    let session = match await_hello(&state, &mut stream, &conn).await {
        Some(session) => session,
        None => {
            drop(conn);
            let _ = writer.await;
            return;
        }
    };

    state.audit.emit(AuditEvent::SessionOpened {
        session_id: session.id.clone(),
        at: Utc::now(),
    });
    tracing::info!("Session {} active", session.id);

    // ACTIVE: read loop; in-flight tasks derive from the connection token
    let conn_token = state.shutdown.child_token();
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    while let Some(text) = next_text(&mut stream).await {
        if !state.sessions.touch(&session.id) {
            // Swept mid-connection; the client must re-authenticate
            let err = GatewayError::Auth("session expired".to_string());
            conn.send(ServerFrame::connection_error(&err)).await;
            break;
        }

        let frame = match gate_protocol::decode_client(&text) {
            Ok(frame) => frame,
            Err(err) => {
                // Malformed frames are connection-level
                tracing::debug!("Protocol error on session {}: {}", session.id, err);
                conn.send(ServerFrame::connection_error(&err)).await;
                break;
            }
        };

        match frame {
            ClientFrame::Hello { .. } => {
                let err = GatewayError::Protocol("unexpected hello".to_string());
                conn.send(ServerFrame::connection_error(&err)).await;
                break;
            }
            ClientFrame::ListTools { request_id } => {
                conn.send(ServerFrame::ListToolsRes {
                    request_id,
                    tools: state.dispatcher.list_tools(),
                })
                .await;
            }
            ClientFrame::CallTool {
                request_id,
                name,
                arguments,
            } => {
                tasks.retain(|t| !t.is_finished());
                if let Some(handle) = state
                    .dispatcher
                    .dispatch_call(
                        Arc::clone(&session),
                        request_id,
                        name,
                        arguments,
                        conn.clone(),
                        &conn_token,
                    )
                    .await
                {
                    tasks.push(handle);
                }
            }
            ClientFrame::Cancel { request_id } => {
                if !state.dispatcher.cancel(&session.id, &request_id) {
                    tracing::debug!(
                        "Cancel for unknown request {} on session {}",
                        request_id,
                        session.id
                    );
                }
            }
        }
    }

    // CLOSING: cancel in-flight work, drain it, then drop the session if no
    // other connection is keeping it busy
    conn_token.cancel();
    for task in tasks {
        let _ = task.await;
    }
    if state.sessions.remove_if_idle(&session.id) {
        state.admission.evict_session(&session.id);
        state.audit.emit(AuditEvent::SessionClosed {
            session_id: session.id.clone(),
            at: Utc::now(),
        });
    }
    tracing::info!(
        "Session {} connection closed after {:?}",
        session.id,
        session.created_at.elapsed()
    );

    drop(conn);
    let _ = writer.await;
}

/// Writer task: the single place frames leave the process for this
/// connection, so per-request FIFO order is preserved on the wire
fn spawn_writer(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound_rx: tokio::sync::mpsc::Receiver<ServerFrame>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let text = match gate_protocol::encode(&frame) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("Failed to encode frame: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    })
}

/// Run the hello handshake. Exactly one `hello_ack` is sent on every path
/// that received a hello; `None` closes the connection.
async fn await_hello(
    state: &AppState,
    stream: &mut SplitStream<WebSocket>,
    conn: &FrameSender,
) -> Option<Arc<Session>> {
    let text = match tokio::time::timeout(state.config.hello_timeout(), next_text(stream)).await {
        Ok(Some(text)) => text,
        Ok(None) => return None,
        Err(_) => {
            let err = GatewayError::Auth("hello timeout".to_string());
            conn.send(ServerFrame::connection_error(&err)).await;
            return None;
        }
    };

    let (token, session_id) = match gate_protocol::decode_client(&text) {
        Ok(ClientFrame::Hello { token, session_id }) => (token, session_id),
        Ok(_) => {
            let err = GatewayError::Protocol("expected hello".to_string());
            conn.send(ServerFrame::connection_error(&err)).await;
            return None;
        }
        Err(err) => {
            conn.send(ServerFrame::connection_error(&err)).await;
            return None;
        }
    };

    if let Err(err) = state.verifier.verify(&token) {
        tracing::warn!("Hello rejected: {}", err);
        conn.send(ServerFrame::HelloAck {
            ok: false,
            session_id: None,
            error: Some(err.to_string()),
        })
        .await;
        return None;
    }

    // Resume the named session if it is still alive, otherwise mint one
    let session_id = session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let session = state.sessions.ensure(&session_id);
    session.mark_authenticated();
    session.touch();

    conn.send(ServerFrame::HelloAck {
        ok: true,
        session_id: Some(session_id),
        error: None,
    })
    .await;

    Some(session)
}
