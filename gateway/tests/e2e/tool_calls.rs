//! Dispatch flows over the wire: ordering, duplicates, cancel

use gate_protocol::{ClientFrame, ErrorKind, ServerFrame};

use super::support::*;

fn call(request_id: &str, name: &str, arguments: serde_json::Value) -> ClientFrame {
    ClientFrame::CallTool {
        request_id: request_id.to_string(),
        name: name.to_string(),
        arguments,
    }
}

#[tokio::test]
async fn echo_call_is_ack_then_result() {
    let addr = spawn_gateway(test_config()).await;
    let (mut ws, _sid) = open_session(addr, None).await;

    send(&mut ws, &call("r1", "echo", serde_json::json!({"msg": "hi"}))).await;

    match recv(&mut ws).await {
        Some(ServerFrame::CallToolAck { request_id }) => assert_eq!(request_id, "r1"),
        other => panic!("expected ack, got {other:?}"),
    }
    match recv(&mut ws).await {
        Some(ServerFrame::CallToolRes { request_id, outputs }) => {
            assert_eq!(request_id, "r1");
            assert_eq!(outputs[0]["msg"], "hi");
        }
        other => panic!("expected result, got {other:?}"),
    }
}

#[tokio::test]
async fn list_tools_returns_the_builtins() {
    let addr = spawn_gateway(test_config()).await;
    let (mut ws, _sid) = open_session(addr, None).await;

    send(
        &mut ws,
        &ClientFrame::ListTools {
            request_id: "r1".to_string(),
        },
    )
    .await;

    match recv(&mut ws).await {
        Some(ServerFrame::ListToolsRes { request_id, tools }) => {
            assert_eq!(request_id, "r1");
            let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
            assert_eq!(names, vec!["chat", "echo", "sleep"]);
        }
        other => panic!("expected tool list, got {other:?}"),
    }
}

#[tokio::test]
async fn chat_streams_progress_between_ack_and_result() {
    let addr = spawn_gateway(test_config()).await;
    let (mut ws, _sid) = open_session(addr, None).await;

    send(&mut ws, &call("r1", "chat", serde_json::json!({"prompt": "hi"}))).await;

    // Strict per-request ordering: ack, progress notes, terminal
    match recv(&mut ws).await {
        Some(ServerFrame::CallToolAck { .. }) => {}
        other => panic!("expected ack first, got {other:?}"),
    }

    let mut saw_progress = 0;
    loop {
        match recv(&mut ws).await {
            Some(ServerFrame::Progress { request_id, .. }) => {
                assert_eq!(request_id, "r1");
                saw_progress += 1;
            }
            Some(ServerFrame::CallToolRes { request_id, outputs }) => {
                assert_eq!(request_id, "r1");
                assert_eq!(outputs[0]["provider_id"], "local");
                break;
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }
    assert!(saw_progress >= 1, "chat reports routing progress");
}

#[tokio::test]
async fn duplicate_request_id_is_rejected_while_in_flight() {
    let addr = spawn_gateway(test_config()).await;
    let (mut ws, _sid) = open_session(addr, None).await;

    send(&mut ws, &call("r1", "sleep", serde_json::json!({"millis": 2_000}))).await;
    match recv(&mut ws).await {
        Some(ServerFrame::CallToolAck { .. }) => {}
        other => panic!("expected ack, got {other:?}"),
    }

    send(&mut ws, &call("r1", "echo", serde_json::Value::Null)).await;
    match recv_non_progress(&mut ws).await {
        Some(ServerFrame::Error { request_id, kind, .. }) => {
            assert_eq!(request_id.as_deref(), Some("r1"));
            assert_eq!(kind, ErrorKind::DuplicateRequest);
        }
        other => panic!("expected duplicate rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn cancel_produces_a_terminal_error_and_keeps_the_connection() {
    let addr = spawn_gateway(test_config()).await;
    let (mut ws, _sid) = open_session(addr, None).await;

    send(&mut ws, &call("r1", "sleep", serde_json::json!({"millis": 60_000}))).await;
    match recv(&mut ws).await {
        Some(ServerFrame::CallToolAck { .. }) => {}
        other => panic!("expected ack, got {other:?}"),
    }

    send(
        &mut ws,
        &ClientFrame::Cancel {
            request_id: "r1".to_string(),
        },
    )
    .await;

    match recv_non_progress(&mut ws).await {
        Some(ServerFrame::Error { request_id, kind, .. }) => {
            assert_eq!(request_id.as_deref(), Some("r1"));
            assert_eq!(kind, ErrorKind::ToolExecutionError);
        }
        other => panic!("expected cancellation terminal, got {other:?}"),
    }

    // Request-level errors never close the connection
    send(&mut ws, &call("r2", "echo", serde_json::json!({"still": "alive"}))).await;
    match recv(&mut ws).await {
        Some(ServerFrame::CallToolAck { request_id }) => assert_eq!(request_id, "r2"),
        other => panic!("connection should still work, got {other:?}"),
    }
    match recv(&mut ws).await {
        Some(ServerFrame::CallToolRes { .. }) => {}
        other => panic!("expected result, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_tool_is_a_request_level_error() {
    let addr = spawn_gateway(test_config()).await;
    let (mut ws, _sid) = open_session(addr, None).await;

    send(&mut ws, &call("r1", "nope", serde_json::Value::Null)).await;
    match recv(&mut ws).await {
        Some(ServerFrame::CallToolAck { .. }) => {}
        other => panic!("expected ack, got {other:?}"),
    }
    match recv(&mut ws).await {
        Some(ServerFrame::Error { kind, .. }) => assert_eq!(kind, ErrorKind::ToolExecutionError),
        other => panic!("expected tool error, got {other:?}"),
    }

    // Still usable afterwards
    send(&mut ws, &call("r2", "echo", serde_json::Value::Null)).await;
    assert!(matches!(
        recv(&mut ws).await,
        Some(ServerFrame::CallToolAck { .. })
    ));
}

#[tokio::test]
async fn malformed_json_closes_the_connection() {
    use futures_util::SinkExt;
    use tokio_tungstenite::tungstenite::Message;

    let addr = spawn_gateway(test_config()).await;
    let (mut ws, _sid) = open_session(addr, None).await;

    ws.send(Message::Text("{not json".to_string())).await.unwrap();

    match recv(&mut ws).await {
        Some(ServerFrame::Error { kind, request_id, .. }) => {
            assert_eq!(kind, ErrorKind::ProtocolError);
            assert!(request_id.is_none());
        }
        other => panic!("expected protocol error, got {other:?}"),
    }
    assert!(recv(&mut ws).await.is_none(), "socket closed");
}
