//! Hello handshake and auth state machine

use gate_protocol::{ClientFrame, ErrorKind, ServerFrame};

use super::support::*;

#[tokio::test]
async fn bad_token_gets_nack_then_close() {
    let addr = spawn_gateway(test_config()).await;
    let mut ws = connect(addr).await;

    send(
        &mut ws,
        &ClientFrame::Hello {
            token: "wrong".to_string(),
            session_id: None,
        },
    )
    .await;

    match recv(&mut ws).await {
        Some(ServerFrame::HelloAck { ok, error, .. }) => {
            assert!(!ok);
            assert!(error.is_some());
        }
        other => panic!("expected nack, got {other:?}"),
    }
    assert!(recv(&mut ws).await.is_none(), "socket closed after nack");
}

#[tokio::test]
async fn valid_hello_gets_exactly_one_ack_with_a_session_id() {
    let addr = spawn_gateway(test_config()).await;
    let (_ws, session_id) = open_session(addr, None).await;
    assert!(!session_id.is_empty());
}

#[tokio::test]
async fn client_supplied_session_id_is_honored() {
    let addr = spawn_gateway(test_config()).await;
    let (_ws, session_id) = open_session(addr, Some("my-session")).await;
    assert_eq!(session_id, "my-session");
}

#[tokio::test]
async fn tool_frames_before_hello_are_rejected() {
    let addr = spawn_gateway(test_config()).await;
    let mut ws = connect(addr).await;

    send(
        &mut ws,
        &ClientFrame::CallTool {
            request_id: "r1".to_string(),
            name: "echo".to_string(),
            arguments: serde_json::Value::Null,
        },
    )
    .await;

    match recv(&mut ws).await {
        Some(ServerFrame::Error { kind, request_id, .. }) => {
            assert_eq!(kind, ErrorKind::ProtocolError);
            assert!(request_id.is_none(), "connection-level error");
        }
        other => panic!("expected protocol error, got {other:?}"),
    }
    assert!(recv(&mut ws).await.is_none());
}

#[tokio::test]
async fn missing_hello_times_out() {
    let mut config = test_config();
    config.hello_timeout_ms = 100;
    let addr = spawn_gateway(config).await;
    let mut ws = connect(addr).await;

    // Send nothing; the server must give up on its own
    match recv(&mut ws).await {
        Some(ServerFrame::Error { kind, .. }) => assert_eq!(kind, ErrorKind::AuthError),
        other => panic!("expected auth-timeout error, got {other:?}"),
    }
    assert!(recv(&mut ws).await.is_none());
}

#[tokio::test]
async fn second_hello_is_a_protocol_error() {
    let addr = spawn_gateway(test_config()).await;
    let (mut ws, _sid) = open_session(addr, None).await;

    send(
        &mut ws,
        &ClientFrame::Hello {
            token: TOKEN.to_string(),
            session_id: None,
        },
    )
    .await;

    match recv(&mut ws).await {
        Some(ServerFrame::Error { kind, .. }) => assert_eq!(kind, ErrorKind::ProtocolError),
        other => panic!("expected protocol error, got {other:?}"),
    }
}
