//! Admission control under contention, end to end

use gate_protocol::{ClientFrame, ErrorKind, ServerFrame};

use super::support::*;

fn sleep_call(request_id: &str, millis: u64) -> ClientFrame {
    ClientFrame::CallTool {
        request_id: request_id.to_string(),
        name: "sleep".to_string(),
        arguments: serde_json::json!({ "millis": millis }),
    }
}

#[tokio::test]
async fn overflow_session_is_rejected_while_the_rest_proceed() {
    let mut config = test_config();
    config.global_permits = 2;
    config.session_permits = 1;
    let addr = spawn_gateway(config).await;

    // One long-running call from each of global_permits + 1 sessions
    let mut clients = Vec::new();
    for i in 0..3 {
        let (mut ws, _sid) = open_session(addr, Some(&format!("s{i}"))).await;
        send(&mut ws, &sleep_call("r1", 1_500)).await;
        clients.push(ws);
    }

    let mut acks = 0;
    let mut rejections = 0;
    for ws in &mut clients {
        match recv_non_progress(ws).await {
            Some(ServerFrame::CallToolAck { .. }) => acks += 1,
            Some(ServerFrame::Error { kind, .. }) => {
                assert_eq!(kind, ErrorKind::AdmissionRejected);
                rejections += 1;
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }
    assert_eq!(acks, 2, "capacity worth of calls proceed");
    assert_eq!(rejections, 1, "exactly the overflow call is rejected");
}

#[tokio::test]
async fn per_session_cap_rejects_immediately() {
    let mut config = test_config();
    config.global_permits = 8;
    config.session_permits = 1;
    let addr = spawn_gateway(config).await;
    let (mut ws, _sid) = open_session(addr, None).await;

    send(&mut ws, &sleep_call("r1", 2_000)).await;
    match recv(&mut ws).await {
        Some(ServerFrame::CallToolAck { .. }) => {}
        other => panic!("expected ack, got {other:?}"),
    }

    // Same session, second concurrent call: over its own cap
    send(&mut ws, &sleep_call("r2", 2_000)).await;
    match recv_non_progress(&mut ws).await {
        Some(ServerFrame::Error { request_id, kind, .. }) => {
            assert_eq!(request_id.as_deref(), Some("r2"));
            assert_eq!(kind, ErrorKind::AdmissionRejected);
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn capacity_frees_up_after_completion() {
    let mut config = test_config();
    config.global_permits = 1;
    config.session_permits = 1;
    let addr = spawn_gateway(config).await;

    let (mut ws, _sid) = open_session(addr, None).await;
    send(&mut ws, &sleep_call("r1", 50)).await;

    // Drain to the terminal
    loop {
        match recv(&mut ws).await {
            Some(ServerFrame::CallToolRes { .. }) => break,
            Some(_) => continue,
            None => panic!("connection died"),
        }
    }

    // Slot is back; a new call on a fresh session is admitted
    let (mut ws2, _sid2) = open_session(addr, None).await;
    send(&mut ws2, &sleep_call("r1", 10)).await;
    assert!(matches!(
        recv(&mut ws2).await,
        Some(ServerFrame::CallToolAck { .. })
    ));
}
