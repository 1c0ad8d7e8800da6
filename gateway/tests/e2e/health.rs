//! Operator health surface

use gate_protocol::ClientFrame;

use super::support::*;

#[tokio::test]
async fn healthz_reports_pool_and_warmup_status() {
    let mut config = test_config();
    config.global_permits = 4;
    let addr = spawn_gateway(config).await;

    let body: serde_json::Value = reqwest::get(format!("http://{addr}/healthz"))
        .await
        .expect("healthz reachable")
        .json()
        .await
        .expect("healthz is json");

    assert_eq!(body["status"], "ok");
    assert_eq!(body["admission"]["capacity"], 4);
    assert_eq!(body["admission"]["available"], 4);
    assert_eq!(body["warmup"]["entries"][0]["provider_id"], "local");
    assert_eq!(body["warmup"]["entries"][0]["ok"], true);
}

#[tokio::test]
async fn healthz_sees_active_sessions_and_held_slots() {
    let mut config = test_config();
    config.global_permits = 2;
    let addr = spawn_gateway(config).await;

    let (mut ws, _sid) = open_session(addr, None).await;
    send(
        &mut ws,
        &ClientFrame::CallTool {
            request_id: "r1".to_string(),
            name: "sleep".to_string(),
            arguments: serde_json::json!({"millis": 2_000}),
        },
    )
    .await;
    // Wait until the call is admitted
    assert!(matches!(
        recv(&mut ws).await,
        Some(gate_protocol::ServerFrame::CallToolAck { .. })
    ));

    let body: serde_json::Value = reqwest::get(format!("http://{addr}/healthz"))
        .await
        .expect("healthz reachable")
        .json()
        .await
        .expect("healthz is json");

    assert_eq!(body["sessions"], 1);
    assert_eq!(body["admission"]["available"], 1);
}
