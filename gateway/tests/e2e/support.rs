//! Shared scaffolding for the e2e suite

use futures_util::{SinkExt, StreamExt};
use gate_protocol::{ClientFrame, ServerFrame};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use toolgate::config::{GatewayConfig, ProviderConfig};
use toolgate::server::{self, AppState};

pub const TOKEN: &str = "e2e-token";

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Config tuned for fast tests: auth on, static provider, short admission
/// timeout
pub fn test_config() -> GatewayConfig {
    let mut cfg = GatewayConfig::default();
    cfg.auth_token = Some(TOKEN.to_string());
    cfg.admission_timeout_ms = 100;
    cfg.providers = vec![ProviderConfig {
        id: "local".to_string(),
        kind: "static".to_string(),
        base_url: None,
        model: None,
    }];
    cfg
}

/// Boot a gateway on an ephemeral port; the task lives as long as the test
/// runtime
pub async fn spawn_gateway(config: GatewayConfig) -> SocketAddr {
    let state = AppState::build(config).await.expect("state builds");
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = server::serve_with_listener(listener, state).await;
    });
    addr
}

pub async fn connect(addr: SocketAddr) -> WsClient {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("websocket connect");
    ws
}

pub async fn send(ws: &mut WsClient, frame: &ClientFrame) {
    let text = gate_protocol::encode(frame).expect("encode");
    ws.send(Message::Text(text)).await.expect("send frame");
}

/// Next protocol frame; `None` once the server closes the socket
pub async fn recv(ws: &mut WsClient) -> Option<ServerFrame> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("frame wait timed out")?;
        match msg {
            Ok(Message::Text(text)) => {
                return Some(gate_protocol::decode_server(&text).expect("decode"))
            }
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

/// Next frame that is not a progress note
pub async fn recv_non_progress(ws: &mut WsClient) -> Option<ServerFrame> {
    loop {
        match recv(ws).await? {
            ServerFrame::Progress { .. } => continue,
            frame => return Some(frame),
        }
    }
}

/// Connect and complete the hello handshake, returning the session id
pub async fn open_session(addr: SocketAddr, session_id: Option<&str>) -> (WsClient, String) {
    let mut ws = connect(addr).await;
    send(
        &mut ws,
        &ClientFrame::Hello {
            token: TOKEN.to_string(),
            session_id: session_id.map(String::from),
        },
    )
    .await;
    match recv(&mut ws).await {
        Some(ServerFrame::HelloAck {
            ok: true,
            session_id: Some(sid),
            ..
        }) => (ws, sid),
        other => panic!("handshake failed: {other:?}"),
    }
}
