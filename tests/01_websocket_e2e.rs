mod support;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Message, protocol::frame::coding::CloseCode},
};

const HOST: &str = "127.0.0.1";

const GATEWAY_TOML: &str = r#"
max_fps = 30
max_bandwidth_mbps = 10.0
max_concurrent_streams = 4
frame_timeout = "5s"
"#;

struct Running {
    child: std::process::Child,
    port: u16,
    _config: tempfile::NamedTempFile,
    _clients: tempfile::NamedTempFile,
}

impl Drop for Running {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

async fn start() -> Running {
    let config = support::write_tmp(GATEWAY_TOML);
    let clients = support::write_tmp(support::CLIENTS);
    let port = support::reserve_port(HOST);

    let child = support::spawn_streamgate(HOST, port, &config, &clients);
    support::wait_for_listen(HOST, port).await;

    Running {
        child,
        port,
        _config: config,
        _clients: clients,
    }
}

#[tokio::test]
async fn websocket_client_streams_frames() {
    let server = start().await;
    let url = format!("ws://{HOST}:{}/ws", server.port);

    let (mut ws, _) = connect_async(url.as_str()).await.expect("connect");

    ws.send(Message::Text(support::auth_message("token-1")))
        .await
        .unwrap();
    let Some(Ok(Message::Text(ack))) = ws.next().await else {
        panic!("expected auth ack");
    };
    let ack: serde_json::Value = serde_json::from_str(&ack).unwrap();
    assert_eq!(ack["status"], "success");
    assert_eq!(ack["client_id"], "cam-1");

    ws.send(Message::Binary(support::JPEG.to_vec())).await.unwrap();
    let Some(Ok(Message::Text(result))) = ws.next().await else {
        panic!("expected a result");
    };
    let result: serde_json::Value = serde_json::from_str(&result).unwrap();
    assert_eq!(result["predictions"].as_array().unwrap().len(), 1);

    ws.close(None).await.unwrap();
}

#[tokio::test]
async fn websocket_bad_token_gets_policy_violation() {
    let server = start().await;
    let url = format!("ws://{HOST}:{}/ws", server.port);

    let (mut ws, _) = connect_async(url.as_str()).await.expect("connect");
    ws.send(Message::Text(support::auth_message("nope")))
        .await
        .unwrap();

    let Some(Ok(Message::Close(Some(frame)))) = ws.next().await else {
        panic!("expected a close frame");
    };
    assert_eq!(frame.code, CloseCode::Policy);
    assert_eq!(frame.reason, "unknown_token");
}
