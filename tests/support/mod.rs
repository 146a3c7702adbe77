#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::{
    io::Write,
    net::TcpListener,
    process::{Child, Command},
    sync::Arc,
    time::Duration,
};
use streamgate::{
    Gateway,
    analytics::GatewayStats,
    config::{ClientsConfig, ConfigHandle, Limits},
    inference::{InferenceError, InferencePipeline, PipelineRegistry, Prediction},
    transport::{ChannelPeer, Outbound, channel_pair},
};
use tempfile::NamedTempFile;
use tokio::{task::JoinHandle, time::sleep};

// -----------------------------------------------------------------------------
// ----- Fixtures --------------------------------------------------------------

pub const CLIENTS: &str = r#"
    [[clients]]
    client_id = "cam-1"
    token = "token-1"
    scopes = ["video_stream"]

    [[clients]]
    client_id = "cam-2"
    token = "token-2"
    scopes = ["video_stream"]

    [[clients]]
    client_id = "uploader"
    token = "upload-only"
    scopes = ["upload"]

    [[clients]]
    client_id = "retired"
    token = "retired-token"
    scopes = ["video_stream"]
    enabled = false
"#;

pub const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];

pub fn auth_message(token: &str) -> String {
    format!(r#"{{"type":"auth","token":"{token}"}}"#)
}

pub fn write_tmp(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp file");
    file.write_all(contents.as_bytes()).expect("write temp file");
    file
}

// -----------------------------------------------------------------------------
// ----- In-process gateway ----------------------------------------------------

pub struct Harness {
    pub gateway: Arc<Gateway>,
    pub stats: Arc<GatewayStats>,
    pub pipelines: Arc<PipelineRegistry>,
}

impl Harness {
    pub fn new(f: impl FnOnce(&mut Limits)) -> Self {
        let config = ConfigHandle::default();
        config.update(f);

        let clients = ClientsConfig::parse(CLIENTS).expect("valid clients fixture");
        let stats = Arc::new(GatewayStats::new());
        let pipelines = Arc::new(PipelineRegistry::with_mock());

        let gateway = Gateway::new(config, Arc::new(clients), pipelines.clone(), stats.clone());

        Self {
            gateway,
            stats,
            pipelines,
        }
    }

    /// Open a session over the in-memory transport.
    pub fn connect(&self) -> (ChannelPeer, JoinHandle<streamgate::gateway::SessionOutcome>) {
        let (transport, peer) = channel_pair();
        let serving = tokio::spawn(self.gateway.clone().serve(transport));
        (peer, serving)
    }

    /// Connect and authenticate, returning once the ack arrived.
    pub async fn connect_as(
        &self,
        token: &str,
    ) -> (ChannelPeer, JoinHandle<streamgate::gateway::SessionOutcome>) {
        let (mut peer, serving) = self.connect();
        peer.send_text(auth_message(token)).await;

        match recv(&mut peer).await {
            Outbound::Text(ack) => assert!(ack.contains(r#""status":"success""#), "{ack}"),
            other => panic!("expected auth ack, got {other:?}"),
        }

        (peer, serving)
    }
}

/// Next outbound message, failing the test after a few seconds.
pub async fn recv(peer: &mut ChannelPeer) -> Outbound {
    tokio::time::timeout(Duration::from_secs(5), peer.recv())
        .await
        .expect("timed out waiting for the gateway")
        .expect("gateway dropped the transport")
}

pub async fn recv_json(peer: &mut ChannelPeer) -> serde_json::Value {
    match recv(peer).await {
        Outbound::Text(text) => serde_json::from_str(&text).expect("valid JSON from gateway"),
        other => panic!("expected a text message, got {other:?}"),
    }
}

pub async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

// -----------------------------------------------------------------------------
// ----- Test pipelines --------------------------------------------------------

/// Sleeps before answering.
pub struct SlowPipeline(pub Duration);

#[async_trait]
impl InferencePipeline for SlowPipeline {
    async fn infer(&self, _frame: Bytes) -> Result<Vec<Prediction>, InferenceError> {
        sleep(self.0).await;
        Ok(vec![])
    }
}

/// Always fails.
pub struct BrokenPipeline;

#[async_trait]
impl InferencePipeline for BrokenPipeline {
    async fn infer(&self, _frame: Bytes) -> Result<Vec<Prediction>, InferenceError> {
        Err(InferenceError::Unavailable("model not loaded".into()))
    }
}

/// Reports the frame size as its single prediction's label.
pub struct EchoPipeline;

#[async_trait]
impl InferencePipeline for EchoPipeline {
    async fn infer(&self, frame: Bytes) -> Result<Vec<Prediction>, InferenceError> {
        Ok(vec![Prediction {
            label: format!("bytes:{}", frame.len()),
            confidence: 1.0,
            bbox: [0.0, 0.0, 1.0, 1.0],
        }])
    }
}

// -----------------------------------------------------------------------------
// ----- Spawned binary --------------------------------------------------------

pub fn reserve_port(host: &str) -> u16 {
    let listener = TcpListener::bind(format!("{host}:0")).expect("bind ephemeral port");
    listener.local_addr().unwrap().port()
}

pub fn spawn_streamgate(host: &str, port: u16, config: &NamedTempFile, clients: &NamedTempFile) -> Child {
    let exe = env!("CARGO_BIN_EXE_streamgate");

    Command::new(exe)
        .env("STREAMGATE_HOST", host)
        .env("STREAMGATE_PORT", port.to_string())
        .env("STREAMGATE_CONFIG_FILE", config.path())
        .env("STREAMGATE_CLIENTS_FILE", clients.path())
        .env_remove("STREAMGATE_TLS_CERT")
        .env_remove("STREAMGATE_TLS_KEY")
        .spawn()
        .expect("spawn streamgate")
}

pub async fn wait_for_listen(host: &str, port: u16) {
    let addr = format!("{host}:{port}");
    for _ in 0..100 {
        if std::net::TcpStream::connect(&addr).is_ok() {
            return;
        }
        sleep(Duration::from_millis(50)).await;
    }
    panic!("streamgate did not start listening on {addr}");
}
