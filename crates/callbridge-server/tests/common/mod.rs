#![allow(dead_code)]

use async_trait::async_trait;
use callbridge_db::{
    create_pool, create_robot, create_robot_key, run_migrations, DbPool, DbRuntimeSettings,
    NewRobot, NewRobotKey,
};
use callbridge_server::backend_link::LinkState;
use callbridge_server::backoff::RetryConfig;
use callbridge_server::config::Config;
use callbridge_server::registry::SessionRegistry;
use callbridge_server::{app, AppState};
use callbridge_types::LlmSettings;
use callbridge_voice::{LlmClient, LlmConnector, Segment, SegmentSink, VoiceError};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{accept_hdr_async, MaybeTlsStream, WebSocketStream};

pub const API_KEY: &str = "pk_live";
pub const API_SECRET: &str = "sk_live";

pub type WebClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Temp-file database with one robot key and one robot.
pub fn seeded_pool() -> (tempfile::TempDir, DbPool, i64) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("callbridge.db");
    let pool = create_pool(path.to_str().unwrap(), DbRuntimeSettings::default()).unwrap();
    let conn = pool.get().unwrap();
    run_migrations(&conn).unwrap();

    create_robot_key(
        &conn,
        &NewRobotKey {
            user_id: 1,
            name: "default".to_string(),
            llm_provider: "dashscope".to_string(),
            llm_api_key: "sk-llm".to_string(),
            llm_api_url: "http://llm.invalid/v1".to_string(),
            asr_provider: "asr.tencentcloudapi.com".to_string(),
            asr_app_id: "1300".to_string(),
            asr_secret_id: "asr-id".to_string(),
            asr_secret_key: "asr-key".to_string(),
            asr_language: String::new(),
            tts_provider: "tts.tencentcloudapi.com".to_string(),
            tts_app_id: "1300".to_string(),
            tts_secret_id: "tts-id".to_string(),
            tts_secret_key: "tts-key".to_string(),
            api_key: API_KEY.to_string(),
            api_secret: API_SECRET.to_string(),
        },
    )
    .unwrap();

    let robot_id = create_robot(
        &conn,
        &NewRobot {
            name: "front-desk".to_string(),
            user_id: 1,
            speed: 1.0,
            volume: 5,
            speaker: "101001".to_string(),
            emotion: "neutral".to_string(),
            system_prompt: "You are a hotel front desk assistant.".to_string(),
        },
    )
    .unwrap();

    drop(conn);
    (dir, pool, robot_id)
}

/// Replies with a fixed list of sentences and records every prompt.
///
/// `{prompt}` in a sentence is replaced by the prompt being answered.
#[derive(Clone, Default)]
pub struct ScriptedLlm {
    pub sentences: Vec<String>,
    pub prompts: Arc<Mutex<Vec<String>>>,
    /// Pause before each sentence is emitted.
    pub delay: Duration,
}

impl ScriptedLlm {
    pub fn new(sentences: &[&str]) -> Self {
        Self {
            sentences: sentences.iter().map(|s| s.to_string()).collect(),
            prompts: Arc::default(),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn query_stream(
        &self,
        _model: &str,
        prompt: &str,
        sink: &mut dyn SegmentSink,
    ) -> Result<String, VoiceError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let mut spoken = Vec::with_capacity(self.sentences.len());
        for sentence in &self.sentences {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let text = sentence.replace("{prompt}", prompt);
            sink.on_segment(Segment::new(text.clone(), false)).await?;
            spoken.push(text);
        }
        Ok(spoken.join(" "))
    }
}

impl LlmConnector for ScriptedLlm {
    fn connect(&self, _settings: &LlmSettings) -> Result<Arc<dyn LlmClient>, VoiceError> {
        Ok(Arc::new(self.clone()))
    }
}

/// One accepted backend connection.
pub struct BackendPeer {
    pub path: String,
    pub ws: WebSocketStream<TcpStream>,
}

impl BackendPeer {
    /// Next JSON text frame from the bridge.
    pub async fn recv_json(&mut self) -> Value {
        recv_json(&mut self.ws).await
    }

    pub async fn send_json(&mut self, value: Value) {
        self.ws
            .send(Message::Text(value.to_string().into()))
            .await
            .unwrap();
    }
}

/// Stand-in for the call-processing backend.
pub struct MockBackend {
    pub addr: SocketAddr,
    peers: mpsc::UnboundedReceiver<BackendPeer>,
}

impl MockBackend {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, peers) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let mut path = String::new();
                let capture_path =
                    |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                        path = req.uri().path().to_string();
                        Ok(resp)
                    };
                let handshake = accept_hdr_async(stream, capture_path).await;
                if let Ok(ws) = handshake {
                    if tx.send(BackendPeer { path, ws }).is_err() {
                        break;
                    }
                }
            }
        });

        Self { addr, peers }
    }

    pub fn endpoint(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub async fn accept(&mut self) -> BackendPeer {
        tokio::time::timeout(Duration::from_secs(5), self.peers.recv())
            .await
            .expect("timed out waiting for the bridge to connect")
            .expect("mock backend stopped")
    }
}

pub struct TestApp {
    pub addr: SocketAddr,
    pub registry: SessionRegistry,
    pub robot_id: i64,
    pub llm: ScriptedLlm,
    _db_dir: tempfile::TempDir,
}

impl TestApp {
    pub fn setup_url(&self, api_key: &str, robot_id: i64) -> String {
        format!(
            "ws://{}/webrtc/setup?api_key={api_key}&robot_id={robot_id}",
            self.addr
        )
    }

    pub fn slot(&self) -> String {
        SessionRegistry::slot_key(API_KEY, self.robot_id)
    }

    pub async fn connect_web(&self) -> WebClient {
        let (ws, _) = tokio_tungstenite::connect_async(self.setup_url(API_KEY, self.robot_id))
            .await
            .expect("web client failed to connect");
        ws
    }

    /// Waits until the session in this app's slot has a live backend link.
    pub async fn wait_for_backend(&self) {
        let slot = self.slot();
        for _ in 0..100 {
            if let Some(session) = self.registry.get(&slot).await {
                if session.link().state() == LinkState::Connected {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("backend link never connected for {slot}");
    }
}

pub fn test_config(backend_endpoint: &str) -> Config {
    let mut config = Config::default();
    config.backend.endpoint = backend_endpoint.to_string();
    config.backend.connect_timeout_ms = 1_000;
    config.backend.retry = RetryConfig {
        base_delay_ms: 50,
        max_delay_ms: 200,
        jitter_factor: 0.0,
    };
    config.pipeline.tts_retry_delay_ms = 10;
    config
}

pub async fn spawn_app(backend_endpoint: &str, llm: ScriptedLlm) -> TestApp {
    let (db_dir, pool, robot_id) = seeded_pool();
    let registry = SessionRegistry::new();
    let state = AppState {
        pool,
        config: Arc::new(test_config(backend_endpoint)),
        registry: registry.clone(),
        llm_connector: Arc::new(llm.clone()),
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app(state);
    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestApp {
        addr,
        registry,
        robot_id,
        llm,
        _db_dir: db_dir,
    }
}

/// Next JSON text frame on any websocket, skipping control frames.
pub async fn recv_json<S>(ws: &mut WebSocketStream<S>) -> Value
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("websocket error");
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Close(frame) => panic!("unexpected close: {frame:?}"),
            _ => continue,
        }
    }
}

pub async fn send_json<S>(ws: &mut WebSocketStream<S>, value: Value)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

/// Waits for the peer to close, returning the close frame's reason.
pub async fn expect_close<S>(ws: &mut WebSocketStream<S>) -> Option<String>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    loop {
        let next = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for close");
        match next {
            Some(Ok(Message::Close(frame))) => return frame.map(|f| f.reason.to_string()),
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => return None,
        }
    }
}
