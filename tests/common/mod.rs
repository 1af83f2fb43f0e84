#![allow(dead_code)]

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    routing::post,
    Router,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use skywatch::config::SkywatchConfig;
use skywatch::relay::{create_relay_router, Relay};

pub const VISION_KEY: &str = "sk-test";
pub const SPEECH_KEY: &str = "xi-test";
pub const AUDIO: &[u8] = b"ID3\x04fake-mpeg";

/// Serves `router` on an ephemeral local port and returns its base URL.
pub async fn spawn(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

#[derive(Clone)]
struct VisionMock {
    reply: String,
    hits: Arc<AtomicUsize>,
    last_body: Arc<Mutex<Option<Value>>>,
}

#[derive(Clone)]
struct SpeechMock {
    status: StatusCode,
    hits: Arc<AtomicUsize>,
    last_body: Arc<Mutex<Option<Value>>>,
}

async fn vision_handler(
    State(mock): State<VisionMock>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    mock.hits.fetch_add(1, Ordering::SeqCst);
    *mock.last_body.lock() = Some(body);

    let expected = format!("Bearer {}", VISION_KEY);
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some(expected.as_str());
    if !authorized {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": {"message": "bad key"}})),
        );
    }

    (
        StatusCode::OK,
        Json(json!({"choices": [{"message": {"role": "assistant", "content": mock.reply}}]})),
    )
}

async fn speech_handler(
    State(mock): State<SpeechMock>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    mock.hits.fetch_add(1, Ordering::SeqCst);
    *mock.last_body.lock() = Some(body);

    let authorized = headers.get("xi-api-key").and_then(|v| v.to_str().ok()) == Some(SPEECH_KEY);
    let status = if authorized { mock.status } else { StatusCode::UNAUTHORIZED };
    let payload = if status.is_success() {
        AUDIO.to_vec()
    } else {
        b"quota exceeded".to_vec()
    };

    (status, [(header::CONTENT_TYPE, "audio/mpeg")], payload)
}

pub struct MockProviders {
    pub vision_url: String,
    pub speech_url: String,
    pub vision_hits: Arc<AtomicUsize>,
    pub speech_hits: Arc<AtomicUsize>,
    pub last_vision_body: Arc<Mutex<Option<Value>>>,
    pub last_speech_body: Arc<Mutex<Option<Value>>>,
}

impl MockProviders {
    pub async fn start(reply: &str, speech_status: StatusCode) -> Self {
        let vision = VisionMock {
            reply: reply.to_string(),
            hits: Arc::new(AtomicUsize::new(0)),
            last_body: Arc::new(Mutex::new(None)),
        };
        let speech = SpeechMock {
            status: speech_status,
            hits: Arc::new(AtomicUsize::new(0)),
            last_body: Arc::new(Mutex::new(None)),
        };

        let vision_hits = vision.hits.clone();
        let speech_hits = speech.hits.clone();
        let last_vision_body = vision.last_body.clone();
        let last_speech_body = speech.last_body.clone();

        let vision_url = spawn(
            Router::new()
                .route("/chat/completions", post(vision_handler))
                .with_state(vision),
        )
        .await;
        let speech_url = spawn(
            Router::new()
                .route("/v1/text-to-speech/:voice_id", post(speech_handler))
                .with_state(speech),
        )
        .await;

        Self {
            vision_url,
            speech_url,
            vision_hits,
            speech_hits,
            last_vision_body,
            last_speech_body,
        }
    }

    /// Config pointing both providers at the mocks, keys present.
    pub fn config(&self) -> SkywatchConfig {
        let mut config = SkywatchConfig::default();
        config.vision.base_url = self.vision_url.clone();
        config.vision.api_key = Some(VISION_KEY.to_string());
        config.vision.timeout_seconds = 5;
        config.speech.base_url = self.speech_url.clone();
        config.speech.api_key = Some(SPEECH_KEY.to_string());
        config.speech.timeout_seconds = 5;
        config.relay.system_prompt = Some("You are a test spotter.".to_string());
        config
    }

    pub fn vision_calls(&self) -> usize {
        self.vision_hits.load(Ordering::SeqCst)
    }

    pub fn speech_calls(&self) -> usize {
        self.speech_hits.load(Ordering::SeqCst)
    }
}

/// Starts a relay built from `config` and returns the URL of its chat route.
pub async fn serve_relay(config: &SkywatchConfig) -> String {
    let relay = Relay::from_config(config).unwrap();
    let base = spawn(create_relay_router(Arc::new(relay))).await;
    format!("{}/chat", base)
}

pub const FENCED_REPLY: &str = "```json\n{\"message\": \"Small plane two o'clock, bird dead ahead\", \"radarDots\": [{\"distance\": 50, \"angle\": 30, \"size\": 8, \"type\": \"SMALL_PLANE\"}, {\"distance\": 100, \"angle\": 0, \"size\": 10, \"type\": \"BIRD\", \"boundingBox\": {\"x1\": 40, \"y1\": 10, \"x2\": 45, \"y2\": 14}}, {\"distance\": 20, \"type\": \"BIRD\"}]}\n```";
