use async_trait::async_trait;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::analysis::{parse_reply, VisionClient, VisionService};
use crate::config::{
    RadarConfig, SkywatchConfig, SpeechPolicy, DEFAULT_FRAME_PROMPT, SPEECH_KEY_ENV,
    VISION_KEY_ENV,
};
use crate::error::{ErrorResponse, RelayError};
use crate::radar::{consistent_summary, map_detections, RadarDot};
use crate::speech::{audio_data_url, SpeechClient, SpeechService};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub text: String,
    /// `data:audio/mpeg;base64,...`; absent when synthesis was skipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    #[serde(default)]
    pub radar_dots: Vec<RadarDot>,
}

/// In-process relay or a remote one.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, message: &str, image_url: &str) -> Result<AnalysisResult, RelayError>;
}

#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub system_prompt: String,
    pub radar: RadarConfig,
    pub speech_policy: SpeechPolicy,
}

impl RelaySettings {
    pub fn from_config(config: &SkywatchConfig) -> Self {
        Self {
            system_prompt: config.relay.resolved_system_prompt(),
            radar: config.radar.clone(),
            speech_policy: config.speech.policy,
        }
    }
}

pub struct Relay {
    vision: Option<Arc<dyn VisionService>>,
    speech: Option<Arc<dyn SpeechService>>,
    settings: RelaySettings,
}

impl Relay {
    pub fn new(
        vision: Option<Arc<dyn VisionService>>,
        speech: Option<Arc<dyn SpeechService>>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            vision,
            speech,
            settings,
        }
    }

    /// Builds provider clients for whichever keys are present. A missing key
    /// is not fatal here; every request fails until it is supplied.
    pub fn from_config(config: &SkywatchConfig) -> Result<Self, RelayError> {
        let vision: Option<Arc<dyn VisionService>> = match &config.vision.api_key {
            Some(key) => Some(Arc::new(VisionClient::new(config.vision.clone(), key.clone())?)),
            None => {
                warn!("{} not set, analysis requests will fail", VISION_KEY_ENV);
                None
            }
        };

        let speech: Option<Arc<dyn SpeechService>> = match &config.speech.api_key {
            Some(key) => Some(Arc::new(SpeechClient::new(config.speech.clone(), key.clone())?)),
            None => {
                warn!("{} not set, analysis requests will fail", SPEECH_KEY_ENV);
                None
            }
        };

        Ok(Self::new(vision, speech, RelaySettings::from_config(config)))
    }

    pub async fn handle(&self, request: RelayRequest) -> Result<AnalysisResult, RelayError> {
        let image = request
            .image_url
            .filter(|url| !url.trim().is_empty())
            .ok_or(RelayError::MissingImage)?;

        let vision = self
            .vision
            .as_ref()
            .ok_or(RelayError::MissingConfig(VISION_KEY_ENV))?;
        let speech = self
            .speech
            .as_ref()
            .ok_or(RelayError::MissingConfig(SPEECH_KEY_ENV))?;

        let text = request
            .message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_FRAME_PROMPT.trim().to_string());
        let image_url = normalize_image_reference(&image);

        let raw = vision
            .complete(&self.settings.system_prompt, &text, &image_url)
            .await?;
        debug!("Vision reply: {}", raw);

        let reply = parse_reply(&raw)?;
        let radar_dots = map_detections(&reply.detections, &self.settings.radar);
        let summary = consistent_summary(reply.message.as_deref(), &radar_dots);

        let audio = match speech.synthesize(&summary).await {
            Ok(bytes) => Some(audio_data_url(&bytes)),
            Err(e) => match self.settings.speech_policy {
                SpeechPolicy::BestEffort => {
                    warn!("Speech synthesis failed, returning text only: {}", e);
                    None
                }
                SpeechPolicy::Required => return Err(e),
            },
        };

        Ok(AnalysisResult {
            text: summary,
            audio,
            radar_dots,
        })
    }
}

#[async_trait]
impl Analyzer for Relay {
    async fn analyze(&self, message: &str, image_url: &str) -> Result<AnalysisResult, RelayError> {
        self.handle(RelayRequest {
            message: Some(message.to_string()),
            image_url: Some(image_url.to_string()),
        })
        .await
    }
}

/// http(s) and data URLs pass through; anything else is taken as raw base64
/// JPEG.
pub fn normalize_image_reference(image: &str) -> String {
    let image = image.trim();
    if image.starts_with("http://") || image.starts_with("https://") || image.starts_with("data:") {
        image.to_string()
    } else {
        format!("data:image/jpeg;base64,{}", image)
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(self.to_response())).into_response()
    }
}

pub fn create_relay_router(relay: Arc<Relay>) -> Router {
    Router::new()
        .route("/", post(chat_handler).options(preflight_handler))
        .route("/chat", post(chat_handler).options(preflight_handler))
        .route("/health", get(|| async { "ok" }))
        .with_state(relay)
        .layer(CorsLayer::permissive())
}

async fn preflight_handler() -> StatusCode {
    StatusCode::OK
}

async fn chat_handler(
    State(relay): State<Arc<Relay>>,
    body: Bytes,
) -> Result<Json<AnalysisResult>, RelayError> {
    let request_id = Uuid::new_v4();
    info!("Processing analysis request: {}", request_id);

    let request: RelayRequest = serde_json::from_slice(&body).map_err(|e| {
        warn!("Request {} has an invalid body: {}", request_id, e);
        RelayError::InvalidRequest(e.to_string())
    })?;

    match relay.handle(request).await {
        Ok(result) => {
            info!(
                "Analysis request {} completed: {} radar dot(s)",
                request_id,
                result.radar_dots.len()
            );
            Ok(Json(result))
        }
        Err(e) => {
            error!("Analysis request {} failed: {}", request_id, e);
            Err(e)
        }
    }
}

pub async fn start_relay_server(relay: Relay, bind: &str) -> anyhow::Result<()> {
    let app = create_relay_router(Arc::new(relay));

    info!("Starting analysis relay on {}", bind);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

pub struct RelayClient {
    url: String,
    client: reqwest::Client,
}

impl RelayClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::transport("Relay", e))?;

        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl Analyzer for RelayClient {
    async fn analyze(&self, message: &str, image_url: &str) -> Result<AnalysisResult, RelayError> {
        let request = RelayRequest {
            message: Some(message.to_string()),
            image_url: Some(image_url.to_string()),
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RelayError::transport("Relay", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body = match serde_json::from_str::<ErrorResponse>(&body) {
                Ok(ErrorResponse {
                    error,
                    details: Some(details),
                }) => format!("{}: {}", error, details),
                Ok(ErrorResponse { error, details: None }) => error,
                Err(_) => body,
            };
            return Err(RelayError::Upstream {
                service: "Relay",
                status: Some(status.as_u16()),
                body,
            });
        }

        let raw = response
            .text()
            .await
            .map_err(|e| RelayError::transport("Relay", e))?;
        serde_json::from_str(&raw).map_err(|e| {
            error!("Relay response is not an analysis result: {}", raw);
            RelayError::Parse {
                service: "Relay",
                reason: e.to_string(),
                raw,
            }
        })
    }
}
