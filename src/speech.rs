use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::SpeechConfig;
use crate::error::RelayError;

const SERVICE: &str = "Speech";

/// Hosted text-to-speech. Returns encoded audio bytes (MPEG).
#[async_trait]
pub trait SpeechService: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, RelayError>;
}

#[derive(Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

/// ElevenLabs-style synthesis client.
pub struct SpeechClient {
    config: SpeechConfig,
    api_key: String,
    client: reqwest::Client,
}

impl SpeechClient {
    pub fn new(config: SpeechConfig, api_key: String) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent("SkyWatch/0.1")
            .build()
            .map_err(|e| RelayError::transport(SERVICE, e))?;

        info!("🔊 Speech voice: {} ({})", config.voice_id, config.model_id);

        Ok(Self {
            config,
            api_key,
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/text-to-speech/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.voice_id
        )
    }
}

#[async_trait]
impl SpeechService for SpeechClient {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, RelayError> {
        let start_time = Instant::now();
        let request = SynthesisRequest {
            text,
            model_id: &self.config.model_id,
            voice_settings: VoiceSettings {
                stability: self.config.stability,
                similarity_boost: self.config.similarity_boost,
            },
        };

        let response = self
            .client
            .post(self.endpoint())
            .header(reqwest::header::ACCEPT, "audio/mpeg")
            .header("xi-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| RelayError::transport(SERVICE, e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            warn!("Speech API error ({}): {}", status, body);
            return Err(RelayError::Upstream {
                service: SERVICE,
                status: Some(status),
                body,
            });
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| RelayError::transport(SERVICE, e))?;

        debug!(
            "🔊 Synthesized {} bytes in {}ms",
            audio.len(),
            start_time.elapsed().as_millis()
        );
        Ok(audio.to_vec())
    }
}

/// Wraps MPEG audio as a data URL the browser can play directly.
pub fn audio_data_url(audio: &[u8]) -> String {
    format!("data:audio/mpeg;base64,{}", general_purpose::STANDARD.encode(audio))
}
