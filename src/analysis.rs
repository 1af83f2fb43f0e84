use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use crate::config::VisionConfig;
use crate::error::RelayError;
use crate::radar::detection_list;

const SERVICE: &str = "Vision";

/// Hosted vision-language completion. One system instruction, one user turn
/// made of text and an image reference, one text reply.
#[async_trait]
pub trait VisionService: Send + Sync {
    async fn complete(
        &self,
        system_prompt: &str,
        text: &str,
        image_url: &str,
    ) -> Result<String, RelayError>;
}

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: ChatMessageContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum ChatMessageContent {
    Text(String),
    Mixed(Vec<ContentPart>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// OpenAI-compatible chat completions client.
pub struct VisionClient {
    config: VisionConfig,
    api_key: String,
    client: reqwest::Client,
}

impl VisionClient {
    pub fn new(config: VisionConfig, api_key: String) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent("SkyWatch/0.1")
            .build()
            .map_err(|e| RelayError::transport(SERVICE, e))?;

        info!("🌐 Vision model: {} @ {}", config.model_name, config.base_url);

        Ok(Self {
            config,
            api_key,
            client,
        })
    }

    fn build_request(&self, system_prompt: &str, text: &str, image_url: &str) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.config.model_name.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: ChatMessageContent::Text(system_prompt.to_string()),
                },
                ChatMessage {
                    role: "user",
                    content: ChatMessageContent::Mixed(vec![
                        ContentPart::Text {
                            text: text.to_string(),
                        },
                        ContentPart::ImageUrl {
                            image_url: ImageUrl {
                                url: image_url.to_string(),
                            },
                        },
                    ]),
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            response_format: self
                .config
                .json_mode
                .then_some(ResponseFormat { kind: "json_object" }),
        }
    }
}

#[async_trait]
impl VisionService for VisionClient {
    async fn complete(
        &self,
        system_prompt: &str,
        text: &str,
        image_url: &str,
    ) -> Result<String, RelayError> {
        let start_time = Instant::now();
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let request = self.build_request(system_prompt, text, image_url);

        debug!("📤 Sending frame to {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| RelayError::transport(SERVICE, e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!("Vision API error ({}): {}", status, body);
            return Err(RelayError::Upstream {
                service: SERVICE,
                status: Some(status),
                body,
            });
        }

        let raw = response
            .text()
            .await
            .map_err(|e| RelayError::transport(SERVICE, e))?;
        let completion: ChatCompletionResponse = serde_json::from_str(&raw).map_err(|e| {
            error!("Vision response is not a chat completion: {}", raw);
            RelayError::Parse {
                service: SERVICE,
                reason: e.to_string(),
                raw: raw.clone(),
            }
        })?;

        let content = match completion.choices.into_iter().next().and_then(|c| c.message.content) {
            Some(content) => content,
            None => {
                error!("Vision completion has no content: {}", raw);
                return Err(RelayError::Parse {
                    service: SERVICE,
                    reason: "no content in completion".to_string(),
                    raw,
                });
            }
        };

        debug!("✅ Vision reply in {}ms", start_time.elapsed().as_millis());
        Ok(content)
    }
}

/// The model's structured answer, before detections are mapped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisReply {
    pub message: Option<String>,
    pub detections: Vec<Value>,
}

/// Removes markdown code-fence markup the model sometimes wraps JSON in.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Skip the info string ("json") up to the first newline or brace
    let body = match rest.find(['\n', '{', '[']) {
        Some(i) if rest.as_bytes()[i] == b'\n' => &rest[i + 1..],
        Some(i) => &rest[i..],
        None => rest,
    };

    body.trim_end().trim_end_matches("```").trim()
}

/// Parses the model reply. Accepts `message` or `text` for the summary and
/// `radarDots` or `detections` for the list. Falls back to the outermost
/// braces when the reply has prose around the JSON.
pub fn parse_reply(raw: &str) -> Result<AnalysisReply, RelayError> {
    let cleaned = strip_code_fences(raw);

    let value: Value = match serde_json::from_str(cleaned) {
        Ok(v) => v,
        Err(first_err) => match outer_object(cleaned) {
            Some(slice) => serde_json::from_str(slice).map_err(|_| parse_error(&first_err, raw))?,
            None => return Err(parse_error(&first_err, raw)),
        },
    };

    let object = value.as_object().ok_or_else(|| RelayError::Parse {
        service: SERVICE,
        reason: "reply is not a JSON object".to_string(),
        raw: raw.to_string(),
    })?;

    let message = object
        .get("message")
        .or_else(|| object.get("text"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let detections = detection_list(&value).unwrap_or_default();

    Ok(AnalysisReply { message, detections })
}

fn outer_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

fn parse_error(err: &serde_json::Error, raw: &str) -> RelayError {
    error!("Unparsable vision reply: {}", raw);
    RelayError::Parse {
        service: SERVICE,
        reason: err.to_string(),
        raw: raw.to_string(),
    }
}
