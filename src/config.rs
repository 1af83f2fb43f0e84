use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

use crate::radar::ArcPolicy;

pub const VISION_KEY_ENV: &str = "OPENAI_API_KEY";
pub const SPEECH_KEY_ENV: &str = "ELEVEN_LABS_API_KEY";
pub const SYSTEM_PROMPT_ENV: &str = "AI_SYSTEM_PROMPT";

pub const DEFAULT_SYSTEM_PROMPT: &str = include_str!("../prompts/system_prompt.txt");
pub const DEFAULT_FRAME_PROMPT: &str = include_str!("../prompts/frame_prompt.txt");

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SkywatchConfig {
    pub relay: RelayConfig,
    pub vision: VisionConfig,
    pub speech: SpeechConfig,
    pub radar: RadarConfig,
    pub dispatcher: DispatcherConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Address the relay listens on
    pub bind: String,
    /// Overrides the built-in detection instruction; the environment
    /// variable `AI_SYSTEM_PROMPT` takes precedence over this
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    /// OpenAI-compatible API root, without the trailing `/chat/completions`
    pub base_url: String,
    pub model_name: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
    /// Ask the provider for a JSON object reply
    pub json_mode: bool,
    pub timeout_seconds: u64,
    /// Never read from the config file; populated from `OPENAI_API_KEY`
    #[serde(skip)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeechPolicy {
    /// Return the analysis without audio when synthesis fails
    #[default]
    BestEffort,
    /// Fail the whole request when synthesis fails
    Required,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub base_url: String,
    pub voice_id: String,
    pub model_id: String,
    pub stability: f32,
    pub similarity_boost: f32,
    pub policy: SpeechPolicy,
    pub timeout_seconds: u64,
    /// Never read from the config file; populated from `ELEVEN_LABS_API_KEY`
    #[serde(skip)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadarConfig {
    /// Handling of detections outside -90..=90 degrees
    pub arc_policy: ArcPolicy,
    /// Same-type dots closer than this (display units) are merged; 0 disables
    pub dedupe_radius: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FrameSourceConfig {
    /// Live camera endpoint returning a still image per GET
    Camera { url: String },
    /// Fixed set of images, URLs or local paths, shown in turn
    Rotation { images: Vec<String> },
    /// Snapshot URL of an embedded video player
    Snapshot { url: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub source: FrameSourceConfig,
    /// Cadence of acquisition attempts
    pub interval_seconds: u64,
    /// Minimum gap after a completed attempt before the next may start
    pub min_cooldown_ms: u64,
    /// Text sent alongside every frame
    pub prompt: String,
    /// Relay endpoint used by the `dashboard` command
    pub relay_url: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub bind: String,
    /// Browser refresh period for the session snapshot
    pub refresh_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8787".to_string(),
            system_prompt: None,
        }
    }
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model_name: "gpt-4o-mini".to_string(),
            temperature: None,
            max_tokens: Some(800),
            json_mode: true,
            timeout_seconds: 60,
            api_key: None,
        }
    }
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.elevenlabs.io".to_string(),
            voice_id: "21m00Tcm4TlvDq8ikWAM".to_string(),
            model_id: "eleven_monolingual_v1".to_string(),
            stability: 0.5,
            similarity_boost: 0.5,
            policy: SpeechPolicy::BestEffort,
            timeout_seconds: 30,
            api_key: None,
        }
    }
}

impl Default for RadarConfig {
    fn default() -> Self {
        Self {
            arc_policy: ArcPolicy::Clamp,
            dedupe_radius: 2.0,
        }
    }
}

impl Default for FrameSourceConfig {
    fn default() -> Self {
        FrameSourceConfig::Camera {
            url: "http://127.0.0.1:8080/snapshot.jpg".to_string(),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            source: FrameSourceConfig::default(),
            interval_seconds: 5,
            min_cooldown_ms: 1000,
            prompt: DEFAULT_FRAME_PROMPT.trim().to_string(),
            relay_url: "http://127.0.0.1:8787/chat".to_string(),
            timeout_seconds: 90,
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
            refresh_ms: 1000,
        }
    }
}

impl RelayConfig {
    /// Resolves the detection instruction: environment, then file, then the
    /// built-in prompt.
    pub fn resolved_system_prompt(&self) -> String {
        std::env::var(SYSTEM_PROMPT_ENV)
            .ok()
            .filter(|p| !p.trim().is_empty())
            .or_else(|| self.system_prompt.clone())
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string())
    }
}

impl SkywatchConfig {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let mut config = if !path.exists() {
            // Create default config file
            let default_config = Self::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            fs::write(path, toml_content).await?;
            default_config
        } else {
            let content = fs::read_to_string(path).await?;
            toml::from_str(&content)?
        };

        config.apply_env();
        Ok(config)
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Pulls provider secrets from the environment. Empty values count as
    /// absent.
    pub fn apply_env(&mut self) {
        self.vision.api_key = non_empty_env(VISION_KEY_ENV);
        self.speech.api_key = non_empty_env(SPEECH_KEY_ENV);
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
