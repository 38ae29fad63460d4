//! Provider option structs attached to call commands.
//!
//! The bridge never interprets these beyond serializing them into the
//! backend's camelCase schema. Credentials are redacted from `Debug` output.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Speech recognition settings sent with an `invite`.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsrOption {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub provider: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secret_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secret_key: String,
    /// Recognition language / model family, e.g. `zh`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub endpoint: String,
}

impl fmt::Debug for AsrOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsrOption")
            .field("provider", &self.provider)
            .field("app_id", &self.app_id)
            .field("secret_id", &self.secret_id)
            .field("secret_key", &"[REDACTED]")
            .field("model_type", &self.model_type)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Speech synthesis settings, sent with an `invite` and optionally as a
/// per-utterance override on a `tts` command.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TtsOption {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub provider: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub speaker: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secret_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secret_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub endpoint: String,
    #[serde(default)]
    pub speed: f32,
    #[serde(default)]
    pub volume: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub emotion: String,
}

impl fmt::Debug for TtsOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtsOption")
            .field("provider", &self.provider)
            .field("speaker", &self.speaker)
            .field("app_id", &self.app_id)
            .field("secret_id", &self.secret_id)
            .field("secret_key", &"[REDACTED]")
            .field("endpoint", &self.endpoint)
            .field("speed", &self.speed)
            .field("volume", &self.volume)
            .field("emotion", &self.emotion)
            .finish()
    }
}

/// LLM endpoint and prompt for one robot.
#[derive(Clone, Default, PartialEq)]
pub struct LlmSettings {
    /// Base URL of an OpenAI-compatible API, e.g. `https://host/v1`.
    pub endpoint: String,
    pub api_key: String,
    pub system_prompt: String,
    pub model: String,
}

impl fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmSettings")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"[REDACTED]")
            .field("system_prompt", &self.system_prompt)
            .field("model", &self.model)
            .finish()
    }
}

/// Everything a session needs from the credential/config lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionProfile {
    pub asr: AsrOption,
    pub tts: TtsOption,
    pub llm: LlmSettings,
}
