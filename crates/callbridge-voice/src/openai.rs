//! Streaming client for OpenAI-compatible `/chat/completions` endpoints.

use crate::config::LlmClientConfig;
use crate::error::VoiceError;
use crate::llm::{LlmClient, LlmConnector, SegmentSink};
use crate::segmenter::{strip_marker, SentenceSegmenter};
use crate::sse::parse_sse_lines;
use async_trait::async_trait;
use callbridge_types::LlmSettings;
use futures_util::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiCompatClient {
    http: Client,
    base_url: String,
    api_key: String,
    system_prompt: String,
    hangup_marker: String,
}

impl fmt::Debug for OpenAiCompatClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiCompatClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("hangup_marker", &self.hangup_marker)
            .finish()
    }
}

impl OpenAiCompatClient {
    pub fn new(settings: &LlmSettings, config: &LlmClientConfig) -> Result<Self, VoiceError> {
        if settings.endpoint.trim().is_empty() {
            return Err(VoiceError::Config("LLM endpoint is empty".to_string()));
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: settings.endpoint.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            system_prompt: settings.system_prompt.clone(),
            hangup_marker: config.hangup_marker.clone(),
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn query_stream(
        &self,
        model: &str,
        prompt: &str,
        sink: &mut dyn SegmentSink,
    ) -> Result<String, VoiceError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut messages = Vec::with_capacity(2);
        if !self.system_prompt.is_empty() {
            messages.push(json!({ "role": "system", "content": self.system_prompt }));
        }
        messages.push(json!({ "role": "user", "content": prompt }));

        let payload = json!({
            "model": model,
            "messages": messages,
            "stream": true,
        });

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(VoiceError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let mut lines = Box::pin(parse_sse_lines(Box::pin(response.bytes_stream())));
        let mut segmenter = SentenceSegmenter::new(self.hangup_marker.clone());
        let mut full = String::new();

        while let Some(line) = lines.next().await {
            let data = line?;
            let chunk: ChatChunk = match serde_json::from_str(&data) {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!(error = %e, "skipping unparseable completion chunk");
                    continue;
                }
            };

            let Some(delta) = chunk
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.delta.content)
            else {
                continue;
            };
            if delta.is_empty() {
                continue;
            }

            full.push_str(&delta);
            for segment in segmenter.push(&delta) {
                sink.on_segment(segment).await?;
            }
        }

        for segment in segmenter.finish() {
            sink.on_segment(segment).await?;
        }

        debug!(
            chars = full.chars().count(),
            hangup = segmenter.hangup_requested(),
            "completion stream finished"
        );
        Ok(strip_marker(&full, &self.hangup_marker))
    }
}

/// Creates an [`OpenAiCompatClient`] per session.
#[derive(Debug, Clone, Default)]
pub struct HttpLlmConnector {
    config: LlmClientConfig,
}

impl HttpLlmConnector {
    pub fn new(config: LlmClientConfig) -> Self {
        Self { config }
    }
}

impl LlmConnector for HttpLlmConnector {
    fn connect(&self, settings: &LlmSettings) -> Result<Arc<dyn LlmClient>, VoiceError> {
        Ok(Arc::new(OpenAiCompatClient::new(settings, &self.config)?))
    }
}
