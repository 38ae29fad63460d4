use serde::{Deserialize, Serialize};

fn default_model() -> String {
    "qwen-turbo".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_hangup_marker() -> String {
    "[hangup]".to_string()
}

fn default_tts_send_attempts() -> u32 {
    3
}

fn default_tts_retry_delay_ms() -> u64 {
    100
}

fn default_turn_queue_depth() -> usize {
    8
}

/// Settings shared by every LLM client the bridge creates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmClientConfig {
    /// Chat model requested for every turn.
    #[serde(default = "default_model")]
    pub model: String,
    /// Whole-request timeout, streaming included. Default: 60.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Token the model emits to end the call after its reply.
    /// An empty marker disables hang-up detection.
    #[serde(default = "default_hangup_marker")]
    pub hangup_marker: String,
}

impl Default for LlmClientConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            request_timeout_secs: default_request_timeout_secs(),
            hangup_marker: default_hangup_marker(),
        }
    }
}

/// How the pipeline delivers tts commands and queues turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Attempts per tts command before a transient failure aborts the turn.
    #[serde(default = "default_tts_send_attempts")]
    pub tts_send_attempts: u32,
    #[serde(default = "default_tts_retry_delay_ms")]
    pub tts_retry_delay_ms: u64,
    /// Final transcripts buffered per session while a turn is running.
    #[serde(default = "default_turn_queue_depth")]
    pub turn_queue_depth: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tts_send_attempts: default_tts_send_attempts(),
            tts_retry_delay_ms: default_tts_retry_delay_ms(),
            turn_queue_depth: default_turn_queue_depth(),
        }
    }
}
