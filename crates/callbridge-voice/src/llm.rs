//! The streaming LLM capability the pipeline talks to.

use crate::error::{SinkError, VoiceError};
use async_trait::async_trait;
use callbridge_types::LlmSettings;
use std::sync::Arc;

/// One speakable piece of a streamed reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    /// Fresh per segment; correlates the tts command with its audio track.
    pub play_id: String,
    pub auto_hangup: bool,
}

impl Segment {
    pub fn new(text: impl Into<String>, auto_hangup: bool) -> Self {
        Self {
            text: text.into(),
            play_id: uuid::Uuid::new_v4().to_string(),
            auto_hangup,
        }
    }
}

/// Receives segments in the order the model produces them.
#[async_trait]
pub trait SegmentSink: Send {
    /// An `Err` stops the stream; the client returns it as [`VoiceError::Sink`].
    async fn on_segment(&mut self, segment: Segment) -> Result<(), SinkError>;
}

/// "Send text, get streamed completion".
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Streams the reply to `prompt`, handing each segment to `sink` before
    /// returning the full assembled reply.
    async fn query_stream(
        &self,
        model: &str,
        prompt: &str,
        sink: &mut dyn SegmentSink,
    ) -> Result<String, VoiceError>;
}

/// Builds a client for one session's LLM settings.
pub trait LlmConnector: Send + Sync {
    fn connect(&self, settings: &LlmSettings) -> Result<Arc<dyn LlmClient>, VoiceError>;
}
