//! ASR final -> LLM -> TTS turn handling.

use crate::config::PipelineConfig;
use crate::error::{SinkError, VoiceError};
use crate::llm::{LlmClient, Segment, SegmentSink};
use async_trait::async_trait;
use callbridge_types::{ClientNotice, Command, TtsCommand, TtsOption};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Why a command or notice could not be delivered.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Worth retrying, e.g. a momentarily congested writer.
    #[error("transient dispatch failure: {0}")]
    Transient(String),
    /// The leg is gone; nothing later in this turn can be delivered either.
    #[error("fatal dispatch failure: {0}")]
    Fatal(String),
}

/// Where a turn's output goes: tts commands to the call backend, the
/// final reply to the web client.
#[async_trait]
pub trait SpeechOutput: Send + Sync {
    async fn send_command(&self, command: Command) -> Result<(), DispatchError>;
    async fn send_to_client(&self, notice: ClientNotice) -> Result<(), DispatchError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Empty transcript; nothing was called.
    Skipped,
    Completed { segments: usize, reply: String },
    /// A fatal dispatch error stopped the stream after `segments` sends.
    Aborted { segments: usize },
    LlmFailed,
}

pub struct VoiceAgentPipeline {
    llm: Arc<dyn LlmClient>,
    model: String,
    tts_override: Option<TtsOption>,
    config: PipelineConfig,
}

impl VoiceAgentPipeline {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>, config: PipelineConfig) -> Self {
        Self {
            llm,
            model: model.into(),
            tts_override: None,
            config,
        }
    }

    /// Attaches `option` to every tts command this pipeline sends.
    pub fn with_tts_override(mut self, option: TtsOption) -> Self {
        self.tts_override = Some(option);
        self
    }

    /// Runs one turn for a final transcript.
    ///
    /// Each segment becomes one tts command, sent in stream order before the
    /// next segment is accepted. The assembled reply goes to the client once,
    /// and only if the LLM call completed.
    pub async fn handle_final(&self, transcript: &str, output: &dyn SpeechOutput) -> TurnOutcome {
        if transcript.is_empty() {
            return TurnOutcome::Skipped;
        }

        info!(model = %self.model, chars = transcript.chars().count(), "starting llm turn");

        let mut sink = TtsSink {
            output,
            tts_override: self.tts_override.as_ref(),
            attempts: self.config.tts_send_attempts.max(1),
            retry_delay: Duration::from_millis(self.config.tts_retry_delay_ms),
            sent: 0,
        };

        match self
            .llm
            .query_stream(&self.model, transcript, &mut sink)
            .await
        {
            Ok(reply) => {
                let segments = sink.sent;
                let notice = ClientNotice::LlmResult {
                    text: reply.clone(),
                };
                if let Err(e) = output.send_to_client(notice).await {
                    warn!(error = %e, "failed to deliver LLMResult to web client");
                }
                info!(segments, "llm turn completed");
                TurnOutcome::Completed { segments, reply }
            }
            Err(VoiceError::Sink(e)) => {
                warn!(error = %e, segments = sink.sent, "llm turn aborted");
                TurnOutcome::Aborted {
                    segments: sink.sent,
                }
            }
            Err(e) => {
                error!(error = %e, "llm turn failed");
                TurnOutcome::LlmFailed
            }
        }
    }
}

struct TtsSink<'a> {
    output: &'a dyn SpeechOutput,
    tts_override: Option<&'a TtsOption>,
    attempts: u32,
    retry_delay: Duration,
    sent: usize,
}

#[async_trait]
impl<'a> SegmentSink for TtsSink<'a> {
    async fn on_segment(&mut self, segment: Segment) -> Result<(), SinkError> {
        if segment.text.trim().is_empty() {
            return Ok(());
        }

        let mut tts = TtsCommand::utterance(segment.text, segment.play_id, segment.auto_hangup);
        tts.option = self.tts_override.cloned();
        let command = Command::Tts(tts);

        let mut attempt = 1;
        loop {
            match self.output.send_command(command.clone()).await {
                Ok(()) => {
                    self.sent += 1;
                    debug!(attempt, sent = self.sent, "tts command sent");
                    return Ok(());
                }
                Err(DispatchError::Transient(reason)) if attempt < self.attempts => {
                    warn!(attempt, reason = %reason, "tts send failed, retrying");
                    tokio::time::sleep(self.retry_delay).await;
                    attempt += 1;
                }
                Err(DispatchError::Transient(reason)) => {
                    return Err(SinkError::Aborted(format!(
                        "tts send failed after {attempt} attempts: {reason}"
                    )));
                }
                Err(DispatchError::Fatal(reason)) => return Err(SinkError::Aborted(reason)),
            }
        }
    }
}
