//! The voice-agent half of the bridge.
//!
//! A final ASR transcript is sent to a streaming LLM; the reply is cut into
//! sentences as it arrives and each sentence is handed to a
//! [`SpeechOutput`] as a `tts` command. Once the stream completes the whole
//! reply is delivered to the web client as an `LLMResult` notice.
//!
//! The LLM is reached through the [`LlmClient`] trait. [`OpenAiCompatClient`]
//! implements it for OpenAI-compatible `/chat/completions` servers that
//! stream Server-Sent Events.

pub mod config;
pub mod error;
pub mod llm;
pub mod openai;
pub mod pipeline;
pub mod segmenter;
pub mod sse;

pub use config::{LlmClientConfig, PipelineConfig};
pub use error::{SinkError, VoiceError};
pub use llm::{LlmClient, LlmConnector, Segment, SegmentSink};
pub use openai::{HttpLlmConnector, OpenAiCompatClient};
pub use pipeline::{DispatchError, SpeechOutput, TurnOutcome, VoiceAgentPipeline};
pub use segmenter::SentenceSegmenter;
