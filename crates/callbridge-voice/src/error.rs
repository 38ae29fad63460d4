use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("LLM API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Response parsing error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("segment delivery aborted: {0}")]
    Sink(#[from] SinkError),
}

/// Returned by a segment sink to stop an in-flight LLM stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("{0}")]
    Aborted(String),
}
