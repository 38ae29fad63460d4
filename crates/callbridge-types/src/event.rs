//! Events flowing toward the web client: backend call events and the
//! notices the bridge synthesizes itself.

use crate::ProtocolError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Backend -> bridge event, discriminated by the `event` field.
///
/// Only the fields the bridge acts on exist on a variant, and a `null`
/// string field reads as empty. Kinds the bridge does not know are kept as
/// the raw JSON object in [`Event::Other`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum Event {
    AsrFinal {
        #[serde(default, deserialize_with = "crate::null_as_empty")]
        text: String,
    },
    AsrDelta {
        #[serde(default, deserialize_with = "crate::null_as_empty")]
        text: String,
    },
    /// SDP answer for the browser's offer.
    Answer {
        #[serde(default, deserialize_with = "crate::null_as_empty")]
        sdp: String,
    },
    Error {
        #[serde(
            default,
            deserialize_with = "crate::null_as_empty",
            skip_serializing_if = "String::is_empty"
        )]
        error: String,
    },
    Close {
        #[serde(
            default,
            deserialize_with = "crate::null_as_empty",
            skip_serializing_if = "String::is_empty"
        )]
        reason: String,
    },
    Hangup {
        #[serde(
            default,
            deserialize_with = "crate::null_as_empty",
            skip_serializing_if = "String::is_empty"
        )]
        reason: String,
        #[serde(
            default,
            deserialize_with = "crate::null_as_empty",
            skip_serializing_if = "String::is_empty"
        )]
        initiator: String,
    },
    Speaking {},
    Silence {},
    TrackStart {},
    TrackEnd {},
    #[serde(untagged)]
    Other(Map<String, Value>),
}

impl Event {
    /// Parses one backend text frame.
    ///
    /// A frame without a string `event` field is rejected rather than
    /// being swallowed into [`Event::Other`].
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        BackendFrame::parse(text).map(|frame| frame.event)
    }

    /// The wire discriminator.
    pub fn kind(&self) -> &str {
        match self {
            Self::AsrFinal { .. } => "asrFinal",
            Self::AsrDelta { .. } => "asrDelta",
            Self::Answer { .. } => "answer",
            Self::Error { .. } => "error",
            Self::Close { .. } => "close",
            Self::Hangup { .. } => "hangup",
            Self::Speaking {} => "speaking",
            Self::Silence {} => "silence",
            Self::TrackStart {} => "trackStart",
            Self::TrackEnd {} => "trackEnd",
            Self::Other(map) => map.get("event").and_then(Value::as_str).unwrap_or("unknown"),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// One backend text frame: the typed [`Event`] the bridge routes on, plus
/// the object exactly as received, which is what the web client sees.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendFrame {
    pub event: Event,
    pub raw: Map<String, Value>,
}

impl BackendFrame {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let raw: Map<String, Value> = serde_json::from_str(text)?;
        let kind = match raw.get("event").and_then(Value::as_str) {
            Some(kind) => kind.to_string(),
            None => return Err(ProtocolError::MissingTag("event")),
        };
        let event = serde_json::from_value(Value::Object(raw.clone()))
            .map_err(|source| ProtocolError::Malformed { kind, source })?;
        Ok(Self { event, raw })
    }

    pub fn kind(&self) -> &str {
        self.event.kind()
    }

    /// Re-serializes the received object with every field intact.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.raw)
    }
}

/// Messages the bridge originates for the web client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ClientNotice {
    /// The assembled LLM reply for one conversational turn.
    #[serde(rename = "LLMResult")]
    LlmResult { text: String },
}

impl ClientNotice {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
