//! Signaling messages sent by the browser.

use crate::ProtocolError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Web client -> bridge event, discriminated by the `event` field.
///
/// Binary websocket frames carry audio and never reach this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum FrontendEvent {
    Offer {
        #[serde(default, deserialize_with = "crate::null_as_empty")]
        sdp: String,
    },
    /// `candidate` is the browser's `RTCIceCandidateInit`, kept raw.
    Candidate {
        #[serde(default)]
        candidate: Option<Value>,
    },
    Hangup {
        #[serde(default)]
        reason: Option<String>,
    },
}

impl FrontendEvent {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        let kind = match value.get("event").and_then(Value::as_str) {
            Some(kind) => kind.to_string(),
            None => return Err(ProtocolError::MissingTag("event")),
        };
        serde_json::from_value(value).map_err(|source| ProtocolError::Malformed { kind, source })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Offer { .. } => "offer",
            Self::Candidate { .. } => "candidate",
            Self::Hangup { .. } => "hangup",
        }
    }
}
