//! Wire schema shared across the callbridge crates.
//!
//! Two websocket protocols meet in the bridge: the browser's signaling
//! messages ([`FrontendEvent`]) and the call backend's command/event protocol
//! ([`Command`] outbound, [`Event`] inbound). Each is a tagged enum keyed by
//! its discriminator field (`event` or `command`), so a variant only carries
//! the fields that kind actually defines.
//!
//! SDP and ICE payloads are opaque strings here; nothing in the bridge
//! interprets them.

pub mod command;
pub mod event;
pub mod frontend;
pub mod options;

pub use command::{CallOption, Command, TtsCommand};
pub use event::{BackendFrame, ClientNotice, Event};
pub use frontend::FrontendEvent;
pub use options::{AsrOption, LlmSettings, SessionProfile, TtsOption};

use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// A text frame that could not be decoded into a protocol message.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing `{0}` discriminator")]
    MissingTag(&'static str),

    #[error("malformed `{kind}` message: {source}")]
    Malformed {
        kind: String,
        source: serde_json::Error,
    },
}

/// Reads a string field that may be `null`, treating null like an absent field.
pub(crate) fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Option::unwrap_or_default)
}
