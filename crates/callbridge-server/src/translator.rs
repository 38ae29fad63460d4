//! Stateless mapping between the browser and backend wire schemas.

use callbridge_types::{BackendFrame, CallOption, Command, FrontendEvent, SessionProfile};
use serde_json::Value;
use thiserror::Error;

/// Caller name the backend expects on invites from the bridge.
pub const CALLER: &str = "frontend";
/// Callee name the backend expects on invites from the bridge.
pub const CALLEE: &str = "rust";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TranslateError {
    #[error("offer carries no sdp")]
    EmptyOffer,

    #[error("candidate event carries no candidate string")]
    MissingCandidate,
}

/// Maps a browser signaling event to the backend command it triggers.
///
/// `offer` becomes an `invite` carrying the session's ASR/TTS options;
/// `candidate` becomes a one-element candidate list; `hangup` keeps its
/// reason, defaulting to empty.
pub fn to_command(event: &FrontendEvent, profile: &SessionProfile) -> Result<Command, TranslateError> {
    match event {
        FrontendEvent::Offer { sdp } => {
            if sdp.is_empty() {
                return Err(TranslateError::EmptyOffer);
            }
            Ok(Command::Invite {
                option: CallOption {
                    offer: sdp.clone(),
                    caller: CALLER.to_string(),
                    callee: CALLEE.to_string(),
                    asr: profile.asr.clone(),
                    tts: profile.tts.clone(),
                },
            })
        }
        FrontendEvent::Candidate { candidate } => {
            let candidate = candidate
                .as_ref()
                .and_then(candidate_string)
                .ok_or(TranslateError::MissingCandidate)?;
            Ok(Command::Candidate {
                candidates: vec![candidate],
            })
        }
        FrontendEvent::Hangup { reason } => Ok(Command::Hangup {
            reason: reason.clone().unwrap_or_default(),
        }),
    }
}

/// Accepts either an `RTCIceCandidateInit` object or a bare candidate line.
fn candidate_string(raw: &Value) -> Option<String> {
    match raw {
        Value::String(line) => Some(line.clone()),
        Value::Object(init) => init
            .get("candidate")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

/// Serializes a backend frame for the web client with every received field.
pub fn to_web_payload(frame: &BackendFrame) -> Result<String, serde_json::Error> {
    frame.to_json()
}
