//! Commands the bridge writes to the call-processing backend.

use crate::options::{AsrOption, TtsOption};
use serde::{Deserialize, Serialize};

/// Call setup parameters carried by an `invite`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallOption {
    /// Opaque SDP offer from the browser.
    pub offer: String,
    pub caller: String,
    pub callee: String,
    pub asr: AsrOption,
    pub tts: TtsOption,
}

/// A single piece of speech to synthesize and play.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TtsCommand {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    /// Correlates the synthesized audio track with this utterance.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub play_id: String,
    /// End the call once this utterance finishes playing.
    #[serde(default)]
    pub auto_hangup: bool,
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub end_of_stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option: Option<TtsOption>,
}

impl TtsCommand {
    /// A complete, non-streamed utterance.
    pub fn utterance(text: impl Into<String>, play_id: impl Into<String>, auto_hangup: bool) -> Self {
        Self {
            text: text.into(),
            speaker: None,
            play_id: play_id.into(),
            auto_hangup,
            streaming: false,
            end_of_stream: true,
            option: None,
        }
    }
}

/// Bridge -> backend command, discriminated by the `command` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum Command {
    Invite {
        option: CallOption,
    },
    Candidate {
        candidates: Vec<String>,
    },
    Hangup {
        #[serde(default)]
        reason: String,
    },
    Tts(TtsCommand),
}

impl Command {
    /// The wire discriminator, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Invite { .. } => "invite",
            Self::Candidate { .. } => "candidate",
            Self::Hangup { .. } => "hangup",
            Self::Tts(_) => "tts",
        }
    }

    /// Serializes to the backend's JSON text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn invite_nests_call_option() {
        let cmd = Command::Invite {
            option: CallOption {
                offer: "v=0".to_string(),
                caller: "frontend".to_string(),
                callee: "rust".to_string(),
                asr: AsrOption::default(),
                tts: TtsOption::default(),
            },
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["command"], "invite");
        assert_eq!(json["option"]["offer"], "v=0");
        assert_eq!(json["option"]["caller"], "frontend");
        assert_eq!(json["option"]["callee"], "rust");
        assert!(json["option"]["asr"].is_object());
        assert!(json["option"]["tts"].is_object());
    }

    #[test]
    fn tts_command_is_flattened_under_the_tag() {
        let cmd = Command::Tts(TtsCommand::utterance("hello", "play-1", true));
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(
            json,
            json!({
                "command": "tts",
                "text": "hello",
                "playId": "play-1",
                "autoHangup": true,
                "streaming": false,
                "endOfStream": true,
            })
        );
    }

    #[test]
    fn tts_override_option_is_serialized_when_present() {
        let mut tts = TtsCommand::utterance("hi", "p", false);
        tts.option = Some(TtsOption {
            speaker: "101001".to_string(),
            ..Default::default()
        });
        let json = serde_json::to_value(Command::Tts(tts)).unwrap();
        assert_eq!(json["option"]["speaker"], "101001");
    }

    #[test]
    fn candidate_and_hangup_shapes() {
        let cand = Command::Candidate {
            candidates: vec!["candidate:1 1 udp 2122260223 10.0.0.2 5000 typ host".to_string()],
        };
        let json = serde_json::to_value(&cand).unwrap();
        assert_eq!(json["command"], "candidate");
        assert_eq!(json["candidates"].as_array().map(Vec::len), Some(1));

        let hangup = Command::Hangup {
            reason: String::new(),
        };
        assert_eq!(
            serde_json::to_value(&hangup).unwrap(),
            json!({"command": "hangup", "reason": ""})
        );
        assert_eq!(hangup.kind(), "hangup");
    }
}
