//! # Message Envelopes
//!
//! Tagged JSON messages exchanged after authentication whenever a frame is not a raw
//! relay payload. Every envelope has the shape `{"type": <tag>, "data": <payload>}`.
//!
//! | Tag | Direction | Payload |
//! |---|---|---|
//! | `audio_in` | client → server | base64 audio chunk |
//! | `transcript` | server → client | transcript text |
//! | `gpt-response` | server → client | completion text |
//! | `partner-search-results` | server → client | array of partner records |
//! | `error` | server → client | non-fatal error description |

use crate::relay::frame::Frame;
use crate::store::PartnerRecord;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Envelope {
    /// Captured client audio, base64 encoded
    #[serde(rename = "audio_in")]
    AudioIn(String),

    /// Partial or updated transcript text
    #[serde(rename = "transcript")]
    Transcript(String),

    /// Completion result for a chat query
    #[serde(rename = "gpt-response")]
    GptResponse(String),

    /// Partner lookup results in store order (possibly empty)
    #[serde(rename = "partner-search-results")]
    PartnerSearchResults(Vec<PartnerRecord>),

    /// Processing error that did not end the session
    #[serde(rename = "error")]
    Error(String),
}

impl Envelope {
    pub fn tag(&self) -> &'static str {
        match self {
            Envelope::AudioIn(_) => "audio_in",
            Envelope::Transcript(_) => "transcript",
            Envelope::GptResponse(_) => "gpt-response",
            Envelope::PartnerSearchResults(_) => "partner-search-results",
            Envelope::Error(_) => "error",
        }
    }

    /// Parse a text frame as an envelope. Anything that is not a known envelope
    /// (plain text, other JSON) yields `None` and is treated as an opaque payload.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn into_frame(self) -> Result<Frame, serde_json::Error> {
        self.to_json().map(Frame::Text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_audio_in_wire_shape() {
        let parsed = Envelope::parse(r#"{"type":"audio_in","data":"AAEC"}"#);
        assert_eq!(parsed, Some(Envelope::AudioIn("AAEC".to_string())));
    }

    #[test]
    fn test_plain_text_is_not_an_envelope() {
        assert_eq!(Envelope::parse("find a partner"), None);
        assert_eq!(Envelope::parse(r#"{"type":"response.create"}"#), None);
    }

    #[test]
    fn test_search_results_serialization() {
        let envelope = Envelope::PartnerSearchResults(vec![PartnerRecord {
            id: "abc".to_string(),
            name: "Partner C".to_string(),
            expertise: "Cybersecurity".to_string(),
            expertise_lowercase: "cybersecurity".to_string(),
        }]);

        let value: serde_json::Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "partner-search-results",
                "data": [{
                    "id": "abc",
                    "name": "Partner C",
                    "expertise": "Cybersecurity",
                    "expertise_lowercase": "cybersecurity"
                }]
            })
        );
    }

    #[test]
    fn test_gpt_response_tag() {
        let json = Envelope::GptResponse("hi".to_string()).to_json().unwrap();
        assert_eq!(json, r#"{"type":"gpt-response","data":"hi"}"#);
    }
}
