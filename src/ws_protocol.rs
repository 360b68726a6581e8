// src/ws_protocol.rs
//
// JSON text-frame protocol for the student exam stream. Every client frame
// carries an `action` discriminator; dispatch is a single tagged-enum match.

use serde::{Deserialize, Serialize};

/// Client -> server frames.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Save or erase one answer. Empty `ans` erases.
    Autosave {
        #[serde(default)]
        q_id: String,
        #[serde(default)]
        ans: String,
    },
    /// Grade in RAM and queue the score for persistence.
    Submit,
    /// Report a cheat event. Intentionally never acknowledged.
    Cheat {
        #[serde(default)]
        payload: String,
    },
    /// Keepalive.
    Ping,
}

/// Server -> client frames.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ServerMessage {
    Success { status: &'static str },
    Error { error: String },
    Graded { status: &'static str, score: f64 },
    Pong,
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            error: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        // The enum has no non-serializable members; this cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| "{\"event\":\"error\"}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_autosave_frame() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"action":"autosave","q_id":"abc","ans":"1"}"#).unwrap();
        match msg {
            ClientMessage::Autosave { q_id, ans } => {
                assert_eq!(q_id, "abc");
                assert_eq!(ans, "1");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn parses_bare_submit_and_ping() {
        assert!(matches!(
            serde_json::from_str::<ClientMessage>(r#"{"action":"submit"}"#).unwrap(),
            ClientMessage::Submit
        ));
        assert!(matches!(
            serde_json::from_str::<ClientMessage>(r#"{"action":"ping"}"#).unwrap(),
            ClientMessage::Ping
        ));
    }

    #[test]
    fn unknown_action_is_an_error() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"action":"reboot"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>("not json").is_err());
    }

    #[test]
    fn response_frames_are_flat() {
        let json = ServerMessage::Success { status: "saved" }.to_json();
        assert_eq!(json, r#"{"event":"success","status":"saved"}"#);

        let json = ServerMessage::Graded {
            status: "completed",
            score: 100.0,
        }
        .to_json();
        assert_eq!(json, r#"{"event":"graded","status":"completed","score":100.0}"#);

        let json = ServerMessage::Pong.to_json();
        assert_eq!(json, r#"{"event":"pong"}"#);
    }
}
