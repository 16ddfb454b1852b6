//! Control-channel message types and wire framing.
//!
//! Structured messages travel as UTF-8 JSON text frames; liveness and
//! terminal-state signals travel as one-byte binary frames with reserved
//! codes. The two framings never overlap, so a frame is decodable without
//! any out-of-band context.

use serde::Deserialize;
use tokio_tungstenite::tungstenite::Message;

/// Reserved code: response production finished successfully.
pub const FRAME_END: u8 = 0x00;
/// Reserved code: extraction could not proceed.
pub const FRAME_ERROR: u8 = 0x01;
/// Reserved code: liveness probe.
pub const FRAME_HEARTBEAT: u8 = 0xFF;

/// Messages exchanged over the control channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlMessage {
    /// Inbound command: produce output for `message` on the named target.
    Dispatch { target: String, message: String },
    /// Outbound chunk of newly-produced output.
    Result { payload: String },
    /// Outbound: output production finished successfully.
    End,
    /// Outbound: extraction could not proceed.
    Error,
    /// Outbound liveness probe.
    Heartbeat,
}

/// JSON shapes of the two structured text frames.
#[derive(Deserialize)]
#[serde(untagged)]
enum TextFrame {
    Dispatch { target: String, message: String },
    Result { payload: String },
}

impl ControlMessage {
    /// Encode for the wire.
    pub fn to_ws(&self) -> Message {
        match self {
            Self::Dispatch { target, message } => Message::Text(
                serde_json::json!({ "target": target, "message": message })
                    .to_string()
                    .into(),
            ),
            Self::Result { payload } => Message::Text(
                serde_json::json!({ "payload": payload }).to_string().into(),
            ),
            Self::End => Message::Binary(vec![FRAME_END].into()),
            Self::Error => Message::Binary(vec![FRAME_ERROR].into()),
            Self::Heartbeat => Message::Binary(vec![FRAME_HEARTBEAT].into()),
        }
    }

    /// Decode a wire frame. Unknown binary codes, malformed JSON, and
    /// non-data frames all decode to `None`.
    pub fn from_ws(msg: &Message) -> Option<Self> {
        match msg {
            Message::Text(text) => match serde_json::from_str::<TextFrame>(text) {
                Ok(TextFrame::Dispatch { target, message }) => {
                    Some(Self::Dispatch { target, message })
                }
                Ok(TextFrame::Result { payload }) => Some(Self::Result { payload }),
                Err(e) => {
                    tracing::debug!(error = %e, "undecodable text frame dropped");
                    None
                }
            },
            Message::Binary(bytes) => match bytes.as_ref() {
                [FRAME_END] => Some(Self::End),
                [FRAME_ERROR] => Some(Self::Error),
                [FRAME_HEARTBEAT] => Some(Self::Heartbeat),
                other => {
                    tracing::debug!(len = other.len(), "unknown binary frame dropped");
                    None
                }
            },
            _ => None,
        }
    }

    /// Whether this message terminates a response cycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::End | Self::Error)
    }

    /// Short classification string for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Dispatch { .. } => "dispatch",
            Self::Result { .. } => "result",
            Self::End => "end",
            Self::Error => "error",
            Self::Heartbeat => "heartbeat",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_roundtrip() {
        let msg = ControlMessage::Dispatch {
            target: "assistant".into(),
            message: "hello there".into(),
        };
        let decoded = ControlMessage::from_ws(&msg.to_ws()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn result_is_json_text_frame() {
        let msg = ControlMessage::Result {
            payload: "chunk".into(),
        };
        match msg.to_ws() {
            Message::Text(text) => {
                let val: serde_json::Value = serde_json::from_str(&text).unwrap();
                assert_eq!(val["payload"], "chunk");
            }
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[test]
    fn control_frames_are_single_bytes() {
        assert_eq!(
            ControlMessage::End.to_ws(),
            Message::Binary(vec![0x00].into())
        );
        assert_eq!(
            ControlMessage::Error.to_ws(),
            Message::Binary(vec![0x01].into())
        );
        assert_eq!(
            ControlMessage::Heartbeat.to_ws(),
            Message::Binary(vec![0xFF].into())
        );
    }

    #[test]
    fn binary_frames_decode_by_code() {
        for (byte, expected) in [
            (FRAME_END, ControlMessage::End),
            (FRAME_ERROR, ControlMessage::Error),
            (FRAME_HEARTBEAT, ControlMessage::Heartbeat),
        ] {
            let decoded = ControlMessage::from_ws(&Message::Binary(vec![byte].into())).unwrap();
            assert_eq!(decoded, expected);
        }
    }

    #[test]
    fn unknown_binary_code_dropped() {
        assert!(ControlMessage::from_ws(&Message::Binary(vec![0x7F].into())).is_none());
        assert!(ControlMessage::from_ws(&Message::Binary(vec![0x00, 0x01].into())).is_none());
        assert!(ControlMessage::from_ws(&Message::Binary(vec![].into())).is_none());
    }

    #[test]
    fn malformed_json_dropped() {
        assert!(ControlMessage::from_ws(&Message::Text("not json".into())).is_none());
        assert!(ControlMessage::from_ws(&Message::Text("{\"other\":1}".into())).is_none());
    }

    #[test]
    fn terminal_classification() {
        assert!(ControlMessage::End.is_terminal());
        assert!(ControlMessage::Error.is_terminal());
        assert!(!ControlMessage::Heartbeat.is_terminal());
        assert!(!ControlMessage::Result { payload: "x".into() }.is_terminal());
    }

    #[test]
    fn kind_strings() {
        assert_eq!(ControlMessage::End.kind(), "end");
        assert_eq!(ControlMessage::Heartbeat.kind(), "heartbeat");
        assert_eq!(
            ControlMessage::Dispatch {
                target: "t".into(),
                message: "m".into()
            }
            .kind(),
            "dispatch"
        );
    }
}
