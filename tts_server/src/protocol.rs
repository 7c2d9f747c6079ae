//! WebSocket JSON framing.
//!
//! Clients send `{"command": ...}` objects. The server answers with status
//! objects (`{"status": ...}`), typed events (`{"type": ...}`) or
//! `{"error": ...}`.

use serde::{Deserialize, Serialize};
use tts_core::AudioMessage;

use crate::session::SessionEvent;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ClientCommand {
    Ping,
    SetVoice {
        #[serde(default)]
        voice: Option<String>,
    },
    Tts {
        #[serde(default)]
        text: String,
    },
    Close,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StatusMessage {
    Connected {
        voices: Vec<String>,
        current_voice: String,
    },
    Pong,
    VoiceSet {
        voice: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    Processing {
        message_id: u64,
        text: String,
    },
    AudioChunk {
        message_id: u64,
        audio_chunk: String,
        is_final: bool,
        chunk_index: usize,
        total_chunks: usize,
        text: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Status(StatusMessage),
    Stream(StreamMessage),
    Error { error: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }
}

/// Frame one session event for the wire. Audio becomes one message per
/// chunk of `chunk_size` base64 bytes.
pub fn frame_event(event: SessionEvent, chunk_size: usize) -> Vec<ServerMessage> {
    match event {
        SessionEvent::Connected {
            voices,
            current_voice,
        } => vec![ServerMessage::Status(StatusMessage::Connected {
            voices,
            current_voice,
        })],
        SessionEvent::Pong => vec![ServerMessage::Status(StatusMessage::Pong)],
        SessionEvent::VoiceSet { voice } => {
            vec![ServerMessage::Status(StatusMessage::VoiceSet { voice })]
        }
        SessionEvent::Processing { message_id, text } => {
            vec![ServerMessage::Stream(StreamMessage::Processing { message_id, text })]
        }
        SessionEvent::Audio {
            message_id,
            audio_base64,
            text,
        } => {
            let message = AudioMessage::new(message_id, &audio_base64, chunk_size, text);
            message
                .frames()
                .map(|frame| {
                    ServerMessage::Stream(StreamMessage::AudioChunk {
                        message_id,
                        audio_chunk: frame.data.to_string(),
                        is_final: frame.is_final,
                        chunk_index: frame.chunk_index,
                        total_chunks: frame.total_chunks,
                        text: message.text.clone(),
                    })
                })
                .collect()
        }
        SessionEvent::Error { message } => vec![ServerMessage::error(message)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_commands() {
        let ping: ClientCommand = serde_json::from_str(r#"{"command":"ping"}"#).unwrap();
        assert_eq!(ping, ClientCommand::Ping);

        let set: ClientCommand =
            serde_json::from_str(r#"{"command":"set_voice","voice":"bf_emma"}"#).unwrap();
        assert_eq!(
            set,
            ClientCommand::SetVoice {
                voice: Some("bf_emma".into())
            }
        );

        let set_default: ClientCommand =
            serde_json::from_str(r#"{"command":"set_voice"}"#).unwrap();
        assert_eq!(set_default, ClientCommand::SetVoice { voice: None });

        let tts: ClientCommand =
            serde_json::from_str(r#"{"command":"tts","text":"Hello."}"#).unwrap();
        assert_eq!(tts, ClientCommand::Tts { text: "Hello.".into() });

        let other: ClientCommand = serde_json::from_str(r#"{"command":"dance"}"#).unwrap();
        assert_eq!(other, ClientCommand::Unknown);

        assert!(serde_json::from_str::<ClientCommand>(r#"{"text":"no command"}"#).is_err());
    }

    #[test]
    fn test_status_messages_wire_shape() {
        let connected = frame_event(
            SessionEvent::Connected {
                voices: vec!["af".into()],
                current_voice: "af".into(),
            },
            8192,
        );
        assert_eq!(
            serde_json::to_value(&connected[0]).unwrap(),
            json!({"status": "connected", "voices": ["af"], "current_voice": "af"})
        );
        assert_eq!(
            serde_json::to_value(&frame_event(SessionEvent::Pong, 8192)[0]).unwrap(),
            json!({"status": "pong"})
        );
        assert_eq!(
            serde_json::to_value(&frame_event(SessionEvent::error("nope"), 8192)[0]).unwrap(),
            json!({"error": "nope"})
        );
    }

    #[test]
    fn test_audio_is_split_into_chunks() {
        let event = SessionEvent::Audio {
            message_id: 42,
            audio_base64: "abcdefghij".into(),
            text: "Hi. ".into(),
        };
        let frames = frame_event(event, 4);
        assert_eq!(frames.len(), 3);

        let last = serde_json::to_value(&frames[2]).unwrap();
        assert_eq!(
            last,
            json!({
                "type": "audio_chunk",
                "message_id": 42,
                "audio_chunk": "ij",
                "is_final": true,
                "chunk_index": 2,
                "total_chunks": 3,
                "text": "Hi. "
            })
        );
        let first = serde_json::to_value(&frames[0]).unwrap();
        assert_eq!(first["is_final"], false);
        assert_eq!(first["audio_chunk"], "abcd");
    }

    #[test]
    fn test_processing_wire_shape() {
        let frames = frame_event(
            SessionEvent::Processing {
                message_id: 7,
                text: "Hello. ".into(),
            },
            8192,
        );
        assert_eq!(
            serde_json::to_value(&frames[0]).unwrap(),
            json!({"type": "processing", "message_id": 7, "text": "Hello. "})
        );
    }
}
