//! Socket.IO transport on the default namespace.
//!
//! Inbound events: `set_voice {voice}` and `tts {text}`. Outbound events:
//! `connection_test`, `voice_set`, `audio_chunk {audio, text}` and
//! `error {message}`. Audio goes out as one whole WAV per batch.

use serde::{Deserialize, Serialize};
use socketioxide::{
    extract::{SocketRef, TryData},
    layer::SocketIoLayer,
    SocketIo,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{session::SessionEvent, state::AppState};

#[derive(Debug, Deserialize)]
pub struct SetVoicePayload {
    #[serde(default)]
    pub voice: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TtsPayload {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Serialize)]
struct ConnectionTest {
    message: &'static str,
    voices: Vec<String>,
    current_voice: String,
}

#[derive(Debug, Serialize)]
struct VoiceSet {
    voice: String,
}

#[derive(Debug, Serialize)]
struct AudioChunk {
    audio: String,
    text: String,
}

#[derive(Debug, Serialize)]
struct ErrorMessage {
    message: String,
}

pub fn layer(state: AppState) -> SocketIoLayer {
    let (layer, io) = SocketIo::new_layer();
    io.ns("/", move |socket: SocketRef| on_connect(socket, state.clone()));
    layer
}

fn on_connect(socket: SocketRef, state: AppState) {
    let session_id = socket.id.to_string();
    let (session, events) = match state.sessions.create(session_id.clone()) {
        Ok(created) => created,
        Err(e) => {
            error!("Could not open Socket.IO session: {e}");
            let _ = socket.disconnect();
            return;
        }
    };
    info!(session_id = %session_id, "Socket.IO client connected");

    let voice_state = state.clone();
    socket.on(
        "set_voice",
        move |socket: SocketRef, TryData(payload): TryData<SetVoicePayload>| {
            let state = voice_state.clone();
            async move {
                let id = socket.id.to_string();
                let event = match payload {
                    Ok(payload) => match state.sessions.set_voice(&id, payload.voice.as_deref()) {
                        Ok(voice) => SessionEvent::VoiceSet { voice },
                        Err(e) => SessionEvent::error(e.to_string()),
                    },
                    Err(e) => SessionEvent::error(format!("Invalid set_voice payload: {e}")),
                };
                notify(&state, &id, event).await;
            }
        },
    );

    let tts_state = state.clone();
    socket.on(
        "tts",
        move |socket: SocketRef, TryData(payload): TryData<TtsPayload>| {
            let state = tts_state.clone();
            async move {
                let id = socket.id.to_string();
                let result = match payload {
                    Ok(payload) => state
                        .sessions
                        .enqueue(&id, &payload.text)
                        .map_err(|e| e.to_string()),
                    Err(e) => Err(format!("Invalid tts payload: {e}")),
                };
                if let Err(message) = result {
                    warn!(session_id = %id, "Rejected TTS request: {message}");
                    notify(&state, &id, SessionEvent::error(message)).await;
                }
            }
        },
    );

    let disconnect_state = state.clone();
    socket.on_disconnect(move |socket: SocketRef| {
        let id = socket.id.to_string();
        disconnect_state.sessions.remove(&id);
        info!(session_id = %id, "Socket.IO client disconnected");
    });

    // Handlers are in place before the client hears `connection_test`.
    let connected = state.sessions.connected_event(&session);
    let cancel = session.cancellation();
    tokio::spawn(async move {
        session.notify(connected).await;
        drop(session);
        emit_events(socket, events, cancel).await;
    });
}

async fn notify(state: &AppState, id: &str, event: SessionEvent) {
    if let Some(session) = state.sessions.get(id) {
        session.notify(event).await;
    }
}

async fn emit_events(
    socket: SocketRef,
    mut events: mpsc::Receiver<SessionEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let sent = match event {
            SessionEvent::Connected {
                voices,
                current_voice,
            } => socket.emit(
                "connection_test",
                &ConnectionTest {
                    message: "Connection successful",
                    voices,
                    current_voice,
                },
            ),
            SessionEvent::VoiceSet { voice } => socket.emit("voice_set", &VoiceSet { voice }),
            SessionEvent::Audio {
                message_id,
                audio_base64,
                text,
            } => {
                debug!(socket_id = %socket.id, message_id, "Emitting audio");
                socket.emit(
                    "audio_chunk",
                    &AudioChunk {
                        audio: audio_base64,
                        text,
                    },
                )
            }
            SessionEvent::Error { message } => socket.emit("error", &ErrorMessage { message }),
            SessionEvent::Pong | SessionEvent::Processing { .. } => Ok(()),
        };

        if let Err(e) = sent {
            debug!(socket_id = %socket.id, "Socket.IO emit failed: {e}");
            if !socket.connected() {
                break;
            }
        }
    }
}
