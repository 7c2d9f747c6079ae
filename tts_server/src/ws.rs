//! `/ws`: JSON command protocol over a WebSocket.

use std::{ops::ControlFlow, time::Duration};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    protocol::{frame_event, ClientCommand},
    session::{Session, SessionEvent},
    state::AppState,
};

/// Grace period for the writer after its session was cancelled.
const WRITER_DRAIN: Duration = Duration::from_secs(2);

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let session_id = Uuid::new_v4().to_string();
    let (session, events) = match state.sessions.create(session_id.clone()) {
        Ok(created) => created,
        Err(e) => {
            error!("Could not open session: {e}");
            return;
        }
    };
    info!(session_id = %session_id, "New WebSocket connection established");

    let (sender, mut receiver) = socket.split();
    session.notify(state.sessions.connected_event(&session)).await;

    let mut writer = tokio::spawn(write_events(
        sender,
        events,
        session.cancellation(),
        state.config.audio_chunk_size,
        state.config.chunk_delay(),
        session_id.clone(),
    ));

    // Graceful ends (close command or Close frame) still deliver queued audio.
    let graceful = loop {
        let Some(message) = receiver.next().await else {
            break false;
        };
        match message {
            Ok(Message::Text(text)) => {
                if handle_command(&state, &session, text.as_str()).await.is_break() {
                    break true;
                }
            }
            Ok(Message::Close(_)) => {
                info!(session_id = %session_id, "Client closed the connection");
                break true;
            }
            Ok(Message::Binary(_)) => {
                session
                    .notify(SessionEvent::error("Binary messages are not supported"))
                    .await;
            }
            Ok(_) => {}
            Err(e) => {
                debug!(session_id = %session_id, "WebSocket receive error: {e}");
                break false;
            }
        }
    };

    let cancel = session.cancellation();
    drop(session);
    if graceful {
        state.sessions.detach(&session_id);
        if tokio::time::timeout(state.config.request_timeout(), &mut writer)
            .await
            .is_err()
        {
            warn!(session_id = %session_id, "Timed out draining queued audio");
            cancel.cancel();
        }
    } else {
        state.sessions.remove(&session_id);
    }
    if !writer.is_finished() && tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
        writer.abort();
    }
    info!(session_id = %session_id, "WebSocket connection closed");
}

async fn handle_command(state: &AppState, session: &Session, raw: &str) -> ControlFlow<()> {
    let command = match serde_json::from_str::<ClientCommand>(raw) {
        Ok(command) => command,
        Err(e) => {
            warn!(session_id = session.id(), "Invalid message: {e}");
            session
                .notify(SessionEvent::error(format!("Invalid message: {e}")))
                .await;
            return ControlFlow::Continue(());
        }
    };

    let reply = match command {
        ClientCommand::Ping => Some(SessionEvent::Pong),
        ClientCommand::SetVoice { voice } => {
            match state.sessions.set_voice(session.id(), voice.as_deref()) {
                Ok(voice) => Some(SessionEvent::VoiceSet { voice }),
                Err(e) => Some(SessionEvent::error(e.to_string())),
            }
        }
        ClientCommand::Tts { text } => match state.sessions.enqueue(session.id(), &text) {
            Ok(_) => None,
            Err(e) => {
                warn!(session_id = session.id(), "Rejected TTS request: {e}");
                Some(SessionEvent::error(e.to_string()))
            }
        },
        ClientCommand::Close => {
            info!(session_id = session.id(), "Client requested closure");
            return ControlFlow::Break(());
        }
        ClientCommand::Unknown => Some(SessionEvent::error("Unknown command")),
    };

    if let Some(event) = reply {
        session.notify(event).await;
    }
    ControlFlow::Continue(())
}

/// Serialize session events onto the socket, pacing audio chunks.
async fn write_events(
    mut sender: SplitSink<WebSocket, Message>,
    mut events: mpsc::Receiver<SessionEvent>,
    cancel: CancellationToken,
    chunk_size: usize,
    chunk_delay: Duration,
    session_id: String,
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

        let audio_id = match &event {
            SessionEvent::Audio { message_id, .. } => Some(*message_id),
            _ => None,
        };
        let frames = frame_event(event, chunk_size);
        let total = frames.len();

        for (index, frame) in frames.into_iter().enumerate() {
            let json = match serde_json::to_string(&frame) {
                Ok(json) => json,
                Err(e) => {
                    error!(session_id = %session_id, "Failed to serialize message: {e}");
                    continue;
                }
            };
            if let Err(e) = sender.send(Message::Text(json.into())).await {
                debug!(session_id = %session_id, "Failed to send WS message: {e}");
                return;
            }
            if audio_id.is_some() && index + 1 < total && !chunk_delay.is_zero() {
                tokio::time::sleep(chunk_delay).await;
            }
        }

        if let Some(message_id) = audio_id {
            info!(session_id = %session_id, message_id, chunks = total, "Audio message sent");
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}
