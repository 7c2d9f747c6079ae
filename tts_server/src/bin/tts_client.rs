//! Command-line client for the `/ws` streaming endpoint.
//!
//! Sends each text argument as a `tts` command and writes every completed
//! audio message to `<out_dir>/<message_id>.wav`.

use std::{path::PathBuf, time::Duration};

use anyhow::{bail, Context};
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{error, info, warn};
use tts_server::{
    client::{AudioAssembler, BatchTracker},
    protocol::{ServerMessage, StatusMessage, StreamMessage},
};

#[derive(Parser)]
#[command(name = "tts_client", about = "Stream speech from a TTS server", version)]
struct Cli {
    /// WebSocket endpoint.
    #[arg(short, long, default_value = "ws://127.0.0.1:8000/ws")]
    url: String,

    /// Voice to select before sending text.
    #[arg(short, long)]
    voice: Option<String>,

    /// Directory for the received WAV files.
    #[arg(short, long, default_value = "out")]
    out_dir: PathBuf,

    /// Seconds of silence, with nothing outstanding, before exiting.
    #[arg(long, default_value_t = 3)]
    idle_secs: u64,

    /// Texts to synthesize.
    #[arg(required = true)]
    texts: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    tokio::fs::create_dir_all(&cli.out_dir)
        .await
        .with_context(|| format!("cannot create {}", cli.out_dir.display()))?;

    let (ws_stream, _) = connect_async(cli.url.as_str())
        .await
        .with_context(|| format!("cannot connect to {}", cli.url))?;
    info!("Connected to {}", cli.url);
    let (mut write, mut read) = ws_stream.split();

    if let Some(voice) = &cli.voice {
        let command = json!({"command": "set_voice", "voice": voice});
        write.send(WsMessage::text(command.to_string())).await?;
    }
    for text in &cli.texts {
        let command = json!({"command": "tts", "text": text});
        write.send(WsMessage::text(command.to_string())).await?;
    }

    let idle = Duration::from_secs(cli.idle_secs);
    let mut assembler = AudioAssembler::new();
    let mut tracker = BatchTracker::new();

    loop {
        let frame = match tokio::time::timeout(idle, read.next()).await {
            Ok(Some(frame)) => frame?,
            Ok(None) => {
                warn!("Server closed the connection");
                break;
            }
            Err(_) if tracker.is_done() => break,
            Err(_) => {
                warn!("Still waiting: {} batch(es) outstanding", tracker.outstanding());
                continue;
            }
        };

        let Ok(raw) = frame.to_text() else {
            continue;
        };
        if raw.is_empty() {
            continue;
        }
        let message: ServerMessage = match serde_json::from_str(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!("Unrecognized server message: {e}");
                continue;
            }
        };

        match message {
            ServerMessage::Status(StatusMessage::Connected { voices, current_voice }) => {
                info!("Voices: {voices:?} (current: {current_voice})");
            }
            ServerMessage::Status(StatusMessage::VoiceSet { voice }) => {
                info!("Voice set to {voice}");
            }
            ServerMessage::Status(StatusMessage::Pong) => {}
            ServerMessage::Stream(StreamMessage::Processing { message_id, text }) => {
                tracker.processing(message_id);
                info!(message_id, "Processing: {text}");
            }
            ServerMessage::Stream(StreamMessage::AudioChunk {
                message_id,
                audio_chunk,
                chunk_index,
                total_chunks,
                text,
                ..
            }) => {
                tracker.audio_started(message_id);
                let completed =
                    assembler.push(message_id, chunk_index, total_chunks, &audio_chunk, &text)?;
                if let Some(audio) = completed {
                    let path = cli.out_dir.join(format!("{}.wav", audio.message_id));
                    tokio::fs::write(&path, &audio.wav)
                        .await
                        .with_context(|| format!("cannot write {}", path.display()))?;
                    info!(message_id, bytes = audio.wav.len(), "Wrote {}", path.display());
                    tracker.audio_completed();
                }
            }
            ServerMessage::Error { error } => {
                error!("Server error: {error}");
                tracker.error();
            }
        }
    }

    let _ = write.send(WsMessage::text(json!({"command": "close"}).to_string())).await;
    let written = tracker.completed();
    if written == 0 {
        bail!("no audio received");
    }
    info!("Wrote {written} file(s) to {}", cli.out_dir.display());
    Ok(())
}
