//! Per-connection sessions.
//!
//! Every live WebSocket or Socket.IO connection owns one [`Session`]: its
//! selected voice, a bounded FIFO of text batches and an outbound event
//! channel. A session moves `Idle -> Processing -> Idle` while a worker
//! drains its queue, and ends `Destroyed` when the connection goes away.
//!
//! The queue and the processing flag live behind one lock, so two enqueues
//! racing each other start at most one worker.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock},
};

use dashmap::{mapref::entry::Entry, DashMap};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tts_core::{
    batch_sentences,
    chunking::{next_message_id, preview},
    preprocess_text, validate_text, TtsManager,
};

use crate::{error::SessionError, metrics::AppMetrics};

/// Outbound events waiting for a slow client before the worker blocks.
const EVENT_BUFFER: usize = 64;

/// What a session tells its client. Each transport frames these its own way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connected {
        voices: Vec<String>,
        current_voice: String,
    },
    Pong,
    VoiceSet {
        voice: String,
    },
    Processing {
        message_id: u64,
        text: String,
    },
    Audio {
        message_id: u64,
        audio_base64: String,
        text: String,
    },
    Error {
        message: String,
    },
}

impl SessionEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Processing,
    Destroyed,
}

#[derive(Debug)]
struct QueuedBatch {
    text: String,
    voice: String,
}

#[derive(Debug, Default)]
struct Queue {
    pending: VecDeque<QueuedBatch>,
    processing: bool,
}

#[derive(Debug)]
pub struct Session {
    id: String,
    voice: RwLock<String>,
    queue: Mutex<Queue>,
    cancel: CancellationToken,
    events: mpsc::Sender<SessionEvent>,
}

impl Session {
    fn new(id: String, voice: String) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (events, rx) = mpsc::channel(EVENT_BUFFER);
        let session = Self {
            id,
            voice: RwLock::new(voice),
            queue: Mutex::new(Queue::default()),
            cancel: CancellationToken::new(),
            events,
        };
        (session, rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn voice(&self) -> String {
        self.voice
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_voice(&self, voice: String) {
        *self.voice.write().unwrap_or_else(PoisonError::into_inner) = voice;
    }

    fn queue(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SessionState {
        if self.cancel.is_cancelled() {
            SessionState::Destroyed
        } else if self.queue().processing {
            SessionState::Processing
        } else {
            SessionState::Idle
        }
    }

    /// Batches waiting behind the one being synthesized.
    pub fn pending(&self) -> usize {
        self.queue().pending.len()
    }

    /// Cancelled once the session is removed from its manager.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Best-effort delivery; false once the client side is gone.
    pub async fn notify(&self, event: SessionEvent) -> bool {
        match self.events.send(event).await {
            Ok(()) => true,
            Err(_) => {
                debug!(session_id = %self.id, "Dropping event for closed connection");
                false
            }
        }
    }

    /// Append all batches or none. Returns true when the caller must start a
    /// worker (the session was idle).
    fn push_batches(
        &self,
        texts: Vec<String>,
        voice: &str,
        capacity: usize,
    ) -> Result<bool, SessionError> {
        let mut queue = self.queue();
        if queue.pending.len() + texts.len() > capacity {
            return Err(SessionError::QueueFull {
                pending: queue.pending.len(),
                capacity,
            });
        }
        queue.pending.extend(texts.into_iter().map(|text| QueuedBatch {
            text,
            voice: voice.to_string(),
        }));
        let start = !queue.processing;
        queue.processing = true;
        Ok(start)
    }

    /// Pop the next batch, or flip back to idle when the queue is drained.
    fn next_batch(&self) -> Option<QueuedBatch> {
        let mut queue = self.queue();
        let next = queue.pending.pop_front();
        if next.is_none() {
            queue.processing = false;
        }
        next
    }

    fn abandon(&self) {
        let mut queue = self.queue();
        queue.pending.clear();
        queue.processing = false;
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub target_batch_chars: usize,
    pub queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            target_batch_chars: 150,
            queue_capacity: 32,
        }
    }
}

/// Owns every live session; all operations are safe to call concurrently.
#[derive(Debug, Clone)]
pub struct SessionManager {
    sessions: Arc<DashMap<String, Arc<Session>>>,
    tts: TtsManager,
    metrics: AppMetrics,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(tts: TtsManager, metrics: AppMetrics, config: SessionConfig) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            tts,
            metrics,
            config,
        }
    }

    /// Register a session on the default voice. Fails if `id` is taken.
    pub fn create(
        &self,
        id: impl Into<String>,
    ) -> Result<(Arc<Session>, mpsc::Receiver<SessionEvent>), SessionError> {
        let id = id.into();
        match self.sessions.entry(id.clone()) {
            Entry::Occupied(_) => Err(SessionError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                let (session, rx) = Session::new(id.clone(), self.tts.default_voice().to_string());
                let session = Arc::new(session);
                slot.insert(Arc::clone(&session));
                self.metrics
                    .sessions_opened
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                info!(session_id = %id, "Session created");
                Ok((session, rx))
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|s| Arc::clone(s.value()))
    }

    /// Drop the session and cancel its worker at the next batch boundary.
    /// An in-flight synthesis call still runs to completion.
    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        let (_, session) = self.sessions.remove(id)?;
        session.cancel.cancel();
        info!(
            session_id = %id,
            pending = session.pending(),
            "Session destroyed"
        );
        Some(session)
    }

    /// Drop the session from the registry but let its worker finish the
    /// batches already queued. The event channel closes once the worker
    /// and the caller release their handles.
    pub fn detach(&self, id: &str) -> Option<Arc<Session>> {
        let (_, session) = self.sessions.remove(id)?;
        info!(
            session_id = %id,
            pending = session.pending(),
            "Session closing, draining queued batches"
        );
        Some(session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Event announcing the session to its client.
    pub fn connected_event(&self, session: &Session) -> SessionEvent {
        SessionEvent::Connected {
            voices: self.tts.list_voices(),
            current_voice: session.voice(),
        }
    }

    /// Select a voice (`None` means the default). Unknown voices leave the
    /// session untouched.
    pub fn set_voice(&self, id: &str, voice: Option<&str>) -> Result<String, SessionError> {
        let session = self
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        let voice = voice.unwrap_or(self.tts.default_voice());
        if !self.tts.has_voice(voice) {
            return Err(SessionError::UnknownVoice {
                voice: voice.to_string(),
                available: self.tts.list_voices(),
            });
        }
        session.set_voice(voice.to_string());
        info!(session_id = %id, voice, "Voice set");
        Ok(voice.to_string())
    }

    /// Validate, batch and queue text for the session's current voice.
    ///
    /// Returns the number of batches queued; blank text queues nothing.
    pub fn enqueue(&self, id: &str, raw_text: &str) -> Result<usize, SessionError> {
        let session = self
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;

        let text = preprocess_text(raw_text);
        if text.is_empty() {
            return Ok(0);
        }
        validate_text(&text, self.tts.max_text_length())?;

        let batches = batch_sentences(&text, self.config.target_batch_chars);
        let count = batches.len();
        let voice = session.voice();
        let start_worker = session.push_batches(batches, &voice, self.config.queue_capacity)?;
        self.metrics
            .batches_enqueued
            .fetch_add(count as u64, std::sync::atomic::Ordering::Relaxed);
        debug!(session_id = %id, batches = count, "Queued text");

        if start_worker {
            let worker = Worker {
                session,
                tts: self.tts.clone(),
                metrics: self.metrics.clone(),
            };
            tokio::spawn(worker.run());
        }
        Ok(count)
    }
}

/// Drains one session's queue, one batch at a time.
struct Worker {
    session: Arc<Session>,
    tts: TtsManager,
    metrics: AppMetrics,
}

impl Worker {
    async fn run(self) {
        let session = &self.session;
        debug!(session_id = %session.id, "Worker started");

        loop {
            if session.cancel.is_cancelled() {
                session.abandon();
                break;
            }
            let Some(batch) = session.next_batch() else {
                break;
            };

            let message_id = next_message_id();
            info!(
                session_id = %session.id,
                message_id,
                "Processing TTS request: {}",
                preview(&batch.text)
            );
            let processing = SessionEvent::Processing {
                message_id,
                text: preview(&batch.text),
            };
            if !session.notify(processing).await {
                session.abandon();
                break;
            }

            let event = match self.tts.synthesize(&batch.text, &batch.voice).await {
                Ok(audio) => {
                    self.metrics.record_synthesis(&audio);
                    info!(
                        session_id = %session.id,
                        message_id,
                        bytes = audio.wav.len(),
                        elapsed_ms = audio.elapsed.as_millis() as u64,
                        "Audio generated"
                    );
                    SessionEvent::Audio {
                        message_id,
                        audio_base64: audio.to_base64(),
                        text: batch.text,
                    }
                }
                Err(e) => {
                    self.metrics.synthesis.record_error();
                    error!(session_id = %session.id, message_id, "Synthesis failed: {e}");
                    SessionEvent::error(e.to_string())
                }
            };

            if session.cancel.is_cancelled() {
                warn!(
                    session_id = %session.id,
                    message_id,
                    "Session closed during synthesis, discarding result"
                );
                session.abandon();
                break;
            }
            if !session.notify(event).await {
                session.abandon();
                break;
            }
        }

        debug!(session_id = %session.id, "Worker finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fake_tts, fake_tts_with, FakeModel};
    use base64::Engine as _;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn manager_with(tts: TtsManager, config: SessionConfig) -> SessionManager {
        SessionManager::new(tts, AppMetrics::new(), config)
    }

    async fn recv(rx: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_ids() {
        let manager = manager_with(fake_tts(), SessionConfig::default());
        let (session, _rx) = manager.create("abc").unwrap();
        assert_eq!(session.voice(), "af");
        assert_eq!(session.state(), SessionState::Idle);
        assert!(matches!(manager.create("abc"), Err(SessionError::AlreadyExists(_))));
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_destroys_session() {
        let manager = manager_with(fake_tts(), SessionConfig::default());
        let (session, _rx) = manager.create("abc").unwrap();
        let removed = manager.remove("abc").unwrap();
        assert!(Arc::ptr_eq(&session, &removed));
        assert_eq!(session.state(), SessionState::Destroyed);
        assert!(manager.get("abc").is_none());
        assert!(manager.remove("abc").is_none());
        assert!(matches!(
            manager.enqueue("abc", "Hello."),
            Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_voice_leaves_session_untouched() {
        let manager = manager_with(fake_tts(), SessionConfig::default());
        let (session, _rx) = manager.create("abc").unwrap();
        manager.set_voice("abc", Some("bf_emma")).unwrap();

        let err = manager.set_voice("abc", Some("nope")).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("af") && msg.contains("bf_emma"), "{msg}");
        assert_eq!(session.voice(), "bf_emma");

        assert_eq!(manager.set_voice("abc", None).unwrap(), "af");
        assert_eq!(session.voice(), "af");
    }

    #[tokio::test]
    async fn test_enqueue_streams_processing_then_audio() {
        let manager = manager_with(fake_tts(), SessionConfig::default());
        let (session, mut rx) = manager.create("abc").unwrap();

        assert_eq!(manager.enqueue("abc", "Hello. World.").unwrap(), 1);

        let SessionEvent::Processing { message_id, text } = recv(&mut rx).await else {
            panic!("expected processing event");
        };
        assert_eq!(text, "Hello. World. ");

        match recv(&mut rx).await {
            SessionEvent::Audio {
                message_id: audio_id,
                audio_base64,
                text,
            } => {
                assert_eq!(audio_id, message_id);
                assert_eq!(text, "Hello. World. ");
                let wav = base64::engine::general_purpose::STANDARD
                    .decode(audio_base64)
                    .unwrap();
                assert_eq!(&wav[0..4], b"RIFF");
                assert_eq!(&wav[8..12], b"WAVE");
            }
            other => panic!("expected audio, got {other:?}"),
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_batches_are_processed_in_order() {
        let config = SessionConfig {
            target_batch_chars: 10,
            ..SessionConfig::default()
        };
        let manager = manager_with(fake_tts(), config);
        let (_session, mut rx) = manager.create("abc").unwrap();

        assert_eq!(manager.enqueue("abc", "First one. Second one. Third one.").unwrap(), 3);

        let mut texts = Vec::new();
        let mut last_id = 0;
        while texts.len() < 3 {
            if let SessionEvent::Audio { message_id, text, .. } = recv(&mut rx).await {
                assert!(message_id > last_id);
                last_id = message_id;
                texts.push(text);
            }
        }
        assert_eq!(texts, vec!["First one. ", "Second one. ", "Third one. "]);
    }

    #[tokio::test]
    async fn test_too_long_text_is_rejected_without_synthesis() {
        let (tts, model) = fake_tts_with(Duration::ZERO);
        let manager = manager_with(tts, SessionConfig::default());
        let (session, mut rx) = manager.create("abc").unwrap();

        let err = manager.enqueue("abc", &"a".repeat(501)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Text too long (501 chars). Maximum is 500 characters."
        );
        assert_eq!(session.state(), SessionState::Idle);
        assert!(rx.try_recv().is_err());
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_blank_text_is_ignored() {
        let manager = manager_with(fake_tts(), SessionConfig::default());
        let (session, _rx) = manager.create("abc").unwrap();
        assert_eq!(manager.enqueue("abc", "  \r\n ").unwrap(), 0);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_queue_full_rejects_whole_request() {
        let config = SessionConfig {
            target_batch_chars: 5,
            queue_capacity: 2,
        };
        let manager = manager_with(fake_tts(), config);
        let (session, _rx) = manager.create("abc").unwrap();

        let err = manager.enqueue("abc", "One. Two. Three.").unwrap_err();
        assert!(matches!(err, SessionError::QueueFull { capacity: 2, .. }));
        assert_eq!(session.pending(), 0);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_remove_stops_worker_at_batch_boundary() {
        let (tts, model) = fake_tts_with(Duration::from_millis(100));
        let config = SessionConfig {
            target_batch_chars: 5,
            ..SessionConfig::default()
        };
        let manager = manager_with(tts, config);
        let (session, mut rx) = manager.create("abc").unwrap();
        manager.enqueue("abc", "One. Two. Three.").unwrap();

        assert!(matches!(recv(&mut rx).await, SessionEvent::Processing { .. }));
        manager.remove("abc");
        drop(session);

        let mut rest = Vec::new();
        while let Ok(Some(event)) = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            rest.push(event);
        }
        assert!(rest.is_empty(), "unexpected events after removal: {rest:?}");
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_detach_drains_queued_batches() {
        let (tts, model) = fake_tts_with(Duration::from_millis(50));
        let config = SessionConfig {
            target_batch_chars: 5,
            ..SessionConfig::default()
        };
        let manager = manager_with(tts, config);
        let (session, mut rx) = manager.create("abc").unwrap();
        assert_eq!(manager.enqueue("abc", "One. Two. Three.").unwrap(), 3);

        let detached = manager.detach("abc").unwrap();
        assert!(Arc::ptr_eq(&session, &detached));
        assert!(manager.is_empty());
        assert_ne!(session.state(), SessionState::Destroyed);
        drop(detached);
        drop(session);

        let mut texts = Vec::new();
        while let Some(event) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for drain")
        {
            if let SessionEvent::Audio { text, .. } = event {
                texts.push(text);
            }
        }
        assert_eq!(texts, vec!["One. ", "Two. ", "Three. "]);
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_model_failure_surfaces_error_and_session_continues() {
        let manager = manager_with(fake_tts(), SessionConfig::default());
        let (session, mut rx) = manager.create("abc").unwrap();

        manager.enqueue("abc", "Please explode.").unwrap();
        assert!(matches!(recv(&mut rx).await, SessionEvent::Processing { .. }));
        match recv(&mut rx).await {
            SessionEvent::Error { message } => assert!(message.contains(FakeModel::FAILURE)),
            other => panic!("expected error, got {other:?}"),
        }

        manager.enqueue("abc", "Fine now.").unwrap();
        assert!(matches!(recv(&mut rx).await, SessionEvent::Processing { .. }));
        assert!(matches!(recv(&mut rx).await, SessionEvent::Audio { .. }));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.state(), SessionState::Idle);
    }
}
