//! Event bridge: engine callbacks to bounded queues
//!
//! Speech engines report from their own execution context and must never be
//! blocked or see an error. Every event is pushed with `try_send`; when a queue
//! is full the new item is dropped and counted. Engine failures reported
//! through `on_error` travel on a third, small queue.
//!
//! Audio is stamped with the bridge's current epoch. Advancing the epoch
//! disowns everything a previous utterance already queued or may still send.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use voice_chain_core::{Error, SpeechEvents};

const ERROR_QUEUE_CAPACITY: usize = 8;

/// Recognized text fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEvent {
    pub text: String,
    pub is_final: bool,
}

/// Synthesized audio fragment. An empty final chunk marks end-of-utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioEvent {
    pub audio: Vec<u8>,
    pub is_final: bool,
    /// Bridge epoch when the engine reported it
    pub epoch: u64,
}

impl AudioEvent {
    pub fn is_end_of_utterance(&self) -> bool {
        self.is_final
    }
}

/// Consumer ends of the bridge queues
pub struct BridgeReceivers {
    pub text_rx: mpsc::Receiver<TextEvent>,
    pub audio_rx: mpsc::Receiver<AudioEvent>,
    pub error_rx: mpsc::Receiver<Error>,
}

/// Callback sink handed to the STT and TTS engines
pub struct EventBridge {
    session_id: String,
    text_tx: mpsc::Sender<TextEvent>,
    audio_tx: mpsc::Sender<AudioEvent>,
    error_tx: mpsc::Sender<Error>,
    text_dropped: AtomicU64,
    audio_dropped: AtomicU64,
    audio_epoch: AtomicU64,
}

impl EventBridge {
    pub fn new(
        session_id: impl Into<String>,
        text_capacity: usize,
        audio_capacity: usize,
    ) -> (Arc<Self>, BridgeReceivers) {
        let (text_tx, text_rx) = mpsc::channel(text_capacity);
        let (audio_tx, audio_rx) = mpsc::channel(audio_capacity);
        let (error_tx, error_rx) = mpsc::channel(ERROR_QUEUE_CAPACITY);

        let bridge = Arc::new(Self {
            session_id: session_id.into(),
            text_tx,
            audio_tx,
            error_tx,
            text_dropped: AtomicU64::new(0),
            audio_dropped: AtomicU64::new(0),
            audio_epoch: AtomicU64::new(0),
        });

        (
            bridge,
            BridgeReceivers {
                text_rx,
                audio_rx,
                error_rx,
            },
        )
    }

    /// Text fragments dropped on overflow so far
    pub fn dropped_text(&self) -> u64 {
        self.text_dropped.load(Ordering::Relaxed)
    }

    /// Audio fragments dropped on overflow so far
    pub fn dropped_audio(&self) -> u64 {
        self.audio_dropped.load(Ordering::Relaxed)
    }

    pub fn audio_epoch(&self) -> u64 {
        self.audio_epoch.load(Ordering::SeqCst)
    }

    /// Start a new audio epoch; returns it
    pub fn advance_audio_epoch(&self) -> u64 {
        let epoch = self.audio_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(session_id = %self.session_id, epoch, "Audio epoch advanced");
        epoch
    }

    fn push<T>(
        &self,
        tx: &mpsc::Sender<T>,
        item: T,
        queue: &'static str,
        dropped: &AtomicU64,
    ) {
        match tx.try_send(item) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let total = dropped.fetch_add(1, Ordering::Relaxed) + 1;
                metrics::counter!("voice_chain_queue_dropped_total", "queue" => queue)
                    .increment(1);
                tracing::warn!(
                    session_id = %self.session_id,
                    queue,
                    dropped = total,
                    "Queue full, dropping newest item"
                );
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(
                    session_id = %self.session_id,
                    queue,
                    "Queue closed, discarding item"
                );
            }
        }
    }
}

impl SpeechEvents for EventBridge {
    fn on_text(&self, text: &str, is_final: bool) {
        if text.is_empty() {
            return;
        }
        tracing::debug!(session_id = %self.session_id, text, is_final, "STT fragment");
        let event = TextEvent {
            text: text.to_string(),
            is_final,
        };
        self.push(&self.text_tx, event, "text", &self.text_dropped);
    }

    fn on_text_complete(&self) {
        tracing::debug!(session_id = %self.session_id, "STT session complete");
    }

    fn on_audio(&self, audio: Vec<u8>, is_final: bool) {
        // Empty non-final chunks carry nothing; empty final chunks are the end marker
        if audio.is_empty() && !is_final {
            return;
        }
        let event = AudioEvent {
            audio,
            is_final,
            epoch: self.audio_epoch(),
        };
        self.push(&self.audio_tx, event, "audio", &self.audio_dropped);
    }

    fn on_audio_complete(&self) {
        tracing::debug!(session_id = %self.session_id, "TTS session complete");
    }

    fn on_error(&self, error: Error) {
        tracing::error!(session_id = %self.session_id, error = %error, "Engine reported failure");
        // One pending failure is enough to tear the chain down
        if self.error_tx.try_send(error).is_err() {
            tracing::debug!(session_id = %self.session_id, "Error queue full or closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_drops_newest() {
        let (bridge, mut rx) = EventBridge::new("test", 1000, 1000);

        for i in 0..1001 {
            bridge.on_text(&format!("t{i}"), false);
        }

        assert_eq!(bridge.dropped_text(), 1);
        let mut retained = Vec::new();
        while let Ok(event) = rx.text_rx.try_recv() {
            retained.push(event.text);
        }
        assert_eq!(retained.len(), 1000);
        assert_eq!(retained.first().map(String::as_str), Some("t0"));
        assert_eq!(retained.last().map(String::as_str), Some("t999"));
    }

    #[test]
    fn test_audio_overflow_is_independent() {
        let (bridge, mut rx) = EventBridge::new("test", 4, 2);

        for _ in 0..3 {
            bridge.on_audio(vec![0; 8], false);
        }
        bridge.on_text("still fine", true);

        assert_eq!(bridge.dropped_audio(), 1);
        assert_eq!(bridge.dropped_text(), 0);
        assert!(rx.text_rx.try_recv().is_ok());
    }

    #[test]
    fn test_empty_final_audio_marker_is_forwarded() {
        let (bridge, mut rx) = EventBridge::new("test", 8, 8);

        bridge.on_audio(vec![1, 2], false);
        bridge.on_audio(Vec::new(), false);
        bridge.on_audio(Vec::new(), true);

        let first = rx.audio_rx.try_recv().unwrap();
        assert_eq!(first.audio, vec![1, 2]);
        assert!(!first.is_end_of_utterance());

        let marker = rx.audio_rx.try_recv().unwrap();
        assert!(marker.audio.is_empty());
        assert!(marker.is_end_of_utterance());

        assert!(rx.audio_rx.try_recv().is_err());
    }

    #[test]
    fn test_audio_carries_epoch() {
        let (bridge, mut rx) = EventBridge::new("test", 8, 8);

        bridge.on_audio(vec![1], false);
        assert_eq!(bridge.advance_audio_epoch(), 1);
        bridge.on_audio(Vec::new(), true);

        assert_eq!(rx.audio_rx.try_recv().unwrap().epoch, 0);
        let marker = rx.audio_rx.try_recv().unwrap();
        assert_eq!(marker.epoch, 1);
        assert_eq!(bridge.audio_epoch(), 1);
    }

    #[test]
    fn test_engine_errors_are_queued() {
        let (bridge, mut rx) = EventBridge::new("test", 8, 8);
        bridge.on_error(Error::Tts("HTTP 500".into()));

        let error = rx.error_rx.try_recv().unwrap();
        assert!(error.is_engine());

        for _ in 0..(ERROR_QUEUE_CAPACITY + 2) {
            bridge.on_error(Error::Stt("flaky".into()));
        }
    }

    #[test]
    fn test_empty_text_ignored() {
        let (bridge, mut rx) = EventBridge::new("test", 8, 8);
        bridge.on_text("", true);
        assert!(rx.text_rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_queue_never_panics() {
        let (bridge, rx) = EventBridge::new("test", 8, 8);
        drop(rx);

        bridge.on_text("late", true);
        bridge.on_audio(vec![1], true);
        bridge.on_text_complete();
        bridge.on_audio_complete();
        bridge.on_error(Error::Stt("gone".into()));
        assert_eq!(bridge.dropped_text(), 0);
    }

    #[test]
    fn test_order_preserved_from_foreign_thread() {
        let (bridge, mut rx) = EventBridge::new("test", 64, 64);

        let producer = Arc::clone(&bridge);
        std::thread::spawn(move || {
            for i in 0..32 {
                producer.on_text(&i.to_string(), i == 31);
            }
        })
        .join()
        .unwrap();

        let received: Vec<String> = std::iter::from_fn(|| rx.text_rx.try_recv().ok())
            .map(|event| event.text)
            .collect();
        let expected: Vec<String> = (0..32).map(|i| i.to_string()).collect();
        assert_eq!(received, expected);
    }
}
