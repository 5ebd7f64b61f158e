//! Engine callback sink

use crate::Error;

/// Receives push-style events from speech engines
///
/// Engines may call these from any execution context, including their own
/// worker threads, so implementations must never block and never panic.
pub trait SpeechEvents: Send + Sync + 'static {
    /// A recognized text fragment
    fn on_text(&self, text: &str, is_final: bool);

    /// The recognition session ended. Advisory only.
    fn on_text_complete(&self);

    /// A synthesized audio chunk. An empty final chunk marks end-of-utterance.
    fn on_audio(&self, audio: Vec<u8>, is_final: bool);

    /// The synthesis session ended. Advisory only.
    fn on_audio_complete(&self);

    /// The engine failed outside of a direct call. Aborts the turn in progress.
    fn on_error(&self, error: Error);
}
