//! Speech processing traits

use crate::Result;
use async_trait::async_trait;

/// Speech-to-Text engine
///
/// Recognition is push-style: audio goes in through [`recognize`], and
/// recognized `(text, is_final)` fragments come back asynchronously through the
/// [`SpeechEvents`](crate::SpeechEvents) sink given to the engine at
/// construction, never through a return value.
///
/// [`recognize`]: SpeechToText::recognize
#[async_trait]
pub trait SpeechToText: Send + Sync + 'static {
    /// Open a recognition session. Idempotent.
    async fn start(&self) -> Result<()>;

    /// Push one frame of PCM16 mono audio
    ///
    /// Starts the session first if needed. `is_final` marks the last frame of
    /// an utterance and forces any buffered audio to be recognized.
    async fn recognize(&self, audio: &[u8], is_final: bool) -> Result<()>;

    /// Close the session, flushing buffered audio. Safe to call when stopped.
    async fn stop(&self) -> Result<()>;

    /// Whether a session is currently open
    fn is_started(&self) -> bool;

    /// Get model name for logging
    fn model_name(&self) -> &str;
}

/// Text-to-Speech engine
///
/// Text increments go in through [`synthesize`]; audio chunks come back through
/// the [`SpeechEvents`](crate::SpeechEvents) sink, terminated by an empty final
/// chunk once a flush (`is_final = true`) has been fully synthesized.
///
/// [`synthesize`]: TextToSpeech::synthesize
#[async_trait]
pub trait TextToSpeech: Send + Sync + 'static {
    /// Push a text increment. `is_final` flushes the utterance.
    async fn synthesize(&self, text: &str, is_final: bool) -> Result<()>;

    /// Abort any in-flight utterance and release the engine. Safe to call twice.
    async fn stop(&self) -> Result<()>;

    /// Get model name for logging
    fn model_name(&self) -> &str;
}
