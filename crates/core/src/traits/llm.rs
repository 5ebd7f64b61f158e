//! Language model trait

use crate::Result;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

/// Finite stream of generated text deltas
pub type TextStream<'a> = Pin<Box<dyn Stream<Item = Result<String>> + Send + 'a>>;

/// Streaming text generation
#[async_trait]
pub trait LanguageModel: Send + Sync + 'static {
    /// Generate a reply to `query`
    ///
    /// The stream is finite and single-use; call again for the next query. An
    /// `Err` item aborts the current turn.
    fn generate_stream<'a>(&'a self, query: &'a str) -> TextStream<'a>;

    /// Release the model and forget conversation history
    async fn stop(&self) -> Result<()>;

    /// Get model name for logging
    fn model_name(&self) -> &str;
}
