//! Caller-facing transport

use crate::{Message, Result};
use async_trait::async_trait;

/// Duplex connection to the caller: raw audio in, messages and audio out
///
/// Input and output are driven from different tasks, so every method takes
/// `&self`; implementations serialize writes internally. Ordering is kept per
/// calling task only.
#[async_trait]
pub trait ConversationClient: Send + Sync + 'static {
    /// Acquire the transport
    async fn connect(&self) -> Result<()>;

    /// Release the transport. Must succeed even after a partial `connect`, and
    /// repeated calls are no-ops.
    async fn close(&self) -> Result<()>;

    /// Next raw input unit
    ///
    /// Returns `None` once the caller has gone away.
    async fn next_input(&self) -> Option<Result<Vec<u8>>>;

    /// Send a structured event
    async fn emit(&self, message: &Message) -> Result<()>;

    /// Send a raw audio chunk
    async fn emit_audio(&self, audio: &[u8]) -> Result<()>;

    /// Short name for logs and metrics
    fn kind(&self) -> &'static str;
}
