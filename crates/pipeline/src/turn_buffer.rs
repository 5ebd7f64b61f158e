//! Turn buffer: debounces recognized fragments into finalized user queries
//!
//! A turn is complete when the newest fragment is final and has been quiet for
//! longer than `final_quiet`, or when any fragment has been quiet for longer
//! than `hard_timeout` (engines that never mark finality). Both comparisons are
//! strict.

use async_stream::stream;
use futures::Stream;
use parking_lot::Mutex;
use std::time::Duration;
use voice_chain_config::ChainSettings;
use voice_chain_core::{Payload, Role};

/// Debounce thresholds
#[derive(Debug, Clone)]
pub struct TurnBufferConfig {
    pub final_quiet: Duration,
    pub hard_timeout: Duration,
    /// Sleep between evaluations while nothing is ready
    pub poll_interval: Duration,
}

impl Default for TurnBufferConfig {
    fn default() -> Self {
        Self::from(&ChainSettings::default())
    }
}

impl From<&ChainSettings> for TurnBufferConfig {
    fn from(settings: &ChainSettings) -> Self {
        Self {
            final_quiet: settings.final_quiet(),
            hard_timeout: settings.hard_timeout(),
            poll_interval: settings.poll_interval(),
        }
    }
}

/// Pending recognized text and synthesized audio for one chain
pub struct TurnBuffer {
    config: TurnBufferConfig,
    pending_texts: Mutex<Vec<Payload>>,
    /// Audit trail only; nothing reads it back for correctness
    pending_audios: Mutex<Vec<Payload>>,
}

impl TurnBuffer {
    pub fn new(config: TurnBufferConfig) -> Self {
        Self {
            config,
            pending_texts: Mutex::new(Vec::new()),
            pending_audios: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &TurnBufferConfig {
        &self.config
    }

    /// Append a recognized fragment
    pub fn record_text(&self, text: impl Into<String>, is_final: bool) {
        self.pending_texts
            .lock()
            .push(Payload::text(Role::User, text, is_final));
    }

    /// Append a synthesized fragment
    pub fn record_audio(&self, audio: Vec<u8>, is_final: bool) {
        self.pending_audios
            .lock()
            .push(Payload::audio(Role::Assistant, audio, is_final));
    }

    /// Drop everything pending
    pub fn clear(&self) {
        self.pending_texts.lock().clear();
        self.pending_audios.lock().clear();
    }

    /// Drain the audio audit trail, e.g. once a turn's audio has been relayed
    pub fn take_audios(&self) -> Vec<Payload> {
        std::mem::take(&mut *self.pending_audios.lock())
    }

    pub fn pending_text_count(&self) -> usize {
        self.pending_texts.lock().len()
    }

    pub fn pending_audio_count(&self) -> usize {
        self.pending_audios.lock().len()
    }

    /// Evaluate the debounce rule once
    ///
    /// When the rule fires, every pending fragment is folded in arrival order
    /// and the pending list is cleared under the same lock. A blank fold is
    /// discarded rather than returned.
    pub fn try_take_query(&self) -> Option<String> {
        let mut texts = self.pending_texts.lock();
        let last = texts.last()?;

        let elapsed = last.elapsed();
        let ready = (last.is_final() && elapsed > self.config.final_quiet)
            || elapsed > self.config.hard_timeout;
        if !ready {
            return None;
        }

        let query: String = texts
            .drain(..)
            .filter_map(|payload| payload.text_chunk().map(str::to_owned))
            .collect();
        drop(texts);

        if query.trim().is_empty() {
            tracing::debug!("Debounce fired on blank fragments, nothing to dispatch");
            return None;
        }
        Some(query)
    }

    /// Endless stream of finalized queries
    ///
    /// Polls every `poll_interval` while nothing is ready. Dropping the stream
    /// and calling this again resumes from the current pending state.
    pub fn next_query(&self) -> impl Stream<Item = String> + Send + '_ {
        stream! {
            loop {
                match self.try_take_query() {
                    Some(query) => {
                        tracing::info!(query = %query, "Turn complete");
                        yield query;
                    }
                    None => tokio::time::sleep(self.config.poll_interval).await,
                }
            }
        }
    }
}

impl Default for TurnBuffer {
    fn default() -> Self {
        Self::new(TurnBufferConfig::default())
    }
}
