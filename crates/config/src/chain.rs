//! Turn chain timing, queue and local-device settings

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Debounce thresholds, queue capacities and loop cadence for one chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSettings {
    /// Quiet period after a final fragment before the turn is dispatched
    #[serde(default = "default_final_quiet_ms")]
    pub final_quiet_ms: u64,

    /// Quiet period after any fragment before the turn is dispatched
    #[serde(default = "default_hard_timeout_ms")]
    pub hard_timeout_ms: u64,

    /// Sleep between debounce polls
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_queue_capacity")]
    pub text_queue_capacity: usize,

    #[serde(default = "default_queue_capacity")]
    pub audio_queue_capacity: usize,

    /// Upper bound on waiting for the end-of-utterance marker after the final flush
    #[serde(default = "default_turn_done_timeout_ms")]
    pub turn_done_timeout_ms: u64,
}

fn default_final_quiet_ms() -> u64 {
    1000
}

fn default_hard_timeout_ms() -> u64 {
    3000
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_turn_done_timeout_ms() -> u64 {
    30_000
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            final_quiet_ms: default_final_quiet_ms(),
            hard_timeout_ms: default_hard_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            text_queue_capacity: default_queue_capacity(),
            audio_queue_capacity: default_queue_capacity(),
            turn_done_timeout_ms: default_turn_done_timeout_ms(),
        }
    }
}

impl ChainSettings {
    pub fn final_quiet(&self) -> Duration {
        Duration::from_millis(self.final_quiet_ms)
    }

    pub fn hard_timeout(&self) -> Duration {
        Duration::from_millis(self.hard_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn turn_done_timeout(&self) -> Duration {
        Duration::from_millis(self.turn_done_timeout_ms)
    }
}

/// What reopens the microphone on the local device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ListenTrigger {
    /// Wait for Enter on stdin
    #[default]
    Enter,
    /// Keep listening; the idle timeout only resets the gate
    Always,
}

/// Local microphone/speaker client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalSettings {
    /// Capture rate; must match `stt.sample_rate`
    #[serde(default = "default_capture_rate")]
    pub sample_rate: u32,

    /// Frames per emitted input chunk
    #[serde(default = "default_frames_per_chunk")]
    pub frames_per_chunk: usize,

    /// Chunks below this RMS (i16 scale) count as silence
    #[serde(default = "default_rms_threshold")]
    pub rms_threshold: f32,

    /// Stop listening after this long without speech
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    #[serde(default)]
    pub trigger: ListenTrigger,
}

fn default_capture_rate() -> u32 {
    16000
}

fn default_frames_per_chunk() -> usize {
    3200
}

fn default_rms_threshold() -> f32 {
    300.0
}

fn default_idle_timeout_secs() -> u64 {
    10
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            sample_rate: default_capture_rate(),
            frames_per_chunk: default_frames_per_chunk(),
            rms_threshold: default_rms_threshold(),
            idle_timeout_secs: default_idle_timeout_secs(),
            trigger: ListenTrigger::default(),
        }
    }
}

impl LocalSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}
