//! STT, TTS and LLM endpoint settings

use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_SPEECH_BASE_URL: &str = "http://localhost:8000/v1";
const DEFAULT_LLM_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful voice assistant. Reply in the user's \
language. Keep every answer very short, because it will be spoken aloud.";

/// OpenAI-compatible `/audio/transcriptions` endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttSettings {
    #[serde(default = "default_speech_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_stt_model")]
    pub model: String,

    /// ISO-639-1 hint passed to the engine
    #[serde(default)]
    pub language: Option<String>,

    /// Input PCM16 mono sample rate
    #[serde(default = "default_stt_sample_rate")]
    pub sample_rate: u32,

    /// Maximum audio per transcription request
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Trailing quiet audio that ends a window early and marks it final
    #[serde(default = "default_silence_ms")]
    pub silence_ms: u64,

    /// RMS (i16 scale) below which audio counts as silence
    #[serde(default = "default_silence_rms")]
    pub silence_rms: f32,

    /// Windows shorter than this are not sent
    #[serde(default = "default_min_speech_ms")]
    pub min_speech_ms: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_speech_base_url() -> String {
    DEFAULT_SPEECH_BASE_URL.to_string()
}

fn default_stt_model() -> String {
    "whisper-1".to_string()
}

fn default_stt_sample_rate() -> u32 {
    16000
}

fn default_window_ms() -> u64 {
    3000
}

fn default_silence_ms() -> u64 {
    400
}

fn default_silence_rms() -> f32 {
    300.0
}

fn default_min_speech_ms() -> u64 {
    200
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for SttSettings {
    fn default() -> Self {
        Self {
            base_url: default_speech_base_url(),
            api_key: None,
            model: default_stt_model(),
            language: None,
            sample_rate: default_stt_sample_rate(),
            window_ms: default_window_ms(),
            silence_ms: default_silence_ms(),
            silence_rms: default_silence_rms(),
            min_speech_ms: default_min_speech_ms(),
            timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl SttSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// OpenAI-compatible `/audio/speech` endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsSettings {
    #[serde(default = "default_speech_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_tts_model")]
    pub model: String,

    #[serde(default = "default_voice")]
    pub voice: String,

    /// `pcm` streams raw PCM16 mono; anything else is passed through untouched
    #[serde(default = "default_response_format")]
    pub response_format: String,

    /// Output sample rate of `pcm` responses
    #[serde(default = "default_tts_sample_rate")]
    pub sample_rate: u32,

    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_tts_model() -> String {
    "tts-1".to_string()
}

fn default_voice() -> String {
    "alloy".to_string()
}

fn default_response_format() -> String {
    "pcm".to_string()
}

fn default_tts_sample_rate() -> u32 {
    24000
}

impl Default for TtsSettings {
    fn default() -> Self {
        Self {
            base_url: default_speech_base_url(),
            api_key: None,
            model: default_tts_model(),
            voice: default_voice(),
            response_format: default_response_format(),
            sample_rate: default_tts_sample_rate(),
            timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl TtsSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// OpenAI-compatible `/chat/completions` endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Most recent history messages sent with each query
    #[serde(default = "default_history_messages")]
    pub history_messages: usize,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_llm_base_url() -> String {
    DEFAULT_LLM_BASE_URL.to_string()
}

fn default_llm_model() -> String {
    "qwen-plus".to_string()
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_history_messages() -> usize {
    5
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    512
}

fn default_llm_timeout_secs() -> u64 {
    60
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key: None,
            model: default_llm_model(),
            system_prompt: default_system_prompt(),
            history_messages: default_history_messages(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

impl LlmSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
