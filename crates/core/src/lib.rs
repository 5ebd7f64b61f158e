//! Core traits and types for the voice turn chain
//!
//! This crate provides foundational types used across all other crates:
//! - Conversation steps, roles, payloads and outbound messages
//! - PCM16 audio helpers
//! - Collaborator traits (STT, TTS, LLM, client transport, engine callbacks)
//! - Error types

pub mod audio;
pub mod conversation;
pub mod error;
pub mod traits;

pub use audio::{pcm16_duration_ms, pcm16_rms, pcm16_to_samples, samples_to_pcm16};
pub use conversation::{ClientEvent, Message, Payload, Role, Step};
pub use error::{Error, Result};

pub use traits::{
    ConversationClient, LanguageModel, SpeechEvents, SpeechToText, TextStream, TextToSpeech,
};
