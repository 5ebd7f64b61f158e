//! Collaborator traits for the turn chain
//!
//! Every external collaborator sits behind one of these traits so the chain can
//! be driven by real engines in production and by in-process fakes in tests.
//!
//! ```text
//! Speech:
//!   - SpeechToText: push audio, results arrive via SpeechEvents
//!   - TextToSpeech: push text increments, audio arrives via SpeechEvents
//!   - SpeechEvents: callback sink the engines report into
//!
//! Language models:
//!   - LanguageModel: one prompt in, a finite stream of text deltas out
//!
//! Transport:
//!   - ConversationClient: caller-facing duplex (audio in, events/audio out)
//! ```

mod client;
mod events;
mod llm;
mod speech;

pub use client::ConversationClient;
pub use events::SpeechEvents;
pub use llm::{LanguageModel, TextStream};
pub use speech::{SpeechToText, TextToSpeech};
