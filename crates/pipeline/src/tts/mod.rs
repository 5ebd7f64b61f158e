//! Text-to-Speech engines
//!
//! - [`HttpTts`]: OpenAI-compatible `/audio/speech` backend with sentence
//!   chunking and streamed response bodies

mod http;
mod sentence;

pub use http::{HttpTts, HttpTtsConfig, Pcm16Aligner};
pub use sentence::SentenceSplitter;
