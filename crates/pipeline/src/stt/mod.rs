//! Speech-to-Text engines
//!
//! - [`HttpStt`]: OpenAI-compatible `/audio/transcriptions` backend with
//!   silence-aware windowing

mod http;
mod segmenter;

pub use http::{encode_wav, HttpStt, HttpSttConfig};
pub use segmenter::{Segment, Segmenter};
