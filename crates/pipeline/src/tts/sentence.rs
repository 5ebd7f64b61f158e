//! Sentence chunking for incremental synthesis

/// Terminators that close a sentence immediately
const CJK_TERMINATORS: &[char] = &['。', '！', '？', '；', '…', '\n'];
/// Terminators that close a sentence only when followed by whitespace,
/// so "3.5" and "e.g" survive streaming
const ASCII_TERMINATORS: &[char] = &['.', '!', '?', ';'];

/// Buffers streamed text and releases whole sentences
#[derive(Debug, Default)]
pub struct SentenceSplitter {
    pending: String,
}

impl SentenceSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append text; returns every sentence completed by it
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.pending.push_str(text);

        let mut sentences = Vec::new();
        let mut start = 0;
        let mut chars = self.pending.char_indices().peekable();

        while let Some((idx, ch)) = chars.next() {
            let end = idx + ch.len_utf8();
            let closes = if CJK_TERMINATORS.contains(&ch) {
                true
            } else if ASCII_TERMINATORS.contains(&ch) {
                matches!(chars.peek(), Some((_, next)) if next.is_whitespace())
            } else {
                false
            };

            if closes {
                let sentence = self.pending[start..end].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence.to_string());
                }
                start = end;
            }
        }

        self.pending.drain(..start);
        sentences
    }

    /// Release the incomplete remainder, if any
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        let rest = rest.trim();
        (!rest.is_empty()).then(|| rest.to_string())
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
