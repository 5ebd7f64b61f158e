//! Splits a PCM16 stream into transcription windows

use voice_chain_core::audio::{pcm16_duration_ms, pcm16_rms};

/// One window of audio ready for transcription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub pcm: Vec<u8>,
    /// Trailing silence or an explicit final frame closed this window
    pub is_final: bool,
}

/// Accumulates PCM16 mono audio and cuts it into windows
///
/// A window closes when it reaches `window_ms`, when its last `silence_ms`
/// are quiet (final), or when the caller forces it (final). Windows without
/// speech or shorter than `min_speech_ms` are dropped.
#[derive(Debug)]
pub struct Segmenter {
    sample_rate: u32,
    window_bytes: usize,
    silence_bytes: usize,
    frame_bytes: usize,
    min_speech_ms: u64,
    silence_rms: f32,
    pending: Vec<u8>,
}

impl Segmenter {
    pub fn new(
        sample_rate: u32,
        window_ms: u64,
        silence_ms: u64,
        min_speech_ms: u64,
        silence_rms: f32,
    ) -> Self {
        let bytes_per_ms = (sample_rate as usize * 2) / 1000;
        Self {
            sample_rate,
            window_bytes: bytes_per_ms * window_ms as usize,
            silence_bytes: bytes_per_ms * silence_ms as usize,
            // 20ms analysis frames
            frame_bytes: (bytes_per_ms * 20).max(2),
            min_speech_ms,
            silence_rms,
            pending: Vec::new(),
        }
    }

    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }

    /// Append audio; returns a window if one closed
    pub fn push(&mut self, audio: &[u8], force_final: bool) -> Option<Segment> {
        self.pending.extend_from_slice(audio);

        let tail_quiet = self.silence_bytes > 0
            && self.pending.len() >= self.silence_bytes
            && pcm16_rms(&self.pending[self.pending.len() - self.silence_bytes..])
                < self.silence_rms;
        let full = self.pending.len() >= self.window_bytes;

        if !(force_final || tail_quiet || full) {
            return None;
        }
        self.take(force_final || tail_quiet)
    }

    /// Close whatever is pending as a final window
    pub fn flush(&mut self) -> Option<Segment> {
        self.take(true)
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    fn take(&mut self, is_final: bool) -> Option<Segment> {
        let pcm = std::mem::take(&mut self.pending);
        if pcm16_duration_ms(&pcm, self.sample_rate) < self.min_speech_ms || !self.has_speech(&pcm)
        {
            return None;
        }
        Some(Segment { pcm, is_final })
    }

    fn has_speech(&self, pcm: &[u8]) -> bool {
        pcm.chunks(self.frame_bytes)
            .any(|frame| pcm16_rms(frame) >= self.silence_rms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voice_chain_core::samples_to_pcm16;

    const RATE: u32 = 16000;

    fn tone(ms: usize) -> Vec<u8> {
        let samples: Vec<i16> = (0..RATE as usize * ms / 1000)
            .map(|i| if i % 2 == 0 { 4000 } else { -4000 })
            .collect();
        samples_to_pcm16(&samples)
    }

    fn silence(ms: usize) -> Vec<u8> {
        vec![0u8; RATE as usize * 2 * ms / 1000]
    }

    fn segmenter() -> Segmenter {
        Segmenter::new(RATE, 3000, 400, 200, 300.0)
    }

    #[test]
    fn test_trailing_silence_closes_final_window() {
        let mut seg = segmenter();
        assert_eq!(seg.push(&tone(500), false), None);
        assert_eq!(seg.push(&silence(200), false), None);

        let window = seg.push(&silence(200), false).expect("window should close");
        assert!(window.is_final);
        assert_eq!(window.pcm.len(), tone(500).len() + silence(400).len());
        assert_eq!(seg.pending_bytes(), 0);
    }

    #[test]
    fn test_full_window_is_not_final() {
        let mut seg = segmenter();
        let mut closed = None;
        for _ in 0..30 {
            if let Some(window) = seg.push(&tone(100), false) {
                closed = Some(window);
                break;
            }
        }
        let window = closed.expect("window should fill");
        assert!(!window.is_final);
        assert_eq!(window.pcm.len(), tone(3000).len());
    }

    #[test]
    fn test_pure_silence_is_dropped() {
        let mut seg = segmenter();
        assert_eq!(seg.push(&silence(500), false), None);
        assert_eq!(seg.pending_bytes(), 0);
    }

    #[test]
    fn test_forced_final_and_min_speech() {
        let mut seg = segmenter();
        // Too short to be worth a request
        assert_eq!(seg.push(&tone(100), true), None);

        let window = seg.push(&tone(300), true).expect("forced window");
        assert!(window.is_final);
    }

    #[test]
    fn test_flush() {
        let mut seg = segmenter();
        seg.push(&tone(300), false);
        let window = seg.flush().expect("flushed window");
        assert!(window.is_final);
        assert_eq!(seg.flush(), None);
    }
}
