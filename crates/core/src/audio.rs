//! PCM16 helpers
//!
//! All audio that crosses the chain is raw little-endian signed 16-bit mono PCM.

/// Decode little-endian PCM16 bytes into samples. A trailing odd byte is ignored.
pub fn pcm16_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Encode samples as little-endian PCM16 bytes
pub fn samples_to_pcm16(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Root-mean-square level of PCM16 audio, on the raw i16 scale (0..=32768).
pub fn pcm16_rms(bytes: &[u8]) -> f32 {
    let samples = pcm16_to_samples(bytes);
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt() as f32
}

/// Duration of a PCM16 mono buffer in milliseconds
pub fn pcm16_duration_ms(bytes: &[u8], sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    (bytes.len() as u64 / 2) * 1000 / sample_rate as u64
}
