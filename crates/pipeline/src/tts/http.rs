//! OpenAI-compatible HTTP speech synthesis backend
//!
//! Text increments are cut into sentences; each sentence is one streamed
//! `/audio/speech` request. A single worker per utterance keeps audio in
//! sentence order and emits the end-of-utterance marker after the last one.

use futures::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use voice_chain_config::TtsSettings;
use voice_chain_core::{Error, Result, SpeechEvents, TextToSpeech};

use super::sentence::SentenceSplitter;
use crate::PipelineError;

/// HTTP TTS configuration
#[derive(Debug, Clone)]
pub struct HttpTtsConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub voice: String,
    pub response_format: String,
    pub timeout: Duration,
}

impl From<&TtsSettings> for HttpTtsConfig {
    fn from(settings: &TtsSettings) -> Self {
        Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            voice: settings.voice.clone(),
            response_format: settings.response_format.clone(),
            timeout: settings.timeout(),
        }
    }
}

impl Default for HttpTtsConfig {
    fn default() -> Self {
        Self::from(&TtsSettings::default())
    }
}

impl HttpTtsConfig {
    fn speech_url(&self) -> String {
        format!("{}/audio/speech", self.base_url)
    }

    fn is_pcm(&self) -> bool {
        self.response_format.eq_ignore_ascii_case("pcm")
    }
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
}

/// Keeps PCM16 chunks on sample boundaries across arbitrary body splits
#[derive(Debug, Default)]
pub struct Pcm16Aligner {
    carry: Option<u8>,
}

impl Pcm16Aligner {
    pub fn align(&mut self, chunk: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(chunk.len() + 1);
        if let Some(byte) = self.carry.take() {
            out.push(byte);
        }
        out.extend_from_slice(chunk);
        if out.len() % 2 == 1 {
            self.carry = out.pop();
        }
        out
    }
}

struct Utterance {
    splitter: SentenceSplitter,
    tx: mpsc::UnboundedSender<String>,
    worker: JoinHandle<()>,
}

/// Incremental synthesis over a request/response speech API
pub struct HttpTts {
    config: Arc<HttpTtsConfig>,
    client: reqwest::Client,
    events: Arc<dyn SpeechEvents>,
    utterance: Mutex<Option<Utterance>>,
    /// Flushed utterances still being synthesized
    draining: Mutex<Vec<JoinHandle<()>>>,
}

impl HttpTts {
    pub fn new(
        config: HttpTtsConfig,
        events: Arc<dyn SpeechEvents>,
    ) -> std::result::Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PipelineError::Tts(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config: Arc::new(config),
            client,
            events,
            utterance: Mutex::new(None),
            draining: Mutex::new(Vec::new()),
        })
    }

    fn open_utterance(&self) -> Utterance {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(
            self.client.clone(),
            Arc::clone(&self.config),
            Arc::clone(&self.events),
            rx,
        ));
        Utterance {
            splitter: SentenceSplitter::new(),
            tx,
            worker,
        }
    }
}

#[async_trait::async_trait]
impl TextToSpeech for HttpTts {
    async fn synthesize(&self, text: &str, is_final: bool) -> Result<()> {
        let mut guard = self.utterance.lock();
        let utterance = guard.get_or_insert_with(|| self.open_utterance());

        let mut sentences = utterance.splitter.push(text);
        if is_final {
            sentences.extend(utterance.splitter.flush());
        }
        for sentence in sentences {
            utterance
                .tx
                .send(sentence)
                .map_err(|_| Error::Tts("synthesis worker gone".to_string()))?;
        }

        if is_final {
            // Closing the channel tells the worker to finish and mark the end
            if let Some(done) = guard.take() {
                let mut draining = self.draining.lock();
                draining.retain(|handle| !handle.is_finished());
                draining.push(done.worker);
            }
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let current = self.utterance.lock().take();
        let draining: Vec<JoinHandle<()>> = std::mem::take(&mut *self.draining.lock());

        let mut aborted = 0;
        for handle in current.map(|u| u.worker).into_iter().chain(draining) {
            if !handle.is_finished() {
                handle.abort();
                aborted += 1;
            }
            // Once awaited, an aborted worker can no longer report audio
            if let Err(e) = handle.await {
                if e.is_panic() {
                    tracing::error!(error = %e, "Synthesis worker panicked");
                }
            }
        }
        if aborted > 0 {
            tracing::debug!(aborted, "TTS synthesis aborted");
        }
        Ok(())
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

async fn run_worker(
    client: reqwest::Client,
    config: Arc<HttpTtsConfig>,
    events: Arc<dyn SpeechEvents>,
    mut rx: mpsc::UnboundedReceiver<String>,
) {
    let mut aligner = Pcm16Aligner::default();

    while let Some(sentence) = rx.recv().await {
        tracing::debug!(sentence = %sentence, "Synthesizing");
        if let Err(e) = stream_speech(&client, &config, &*events, &sentence, &mut aligner).await {
            events.on_error(e.into());
            return;
        }
    }

    events.on_audio(Vec::new(), true);
    events.on_audio_complete();
}

async fn stream_speech(
    client: &reqwest::Client,
    config: &HttpTtsConfig,
    events: &dyn SpeechEvents,
    sentence: &str,
    aligner: &mut Pcm16Aligner,
) -> std::result::Result<(), PipelineError> {
    let body = SpeechRequest {
        model: &config.model,
        input: sentence,
        voice: &config.voice,
        response_format: &config.response_format,
    };

    let mut request = client.post(config.speech_url()).json(&body);
    if let Some(key) = &config.api_key {
        request = request.bearer_auth(key);
    }

    let response = request
        .send()
        .await
        .map_err(|e| PipelineError::Tts(format!("Speech request failed: {}", e)))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(PipelineError::Tts(format!(
            "Speech API error {}: {}",
            status, body
        )));
    }

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| PipelineError::Tts(format!("Speech stream error: {}", e)))?;
        let audio = if config.is_pcm() {
            aligner.align(&chunk)
        } else {
            chunk.to_vec()
        };
        if !audio.is_empty() {
            events.on_audio(audio, false);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingEvents {
        audio: Mutex<Vec<(Vec<u8>, bool)>>,
        completed: Mutex<u32>,
    }

    impl SpeechEvents for RecordingEvents {
        fn on_text(&self, _text: &str, _is_final: bool) {}
        fn on_text_complete(&self) {}
        fn on_audio(&self, audio: Vec<u8>, is_final: bool) {
            self.audio.lock().push((audio, is_final));
        }
        fn on_audio_complete(&self) {
            *self.completed.lock() += 1;
        }
        fn on_error(&self, _error: Error) {}
    }

    #[test]
    fn test_pcm_aligner() {
        let mut aligner = Pcm16Aligner::default();
        assert_eq!(aligner.align(&[1, 2, 3]), vec![1, 2]);
        assert_eq!(aligner.align(&[4]), vec![3, 4]);
        assert_eq!(aligner.align(&[5]), Vec::<u8>::new());
        assert_eq!(aligner.align(&[6, 7, 8]), vec![5, 6, 7, 8]);
    }

    #[tokio::test]
    async fn test_empty_flush_still_marks_end_of_utterance() {
        let events = Arc::new(RecordingEvents::default());
        let tts = HttpTts::new(HttpTtsConfig::default(), events.clone()).unwrap();

        // No text at all: no request is made, only the end marker is emitted
        tts.synthesize("", true).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), async {
            while *events.completed.lock() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        assert_eq!(events.audio.lock().as_slice(), &[(Vec::new(), true)]);
        tts.stop().await.unwrap();
        tts.stop().await.unwrap();
    }
}
