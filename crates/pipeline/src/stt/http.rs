//! OpenAI-compatible HTTP transcription backend
//!
//! Audio pushed through `recognize` is windowed by the [`Segmenter`] and handed
//! to a single worker task per session, so transcriptions reach the event sink
//! in capture order even though each one is a separate request. Closing a
//! session cancels its worker: nothing transcribed for a closed session is ever
//! reported.

use parking_lot::Mutex;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use voice_chain_config::SttSettings;
use voice_chain_core::{pcm16_to_samples, Error, Result, SpeechEvents, SpeechToText};

use super::segmenter::{Segment, Segmenter};
use crate::PipelineError;

/// HTTP STT configuration
#[derive(Debug, Clone)]
pub struct HttpSttConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub language: Option<String>,
    pub sample_rate: u32,
    pub window_ms: u64,
    pub silence_ms: u64,
    pub silence_rms: f32,
    pub min_speech_ms: u64,
    pub timeout: Duration,
}

impl From<&SttSettings> for HttpSttConfig {
    fn from(settings: &SttSettings) -> Self {
        Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            language: settings.language.clone(),
            sample_rate: settings.sample_rate,
            window_ms: settings.window_ms,
            silence_ms: settings.silence_ms,
            silence_rms: settings.silence_rms,
            min_speech_ms: settings.min_speech_ms,
            timeout: settings.timeout(),
        }
    }
}

impl Default for HttpSttConfig {
    fn default() -> Self {
        Self::from(&SttSettings::default())
    }
}

impl HttpSttConfig {
    fn transcriptions_url(&self) -> String {
        format!("{}/audio/transcriptions", self.base_url)
    }

    fn segmenter(&self) -> Segmenter {
        Segmenter::new(
            self.sample_rate,
            self.window_ms,
            self.silence_ms,
            self.min_speech_ms,
            self.silence_rms,
        )
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

struct Session {
    segmenter: Segmenter,
    tx: mpsc::UnboundedSender<Segment>,
    worker: JoinHandle<()>,
}

/// Streaming recognition over a request/response transcription API
pub struct HttpStt {
    config: Arc<HttpSttConfig>,
    client: reqwest::Client,
    events: Arc<dyn SpeechEvents>,
    session: Mutex<Option<Session>>,
}

impl HttpStt {
    pub fn new(
        config: HttpSttConfig,
        events: Arc<dyn SpeechEvents>,
    ) -> std::result::Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PipelineError::Stt(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config: Arc::new(config),
            client,
            events,
            session: Mutex::new(None),
        })
    }

    /// Open a session if none is open; returns true when one was created
    fn ensure_session(&self) -> bool {
        let mut session = self.session.lock();
        if session.is_some() {
            return false;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(
            self.client.clone(),
            Arc::clone(&self.config),
            Arc::clone(&self.events),
            rx,
        ));
        *session = Some(Session {
            segmenter: self.config.segmenter(),
            tx,
            worker,
        });
        true
    }
}

#[async_trait::async_trait]
impl SpeechToText for HttpStt {
    async fn start(&self) -> Result<()> {
        if self.ensure_session() {
            tracing::debug!(model = %self.config.model, "STT session opened");
        }
        Ok(())
    }

    async fn recognize(&self, audio: &[u8], is_final: bool) -> Result<()> {
        self.start().await?;

        let mut guard = self.session.lock();
        let Some(session) = guard.as_mut() else {
            return Err(Error::Stt("session closed during recognize".to_string()));
        };
        if let Some(segment) = session.segmenter.push(audio, is_final) {
            session
                .tx
                .send(segment)
                .map_err(|_| Error::Stt("transcription worker gone".to_string()))?;
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let Some(session) = self.session.lock().take() else {
            return Ok(());
        };

        let unsent = session.segmenter.pending_bytes();
        let in_flight = !session.worker.is_finished();
        session.worker.abort();
        // Wait for the cancellation so no late result can slip out after stop
        if let Err(e) = session.worker.await {
            if e.is_panic() {
                tracing::error!(error = %e, "Transcription worker panicked");
            }
        }

        self.events.on_text_complete();
        tracing::debug!(
            model = %self.config.model,
            unsent_bytes = unsent,
            in_flight,
            "STT session closed"
        );
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.session.lock().is_some()
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

async fn run_worker(
    client: reqwest::Client,
    config: Arc<HttpSttConfig>,
    events: Arc<dyn SpeechEvents>,
    mut rx: mpsc::UnboundedReceiver<Segment>,
) {
    while let Some(segment) = rx.recv().await {
        match transcribe(&client, &config, &segment.pcm).await {
            Ok(text) => {
                let text = text.trim();
                tracing::debug!(text, is_final = segment.is_final, "Transcribed window");
                events.on_text(text, segment.is_final);
            }
            Err(e) => {
                events.on_error(e.into());
                return;
            }
        }
    }
}

async fn transcribe(
    client: &reqwest::Client,
    config: &HttpSttConfig,
    pcm: &[u8],
) -> std::result::Result<String, PipelineError> {
    let wav = encode_wav(pcm, config.sample_rate)?;
    let file = Part::bytes(wav)
        .file_name("audio.wav")
        .mime_str("audio/wav")
        .map_err(|e| PipelineError::Stt(e.to_string()))?;

    let mut form = Form::new()
        .part("file", file)
        .text("model", config.model.clone())
        .text("response_format", "json");
    if let Some(language) = &config.language {
        form = form.text("language", language.clone());
    }

    let mut request = client.post(config.transcriptions_url()).multipart(form);
    if let Some(key) = &config.api_key {
        request = request.bearer_auth(key);
    }

    let response = request
        .send()
        .await
        .map_err(|e| PipelineError::Stt(format!("Transcription request failed: {}", e)))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(PipelineError::Stt(format!(
            "Transcription API error {}: {}",
            status, body
        )));
    }

    let parsed: TranscriptionResponse = response
        .json()
        .await
        .map_err(|e| PipelineError::Stt(format!("Failed to parse transcription: {}", e)))?;
    Ok(parsed.text)
}

/// Wrap PCM16 mono audio in a WAV container
pub fn encode_wav(pcm: &[u8], sample_rate: u32) -> std::result::Result<Vec<u8>, PipelineError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for sample in pcm16_to_samples(pcm) {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}
