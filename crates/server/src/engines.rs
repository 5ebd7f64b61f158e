//! Production engine wiring: OpenAI-compatible HTTP STT, TTS and chat

use std::sync::Arc;
use voice_chain_config::{LlmSettings, Settings, SttSettings, TtsSettings};
use voice_chain_core::SpeechEvents;
use voice_chain_llm::LanguageModelAdapter;
use voice_chain_pipeline::{
    EngineFactory, Engines, HttpStt, HttpSttConfig, HttpTts, HttpTtsConfig, PipelineError,
};

/// Builds one HTTP engine set per chain from settings
#[derive(Debug, Clone)]
pub struct HttpEngineFactory {
    stt: SttSettings,
    tts: TtsSettings,
    llm: LlmSettings,
}

impl HttpEngineFactory {
    pub fn new(stt: SttSettings, tts: TtsSettings, llm: LlmSettings) -> Self {
        Self { stt, tts, llm }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.stt.clone(),
            settings.tts.clone(),
            settings.llm.clone(),
        )
    }
}

impl EngineFactory for HttpEngineFactory {
    fn create(
        &self,
        session_id: &str,
        events: Arc<dyn SpeechEvents>,
    ) -> Result<Engines, PipelineError> {
        let stt = HttpStt::new(HttpSttConfig::from(&self.stt), Arc::clone(&events))?;
        let tts = HttpTts::new(HttpTtsConfig::from(&self.tts), events)?;
        let llm = LanguageModelAdapter::from_settings(&self.llm)
            .map_err(|e| PipelineError::Core(e.into()))?;

        tracing::debug!(
            session_id,
            stt = %self.stt.model,
            tts = %self.tts.model,
            llm = %self.llm.model,
            "Engines created"
        );

        Ok(Engines {
            stt: Arc::new(stt),
            tts: Arc::new(tts),
            llm: Arc::new(llm),
        })
    }
}
