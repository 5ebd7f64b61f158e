//! Language model adapter
//!
//! Bridges an [`LlmBackend`] to the core `LanguageModel` trait. The adapter owns
//! the system prompt and the rolling history, so the turn chain only ever sends
//! the bare query.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use voice_chain_config::LlmSettings;
use voice_chain_core::{Error, LanguageModel, Result, TextStream};

use crate::backend::{FinishReason, LlmBackend, OpenAIBackend, OpenAIConfig};
use crate::prompt::{ConversationHistory, PromptBuilder};
use crate::LlmError;

const CHUNK_CHANNEL_CAPACITY: usize = 100;

/// Aborts the backend request if the reply stream is dropped early
struct AbortOnDrop(JoinHandle<std::result::Result<crate::GenerationResult, LlmError>>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct LanguageModelAdapter {
    backend: Arc<dyn LlmBackend>,
    system_prompt: String,
    history: Arc<Mutex<ConversationHistory>>,
    model_name: String,
}

impl LanguageModelAdapter {
    pub fn new<B: LlmBackend + 'static>(
        backend: B,
        system_prompt: impl Into<String>,
        history_messages: usize,
    ) -> Self {
        Self::from_arc(Arc::new(backend), system_prompt, history_messages)
    }

    pub fn from_arc(
        backend: Arc<dyn LlmBackend>,
        system_prompt: impl Into<String>,
        history_messages: usize,
    ) -> Self {
        let model_name = backend.model_name().to_string();
        Self {
            backend,
            system_prompt: system_prompt.into(),
            history: Arc::new(Mutex::new(ConversationHistory::new(history_messages))),
            model_name,
        }
    }

    /// OpenAI-compatible backend configured from settings
    pub fn from_settings(settings: &LlmSettings) -> std::result::Result<Self, LlmError> {
        let backend = OpenAIBackend::new(OpenAIConfig::from(settings))?;
        Ok(Self::new(
            backend,
            settings.system_prompt.clone(),
            settings.history_messages,
        ))
    }

    pub fn history_len(&self) -> usize {
        self.history.lock().len()
    }
}

#[async_trait]
impl LanguageModel for LanguageModelAdapter {
    fn generate_stream<'a>(&'a self, query: &'a str) -> TextStream<'a> {
        let messages = PromptBuilder::new()
            .system_prompt(&self.system_prompt)
            .with_history(&self.history.lock().messages())
            .user_message(query)
            .build();
        let backend = Arc::clone(&self.backend);

        Box::pin(async_stream::stream! {
            let (tx, mut rx) = mpsc::channel::<String>(CHUNK_CHANNEL_CAPACITY);
            let mut task = AbortOnDrop(tokio::spawn(async move {
                backend.generate_stream(&messages, tx).await
            }));

            while let Some(text) = rx.recv().await {
                yield Ok(text);
            }

            match (&mut task.0).await {
                Ok(Ok(result)) => {
                    if result.finish_reason != FinishReason::Cancelled {
                        self.history.lock().record_turn(query, result.text);
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!(model = %self.model_name, error = %e, "LLM stream failed");
                    yield Err(Error::from(e));
                }
                Err(e) => {
                    yield Err(Error::Llm(format!("Task join error: {}", e)));
                }
            }
        })
    }

    async fn stop(&self) -> Result<()> {
        self.history.lock().clear();
        tracing::debug!(model = %self.model_name, "LLM history cleared");
        Ok(())
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::GenerationResult;
    use crate::prompt::{Message, Role};
    use futures::StreamExt;

    struct MockBackend {
        reply: Vec<&'static str>,
        fail: bool,
        seen: Mutex<Vec<Vec<Message>>>,
    }

    impl MockBackend {
        fn new(reply: Vec<&'static str>) -> Self {
            Self {
                reply,
                fail: false,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmBackend for MockBackend {
        async fn generate_stream(
            &self,
            messages: &[Message],
            tx: mpsc::Sender<String>,
        ) -> std::result::Result<GenerationResult, LlmError> {
            self.seen.lock().push(messages.to_vec());
            if self.fail {
                return Err(LlmError::Api("HTTP 500".into()));
            }
            for chunk in &self.reply {
                let _ = tx.send(chunk.to_string()).await;
            }
            Ok(GenerationResult {
                text: self.reply.concat(),
                chunks: self.reply.len(),
                time_to_first_chunk_ms: 1,
                total_time_ms: 2,
                finish_reason: FinishReason::Stop,
            })
        }

        fn model_name(&self) -> &str {
            "mock-model"
        }
    }

    async fn collect(adapter: &LanguageModelAdapter, query: &str) -> Vec<Result<String>> {
        adapter.generate_stream(query).collect().await
    }

    #[tokio::test]
    async fn test_stream_and_history() {
        let backend = Arc::new(MockBackend::new(vec!["hi", " there"]));
        let adapter = LanguageModelAdapter::from_arc(backend.clone(), "Be brief.", 5);

        let chunks: Vec<String> = collect(&adapter, "hello")
            .await
            .into_iter()
            .map(|c| c.unwrap())
            .collect();
        assert_eq!(chunks, vec!["hi", " there"]);
        assert_eq!(adapter.history_len(), 2);

        collect(&adapter, "again").await;
        let seen = backend.seen.lock();
        let second = &seen[1];
        assert_eq!(second[0].role, Role::System);
        assert_eq!(second[1], Message::user("hello"));
        assert_eq!(second[2], Message::assistant("hi there"));
        assert_eq!(second[3], Message::user("again"));
    }

    #[tokio::test]
    async fn test_backend_error_propagates() {
        let backend = MockBackend {
            fail: true,
            ..MockBackend::new(vec![])
        };
        let adapter = LanguageModelAdapter::new(backend, "", 5);

        let items = collect(&adapter, "hello").await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(Error::Llm(_))));
        // Failed turns are not remembered
        assert_eq!(adapter.history_len(), 0);
    }

    #[tokio::test]
    async fn test_stop_clears_history() {
        let adapter = LanguageModelAdapter::new(MockBackend::new(vec!["ok"]), "", 5);
        collect(&adapter, "hello").await;
        assert_eq!(adapter.history_len(), 2);

        adapter.stop().await.unwrap();
        assert_eq!(adapter.history_len(), 0);
        assert_eq!(adapter.model_name(), "mock-model");
    }
}
