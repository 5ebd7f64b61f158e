//! LLM backend: OpenAI-compatible chat completions with SSE streaming
//!
//! Works with any server exposing `/chat/completions`:
//! - DashScope compatible mode (qwen-*)
//! - OpenAI
//! - vLLM and other local servers

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use voice_chain_config::LlmSettings;

use crate::prompt::Message;
use crate::LlmError;

/// LLM generation result
#[derive(Debug, Clone)]
pub struct GenerationResult {
    /// Full reply text
    pub text: String,
    /// Number of streamed deltas
    pub chunks: usize,
    /// Time to first delta (ms)
    pub time_to_first_chunk_ms: u64,
    /// Total generation time (ms)
    pub total_time_ms: u64,
    pub finish_reason: FinishReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    /// Receiver went away mid-stream
    Cancelled,
}

/// LLM Backend trait
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Stream the reply to `messages` into `tx`, one delta per send
    async fn generate_stream(
        &self,
        messages: &[Message],
        tx: mpsc::Sender<String>,
    ) -> Result<GenerationResult, LlmError>;

    fn model_name(&self) -> &str;
}

/// Configuration for OpenAI-compatible backends
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    /// API base, e.g. `https://api.openai.com/v1`
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self::from(&LlmSettings::default())
    }
}

impl From<&LlmSettings> for OpenAIConfig {
    fn from(settings: &LlmSettings) -> Self {
        Self {
            endpoint: settings.base_url.clone(),
            api_key: settings.api_key.clone().filter(|key| !key.is_empty()),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            timeout: settings.timeout(),
        }
    }
}

impl OpenAIConfig {
    /// Local OpenAI-compatible server without auth
    pub fn local(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
            model: model.into(),
            ..Default::default()
        }
    }
}

pub struct OpenAIBackend {
    config: OpenAIConfig,
    client: Client,
}

impl OpenAIBackend {
    pub fn new(config: OpenAIConfig) -> Result<Self, LlmError> {
        let is_local = config.endpoint.starts_with("http://localhost")
            || config.endpoint.starts_with("http://127.0.0.1");
        if config.api_key.is_none() && !is_local {
            return Err(LlmError::Configuration(
                "API key required for remote endpoints".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.config.endpoint.trim_end_matches('/'))
    }

    fn build_request(&self, messages: &[Message]) -> OpenAIChatRequest {
        OpenAIChatRequest {
            model: self.config.model.clone(),
            messages: messages.iter().map(OpenAIMessage::from).collect(),
            max_tokens: Some(self.config.max_tokens),
            temperature: Some(self.config.temperature),
            stream: true,
        }
    }
}

#[async_trait]
impl LlmBackend for OpenAIBackend {
    async fn generate_stream(
        &self,
        messages: &[Message],
        tx: mpsc::Sender<String>,
    ) -> Result<GenerationResult, LlmError> {
        let start = Instant::now();
        let mut first_chunk: Option<u64> = None;
        let mut full_text = String::new();
        let mut chunks = 0;
        let mut finish_reason = FinishReason::Stop;

        let mut request = self.client.post(self.chat_url()).json(&self.build_request(messages));
        if let Some(ref key) = self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("HTTP {}: {}", status, error_text)));
        }

        let mut stream = response.bytes_stream();
        let mut buffer = SseLineBuffer::default();

        'read: while let Some(bytes) = stream.next().await {
            buffer.push(&bytes?);

            // Process complete SSE lines
            while let Some(line) = buffer.next_line() {
                match parse_sse_line(&line)? {
                    SseLine::Delta { content, finish } => {
                        if let Some(reason) = finish {
                            finish_reason = reason;
                        }
                        if content.is_empty() {
                            continue;
                        }
                        if first_chunk.is_none() {
                            first_chunk = Some(start.elapsed().as_millis() as u64);
                        }
                        full_text.push_str(&content);
                        chunks += 1;
                        if tx.send(content).await.is_err() {
                            finish_reason = FinishReason::Cancelled;
                            break 'read;
                        }
                    }
                    SseLine::Done => break 'read,
                    SseLine::Skip => {}
                }
            }
        }

        let total_time_ms = start.elapsed().as_millis() as u64;
        tracing::debug!(
            model = %self.config.model,
            chunks,
            first_chunk_ms = first_chunk.unwrap_or(total_time_ms),
            total_time_ms,
            "LLM stream finished"
        );

        Ok(GenerationResult {
            text: full_text,
            chunks,
            time_to_first_chunk_ms: first_chunk.unwrap_or(total_time_ms),
            total_time_ms,
            finish_reason,
        })
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Raw body bytes split into lines
///
/// Network chunks can end inside a multi-byte character, so bytes are only
/// decoded once a whole line has arrived.
#[derive(Debug, Default)]
pub(crate) struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    pub(crate) fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    pub(crate) fn next_line(&mut self) -> Option<String> {
        let line_end = self.pending.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.pending.drain(..=line_end).collect();
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

/// One parsed server-sent-events line
#[derive(Debug, PartialEq)]
pub(crate) enum SseLine {
    Delta {
        content: String,
        finish: Option<FinishReason>,
    },
    Done,
    /// Blank lines, comments, keep-alives, role-only deltas
    Skip,
}

pub(crate) fn parse_sse_line(line: &str) -> Result<SseLine, LlmError> {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseLine::Skip);
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }
    if data.is_empty() {
        return Ok(SseLine::Skip);
    }

    let chunk: OpenAIStreamChunk =
        serde_json::from_str(data).map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
    if let Some(error) = chunk.error {
        return Err(LlmError::Api(error.message));
    }

    let Some(choice) = chunk.choices.into_iter().next() else {
        return Ok(SseLine::Skip);
    };
    let finish = match choice.finish_reason.as_deref() {
        Some("stop") => Some(FinishReason::Stop),
        Some("length") => Some(FinishReason::Length),
        _ => None,
    };
    let content = choice.delta.and_then(|d| d.content).unwrap_or_default();

    if content.is_empty() && finish.is_none() {
        return Ok(SseLine::Skip);
    }
    Ok(SseLine::Delta { content, finish })
}

// OpenAI API types
#[derive(Debug, Serialize)]
struct OpenAIChatRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

impl From<&Message> for OpenAIMessage {
    fn from(msg: &Message) -> Self {
        Self {
            role: msg.role.to_string(),
            content: msg.content.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAIStreamChoice>,
    #[serde(default)]
    error: Option<OpenAIError>,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChoice {
    delta: Option<OpenAIDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::Role;

    #[test]
    fn test_config_from_settings() {
        let settings = LlmSettings {
            api_key: Some(String::new()),
            ..Default::default()
        };
        let config = OpenAIConfig::from(&settings);
        assert_eq!(config.model, "qwen-plus");
        assert_eq!(config.timeout, Duration::from_secs(60));
        // Empty keys are treated as absent
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_backend_creation() {
        let backend = OpenAIBackend::new(OpenAIConfig::local("http://localhost:8000/v1", "test"));
        assert!(backend.is_ok());

        // Remote endpoint requires API key
        assert!(OpenAIBackend::new(OpenAIConfig::default()).is_err());

        let config = OpenAIConfig {
            api_key: Some("sk-xxx".into()),
            ..Default::default()
        };
        assert!(OpenAIBackend::new(config).is_ok());
    }

    #[test]
    fn test_chat_url() {
        let backend =
            OpenAIBackend::new(OpenAIConfig::local("http://localhost:8000/v1/", "m")).unwrap();
        assert_eq!(backend.chat_url(), "http://localhost:8000/v1/chat/completions");
    }

    #[test]
    fn test_request_serialization() {
        let backend =
            OpenAIBackend::new(OpenAIConfig::local("http://localhost:8000", "qwen-plus")).unwrap();
        let request = backend.build_request(&[Message::system("Be brief."), Message::user("hi")]);

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "qwen-plus");
        assert_eq!(json["stream"], true);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert_eq!(json["max_tokens"], 512);
    }

    #[test]
    fn test_message_conversion() {
        let msg = Message {
            role: Role::Assistant,
            content: "Hello".to_string(),
        };
        let converted = OpenAIMessage::from(&msg);
        assert_eq!(converted.role, "assistant");
    }

    #[test]
    fn test_parse_delta() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#;
        assert_eq!(
            parse_sse_line(line).unwrap(),
            SseLine::Delta {
                content: "Hel".into(),
                finish: None
            }
        );
    }

    #[test]
    fn test_parse_done_and_noise() {
        assert_eq!(parse_sse_line("data: [DONE]").unwrap(), SseLine::Done);
        assert_eq!(parse_sse_line("").unwrap(), SseLine::Skip);
        assert_eq!(parse_sse_line(": keep-alive").unwrap(), SseLine::Skip);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(),
            SseLine::Skip
        );
    }

    #[test]
    fn test_parse_finish_reason() {
        let line = r#"data: {"choices":[{"delta":{},"finish_reason":"length"}]}"#;
        assert_eq!(
            parse_sse_line(line).unwrap(),
            SseLine::Delta {
                content: String::new(),
                finish: Some(FinishReason::Length)
            }
        );
    }

    #[test]
    fn test_line_buffer_keeps_split_characters() {
        let line = "data: 你好\n".as_bytes();
        // Cut inside the first character's three bytes
        let cut = "data: ".len() + 1;

        let mut buffer = SseLineBuffer::default();
        buffer.push(&line[..cut]);
        assert_eq!(buffer.next_line(), None);
        buffer.push(&line[cut..]);
        assert_eq!(buffer.next_line().as_deref(), Some("data: 你好\n"));
        assert_eq!(buffer.next_line(), None);
    }

    #[tokio::test]
    async fn test_stream_with_character_split_across_chunks() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"你好\"}}]}\n\ndata: [DONE]\n\n";
        let cut = body.find('你').unwrap() + 1;

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = vec![0u8; 64 * 1024];
            let _ = socket.read(&mut request).await;

            let head = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n";
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(&body.as_bytes()[..cut]).await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            socket.write_all(&body.as_bytes()[cut..]).await.unwrap();
            let _ = socket.shutdown().await;
        });

        let backend =
            OpenAIBackend::new(OpenAIConfig::local(format!("http://{}/v1", addr), "test")).unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let result = backend
            .generate_stream(&[Message::user("hi")], tx)
            .await
            .unwrap();

        assert_eq!(result.text, "你好");
        assert_eq!(rx.recv().await.as_deref(), Some("你好"));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            parse_sse_line("data: {not json"),
            Err(LlmError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_sse_line(r#"data: {"error":{"message":"quota exceeded"}}"#),
            Err(LlmError::Api(msg)) if msg == "quota exceeded"
        ));
    }
}
