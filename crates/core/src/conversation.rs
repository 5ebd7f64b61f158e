//! Conversation types: steps, roles, payloads and client-facing messages

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Phase of a turn chain. Exactly one step is active per chain at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Created, not yet connected
    #[default]
    Started,
    /// Listening: audio is forwarded to speech recognition
    Asr,
    /// Generating a reply
    Llm,
    /// Assistant audio is being synthesized and relayed
    Tts,
    /// Intake suspended without teardown
    Paused,
    /// Terminal
    Stopped,
}

impl Step {
    /// Steps reachable from this one. `Stopped` is reachable from anywhere.
    pub fn allowed_transitions(&self) -> &'static [Step] {
        use Step::*;
        match self {
            Started => &[Asr, Stopped],
            Asr => &[Llm, Paused, Stopped],
            Llm => &[Tts, Asr, Stopped],
            Tts => &[Asr, Stopped],
            Paused => &[Asr, Stopped],
            Stopped => &[],
        }
    }

    pub fn can_transition_to(&self, to: Step) -> bool {
        self.allowed_transitions().contains(&to)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Step::Stopped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Started => "started",
            Step::Asr => "asr",
            Step::Llm => "llm",
            Step::Tts => "tts",
            Step::Paused => "paused",
            Step::Stopped => "stopped",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Origin of a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One fragment of conversation content
///
/// The timestamp is the capture time and drives debounce decisions, so it uses
/// the runtime clock (pausable in tests).
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    role: Role,
    text_chunk: Option<String>,
    audio_chunk: Option<Vec<u8>>,
    is_final: bool,
    timestamp: Instant,
}

impl Payload {
    pub fn text(role: Role, text: impl Into<String>, is_final: bool) -> Self {
        Self {
            role,
            text_chunk: Some(text.into()),
            audio_chunk: None,
            is_final,
            timestamp: Instant::now(),
        }
    }

    pub fn audio(role: Role, audio: Vec<u8>, is_final: bool) -> Self {
        Self {
            role,
            text_chunk: None,
            audio_chunk: Some(audio),
            is_final,
            timestamp: Instant::now(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn text_chunk(&self) -> Option<&str> {
        self.text_chunk.as_deref()
    }

    pub fn audio_chunk(&self) -> Option<&[u8]> {
        self.audio_chunk.as_deref()
    }

    pub fn is_final(&self) -> bool {
        self.is_final
    }

    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    /// Time since capture
    pub fn elapsed(&self) -> Duration {
        self.timestamp.elapsed()
    }
}

/// Outward-facing envelope: the step that produced it plus optional content
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub step: Step,
    pub payload: Option<Payload>,
}

impl Message {
    pub fn new(step: Step, payload: Option<Payload>) -> Self {
        Self { step, payload }
    }

    /// The user's utterance was folded into a query
    pub fn sentence_complete(query: impl Into<String>) -> Self {
        Self::new(Step::Asr, Some(Payload::text(Role::User, query, true)))
    }

    /// One streamed chunk of the assistant reply
    pub fn text(chunk: impl Into<String>) -> Self {
        Self::new(Step::Llm, Some(Payload::text(Role::Assistant, chunk, false)))
    }

    /// The assistant finished speaking
    pub fn turn_done() -> Self {
        Self::new(
            Step::Tts,
            Some(Payload::audio(Role::Assistant, Vec::new(), true)),
        )
    }

    /// Client-visible event for this message, if it has one.
    pub fn to_event(&self) -> Option<ClientEvent> {
        let payload = self.payload.as_ref()?;
        match (self.step, payload.role()) {
            (Step::Asr, Role::User) if payload.is_final() => Some(ClientEvent::SentenceComplete),
            (Step::Llm, Role::Assistant) => payload.text_chunk().map(|content| ClientEvent::Text {
                content: content.to_string(),
            }),
            (Step::Tts, Role::Assistant) if payload.is_final() => Some(ClientEvent::TurnDone),
            _ => None,
        }
    }
}

/// JSON events sent to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    SentenceComplete,
    Text { content: String },
    TurnDone,
}

impl ClientEvent {
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_transitions() {
        assert!(Step::Started.can_transition_to(Step::Asr));
        assert!(Step::Asr.can_transition_to(Step::Llm));
        assert!(Step::Asr.can_transition_to(Step::Paused));
        assert!(Step::Llm.can_transition_to(Step::Tts));
        assert!(Step::Llm.can_transition_to(Step::Asr));
        assert!(Step::Tts.can_transition_to(Step::Asr));
        assert!(Step::Paused.can_transition_to(Step::Asr));

        assert!(!Step::Started.can_transition_to(Step::Llm));
        assert!(!Step::Tts.can_transition_to(Step::Llm));
        assert!(!Step::Llm.can_transition_to(Step::Paused));
        assert!(!Step::Stopped.can_transition_to(Step::Asr));
    }

    #[test]
    fn test_every_step_can_stop() {
        for step in [Step::Started, Step::Asr, Step::Llm, Step::Tts, Step::Paused] {
            assert!(step.can_transition_to(Step::Stopped), "{step} cannot stop");
        }
        assert!(Step::Stopped.is_terminal());
    }

    #[test]
    fn test_client_event_json() {
        assert_eq!(
            ClientEvent::SentenceComplete.to_json().unwrap(),
            r#"{"type":"sentence_complete"}"#
        );
        assert_eq!(
            ClientEvent::Text {
                content: "hi".into()
            }
            .to_json()
            .unwrap(),
            r#"{"type":"text","content":"hi"}"#
        );
        assert_eq!(
            ClientEvent::TurnDone.to_json().unwrap(),
            r#"{"type":"turn_done"}"#
        );
    }

    #[tokio::test]
    async fn test_message_events() {
        assert_eq!(
            Message::sentence_complete("hello").to_event(),
            Some(ClientEvent::SentenceComplete)
        );
        assert_eq!(
            Message::text(" there").to_event(),
            Some(ClientEvent::Text {
                content: " there".into()
            })
        );
        assert_eq!(Message::turn_done().to_event(), Some(ClientEvent::TurnDone));
        assert_eq!(Message::new(Step::Asr, None).to_event(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_payload_elapsed_uses_runtime_clock() {
        let payload = Payload::text(Role::User, "hello", true);
        tokio::time::advance(Duration::from_millis(1500)).await;
        assert!(payload.elapsed() >= Duration::from_millis(1500));
        assert_eq!(payload.text_chunk(), Some("hello"));
        assert!(payload.audio_chunk().is_none());
    }
}
