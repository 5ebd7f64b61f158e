//! Turn chain orchestrator
//!
//! One [`TurnChain`] serves one connection. It owns the client, the three
//! engines, the turn buffer and the event bridge, and runs four loops:
//!
//! - intake: client audio → STT, only while the step is ASR
//! - collect: bridge text queue → turn buffer
//! - dispatch: debounced query → LLM → client text + TTS increments
//! - relay: bridge audio queue → client audio, then `turn_done`
//!
//! A turn whose end-of-utterance never arrives is cut off: TTS is stopped and
//! the bridge's audio epoch advanced, so the relay drops whatever that
//! utterance still produces.
//!
//! The first loop to exit, cleanly or with an error, tears the whole chain
//! down. Teardown is idempotent and always stops every engine.

use futures::StreamExt;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use voice_chain_config::ChainSettings;
use voice_chain_core::{
    ConversationClient, LanguageModel, Message, SpeechEvents, SpeechToText, Step, TextToSpeech,
};

use crate::bridge::{AudioEvent, BridgeReceivers, EventBridge, TextEvent};
use crate::state::StepMachine;
use crate::turn_buffer::{TurnBuffer, TurnBufferConfig};
use crate::PipelineError;

/// Per-chain tuning
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub turn_buffer: TurnBufferConfig,
    pub text_queue_capacity: usize,
    pub audio_queue_capacity: usize,
    /// How long dispatch waits for end-of-utterance after the final flush
    pub turn_done_timeout: Duration,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self::from(&ChainSettings::default())
    }
}

impl From<&ChainSettings> for ChainConfig {
    fn from(settings: &ChainSettings) -> Self {
        Self {
            turn_buffer: TurnBufferConfig::from(settings),
            text_queue_capacity: settings.text_queue_capacity,
            audio_queue_capacity: settings.audio_queue_capacity,
            turn_done_timeout: settings.turn_done_timeout(),
        }
    }
}

/// The engines owned by one chain
pub struct Engines {
    pub stt: Arc<dyn SpeechToText>,
    pub tts: Arc<dyn TextToSpeech>,
    pub llm: Arc<dyn LanguageModel>,
}

/// Builds a fresh set of engines for each chain
///
/// Speech engines report through `events`, which is the chain's event bridge.
pub trait EngineFactory: Send + Sync + 'static {
    fn create(
        &self,
        session_id: &str,
        events: Arc<dyn SpeechEvents>,
    ) -> Result<Engines, PipelineError>;
}

struct ChainInner {
    session_id: String,
    config: ChainConfig,
    client: Arc<dyn ConversationClient>,
    engines: Engines,
    bridge: Arc<EventBridge>,
    receivers: Mutex<Option<BridgeReceivers>>,
    buffer: TurnBuffer,
    steps: StepMachine,
    /// Serializes "check step, feed STT" against "leave ASR, stop STT"
    stt_gate: tokio::sync::Mutex<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    fault: Notify,
    stopping: AtomicBool,
    stopped: watch::Sender<bool>,
}

/// One conversation: client, engines and the loops between them
pub struct TurnChain {
    inner: Arc<ChainInner>,
}

impl TurnChain {
    /// Create a chain in the `Started` step. Nothing runs until [`start`].
    ///
    /// [`start`]: TurnChain::start
    pub fn new(
        session_id: impl Into<String>,
        config: ChainConfig,
        client: Arc<dyn ConversationClient>,
        factory: &dyn EngineFactory,
    ) -> Result<Self, PipelineError> {
        let session_id = session_id.into();
        let (bridge, receivers) = EventBridge::new(
            session_id.clone(),
            config.text_queue_capacity,
            config.audio_queue_capacity,
        );
        let events: Arc<dyn SpeechEvents> = bridge.clone();
        let engines = factory.create(&session_id, events)?;

        tracing::debug!(
            session_id = %session_id,
            client = client.kind(),
            stt = engines.stt.model_name(),
            tts = engines.tts.model_name(),
            llm = engines.llm.model_name(),
            "Turn chain created"
        );

        let (stopped, _) = watch::channel(false);
        let inner = ChainInner {
            buffer: TurnBuffer::new(config.turn_buffer.clone()),
            steps: StepMachine::new(session_id.clone()),
            session_id,
            config,
            client,
            engines,
            bridge,
            receivers: Mutex::new(Some(receivers)),
            stt_gate: tokio::sync::Mutex::new(()),
            tasks: Mutex::new(Vec::new()),
            fault: Notify::new(),
            stopping: AtomicBool::new(false),
            stopped,
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn step(&self) -> Step {
        self.inner.steps.current()
    }

    pub fn subscribe_steps(&self) -> watch::Receiver<Step> {
        self.inner.steps.subscribe()
    }

    pub fn buffer(&self) -> &TurnBuffer {
        &self.inner.buffer
    }

    pub fn bridge(&self) -> &Arc<EventBridge> {
        &self.inner.bridge
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.stopped.borrow()
    }

    /// Connect the client, enter ASR and launch the loops
    ///
    /// Returns as soon as the loops are running. If the client cannot connect
    /// the chain is torn down and `Connection` is returned.
    pub async fn start(&self) -> Result<(), PipelineError> {
        let inner = &self.inner;
        let current = inner.steps.current();
        if current != Step::Started {
            return Err(PipelineError::InvalidTransition {
                from: Step::Started,
                to: Step::Asr,
                current,
            });
        }

        if let Err(e) = inner.client.connect().await {
            tracing::error!(session_id = %inner.session_id, error = %e, "Client connect failed");
            inner.stop().await;
            return Err(PipelineError::Connection(e.to_string()));
        }

        let receivers = inner
            .receivers
            .lock()
            .take()
            .ok_or(PipelineError::ChannelClosed("bridge receivers"))?;
        inner.steps.transition(Step::Started, Step::Asr)?;

        let handles = vec![
            spawn_loop(inner, "intake", Arc::clone(inner).run_intake()),
            spawn_loop(
                inner,
                "collect",
                Arc::clone(inner).run_collect(receivers.text_rx, receivers.error_rx),
            ),
            spawn_loop(inner, "dispatch", Arc::clone(inner).run_dispatch()),
            spawn_loop(inner, "relay", Arc::clone(inner).run_relay(receivers.audio_rx)),
        ];
        inner.tasks.lock().extend(handles);

        // Supervisor: first loop exit triggers teardown
        let supervisor = Arc::clone(inner);
        tokio::spawn(async move {
            supervisor.fault.notified().await;
            supervisor.stop().await;
        });

        tracing::info!(
            session_id = %inner.session_id,
            client = inner.client.kind(),
            "Turn chain started"
        );
        Ok(())
    }

    /// Tear everything down. Idempotent; a concurrent second call waits for
    /// the first to finish.
    pub async fn stop(&self) {
        self.inner.stop().await;
    }

    /// Resolve once the chain has fully stopped
    pub async fn wait(&self) {
        let mut rx = self.inner.stopped.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Suspend intake without tearing down (ASR → PAUSED)
    pub async fn pause(&self) -> Result<(), PipelineError> {
        let inner = &self.inner;
        let _gate = inner.stt_gate.lock().await;
        inner.steps.transition(Step::Asr, Step::Paused)?;
        inner.buffer.clear();
        inner.engines.stt.stop().await?;
        tracing::info!(session_id = %inner.session_id, "Intake paused");
        Ok(())
    }

    /// Resume intake (PAUSED → ASR)
    pub fn resume(&self) -> Result<(), PipelineError> {
        self.inner.steps.transition(Step::Paused, Step::Asr)?;
        tracing::info!(session_id = %self.inner.session_id, "Intake resumed");
        Ok(())
    }
}

impl Drop for TurnChain {
    fn drop(&mut self) {
        // Hand teardown to the supervisor if the owner never stopped us
        if !self.inner.stopping.load(Ordering::SeqCst) {
            self.inner.fault.notify_one();
        }
    }
}

fn spawn_loop<F>(inner: &Arc<ChainInner>, name: &'static str, fut: F) -> JoinHandle<()>
where
    F: Future<Output = Result<(), PipelineError>> + Send + 'static,
{
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        match fut.await {
            Ok(()) => {
                tracing::info!(session_id = %inner.session_id, loop_name = name, "Loop finished");
            }
            Err(e) => {
                metrics::counter!("voice_chain_loop_failures_total", "loop" => name).increment(1);
                tracing::error!(
                    session_id = %inner.session_id,
                    loop_name = name,
                    error = %e,
                    "Loop failed, tearing down chain"
                );
            }
        }
        inner.fault.notify_one();
    })
}

impl ChainInner {
    async fn run_intake(self: Arc<Self>) -> Result<(), PipelineError> {
        while let Some(input) = self.client.next_input().await {
            let audio = input?;

            let _gate = self.stt_gate.lock().await;
            match self.steps.current() {
                Step::Asr => self.engines.stt.recognize(&audio, false).await?,
                step => {
                    metrics::counter!("voice_chain_audio_discarded_total").increment(1);
                    tracing::trace!(
                        session_id = %self.session_id,
                        %step,
                        bytes = audio.len(),
                        "Discarding input outside ASR"
                    );
                }
            }
        }

        tracing::info!(session_id = %self.session_id, "Client input ended");
        Ok(())
    }

    /// Text queue into the turn buffer; engine failures end the chain
    async fn run_collect(
        self: Arc<Self>,
        mut text_rx: mpsc::Receiver<TextEvent>,
        mut error_rx: mpsc::Receiver<voice_chain_core::Error>,
    ) -> Result<(), PipelineError> {
        loop {
            tokio::select! {
                event = text_rx.recv() => {
                    let Some(event) = event else {
                        return Err(PipelineError::ChannelClosed("text_queue"));
                    };
                    match self.steps.current() {
                        Step::Asr => self.buffer.record_text(event.text, event.is_final),
                        step => {
                            tracing::debug!(
                                session_id = %self.session_id,
                                %step,
                                text = %event.text,
                                "Dropping STT fragment outside ASR"
                            );
                        }
                    }
                }
                Some(error) = error_rx.recv() => return Err(error.into()),
            }
        }
    }

    async fn run_dispatch(self: Arc<Self>) -> Result<(), PipelineError> {
        let queries = self.buffer.next_query();
        futures::pin_mut!(queries);

        while let Some(query) = queries.next().await {
            self.dispatch_turn(&query).await?;
        }
        Ok(())
    }

    async fn dispatch_turn(&self, query: &str) -> Result<(), PipelineError> {
        {
            let _gate = self.stt_gate.lock().await;
            let step = self.steps.current();
            if step != Step::Asr {
                tracing::warn!(
                    session_id = %self.session_id,
                    %step,
                    query,
                    "Query ready outside ASR, dropping"
                );
                return Ok(());
            }
            self.steps.transition(Step::Asr, Step::Llm)?;
            self.engines.stt.stop().await?;
        }

        metrics::counter!("voice_chain_turns_total").increment(1);
        tracing::info!(session_id = %self.session_id, query, "Dispatching turn");
        let started = Instant::now();

        self.client.emit(&Message::sentence_complete(query)).await?;
        self.generate_reply(query, started).await?;
        self.finish_turn().await?;

        metrics::histogram!("voice_chain_turn_latency_seconds")
            .record(started.elapsed().as_secs_f64());
        Ok(())
    }

    async fn generate_reply(&self, query: &str, started: Instant) -> Result<(), PipelineError> {
        let mut chunks = self.engines.llm.generate_stream(query);
        let mut first = true;

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            if chunk.is_empty() {
                continue;
            }
            if first {
                first = false;
                metrics::histogram!("voice_chain_llm_first_chunk_seconds")
                    .record(started.elapsed().as_secs_f64());
            }

            self.client.emit(&Message::text(chunk.as_str())).await?;
            self.engines.tts.synthesize(&chunk, false).await?;
        }
        Ok(())
    }

    /// LLM → TTS, flush, then wait for the relay to hand the step back
    async fn finish_turn(&self) -> Result<(), PipelineError> {
        self.steps.transition(Step::Llm, Step::Tts)?;
        self.engines.tts.synthesize("", true).await?;

        let reopened = tokio::time::timeout(
            self.config.turn_done_timeout,
            self.steps.wait_for(|step| step != Step::Tts),
        )
        .await;

        if reopened.is_err() {
            tracing::warn!(
                session_id = %self.session_id,
                timeout_ms = self.config.turn_done_timeout.as_millis() as u64,
                "No end-of-utterance from TTS, reopening intake"
            );
            self.engines.tts.stop().await?;
            self.bridge.advance_audio_epoch();
            if let Err(e) = self.steps.transition(Step::Tts, Step::Asr) {
                tracing::debug!(session_id = %self.session_id, error = %e, "Step moved on meanwhile");
            }
        }
        Ok(())
    }

    async fn run_relay(
        self: Arc<Self>,
        mut audio_rx: mpsc::Receiver<AudioEvent>,
    ) -> Result<(), PipelineError> {
        while let Some(event) = audio_rx.recv().await {
            let epoch = self.bridge.audio_epoch();
            if event.epoch != epoch {
                metrics::counter!("voice_chain_audio_discarded_total").increment(1);
                tracing::debug!(
                    session_id = %self.session_id,
                    event_epoch = event.epoch,
                    epoch,
                    bytes = event.audio.len(),
                    is_final = event.is_final,
                    "Dropping audio from a cut-off utterance"
                );
                continue;
            }
            if !event.audio.is_empty() {
                self.client.emit_audio(&event.audio).await?;
            }
            let end_of_utterance = event.is_end_of_utterance();
            self.buffer.record_audio(event.audio, event.is_final);

            if end_of_utterance {
                self.client.emit(&Message::turn_done()).await?;
                let chunks = self.buffer.take_audios().len();

                match self.steps.transition(Step::Tts, Step::Asr) {
                    Ok(()) => {
                        tracing::info!(session_id = %self.session_id, chunks, "Turn done");
                    }
                    Err(e) => {
                        tracing::debug!(
                            session_id = %self.session_id,
                            error = %e,
                            "End-of-utterance outside TTS step"
                        );
                    }
                }
            }
        }
        Err(PipelineError::ChannelClosed("audio_queue"))
    }

    async fn stop(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            let mut rx = self.stopped.subscribe();
            let _ = rx.wait_for(|stopped| *stopped).await;
            return;
        }

        let previous = self.steps.stop();
        tracing::info!(session_id = %self.session_id, from = %previous, "Stopping turn chain");

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            if let Err(e) = task.await {
                if e.is_panic() {
                    tracing::error!(session_id = %self.session_id, error = %e, "Loop panicked");
                }
            }
        }

        if let Err(e) = self.client.close().await {
            tracing::warn!(session_id = %self.session_id, error = %e, "Client close failed");
        }
        self.buffer.clear();

        if let Err(e) = self.engines.stt.stop().await {
            tracing::warn!(session_id = %self.session_id, error = %e, "STT stop failed");
        }
        if let Err(e) = self.engines.tts.stop().await {
            tracing::warn!(session_id = %self.session_id, error = %e, "TTS stop failed");
        }
        if let Err(e) = self.engines.llm.stop().await {
            tracing::warn!(session_id = %self.session_id, error = %e, "LLM stop failed");
        }

        // Release the supervisor if it is still waiting
        self.fault.notify_one();
        self.stopped.send_replace(true);
        tracing::info!(session_id = %self.session_id, "Turn chain stopped");
    }
}
