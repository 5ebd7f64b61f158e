//! In-process fakes for driving a TurnChain without network or audio devices

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use voice_chain_core::{
    ClientEvent, ConversationClient, Error, LanguageModel, Message, Result, SpeechEvents,
    SpeechToText, TextStream, TextToSpeech,
};
use voice_chain_pipeline::{EngineFactory, Engines, PipelineError};

#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Event(ClientEvent),
    Audio(Vec<u8>),
}

pub struct FakeClient {
    inputs: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    fail_connect: bool,
    pub outbound: Mutex<Vec<Outbound>>,
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
}

impl FakeClient {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedSender<Vec<u8>>) {
        Self::build(false)
    }

    pub fn failing() -> (Arc<Self>, mpsc::UnboundedSender<Vec<u8>>) {
        Self::build(true)
    }

    fn build(fail_connect: bool) -> (Arc<Self>, mpsc::UnboundedSender<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Arc::new(Self {
            inputs: tokio::sync::Mutex::new(rx),
            fail_connect,
            outbound: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        });
        (client, tx)
    }

    pub fn events(&self) -> Vec<ClientEvent> {
        self.outbound
            .lock()
            .iter()
            .filter_map(|out| match out {
                Outbound::Event(event) => Some(event.clone()),
                Outbound::Audio(_) => None,
            })
            .collect()
    }

    pub fn audio(&self) -> Vec<Vec<u8>> {
        self.outbound
            .lock()
            .iter()
            .filter_map(|out| match out {
                Outbound::Audio(audio) => Some(audio.clone()),
                Outbound::Event(_) => None,
            })
            .collect()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConversationClient for FakeClient {
    async fn connect(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect {
            return Err(Error::Connection("refused".into()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn next_input(&self) -> Option<Result<Vec<u8>>> {
        self.inputs.lock().await.recv().await.map(Ok)
    }

    async fn emit(&self, message: &Message) -> Result<()> {
        if let Some(event) = message.to_event() {
            self.outbound.lock().push(Outbound::Event(event));
        }
        Ok(())
    }

    async fn emit_audio(&self, audio: &[u8]) -> Result<()> {
        self.outbound.lock().push(Outbound::Audio(audio.to_vec()));
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "fake"
    }
}

/// Emits a scripted transcript when it sees a given frame
pub struct FakeStt {
    events: Arc<dyn SpeechEvents>,
    script: HashMap<Vec<u8>, (String, bool)>,
    pub frames: Mutex<Vec<Vec<u8>>>,
    started: AtomicBool,
    pub stops: AtomicUsize,
}

impl FakeStt {
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().clone()
    }

    pub fn is_started_flag(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechToText for FakeStt {
    async fn start(&self) -> Result<()> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn recognize(&self, audio: &[u8], _is_final: bool) -> Result<()> {
        self.start().await?;
        self.frames.lock().push(audio.to_vec());
        if let Some((text, is_final)) = self.script.get(audio) {
            self.events.on_text(text, *is_final);
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.started.store(false, Ordering::SeqCst);
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn model_name(&self) -> &str {
        "fake-stt"
    }
}

/// Echoes each text increment back as "audio"
pub struct FakeTts {
    events: Arc<dyn SpeechEvents>,
    /// Never emit the end-of-utterance marker
    silent: bool,
    /// Answer the final flush only after this long, ignoring `stop`
    late_flush: Option<Duration>,
    pub calls: Mutex<Vec<(String, bool)>>,
    started: AtomicBool,
    pub stops: AtomicUsize,
}

impl FakeTts {
    pub fn calls(&self) -> Vec<(String, bool)> {
        self.calls.lock().clone()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextToSpeech for FakeTts {
    async fn synthesize(&self, text: &str, is_final: bool) -> Result<()> {
        self.started.store(true, Ordering::SeqCst);
        self.calls.lock().push((text.to_string(), is_final));
        if !text.is_empty() {
            self.events.on_audio(text.as_bytes().to_vec(), false);
        }
        if is_final && !self.silent {
            match self.late_flush {
                Some(delay) => {
                    let events = Arc::clone(&self.events);
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        events.on_audio(b"stale".to_vec(), false);
                        events.on_audio(Vec::new(), true);
                    });
                }
                None => {
                    self.events.on_audio(Vec::new(), true);
                    self.events.on_audio_complete();
                }
            }
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.started.store(false, Ordering::SeqCst);
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn model_name(&self) -> &str {
        "fake-tts"
    }
}

/// Sets a flag when the reply stream is dropped mid-flight
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Yields scripted chunks; optionally holds after the first one until released
pub struct FakeLlm {
    chunks: Vec<String>,
    fail: bool,
    hold: Option<Arc<Notify>>,
    pub queries: Mutex<Vec<(String, Instant)>>,
    pub stream_dropped: Arc<AtomicBool>,
    pub stops: AtomicUsize,
}

impl FakeLlm {
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().iter().map(|(q, _)| q.clone()).collect()
    }

    pub fn first_query_at(&self) -> Option<Instant> {
        self.queries.lock().first().map(|(_, at)| *at)
    }
}

#[async_trait]
impl LanguageModel for FakeLlm {
    fn generate_stream<'a>(&'a self, query: &'a str) -> TextStream<'a> {
        self.queries.lock().push((query.to_string(), Instant::now()));
        let dropped = DropFlag(Arc::clone(&self.stream_dropped));

        Box::pin(async_stream::stream! {
            let _dropped = dropped;
            if self.fail {
                yield Err(Error::Llm("model exploded".into()));
                return;
            }
            for (i, chunk) in self.chunks.iter().enumerate() {
                yield Ok(chunk.clone());
                if i == 0 {
                    if let Some(hold) = &self.hold {
                        hold.notified().await;
                    }
                }
            }
        })
    }

    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn model_name(&self) -> &str {
        "fake-llm"
    }
}

/// Script for one chain's engines
#[derive(Default)]
pub struct Script {
    pub transcripts: Vec<(&'static [u8], &'static str, bool)>,
    pub reply: Vec<&'static str>,
    pub llm_fails: bool,
    pub llm_hold: Option<Arc<Notify>>,
    pub tts_silent: bool,
    pub tts_late_flush: Option<Duration>,
}

pub struct FakeFactory {
    script: Script,
    pub stt: Mutex<Option<Arc<FakeStt>>>,
    pub tts: Mutex<Option<Arc<FakeTts>>>,
    pub llm: Mutex<Option<Arc<FakeLlm>>>,
}

impl FakeFactory {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            stt: Mutex::new(None),
            tts: Mutex::new(None),
            llm: Mutex::new(None),
        }
    }

    pub fn stt(&self) -> Arc<FakeStt> {
        self.stt.lock().clone().expect("engines not created")
    }

    pub fn tts(&self) -> Arc<FakeTts> {
        self.tts.lock().clone().expect("engines not created")
    }

    pub fn llm(&self) -> Arc<FakeLlm> {
        self.llm.lock().clone().expect("engines not created")
    }
}

impl EngineFactory for FakeFactory {
    fn create(
        &self,
        _session_id: &str,
        events: Arc<dyn SpeechEvents>,
    ) -> std::result::Result<Engines, PipelineError> {
        let stt = Arc::new(FakeStt {
            events: Arc::clone(&events),
            script: self
                .script
                .transcripts
                .iter()
                .map(|(frame, text, is_final)| (frame.to_vec(), (text.to_string(), *is_final)))
                .collect(),
            frames: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stops: AtomicUsize::new(0),
        });
        let tts = Arc::new(FakeTts {
            events,
            silent: self.script.tts_silent,
            late_flush: self.script.tts_late_flush,
            calls: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stops: AtomicUsize::new(0),
        });
        let llm = Arc::new(FakeLlm {
            chunks: self.script.reply.iter().map(|s| s.to_string()).collect(),
            fail: self.script.llm_fails,
            hold: self.script.llm_hold.clone(),
            queries: Mutex::new(Vec::new()),
            stream_dropped: Arc::new(AtomicBool::new(false)),
            stops: AtomicUsize::new(0),
        });

        *self.stt.lock() = Some(Arc::clone(&stt));
        *self.tts.lock() = Some(Arc::clone(&tts));
        *self.llm.lock() = Some(Arc::clone(&llm));

        Ok(Engines { stt, tts, llm })
    }
}

/// Poll `condition` until it holds, failing the test after `limit`
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(limit, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("voice_chain_pipeline=debug")
        .with_test_writer()
        .try_init();
}
