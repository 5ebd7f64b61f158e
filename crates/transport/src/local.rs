//! Local microphone/speaker client
//!
//! Capture runs on a dedicated thread owning the `cpal` stream; playback runs on
//! another owning the `rodio` output. Both device handles are `!Send`, so the
//! async side only talks to them through channels.
//!
//! Input is gated: nothing is forwarded until the listen trigger fires, chunks
//! at or below the RMS threshold are dropped, and listening lapses after the
//! idle timeout until the next trigger.

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use voice_chain_config::{ListenTrigger, LocalSettings};
use voice_chain_core::{pcm16_rms, ClientEvent, ConversationClient, Message, Result};

use crate::TransportError;

/// Captured chunks buffered between the device thread and the chain
const CAPTURE_QUEUE: usize = 64;

/// RMS gate with an idle deadline
#[derive(Debug)]
pub struct SpeechGate {
    rms_threshold: f32,
    idle_timeout: Duration,
    last_active: Instant,
}

impl SpeechGate {
    pub fn new(rms_threshold: f32, idle_timeout: Duration) -> Self {
        Self {
            rms_threshold,
            idle_timeout,
            last_active: Instant::now(),
        }
    }

    /// Restart the idle clock
    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    /// True if the chunk is loud enough to forward; refreshes the idle clock
    pub fn admit(&mut self, chunk: &[u8]) -> bool {
        if pcm16_rms(chunk) > self.rms_threshold {
            self.touch();
            true
        } else {
            false
        }
    }

    pub fn deadline(&self) -> Instant {
        self.last_active + self.idle_timeout
    }

    pub fn is_idle(&self) -> bool {
        Instant::now() >= self.deadline()
    }
}

enum PlaybackCommand {
    Play(Vec<i16>),
    Stop,
}

/// Microphone in, speaker and stdout out
pub struct LocalClient {
    settings: LocalSettings,
    playback_rate: u32,
    input_rx: tokio::sync::Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    gate: Mutex<SpeechGate>,
    listening: AtomicBool,
    playback_tx: Mutex<Option<std_mpsc::Sender<PlaybackCommand>>>,
    /// Odd trailing byte carried between output chunks
    carry: Mutex<Option<u8>>,
    shutdown: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl LocalClient {
    /// `playback_rate` is the sample rate of the PCM16 audio the TTS engine
    /// produces.
    pub fn new(settings: LocalSettings, playback_rate: u32) -> Self {
        let gate = SpeechGate::new(settings.rms_threshold, settings.idle_timeout());
        Self {
            settings,
            playback_rate,
            input_rx: tokio::sync::Mutex::new(None),
            gate: Mutex::new(gate),
            listening: AtomicBool::new(false),
            playback_tx: Mutex::new(None),
            carry: Mutex::new(None),
            shutdown: Arc::new(AtomicBool::new(false)),
            threads: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn spawn_capture(
        &self,
        tx: mpsc::Sender<Vec<u8>>,
    ) -> std::result::Result<JoinHandle<()>, TransportError> {
        let sample_rate = self.settings.sample_rate;
        let frames_per_chunk = self.settings.frames_per_chunk;
        let shutdown = Arc::clone(&self.shutdown);
        let (ready_tx, ready_rx) = std_mpsc::channel();

        let handle = std::thread::Builder::new()
            .name("local-capture".into())
            .spawn(move || {
                let stream = match build_capture_stream(sample_rate, frames_per_chunk, tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                while !shutdown.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(100));
                }
                drop(stream);
                tracing::debug!("Capture thread exiting");
            })
            .map_err(|e| TransportError::Device(e.to_string()))?;

        ready_rx
            .recv()
            .map_err(|_| TransportError::Device("capture thread died".into()))??;
        Ok(handle)
    }

    fn spawn_playback(
        &self,
    ) -> std::result::Result<(JoinHandle<()>, std_mpsc::Sender<PlaybackCommand>), TransportError>
    {
        let sample_rate = self.playback_rate;
        let (cmd_tx, cmd_rx) = std_mpsc::channel::<PlaybackCommand>();
        let (ready_tx, ready_rx) = std_mpsc::channel();

        let handle = std::thread::Builder::new()
            .name("local-playback".into())
            .spawn(move || {
                let (_stream, handle) = match rodio::OutputStream::try_default() {
                    Ok(output) => output,
                    Err(e) => {
                        let _ = ready_tx.send(Err(TransportError::Playback(e.to_string())));
                        return;
                    }
                };
                let sink = match rodio::Sink::try_new(&handle) {
                    Ok(sink) => sink,
                    Err(e) => {
                        let _ = ready_tx.send(Err(TransportError::Playback(e.to_string())));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                while let Ok(command) = cmd_rx.recv() {
                    match command {
                        PlaybackCommand::Play(samples) => {
                            sink.append(rodio::buffer::SamplesBuffer::new(1, sample_rate, samples));
                        }
                        PlaybackCommand::Stop => {
                            sink.stop();
                            break;
                        }
                    }
                }
                tracing::debug!("Playback thread exiting");
            })
            .map_err(|e| TransportError::Playback(e.to_string()))?;

        ready_rx
            .recv()
            .map_err(|_| TransportError::Playback("playback thread died".into()))??;
        Ok((handle, cmd_tx))
    }

    /// Block until the listen trigger fires
    async fn wait_for_trigger(&self) -> Result<()> {
        if self.settings.trigger == ListenTrigger::Enter {
            println!("\n[press Enter to talk]");
            tokio::task::spawn_blocking(|| {
                let mut line = String::new();
                std::io::stdin().read_line(&mut line).map(|_| ())
            })
            .await
            .map_err(|e| TransportError::Device(e.to_string()))??;
        }
        self.gate.lock().touch();
        self.listening.store(true, Ordering::SeqCst);
        tracing::info!("Listening");
        Ok(())
    }

    fn play(&self, audio: &[u8]) {
        let samples = {
            let mut carry = self.carry.lock();
            let mut bytes = Vec::with_capacity(audio.len() + 1);
            if let Some(byte) = carry.take() {
                bytes.push(byte);
            }
            bytes.extend_from_slice(audio);
            if bytes.len() % 2 == 1 {
                *carry = bytes.pop();
            }
            voice_chain_core::pcm16_to_samples(&bytes)
        };
        if samples.is_empty() {
            return;
        }
        if let Some(tx) = self.playback_tx.lock().as_ref() {
            if tx.send(PlaybackCommand::Play(samples)).is_err() {
                tracing::warn!("Playback thread gone, dropping audio");
            }
        }
    }
}

fn build_capture_stream(
    sample_rate: u32,
    frames_per_chunk: usize,
    tx: mpsc::Sender<Vec<u8>>,
) -> std::result::Result<cpal::Stream, TransportError> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or_else(|| TransportError::Device("No input device available".into()))?;
    tracing::info!(
        device = %device.name().unwrap_or_else(|_| "unknown".into()),
        sample_rate,
        "Using input device"
    );

    let config = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let mut pending: Vec<i16> = Vec::with_capacity(frames_per_chunk);
    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for &sample in data {
                    pending.push((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16);
                    if pending.len() >= frames_per_chunk {
                        let chunk = voice_chain_core::samples_to_pcm16(&pending);
                        pending.clear();
                        if tx.try_send(chunk).is_err() {
                            tracing::trace!("Capture queue full, dropping chunk");
                        }
                    }
                }
            },
            |err| tracing::warn!(error = %err, "Audio capture error"),
            None,
        )
        .map_err(|e| TransportError::Device(e.to_string()))?;
    stream
        .play()
        .map_err(|e| TransportError::Device(e.to_string()))?;
    Ok(stream)
}

#[async_trait]
impl ConversationClient for LocalClient {
    async fn connect(&self) -> Result<()> {
        let (tx, rx) = mpsc::channel(CAPTURE_QUEUE);
        let capture = self.spawn_capture(tx)?;
        let (playback, playback_tx) = self.spawn_playback()?;

        *self.input_rx.lock().await = Some(rx);
        *self.playback_tx.lock() = Some(playback_tx);
        self.threads.lock().extend([capture, playback]);
        tracing::info!(
            sample_rate = self.settings.sample_rate,
            playback_rate = self.playback_rate,
            trigger = ?self.settings.trigger,
            "Local client connected"
        );
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(tx) = self.playback_tx.lock().take() {
            let _ = tx.send(PlaybackCommand::Stop);
        }

        let threads: Vec<JoinHandle<()>> = std::mem::take(&mut *self.threads.lock());
        tokio::task::spawn_blocking(move || {
            for thread in threads {
                let _ = thread.join();
            }
        })
        .await
        .map_err(|e| TransportError::Device(e.to_string()))?;

        tracing::info!("Local client closed");
        Ok(())
    }

    async fn next_input(&self) -> Option<Result<Vec<u8>>> {
        let mut guard = self.input_rx.lock().await;
        let rx = guard.as_mut()?;

        loop {
            if !self.listening.load(Ordering::SeqCst) {
                if let Err(e) = self.wait_for_trigger().await {
                    return Some(Err(e));
                }
                // Drop anything captured before the trigger
                while rx.try_recv().is_ok() {}
            }

            let deadline = self.gate.lock().deadline();
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(chunk)) => {
                    if self.gate.lock().admit(&chunk) {
                        return Some(Ok(chunk));
                    }
                }
                Ok(None) => return None,
                Err(_) => {
                    // Emits may have refreshed the clock meanwhile
                    if self.gate.lock().is_idle() {
                        tracing::info!("No speech detected, listening paused");
                        self.listening.store(false, Ordering::SeqCst);
                    }
                }
            }
        }
    }

    async fn emit(&self, message: &Message) -> Result<()> {
        self.gate.lock().touch();
        match message.to_event() {
            Some(ClientEvent::Text { content }) => {
                let mut stdout = std::io::stdout();
                write!(stdout, "{}", content)?;
                stdout.flush()?;
            }
            Some(ClientEvent::TurnDone) => println!(),
            Some(ClientEvent::SentenceComplete) | None => {}
        }
        Ok(())
    }

    async fn emit_audio(&self, audio: &[u8]) -> Result<()> {
        self.gate.lock().touch();
        self.play(audio);
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "local"
    }
}
