//! Client-to-device pipeline
//!
//! The network side runs on the async runtime. Playback runs on one
//! dedicated thread that owns the sink, because device writes block. A
//! bounded channel between the two carries the events, so a slow device
//! pushes back on the network reader instead of queueing audio without
//! limit.
//!
//! Each utterance is tagged with a generation number. Cancelling bumps the
//! shared generation, so the playback thread silences the device at the
//! next event it sees instead of playing out whatever is still queued.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info};

use crate::audio::{
    AudioFocus, AudioOutput, ProcessFocus, SinkConfig, StreamEvent, StreamingAudioSink,
};
use crate::client::{CancelHandle, FrameSink, SynthesisRequest, SynthesisStreamClient};
use crate::config::StreamConfig;
use crate::error::{Error, Result};
use crate::status::{PlaybackStatus, StatusNotifier};

enum PlaybackCommand {
    /// An event of the utterance with the given generation
    Event(u64, StreamEvent),
    /// Reply with the first sink error since the previous settle
    Settle(oneshot::Sender<Result<()>>),
    Shutdown,
}

/// Forwards client events onto the playback thread
struct CommandSink {
    tx: mpsc::Sender<PlaybackCommand>,
    generation: u64,
}

impl FrameSink for CommandSink {
    fn accept(&mut self, event: StreamEvent) -> impl Future<Output = Result<()>> + Send {
        async move {
            self.tx
                .send(PlaybackCommand::Event(self.generation, event))
                .await
                .map_err(|_| Error::Cancelled)
        }
    }
}

/// Speaks utterances one at a time through a synthesis server and an
/// output device.
pub struct SpeechPipeline {
    config: StreamConfig,
    client: SynthesisStreamClient,
    status: StatusNotifier,
    commands: Mutex<Option<mpsc::Sender<PlaybackCommand>>>,
    active: Mutex<Option<CancelHandle>>,
    turn: tokio::sync::Mutex<()>,
    /// Generation of the utterance allowed to play
    generation: Arc<AtomicU64>,
    halt: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SpeechPipeline {
    /// Pipeline holding the process-wide device grant while it plays
    pub fn new<O>(config: StreamConfig, output: O) -> Result<Self>
    where
        O: AudioOutput + Send + 'static,
    {
        Self::with_focus(config, output, Arc::new(ProcessFocus))
    }

    /// Pipeline on the default hardware output
    #[cfg(feature = "audio-io")]
    pub fn with_default_device(config: StreamConfig) -> Result<Self> {
        let output = crate::audio::CpalOutput::from_config(&config)?;
        Self::new(config, output)
    }

    pub fn with_focus<O>(config: StreamConfig, output: O, focus: Arc<dyn AudioFocus>) -> Result<Self>
    where
        O: AudioOutput + Send + 'static,
    {
        config.validate()?;

        let status = StatusNotifier::new();
        let client = SynthesisStreamClient::new(&config)?.with_status(status.clone());
        let (tx, rx) = mpsc::channel(config.channel_capacity);
        let halt = Arc::new(AtomicBool::new(false));
        let generation = Arc::new(AtomicU64::new(0));

        let sink_config = SinkConfig::from(&config);
        let sink_status = status.clone();
        let worker_halt = halt.clone();
        let worker_generation = generation.clone();
        // The sink is built on the playback thread; tracks may not be Send
        let worker = std::thread::Builder::new()
            .name("cosyvoice-playback".into())
            .spawn(move || {
                let sink = StreamingAudioSink::new(output, focus, sink_config, sink_status);
                run_playback(sink, rx, worker_generation, worker_halt);
            })
            .map_err(|e| Error::DeviceInitFailure(format!("Failed to spawn playback thread: {}", e)))?;

        info!(
            "Speech pipeline ready: endpoint {}, {} Hz, frame {} bytes, pre-roll {} bytes",
            config.endpoint, config.sample_rate, config.frame_size, config.pre_roll_bytes
        );

        Ok(Self {
            config,
            client,
            status,
            commands: Mutex::new(Some(tx)),
            active: Mutex::new(None),
            turn: tokio::sync::Mutex::new(()),
            generation,
            halt,
            worker: Some(worker),
        })
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Speak `text` with the configured speaker
    pub async fn speak(&self, text: &str) -> Result<()> {
        let request = SynthesisRequest::from_config(text, &self.config)?;
        self.speak_request(request).await
    }

    /// Speak `request`, superseding anything still playing.
    ///
    /// Resolves once the audio has drained or the utterance has failed.
    pub async fn speak_request(&self, request: SynthesisRequest) -> Result<()> {
        let cancel = CancelHandle::new();
        if let Some(previous) = self.active.lock().replace(cancel.clone()) {
            debug!("Superseding in-flight utterance");
            previous.cancel();
            self.interrupt();
        }

        let result = self.run_turn(request, &cancel).await;

        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|a| a.same_as(&cancel)) {
            *active = None;
        }
        result
    }

    async fn run_turn(&self, request: SynthesisRequest, cancel: &CancelHandle) -> Result<()> {
        let _turn = self.turn.lock().await;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let tx = self.commands.lock().clone().ok_or(Error::Cancelled)?;

        let id = request.id();
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let mut sink = CommandSink {
            tx: tx.clone(),
            generation,
        };
        let streamed = self
            .client
            .stream_with_cancel(request, &mut sink, cancel)
            .await;

        let (reply, settled) = oneshot::channel();
        let played = match tx.send(PlaybackCommand::Settle(reply)).await {
            Ok(()) => settled.await.unwrap_or(Err(Error::Cancelled)),
            Err(_) => Err(Error::Cancelled),
        };

        let result = streamed.and(played);
        if let Err(ref e) = result {
            debug!(request_id = %id, "Utterance ended with {}", e);
        }
        result
    }

    /// Stop the in-flight utterance, if any
    pub fn cancel(&self) {
        if let Some(active) = self.active.lock().take() {
            info!("Cancelling in-flight utterance");
            active.cancel();
            self.interrupt();
        }
    }

    /// Make every queued event stale so the playback thread stops writing
    fn interrupt(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Cancel, stop the playback thread and release the device. Later calls
    /// to [`speak`](Self::speak) fail with [`Error::Cancelled`].
    pub fn shutdown(&self) {
        let Some(tx) = self.commands.lock().take() else {
            return;
        };
        self.cancel();
        self.interrupt();
        self.halt.store(true, Ordering::Release);
        // Dropping the last sender also ends the worker if the queue is full
        let _ = tx.try_send(PlaybackCommand::Shutdown);
        info!("Speech pipeline shut down");
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackStatus> {
        self.status.subscribe()
    }

    pub fn is_shut_down(&self) -> bool {
        self.commands.lock().is_none()
    }
}

impl Drop for SpeechPipeline {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Playback thread panicked");
            }
        }
    }
}

fn run_playback<O: AudioOutput>(
    mut sink: StreamingAudioSink<O>,
    mut rx: mpsc::Receiver<PlaybackCommand>,
    generation: Arc<AtomicU64>,
    halt: Arc<AtomicBool>,
) {
    debug!("Playback thread started");
    let mut pending: Result<()> = Ok(());

    while let Some(command) = rx.blocking_recv() {
        if halt.load(Ordering::Acquire) {
            break;
        }
        match command {
            PlaybackCommand::Event(tag, event) => {
                if tag != generation.load(Ordering::Acquire) {
                    if sink.is_active() {
                        sink.abort(Error::Cancelled);
                    }
                    continue;
                }
                if let Err(e) = sink.on_event(event) {
                    if pending.is_ok() {
                        pending = Err(e);
                    }
                }
            }
            PlaybackCommand::Settle(reply) => {
                let _ = reply.send(std::mem::replace(&mut pending, Ok(())));
            }
            PlaybackCommand::Shutdown => break,
        }
    }

    sink.shutdown();
    debug!("Playback thread stopped");
}
