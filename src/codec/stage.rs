//! Codec stage: one encoder or decoder behind a linear lifecycle and a dedicated drain thread.
//!
//! The drain thread owns the [`CodecDriver`] while the stage is running. It moves queued input
//! into free input buffers, dequeues output with a short timeout, copies buffer output into owned
//! [`Sample`]s and hands them to the stage's consumer. Surface-output decoders forward frames to
//! their [`OutputSurface`] and wait for the consumer's acknowledgement before continuing, which
//! keeps at most one frame in flight between decode and render.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, MutexGuard};

use crate::codec::driver::{BufferInfo, CodecDriver, CodecFactory, OutputEvent};
use crate::container::SharedDemuxer;
use crate::foundation::error::{VidmarkError, VidmarkResult};
use crate::media::format::CodecFormat;
use crate::media::sample::{Sample, SampleFlags};
use crate::render::surface::{InputSurface, OutputSurface};

/// Output dequeue timeout while no input buffer is held.
pub const OUTPUT_TIMEOUT: Duration = Duration::from_millis(10);
/// Output dequeue timeout while an input buffer is waiting for data.
pub const HELD_INPUT_TIMEOUT: Duration = Duration::from_millis(1);

const ACK_POLL: Duration = Duration::from_millis(20);
const MAX_INPUTS_PER_STEP: usize = 4;

/// Whether the stage decodes or encodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodecRole {
    /// Compressed in, raw out.
    Decoder,
    /// Raw in, compressed out.
    Encoder,
}

/// How data enters or leaves a codec.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferMode {
    /// Byte buffers.
    Buffer,
    /// Frames through a surface.
    Surface,
}

/// How output reaches the owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Pushed to a [`StageOutput`] consumer.
    Callback,
    /// Queued for [`CodecStage::poll_output`].
    Polling,
}

/// Capability descriptor of a stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageCaps {
    /// Decoder or encoder.
    pub role: CodecRole,
    /// Mime type the codec is created for.
    pub mime: String,
    /// Input mode.
    pub input: BufferMode,
    /// Output mode.
    pub output: BufferMode,
    /// Output delivery.
    pub delivery: Delivery,
}

impl StageCaps {
    /// Buffer-in, buffer-out decoder.
    pub fn decoder(mime: &str) -> Self {
        Self {
            role: CodecRole::Decoder,
            mime: mime.to_string(),
            input: BufferMode::Buffer,
            output: BufferMode::Buffer,
            delivery: Delivery::Callback,
        }
    }

    /// Decoder rendering frames to an [`OutputSurface`].
    pub fn surface_decoder(mime: &str) -> Self {
        Self {
            output: BufferMode::Surface,
            ..Self::decoder(mime)
        }
    }

    /// Buffer-in, buffer-out encoder.
    pub fn encoder(mime: &str) -> Self {
        Self {
            role: CodecRole::Encoder,
            ..Self::decoder(mime)
        }
    }

    /// Encoder fed through an [`InputSurface`].
    pub fn surface_encoder(mime: &str) -> Self {
        Self {
            input: BufferMode::Surface,
            ..Self::encoder(mime)
        }
    }

    /// Copy with a different delivery mode.
    pub fn with_delivery(mut self, delivery: Delivery) -> Self {
        self.delivery = delivery;
        self
    }
}

/// Lifecycle state of a [`CodecStage`]. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum StageState {
    /// Constructed; no codec exists yet.
    Created,
    /// Codec created and configured.
    Configured,
    /// Drain thread running.
    Started,
    /// End of input signalled; output is still flowing.
    Draining,
    /// Drain thread joined, codec stopped.
    Stopped,
    /// Codec freed. Every operation is a no-op.
    Released,
}

/// Output consumer of a callback-delivery stage.
///
/// Called from the stage's drain thread; implementations forward to their owner's actor.
pub trait StageOutput: Send + Sync + 'static {
    /// The codec's output format changed.
    fn on_format_changed(&self, format: CodecFormat);

    /// A media sample, or the end-of-stream marker.
    fn on_sample(&self, sample: Sample);

    /// The drain loop gave up after repeated failures.
    fn on_error(&self, error: VidmarkError) {
        tracing::error!(%error, "codec stage failed");
    }
}

/// Output item of a polling-delivery stage.
#[derive(Debug)]
pub enum StageEvent {
    /// See [`StageOutput::on_format_changed`].
    FormatChanged(CodecFormat),
    /// See [`StageOutput::on_sample`].
    Sample(Sample),
    /// See [`StageOutput::on_error`].
    Error(VidmarkError),
}

/// Demuxer track a decoder reads from on every free input buffer.
#[derive(Clone, Debug)]
pub struct PullSource {
    /// Source to read.
    pub demuxer: SharedDemuxer,
    /// Track to take samples from.
    pub track: usize,
}

impl PullSource {
    fn read_next(&self, scratch: &mut Vec<u8>) -> VidmarkResult<FeedJob> {
        let mut demux = self.demuxer.lock();
        loop {
            let Some(size) = demux.read_sample_data(scratch)? else {
                return Ok(FeedJob::end_of_stream());
            };
            if demux.sample_track_index() != Some(self.track) {
                demux.advance();
                continue;
            }
            let job = FeedJob {
                payload: Bytes::copy_from_slice(&scratch[..size.min(scratch.len())]),
                pts_us: demux.sample_time_us().unwrap_or(0),
                flags: demux.sample_flags(),
            };
            demux.advance();
            return Ok(job);
        }
    }
}

#[derive(Debug)]
struct FeedJob {
    payload: Bytes,
    pts_us: i64,
    flags: SampleFlags,
}

impl FeedJob {
    fn end_of_stream() -> Self {
        Self {
            payload: Bytes::new(),
            pts_us: 0,
            flags: SampleFlags::END_OF_STREAM,
        }
    }
}

struct StageCore {
    state: StageState,
    driver: Option<Box<dyn CodecDriver>>,
    configured_format: Option<CodecFormat>,
    output_surface: Option<OutputSurface>,
    input_surface: Option<InputSurface>,
    consumer: Option<Arc<dyn StageOutput>>,
    pull: Option<PullSource>,
    feed_tx: Option<Sender<FeedJob>>,
    poll_tx: Sender<StageEvent>,
    drain: Option<JoinHandle<Box<dyn CodecDriver>>>,
}

struct StageInner {
    name: String,
    caps: StageCaps,
    track: usize,
    factory: Arc<dyn CodecFactory>,
    core: Mutex<StageCore>,
    poll_rx: Receiver<StageEvent>,
    running: Arc<AtomicBool>,
    output_done: Arc<AtomicBool>,
}

/// One encoder or decoder with an asynchronous buffer-exchange contract.
///
/// The handle is cheap to clone; all clones drive the same codec.
#[derive(Clone)]
pub struct CodecStage {
    inner: Arc<StageInner>,
}

impl std::fmt::Debug for CodecStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecStage")
            .field("name", &self.inner.name)
            .field("caps", &self.inner.caps)
            .field("state", &self.state())
            .finish()
    }
}

impl CodecStage {
    /// Create a stage for source track `track`; the codec itself is created by `configure`.
    pub fn new(
        name: impl Into<String>,
        caps: StageCaps,
        track: usize,
        factory: Arc<dyn CodecFactory>,
    ) -> Self {
        let (poll_tx, poll_rx) = crossbeam_channel::unbounded();
        Self {
            inner: Arc::new(StageInner {
                name: name.into(),
                caps,
                track,
                factory,
                core: Mutex::new(StageCore {
                    state: StageState::Created,
                    driver: None,
                    configured_format: None,
                    output_surface: None,
                    input_surface: None,
                    consumer: None,
                    pull: None,
                    feed_tx: None,
                    poll_tx,
                    drain: None,
                }),
                poll_rx,
                running: Arc::new(AtomicBool::new(false)),
                output_done: Arc::new(AtomicBool::new(false)),
            }),
        }
    }

    fn core(&self) -> MutexGuard<'_, StageCore> {
        self.inner.core.lock()
    }

    /// Stage name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Capability descriptor.
    pub fn caps(&self) -> &StageCaps {
        &self.inner.caps
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StageState {
        self.core().state
    }

    /// Format accepted by the codec (the minimal one when the retry was needed).
    pub fn configured_format(&self) -> Option<CodecFormat> {
        self.core().configured_format.clone()
    }

    /// `true` once the end-of-stream output buffer has been surfaced.
    pub fn is_output_done(&self) -> bool {
        self.inner.output_done.load(Ordering::Acquire)
    }

    /// Register the consumer of a callback-delivery stage. Must precede `start`.
    pub fn set_output(&self, consumer: Arc<dyn StageOutput>) -> VidmarkResult<()> {
        let mut core = self.core();
        if core.state >= StageState::Started {
            return Err(VidmarkError::configuration(format!(
                "{}: output consumer must be set before start",
                self.inner.name
            )));
        }
        core.consumer = Some(consumer);
        Ok(())
    }

    /// Attach a demuxer track read on every free input buffer. Must precede `start`.
    pub fn set_pull_source(&self, source: PullSource) -> VidmarkResult<()> {
        if self.inner.caps.input != BufferMode::Buffer {
            return Err(VidmarkError::configuration(format!(
                "{}: pull sources need buffer input",
                self.inner.name
            )));
        }
        let mut core = self.core();
        if core.state >= StageState::Started {
            return Err(VidmarkError::configuration(format!(
                "{}: pull source must be set before start",
                self.inner.name
            )));
        }
        core.pull = Some(source);
        Ok(())
    }

    fn create_driver(&self) -> VidmarkResult<Box<dyn CodecDriver>> {
        let factory = &self.inner.factory;
        match self.inner.caps.role {
            CodecRole::Decoder => factory.create_decoder(&self.inner.caps.mime),
            CodecRole::Encoder => factory.create_encoder(&self.inner.caps.mime),
        }
    }

    /// Create the codec and apply `format`, retrying once with [`CodecFormat::minimal`].
    #[tracing::instrument(skip_all, fields(stage = %self.inner.name))]
    pub fn configure(
        &self,
        format: &CodecFormat,
        surface: Option<OutputSurface>,
    ) -> VidmarkResult<()> {
        let mut core = self.core();
        match core.state {
            StageState::Released => return Ok(()),
            StageState::Created => {}
            other => {
                return Err(VidmarkError::configuration(format!(
                    "{}: configure called in state {other:?}",
                    self.inner.name
                )));
            }
        }
        let wants_surface = self.inner.caps.output == BufferMode::Surface;
        if wants_surface != surface.is_some() {
            return Err(VidmarkError::configuration(format!(
                "{}: output surface {} for this stage",
                self.inner.name,
                if wants_surface { "required" } else { "not accepted" }
            )));
        }
        if format.mime() != self.inner.caps.mime {
            return Err(VidmarkError::configuration(format!(
                "{}: format mime '{}' does not match codec mime '{}'",
                self.inner.name,
                format.mime(),
                self.inner.caps.mime
            )));
        }

        let mut driver = self.create_driver()?;
        let accepted = match driver.configure(format, surface.clone()) {
            Ok(()) => format.clone(),
            Err(first) => {
                tracing::warn!(error = %first, "codec rejected format, retrying with minimal format");
                driver.release();
                let minimal = format.minimal();
                driver = self.create_driver()?;
                if let Err(second) = driver.configure(&minimal, surface.clone()) {
                    driver.release();
                    return Err(VidmarkError::configuration(format!(
                        "{}: format rejected ({first}); minimal format rejected too ({second})",
                        self.inner.name
                    )));
                }
                minimal
            }
        };

        tracing::debug!(format = %accepted, "codec configured");
        core.driver = Some(driver);
        core.configured_format = Some(accepted);
        core.output_surface = surface;
        core.state = StageState::Configured;
        Ok(())
    }

    /// Create the encoder's input surface. Valid between `configure` and `start`.
    pub fn create_input_surface(&self) -> VidmarkResult<InputSurface> {
        let mut core = self.core();
        if self.inner.caps.input != BufferMode::Surface {
            return Err(VidmarkError::configuration(format!(
                "{}: stage does not take surface input",
                self.inner.name
            )));
        }
        if core.state != StageState::Configured {
            return Err(VidmarkError::configuration(format!(
                "{}: input surface requested in state {:?}",
                self.inner.name, core.state
            )));
        }
        if let Some(surface) = &core.input_surface {
            return Ok(surface.clone());
        }
        let driver = core
            .driver
            .as_mut()
            .ok_or_else(|| VidmarkError::configuration("codec missing after configure"))?;
        let surface = driver.create_input_surface()?;
        core.input_surface = Some(surface.clone());
        Ok(surface)
    }

    /// Start the codec and its drain thread.
    #[tracing::instrument(skip_all, fields(stage = %self.inner.name))]
    pub fn start(&self) -> VidmarkResult<()> {
        let mut core = self.core();
        match core.state {
            StageState::Released => return Ok(()),
            StageState::Configured => {}
            other => {
                return Err(VidmarkError::configuration(format!(
                    "{}: start called in state {other:?}",
                    self.inner.name
                )));
            }
        }
        if self.inner.caps.input == BufferMode::Surface && core.input_surface.is_none() {
            return Err(VidmarkError::configuration(format!(
                "{}: create the input surface before start",
                self.inner.name
            )));
        }
        let sink = match self.inner.caps.delivery {
            Delivery::Callback => match core.consumer.clone() {
                Some(consumer) => EventSink::Callback(consumer),
                None => {
                    return Err(VidmarkError::configuration(format!(
                        "{}: no output consumer registered",
                        self.inner.name
                    )));
                }
            },
            Delivery::Polling => EventSink::Polling(core.poll_tx.clone()),
        };

        let mut driver = core
            .driver
            .take()
            .ok_or_else(|| VidmarkError::configuration("codec missing after configure"))?;
        if let Err(e) = driver.start() {
            core.driver = Some(driver);
            return Err(e);
        }

        let (feed_tx, feed_rx) = crossbeam_channel::unbounded();
        self.inner.running.store(true, Ordering::Release);
        let drain = DrainLoop {
            name: self.inner.name.clone(),
            input: self.inner.caps.input,
            output: self.inner.caps.output,
            track: self.inner.track,
            driver,
            running: Arc::clone(&self.inner.running),
            output_done: Arc::clone(&self.inner.output_done),
            feed_rx,
            pull: core.pull.clone(),
            sink,
            output_surface: core.output_surface.clone(),
            held_input: None,
            next_job: None,
            input_ended: false,
            scratch: Vec::new(),
        };
        let handle = std::thread::Builder::new()
            .name(format!("{}-drain", self.inner.name))
            .spawn(move || drain.run())
            .map_err(|e| {
                self.inner.running.store(false, Ordering::Release);
                VidmarkError::io(format!("failed to spawn drain thread: {e}"))
            })?;

        core.feed_tx = Some(feed_tx);
        core.drain = Some(handle);
        core.state = StageState::Started;
        tracing::debug!("codec started");
        Ok(())
    }

    /// Queue one input buffer. Valid while `Started` or `Draining`; a no-op once released.
    pub fn feed(&self, payload: impl Into<Bytes>, pts_us: i64, flags: SampleFlags) -> VidmarkResult<()> {
        let core = self.core();
        match core.state {
            StageState::Released => Ok(()),
            StageState::Started | StageState::Draining => {
                if self.inner.caps.input != BufferMode::Buffer {
                    return Err(VidmarkError::codec(format!(
                        "{}: feed called on a surface-input stage",
                        self.inner.name
                    )));
                }
                let job = FeedJob {
                    payload: payload.into(),
                    pts_us,
                    flags,
                };
                match &core.feed_tx {
                    Some(tx) => tx
                        .send(job)
                        .map_err(|_| VidmarkError::codec(format!("{}: drain loop has exited", self.inner.name))),
                    None => Err(VidmarkError::codec(format!("{}: no input queue", self.inner.name))),
                }
            }
            other => Err(VidmarkError::codec(format!(
                "{}: feed called in state {other:?}",
                self.inner.name
            ))),
        }
    }

    /// Signal that no more input follows. Idempotent.
    #[tracing::instrument(skip_all, fields(stage = %self.inner.name))]
    pub fn signal_end_of_stream(&self) -> VidmarkResult<()> {
        let surface = {
            let mut core = self.core();
            match core.state {
                StageState::Released | StageState::Draining | StageState::Stopped => return Ok(()),
                StageState::Started => {}
                other => {
                    return Err(VidmarkError::codec(format!(
                        "{}: end of stream signalled in state {other:?}",
                        self.inner.name
                    )));
                }
            }
            core.state = StageState::Draining;
            match self.inner.caps.input {
                BufferMode::Buffer => {
                    if let Some(tx) = &core.feed_tx {
                        let _ = tx.send(FeedJob::end_of_stream());
                    }
                    None
                }
                BufferMode::Surface => core.input_surface.clone(),
            }
        };
        tracing::debug!("end of stream signalled");
        // May block while the encoder's frame queue is full, so the lock is not held here.
        match surface {
            Some(surface) => surface.signal_end_of_stream(),
            None => Ok(()),
        }
    }

    /// Next output item of a polling-delivery stage.
    pub fn poll_output(&self, timeout: Duration) -> Option<StageEvent> {
        self.inner.poll_rx.recv_timeout(timeout).ok()
    }

    /// Stop the drain thread and the codec. Idempotent; failures are logged.
    pub fn stop(&self) {
        let handle = {
            let mut core = self.core();
            match core.state {
                StageState::Started | StageState::Draining => {}
                StageState::Configured => {
                    if let Some(driver) = core.driver.as_mut()
                        && let Err(e) = driver.stop()
                    {
                        tracing::warn!(stage = %self.inner.name, error = %e, "codec stop failed");
                    }
                    core.state = StageState::Stopped;
                    return;
                }
                _ => return,
            }
            self.inner.running.store(false, Ordering::Release);
            core.feed_tx = None;
            core.state = StageState::Stopped;
            core.drain.take()
        };

        let Some(handle) = handle else { return };
        if handle.thread().id() == std::thread::current().id() {
            tracing::warn!(stage = %self.inner.name, "stop called from the drain thread; codec left to exit");
            return;
        }
        match handle.join() {
            Ok(mut driver) => {
                if let Err(e) = driver.stop() {
                    tracing::warn!(stage = %self.inner.name, error = %e, "codec stop failed");
                }
                self.core().driver = Some(driver);
            }
            Err(_) => tracing::warn!(stage = %self.inner.name, "drain thread panicked"),
        }
        tracing::debug!(stage = %self.inner.name, "codec stopped");
    }

    /// Stop if needed, then free the codec. Idempotent; failures are logged.
    pub fn release(&self) {
        if self.state() == StageState::Released {
            return;
        }
        self.stop();
        let driver = {
            let mut core = self.core();
            if core.state == StageState::Released {
                return;
            }
            core.state = StageState::Released;
            core.consumer = None;
            core.pull = None;
            core.output_surface = None;
            core.input_surface = None;
            core.feed_tx = None;
            core.driver.take()
        };
        if let Some(mut driver) = driver {
            driver.release();
        }
        tracing::debug!(stage = %self.inner.name, "codec released");
    }
}

enum EventSink {
    Callback(Arc<dyn StageOutput>),
    Polling(Sender<StageEvent>),
}

impl EventSink {
    fn format_changed(&self, format: CodecFormat) {
        match self {
            Self::Callback(c) => c.on_format_changed(format),
            Self::Polling(tx) => {
                let _ = tx.send(StageEvent::FormatChanged(format));
            }
        }
    }

    fn sample(&self, sample: Sample) {
        match self {
            Self::Callback(c) => c.on_sample(sample),
            Self::Polling(tx) => {
                let _ = tx.send(StageEvent::Sample(sample));
            }
        }
    }

    fn error(&self, error: VidmarkError) {
        match self {
            Self::Callback(c) => c.on_error(error),
            Self::Polling(tx) => {
                let _ = tx.send(StageEvent::Error(error));
            }
        }
    }
}

struct DrainLoop {
    name: String,
    input: BufferMode,
    output: BufferMode,
    track: usize,
    driver: Box<dyn CodecDriver>,
    running: Arc<AtomicBool>,
    output_done: Arc<AtomicBool>,
    feed_rx: Receiver<FeedJob>,
    pull: Option<PullSource>,
    sink: EventSink,
    output_surface: Option<OutputSurface>,
    held_input: Option<usize>,
    next_job: Option<FeedJob>,
    input_ended: bool,
    scratch: Vec<u8>,
}

impl DrainLoop {
    fn run(mut self) -> Box<dyn CodecDriver> {
        let mut failures = 0u64;
        while self.running.load(Ordering::Acquire) {
            match self.step() {
                Ok(false) => failures = 0,
                Ok(true) => break,
                Err(e) => {
                    failures += 1;
                    tracing::warn!(stage = %self.name, error = %e, failures, "drain loop iteration failed");
                    // Back off between failed iterations.
                    std::thread::sleep(OUTPUT_TIMEOUT);
                }
            }
        }
        tracing::debug!(stage = %self.name, "drain loop exited");
        self.driver
    }

    /// One input/output round. Returns `true` once the end-of-stream output was surfaced.
    fn step(&mut self) -> VidmarkResult<bool> {
        if self.input == BufferMode::Buffer && !self.input_ended {
            self.pump_input()?;
        }

        let timeout = if self.held_input.is_some() {
            HELD_INPUT_TIMEOUT
        } else {
            OUTPUT_TIMEOUT
        };
        match self.driver.dequeue_output_buffer(timeout)? {
            OutputEvent::TryAgainLater => {
                let starving = self.input == BufferMode::Buffer
                    && !self.input_ended
                    && self.held_input.is_some()
                    && self.next_job.is_none()
                    && self.pull.is_none();
                if starving && let Ok(job) = self.feed_rx.recv_timeout(timeout) {
                    self.next_job = Some(job);
                }
                Ok(false)
            }
            OutputEvent::FormatChanged(format) => {
                tracing::debug!(stage = %self.name, format = %format, "output format changed");
                self.sink.format_changed(format);
                Ok(false)
            }
            OutputEvent::Buffer { index, info } => self.handle_output(index, info),
        }
    }

    fn pump_input(&mut self) -> VidmarkResult<()> {
        for _ in 0..MAX_INPUTS_PER_STEP {
            if self.held_input.is_none() {
                self.held_input = self.driver.dequeue_input_buffer(Duration::ZERO)?;
            }
            let Some(index) = self.held_input else {
                return Ok(());
            };
            let job = match self.next_job.take() {
                Some(job) => job,
                None => match self.next_input()? {
                    Some(job) => job,
                    None => return Ok(()),
                },
            };
            if let Err(e) = self
                .driver
                .queue_input_buffer(index, &job.payload, job.pts_us, job.flags)
            {
                if job.flags.end_of_stream {
                    self.next_job = Some(job);
                }
                return Err(e);
            }
            self.held_input = None;
            if job.flags.end_of_stream {
                tracing::debug!(stage = %self.name, "end of input queued");
                self.input_ended = true;
                return Ok(());
            }
        }
        Ok(())
    }

    fn next_input(&mut self) -> VidmarkResult<Option<FeedJob>> {
        if let Ok(job) = self.feed_rx.try_recv() {
            return Ok(Some(job));
        }
        match &self.pull {
            Some(pull) => pull.read_next(&mut self.scratch).map(Some),
            None => Ok(None),
        }
    }

    fn handle_output(&mut self, index: usize, info: BufferInfo) -> VidmarkResult<bool> {
        let eos = info.flags.end_of_stream;
        match self.output {
            BufferMode::Surface => {
                let render = info.size > 0 && !info.flags.config_data;
                self.driver.release_output_buffer(index, render)?;
                if render {
                    self.await_frame_release();
                }
                if eos {
                    self.sink.sample(Sample::end_of_stream(self.track, info.pts_us));
                }
            }
            BufferMode::Buffer => {
                let payload = self.driver.output_buffer(index).map(|buf| {
                    buf.get(info.offset..info.offset + info.size)
                        .map(Bytes::copy_from_slice)
                });
                self.driver.release_output_buffer(index, false)?;
                let payload = match payload {
                    Some(Some(bytes)) => bytes,
                    Some(None) => {
                        return Err(VidmarkError::codec(format!(
                            "{}: output buffer {index} range {}+{} out of bounds",
                            self.name, info.offset, info.size
                        )));
                    }
                    None => Bytes::new(),
                };
                let sample = Sample::new(self.track, payload, info.pts_us, info.flags);
                if sample.is_media() || eos {
                    self.sink.sample(sample);
                }
            }
        }
        if eos {
            tracing::debug!(stage = %self.name, pts_us = info.pts_us, "end of output stream");
            self.output_done.store(true, Ordering::Release);
            return Ok(true);
        }
        Ok(false)
    }

    fn await_frame_release(&self) {
        let Some(surface) = &self.output_surface else {
            return;
        };
        while self.running.load(Ordering::Acquire) {
            if surface.wait_frame_released(ACK_POLL) || surface.is_released() {
                return;
            }
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/codec/stage.rs"]
mod tests;
