//! Pipeline orchestrator: wires demux sources, codec stages, the compositor and the multiplexer
//! for one run, drives it to completion and tears everything down.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::actor::{Actor, Latch, SerialActor};
use crate::codec::driver::CodecFactory;
use crate::codec::stage::{CodecStage, PullSource, StageCaps, StageOutput};
use crate::container::mp4_demux::Mp4File;
use crate::container::mp4_mux::Mp4FileTarget;
use crate::container::{MediaInfo, MediaInput, OutputTarget, SharedDemuxer, find_track};
use crate::foundation::core::TrackKind;
use crate::foundation::error::{VidmarkError, VidmarkResult};
use crate::media::format::CodecFormat;
use crate::media::sample::{Sample, SampleFlags, Track};
use crate::mux::multiplexer::{MuxStats, TrackMultiplexer};
use crate::overlay::bitmap::ImageOverlay;
use crate::overlay::provider::{OverlayProvider, TransparentOverlay};
use crate::overlay::vector::SvgOverlay;
use crate::pipeline::config::TranscodeConfig;
use crate::pipeline::format::{audio_encoder_format, video_encoder_format};
use crate::pipeline::platform::{LocalPlatform, PlatformServices};
use crate::pipeline::state::{PipelineOutcome, PipelineState, StateTracker, TranscodeReport};
use crate::render::compositor::FrameCompositor;
use crate::render::context::{RenderContext, WindowSurface};
use crate::render::surface::OutputSurface;

const EVENT_POLL: Duration = Duration::from_millis(50);

/// One transcode job: input, output target, overlay and host services.
pub struct Transcoder {
    config: TranscodeConfig,
    input: Arc<dyn MediaInput>,
    target: Box<dyn OutputTarget>,
    overlay: Box<dyn OverlayProvider>,
    platform: Arc<dyn PlatformServices>,
    observer: Option<Box<dyn Fn(PipelineState) + Send>>,
}

impl std::fmt::Debug for Transcoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transcoder")
            .field("input", &self.input.describe())
            .field("output", &self.target.location())
            .field("backend", &self.config.backend)
            .finish_non_exhaustive()
    }
}

impl Transcoder {
    /// Assemble a job from explicit parts.
    pub fn new(
        config: TranscodeConfig,
        input: Arc<dyn MediaInput>,
        target: Box<dyn OutputTarget>,
        overlay: Box<dyn OverlayProvider>,
        platform: Arc<dyn PlatformServices>,
    ) -> Self {
        Self {
            config,
            input,
            target,
            overlay,
            platform,
            observer: None,
        }
    }

    /// Job reading the MP4 at `input` and writing the MP4 named by `config`.
    pub fn from_config(input: &Path, config: TranscodeConfig) -> VidmarkResult<Self> {
        config.validate()?;
        let output = config.resolve_output_path(chrono::Local::now());
        let overlay: Box<dyn OverlayProvider> = match &config.overlay {
            Some(spec) if spec.is_svg() => {
                Box::new(SvgOverlay::open(&spec.path, spec.layout, spec.opacity)?)
            }
            Some(spec) => Box::new(ImageOverlay::open(&spec.path, spec.layout, spec.opacity)?),
            None => Box::new(TransparentOverlay::new()),
        };
        let platform = Arc::new(LocalPlatform::new(config.media_index_path.clone()));
        let target = Box::new(Mp4FileTarget::new(output, config.overwrite));
        Ok(Self::new(
            config,
            Arc::new(Mp4File::new(input)),
            target,
            overlay,
            platform,
        ))
    }

    /// Report every state transition to `observer`.
    pub fn with_state_observer(mut self, observer: impl Fn(PipelineState) + Send + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Output location, when the target has one.
    pub fn output_path(&self) -> Option<PathBuf> {
        self.target.location().map(Path::to_path_buf)
    }

    /// Run on a new thread and hand the outcome to `on_done`.
    pub fn spawn(
        self,
        on_done: impl FnOnce(PipelineOutcome) + Send + 'static,
    ) -> VidmarkResult<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("vidmark-pipeline".to_string())
            .spawn(move || on_done(self.run()))
            .map_err(|e| VidmarkError::io(format!("failed to spawn pipeline thread: {e}")))
    }

    /// Run to completion. Every resource is released before this returns.
    #[tracing::instrument(skip_all, fields(input = %self.input.describe()))]
    pub fn run(mut self) -> PipelineOutcome {
        let started = Instant::now();
        let mut tracker = StateTracker::new(self.observer.take());
        let mut run = Run::default();

        let result = self.execute(&mut run, &mut tracker);
        run.teardown();
        if let Err(e) = tracker.advance(PipelineState::Released) {
            tracing::warn!(error = %e, "pipeline state");
        }

        match result {
            Ok(done) => {
                let report = TranscodeReport {
                    output: self.output_path(),
                    frames_rendered: done.frames_rendered,
                    video_samples: done.stats.samples_of(TrackKind::Video),
                    audio_samples: done.stats.samples_of(TrackKind::Audio),
                    duration_us: done.stats.span_us(),
                    elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    rotation: done.info.rotation,
                };
                if self.config.notify_media_index
                    && let Some(path) = &report.output
                    && let Err(e) = self.platform.announce_output(path)
                {
                    tracing::warn!(error = %e, "media index notification failed");
                }
                tracing::info!(
                    frames = report.frames_rendered,
                    video_samples = report.video_samples,
                    audio_samples = report.audio_samples,
                    duration_us = report.duration_us,
                    elapsed_ms = report.elapsed_ms,
                    "transcode finished"
                );
                PipelineOutcome::Success(report)
            }
            Err(error) => {
                if run.target_opened {
                    self.target.discard();
                }
                tracing::error!(%error, "transcode failed");
                PipelineOutcome::from_error(error)
            }
        }
    }

    fn execute(&mut self, run: &mut Run, tracker: &mut StateTracker) -> VidmarkResult<Completed> {
        // Unconfigured -> SourcesReady
        let info = self.input.inspect().map_err(VidmarkError::into_source)?;
        if !info.has_video && !info.has_audio {
            return Err(VidmarkError::source_error(format!(
                "{} has neither audio nor video",
                self.input.describe()
            )));
        }
        let video = if info.has_video {
            Some(self.open_source(run, TrackKind::Video)?)
        } else {
            None
        };
        let audio = if info.has_audio {
            Some(self.open_source(run, TrackKind::Audio)?)
        } else {
            None
        };
        tracing::debug!(?info, "sources ready");
        tracker.advance(PipelineState::SourcesReady)?;

        // SourcesReady -> TracksNegotiating
        let factory = self.platform.codec_factory(self.config.backend);
        let writer = self.target.open()?;
        run.target_opened = true;
        let expected = usize::from(video.is_some()) + usize::from(audio.is_some());
        let mux = Arc::new(TrackMultiplexer::new(writer, expected, self.config.pending_writes)?);
        run.mux = Some(Arc::clone(&mux));
        mux.set_orientation_hint(info.rotation.degrees())?;

        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let port = EventPort {
            tx: events_tx,
            progress: Arc::new(AtomicU64::new(0)),
        };
        let mux_port = port.clone();
        mux.set_failure_listener(move |error| mux_port.fail(error));
        let video = video
            .map(|source| self.video_path(run, source, &factory))
            .transpose()?;
        let audio = audio
            .map(|source| self.audio_path(run, source, &factory))
            .transpose()?;
        tracker.advance(PipelineState::TracksNegotiating)?;

        // TracksNegotiating -> Running
        self.configure_decoders(video.as_ref(), audio.as_ref())?;
        if let Some(path) = &video {
            self.wire_video(run, path, &mux, &port)?;
        }
        if let Some(path) = &audio {
            self.wire_audio(path, &mux, &port)?;
        }
        // Encoders start before any decoder produces output.
        for path in [&video, &audio].into_iter().flatten() {
            path.encoder.start()?;
        }
        for path in [&video, &audio].into_iter().flatten() {
            path.decoder.start()?;
        }
        tracker.advance(PipelineState::Running)?;

        // Running -> Draining -> Finalized
        let primary = if video.is_some() {
            TrackKind::Video
        } else {
            TrackKind::Audio
        };
        let mut pending: Vec<TrackKind> = [&video, &audio]
            .into_iter()
            .flatten()
            .map(|p| p.track.kind)
            .collect();
        self.await_paths(&events_rx, &port, primary, &mut pending, tracker)?;

        let frames_rendered = run
            .render
            .as_ref()
            .and_then(|render| render.call(|state| state.frames_rendered()))
            .unwrap_or(0);
        let stats = mux.finalize()?;
        if !stats.started {
            return Err(VidmarkError::io(
                "no encoder produced a format; the output was never started",
            ));
        }
        tracker.advance(PipelineState::Finalized)?;
        Ok(Completed {
            info,
            stats,
            frames_rendered,
        })
    }

    fn open_source(&self, run: &mut Run, kind: TrackKind) -> VidmarkResult<(SharedDemuxer, Track)> {
        let mut demux = self.input.open_demuxer().map_err(VidmarkError::into_source)?;
        let found = find_track(demux.as_ref(), kind).and_then(|index| {
            demux
                .track_format(index)
                .map(|format| Track::new(index, kind, format))
        });
        let Some(track) = found else {
            demux.release();
            return Err(VidmarkError::source_error(format!(
                "{}: no readable {} track",
                self.input.describe(),
                kind.label()
            )));
        };
        if let Err(e) = demux.select_track(track.source_index) {
            demux.release();
            return Err(e.into_source());
        }
        let shared = SharedDemuxer::new(demux);
        run.demuxers.push(shared.clone());
        Ok((shared, track))
    }

    fn video_path(
        &self,
        run: &mut Run,
        (demuxer, track): (SharedDemuxer, Track),
        factory: &Arc<dyn CodecFactory>,
    ) -> VidmarkResult<MediaPath> {
        let encoder_format =
            video_encoder_format(&track.format, self.config.video_mime(), &self.config.encode)?;
        let decoder = CodecStage::new(
            "video-decoder",
            StageCaps::surface_decoder(track.format.mime()),
            track.source_index,
            Arc::clone(factory),
        );
        let encoder = CodecStage::new(
            "video-encoder",
            StageCaps::surface_encoder(encoder_format.mime()),
            track.source_index,
            Arc::clone(factory),
        );
        run.decoders.push(decoder.clone());
        run.encoders.push(encoder.clone());
        decoder.set_pull_source(PullSource {
            demuxer,
            track: track.source_index,
        })?;
        let surface = OutputSurface::new();
        run.output_surface = Some(surface.clone());
        let setup = Actor::serial("vidmark-video-setup")?;
        run.setup_actors.push(setup.clone());
        Ok(MediaPath {
            track,
            decoder,
            encoder,
            encoder_format,
            surface: Some(surface),
            setup,
        })
    }

    fn audio_path(
        &self,
        run: &mut Run,
        (demuxer, track): (SharedDemuxer, Track),
        factory: &Arc<dyn CodecFactory>,
    ) -> VidmarkResult<MediaPath> {
        let encoder_format =
            audio_encoder_format(&track.format, self.config.audio_mime(), &self.config.encode)?;
        let decoder = CodecStage::new(
            "audio-decoder",
            StageCaps::decoder(track.format.mime()),
            track.source_index,
            Arc::clone(factory),
        );
        let encoder = CodecStage::new(
            "audio-encoder",
            StageCaps::encoder(encoder_format.mime()),
            track.source_index,
            Arc::clone(factory),
        );
        run.decoders.push(decoder.clone());
        run.encoders.push(encoder.clone());
        decoder.set_pull_source(PullSource {
            demuxer,
            track: track.source_index,
        })?;
        let setup = Actor::serial("vidmark-audio-setup")?;
        run.setup_actors.push(setup.clone());
        Ok(MediaPath {
            track,
            decoder,
            encoder,
            encoder_format,
            surface: None,
            setup,
        })
    }

    /// Configure every decoder on its path's setup actor and wait for all of them.
    fn configure_decoders(
        &self,
        video: Option<&MediaPath>,
        audio: Option<&MediaPath>,
    ) -> VidmarkResult<()> {
        let paths: Vec<&MediaPath> = [video, audio].into_iter().flatten().collect();
        let latch = Arc::new(Latch::new(paths.len()));
        let failures = Arc::new(Mutex::new(Vec::new()));
        for path in &paths {
            let (latch, failures) = (Arc::clone(&latch), Arc::clone(&failures));
            let (stage, format, surface) = (
                path.decoder.clone(),
                path.track.format.clone(),
                path.surface.clone(),
            );
            path.setup.submit(move |_: &mut ()| {
                if let Err(e) = stage.configure(&format, surface) {
                    failures.lock().push(e);
                }
                latch.count_down();
            });
        }
        if !latch.wait_timeout(self.stall_timeout()) {
            return Err(VidmarkError::codec("timed out configuring decoders"));
        }
        match failures.lock().drain(..).next() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn wire_video(
        &mut self,
        run: &mut Run,
        path: &MediaPath,
        mux: &Arc<TrackMultiplexer>,
        port: &EventPort,
    ) -> VidmarkResult<()> {
        let surface = path
            .surface
            .clone()
            .ok_or_else(|| VidmarkError::configuration("video path has no output surface"))?;
        path.encoder.configure(&path.encoder_format, None)?;
        let input = path.encoder.create_input_surface()?;
        let context = RenderContext::new(self.config.render_threads)?;
        let window = WindowSurface::new(input)?;
        let compositor = FrameCompositor::new(context, window, surface.clone(), self.overlay.as_mut())?;
        let render = Actor::spawn(
            "vidmark-render",
            RenderState {
                compositor: Some(compositor),
            },
        )?;
        run.render = Some(render.clone());

        let (listener_render, listener_port) = (render.clone(), port.clone());
        surface.set_on_frame_available(move || {
            let port = listener_port.clone();
            listener_render.submit(move |state| state.render_frame(&port));
        });
        path.decoder.set_output(Arc::new(VideoDecodeOutput {
            render,
            port: port.clone(),
        }))?;
        path.encoder
            .set_output(Arc::new(EncoderOutput::new(path.track.clone(), mux, port)))?;
        Ok(())
    }

    fn wire_audio(
        &self,
        path: &MediaPath,
        mux: &Arc<TrackMultiplexer>,
        port: &EventPort,
    ) -> VidmarkResult<()> {
        path.encoder.configure(&path.encoder_format, None)?;
        path.decoder.set_output(Arc::new(AudioDecodeOutput {
            encoder: path.encoder.clone(),
            port: port.clone(),
        }))?;
        path.encoder
            .set_output(Arc::new(EncoderOutput::new(path.track.clone(), mux, port)))?;
        Ok(())
    }

    fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.config.stall_timeout_s)
    }

    /// Wait until every path's encoder has emitted end of stream.
    fn await_paths(
        &self,
        events: &Receiver<PipelineEvent>,
        port: &EventPort,
        primary: TrackKind,
        pending: &mut Vec<TrackKind>,
        tracker: &mut StateTracker,
    ) -> VidmarkResult<()> {
        let stall = self.stall_timeout();
        let mut seen = port.progress.load(Ordering::Acquire);
        let mut last_change = Instant::now();
        while !pending.is_empty() {
            match events.recv_timeout(EVENT_POLL) {
                Ok(PipelineEvent::PathDone(kind)) => {
                    tracing::debug!(path = kind.label(), "path complete");
                    pending.retain(|k| *k != kind);
                    if kind == primary && tracker.state() == PipelineState::Running {
                        tracker.advance(PipelineState::Draining)?;
                    }
                }
                Ok(PipelineEvent::Failed(e)) => return Err(e),
                Err(RecvTimeoutError::Timeout) => {
                    let now = port.progress.load(Ordering::Acquire);
                    if now != seen {
                        seen = now;
                        last_change = Instant::now();
                    } else if last_change.elapsed() >= stall {
                        return Err(VidmarkError::io(format!(
                            "pipeline stalled for {}s waiting on {pending:?}",
                            stall.as_secs()
                        )));
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(VidmarkError::codec("every stage went away before finishing"));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Completed {
    info: MediaInfo,
    stats: MuxStats,
    frames_rendered: u64,
}

/// Decoder, encoder and wiring of one media kind.
struct MediaPath {
    track: Track,
    decoder: CodecStage,
    encoder: CodecStage,
    encoder_format: CodecFormat,
    surface: Option<OutputSurface>,
    setup: SerialActor,
}

/// Everything a run allocated, released in dependency order.
#[derive(Default)]
struct Run {
    demuxers: Vec<SharedDemuxer>,
    mux: Option<Arc<TrackMultiplexer>>,
    encoders: Vec<CodecStage>,
    decoders: Vec<CodecStage>,
    render: Option<Actor<RenderState>>,
    output_surface: Option<OutputSurface>,
    setup_actors: Vec<SerialActor>,
    target_opened: bool,
}

impl Run {
    /// Release every resource. Each step stands alone; nothing here fails.
    fn teardown(&mut self) {
        for stage in self.encoders.drain(..) {
            stage.release();
        }
        for stage in self.decoders.drain(..) {
            stage.release();
        }
        if let Some(render) = self.render.take() {
            render.submit(|state| {
                if let Some(mut compositor) = state.compositor.take() {
                    compositor.release();
                }
            });
            render.wait_idle();
            render.shutdown();
        }
        if let Some(surface) = self.output_surface.take() {
            surface.release();
        }
        if let Some(mux) = self.mux.take() {
            mux.release();
        }
        for actor in self.setup_actors.drain(..) {
            actor.shutdown();
        }
        for demuxer in self.demuxers.drain(..) {
            demuxer.lock().release();
        }
        tracing::debug!("pipeline resources released");
    }
}

enum PipelineEvent {
    PathDone(TrackKind),
    Failed(VidmarkError),
}

#[derive(Clone)]
struct EventPort {
    tx: Sender<PipelineEvent>,
    progress: Arc<AtomicU64>,
}

impl EventPort {
    fn tick(&self) {
        self.progress.fetch_add(1, Ordering::AcqRel);
    }

    fn fail(&self, error: VidmarkError) {
        let _ = self.tx.send(PipelineEvent::Failed(error));
    }

    fn done(&self, kind: TrackKind) {
        let _ = self.tx.send(PipelineEvent::PathDone(kind));
    }
}

/// State of the render actor.
struct RenderState {
    compositor: Option<FrameCompositor>,
}

impl RenderState {
    fn render_frame(&mut self, port: &EventPort) {
        let Some(compositor) = self.compositor.as_mut() else {
            return;
        };
        match compositor.on_frame_available() {
            Ok(true) => port.tick(),
            Ok(false) => {}
            Err(e) => port.fail(e),
        }
    }

    fn end_of_stream(&mut self, port: &EventPort) {
        if let Some(compositor) = &self.compositor
            && let Err(e) = compositor.signal_end_of_stream()
        {
            port.fail(e);
        }
    }

    fn frames_rendered(&self) -> u64 {
        self.compositor
            .as_ref()
            .map_or(0, FrameCompositor::frames_rendered)
    }
}

/// Surface decoder output: only the end-of-stream marker arrives here; frames travel through
/// the output surface.
struct VideoDecodeOutput {
    render: Actor<RenderState>,
    port: EventPort,
}

impl StageOutput for VideoDecodeOutput {
    fn on_format_changed(&self, format: CodecFormat) {
        tracing::debug!(%format, "video decoder format");
    }

    fn on_sample(&self, sample: Sample) {
        if sample.flags.end_of_stream {
            let port = self.port.clone();
            self.render.submit(move |state| state.end_of_stream(&port));
        }
    }

    fn on_error(&self, error: VidmarkError) {
        self.port.fail(error);
    }
}

/// Buffer decoder output fed straight into the audio encoder.
struct AudioDecodeOutput {
    encoder: CodecStage,
    port: EventPort,
}

impl StageOutput for AudioDecodeOutput {
    fn on_format_changed(&self, format: CodecFormat) {
        tracing::debug!(%format, "audio decoder format");
    }

    fn on_sample(&self, sample: Sample) {
        if sample.is_media() {
            let flags = SampleFlags {
                end_of_stream: false,
                ..sample.flags
            };
            match self
                .encoder
                .feed(sample.payload, sample.presentation_time_us, flags)
            {
                Ok(()) => self.port.tick(),
                Err(e) => tracing::warn!(error = %e, pts_us = sample.presentation_time_us, "audio sample dropped"),
            }
        }
        if sample.flags.end_of_stream
            && let Err(e) = self.encoder.signal_end_of_stream()
        {
            self.port.fail(e);
        }
    }

    fn on_error(&self, error: VidmarkError) {
        self.port.fail(error);
    }
}

/// Encoder output: registers the output track on the first format and writes every sample.
struct EncoderOutput {
    track: Mutex<Track>,
    mux: Arc<TrackMultiplexer>,
    port: EventPort,
}

impl EncoderOutput {
    fn new(track: Track, mux: &Arc<TrackMultiplexer>, port: &EventPort) -> Self {
        Self {
            track: Mutex::new(track),
            mux: Arc::clone(mux),
            port: port.clone(),
        }
    }
}

impl StageOutput for EncoderOutput {
    fn on_format_changed(&self, format: CodecFormat) {
        let mut track = self.track.lock();
        if let Some(dest) = track.dest_index() {
            tracing::warn!(track = track.source_index, dest, %format, "encoder format changed after registration; ignored");
            return;
        }
        match self.mux.add_track(track.source_index, track.kind, format) {
            Ok(dest) => {
                tracing::debug!(track = track.source_index, dest, "output track registered");
                if let Err(e) = track.assign_dest(dest) {
                    self.port.fail(e);
                }
            }
            Err(e) => self.port.fail(e),
        }
    }

    fn on_sample(&self, sample: Sample) {
        let (source, kind) = {
            let track = self.track.lock();
            (track.source_index, track.kind)
        };
        let eos = sample.flags.end_of_stream;
        self.mux.write_sample(source, sample);
        self.port.tick();
        if eos {
            self.port.done(kind);
        }
    }

    fn on_error(&self, error: VidmarkError) {
        self.port.fail(error);
    }
}

#[cfg(test)]
#[path = "../../tests/unit/pipeline/orchestrator.rs"]
mod tests;
