use std::path::Path;

use super::*;
use crate::container::ContainerWriter;
use crate::container::memory::{MemoryContainer, MemoryInput, MemoryTarget, MemoryTrack};
use crate::foundation::core::{Rotation, frame_pts_us};
use crate::media::format::{keys, mime};
use crate::mux::multiplexer::PendingWritePolicy;
use crate::pipeline::config::CodecBackend;

const W: u32 = 8;
const H: u32 = 6;

fn video_track(frames: u64) -> MemoryTrack {
    MemoryTrack::new(
        CodecFormat::video(mime::VIDEO_RAW, W, H).with_int(keys::FRAME_RATE, 30),
        (0..frames)
            .map(|i| {
                Sample::new(
                    0,
                    vec![(i * 7) as u8; (W * H * 4) as usize],
                    frame_pts_us(i, 30),
                    SampleFlags::KEY_FRAME,
                )
            })
            .collect(),
    )
}

fn audio_track(chunks: i64) -> MemoryTrack {
    MemoryTrack::new(
        CodecFormat::audio(mime::AUDIO_RAW, 48_000, 2),
        (0..chunks)
            .map(|i| Sample::new(0, vec![1u8; 4096], i * 21_333, SampleFlags::KEY_FRAME))
            .collect(),
    )
}

fn soft_config() -> TranscodeConfig {
    TranscodeConfig {
        backend: CodecBackend::Soft,
        notify_media_index: false,
        stall_timeout_s: 10,
        render_threads: Some(2),
        ..TranscodeConfig::default()
    }
}

fn transcoder(input: MemoryInput, target: Box<dyn OutputTarget>) -> Transcoder {
    Transcoder::new(
        soft_config(),
        Arc::new(input),
        target,
        Box::new(TransparentOverlay::new()),
        Arc::new(LocalPlatform::default()),
    )
}

#[test]
fn video_only_run_passes_every_frame_through() {
    let target = MemoryTarget::new();
    let container = target.container();
    let input = MemoryInput::new(vec![video_track(6)]).with_rotation(Rotation::Cw270);

    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&states);
    let report = transcoder(input, Box::new(target.clone()))
        .with_state_observer(move |s| sink.lock().push(s))
        .run()
        .into_result()
        .unwrap();

    assert_eq!(report.frames_rendered, 6);
    assert_eq!((report.video_samples, report.audio_samples), (6, 0));
    assert_eq!(report.rotation, Rotation::Cw270);
    assert_eq!(report.output, None);

    let rec = container.recording();
    assert_eq!((rec.start_count, rec.stop_count), (1, 1));
    assert_eq!(rec.rotation, Rotation::Cw270);
    let pts: Vec<i64> = rec
        .samples_for(0)
        .iter()
        .map(|s| s.presentation_time_us)
        .collect();
    assert_eq!(pts, (0..6).map(|i| frame_pts_us(i, 30)).collect::<Vec<_>>());
    assert!(!target.was_discarded());

    assert_eq!(
        *states.lock(),
        vec![
            PipelineState::SourcesReady,
            PipelineState::TracksNegotiating,
            PipelineState::Running,
            PipelineState::Draining,
            PipelineState::Finalized,
            PipelineState::Released,
        ]
    );
}

#[test]
fn empty_input_is_a_source_error_and_touches_nothing() {
    let target = MemoryTarget::new();
    let outcome = transcoder(MemoryInput::new(Vec::new()), Box::new(target.clone())).run();
    assert!(matches!(outcome, PipelineOutcome::SourceError(_)));
    assert_eq!(target.container().recording().start_count, 0);
    assert!(!target.was_discarded());
}

#[derive(Clone, Default)]
struct FailingTarget {
    discarded: Arc<Mutex<bool>>,
    write_attempts: Arc<AtomicU64>,
}

struct FailingWriter {
    inner: MemoryContainer,
    write_attempts: Arc<AtomicU64>,
}

impl ContainerWriter for FailingWriter {
    fn add_track(&mut self, kind: TrackKind, format: &CodecFormat) -> VidmarkResult<usize> {
        self.inner.add_track(kind, format)
    }

    fn set_orientation_hint(&mut self, rotation: Rotation) -> VidmarkResult<()> {
        self.inner.set_orientation_hint(rotation)
    }

    fn start(&mut self) -> VidmarkResult<()> {
        self.inner.start()
    }

    fn write_sample(&mut self, _dest_index: usize, _sample: &Sample) -> VidmarkResult<()> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        Err(VidmarkError::io("disk full"))
    }

    fn stop(&mut self) -> VidmarkResult<()> {
        self.inner.stop()
    }
}

impl OutputTarget for FailingTarget {
    fn open(&mut self) -> VidmarkResult<Box<dyn ContainerWriter>> {
        Ok(Box::new(FailingWriter {
            inner: MemoryContainer::new(),
            write_attempts: Arc::clone(&self.write_attempts),
        }))
    }

    fn location(&self) -> Option<&Path> {
        None
    }

    fn discard(&mut self) {
        *self.discarded.lock() = true;
    }
}

#[test]
fn writer_failure_is_a_processing_error_and_discards_the_output() {
    let target = FailingTarget::default();
    let input = MemoryInput::new(vec![video_track(3), audio_track(4)]);
    let outcome = transcoder(input, Box::new(target.clone())).run();
    match outcome {
        PipelineOutcome::ProcessingError(e) => {
            assert_eq!(e.kind(), crate::foundation::error::ErrorKind::Io);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(*target.discarded.lock());
}

#[test]
fn writer_failure_stops_the_run_before_the_input_is_exhausted() {
    let target = FailingTarget::default();
    let input = MemoryInput::new(vec![video_track(300)]);
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&states);
    let outcome = transcoder(input, Box::new(target.clone()))
        .with_state_observer(move |s| sink.lock().push(s))
        .run();

    let err = outcome.into_result().unwrap_err();
    assert_eq!(err.kind(), crate::foundation::error::ErrorKind::Io);
    assert!(err.to_string().contains("disk full"));
    assert_eq!(target.write_attempts.load(Ordering::SeqCst), 1);
    assert!(*target.discarded.lock());

    let states = states.lock();
    assert!(!states.contains(&PipelineState::Finalized));
    assert_eq!(states.last(), Some(&PipelineState::Released));
}

#[test]
fn negotiation_failure_stops_every_setup_actor() {
    let target = MemoryTarget::new();
    let input = MemoryInput::new(vec![
        video_track(3),
        MemoryTrack::new(CodecFormat::new(mime::AUDIO_RAW), Vec::new()),
    ]);
    let mut job = transcoder(input, Box::new(target));
    let mut run = Run::default();
    let mut tracker = StateTracker::new(None);

    let err = job.execute(&mut run, &mut tracker).unwrap_err();
    assert_eq!(err.kind(), crate::foundation::error::ErrorKind::Configuration);
    let setup = run.setup_actors.clone();
    assert_eq!(setup.len(), 1);
    assert_eq!(setup[0].name(), "vidmark-video-setup");
    assert!(!setup[0].is_shut_down());

    run.teardown();
    assert!(setup.iter().all(|actor| actor.is_shut_down()));
}

#[test]
fn unsupported_codec_fails_during_negotiation() {
    let target = MemoryTarget::new();
    let input = MemoryInput::new(vec![MemoryTrack::new(
        CodecFormat::video(mime::VIDEO_HEVC, W, H),
        Vec::new(),
    )]);
    let outcome = transcoder(input, Box::new(target.clone())).run();
    let err = outcome.into_result().unwrap_err();
    assert_eq!(err.kind(), crate::foundation::error::ErrorKind::Configuration);
    assert!(target.was_discarded());
}

#[test]
fn encoder_output_registers_once_and_forwards_samples() {
    let container = MemoryContainer::new();
    let mux = Arc::new(
        TrackMultiplexer::new(Box::new(container.clone()), 1, PendingWritePolicy::Queue).unwrap(),
    );
    let (tx, rx) = crossbeam_channel::unbounded();
    let port = EventPort {
        tx,
        progress: Arc::new(AtomicU64::new(0)),
    };
    let track = Track::new(3, TrackKind::Audio, CodecFormat::audio(mime::AUDIO_RAW, 8_000, 1));
    let output = EncoderOutput::new(track, &mux, &port);

    output.on_format_changed(CodecFormat::audio(mime::AUDIO_RAW, 8_000, 1));
    output.on_format_changed(CodecFormat::audio(mime::AUDIO_RAW, 16_000, 1));
    output.on_sample(Sample::new(3, vec![1u8, 2], 0, SampleFlags::KEY_FRAME));
    output.on_sample(Sample::end_of_stream(3, 125));
    mux.flush();

    assert!(matches!(rx.try_recv(), Ok(PipelineEvent::PathDone(TrackKind::Audio))));
    assert!(rx.try_recv().is_err());
    assert_eq!(port.progress.load(Ordering::Acquire), 2);
    let stats = mux.finalize().unwrap();
    assert_eq!(stats.samples_of(TrackKind::Audio), 1);
    assert!(stats.tracks[0].ended);
    assert_eq!(container.recording().tracks.len(), 1);
}
