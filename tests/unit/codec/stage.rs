use parking_lot::Condvar;

use super::*;
use crate::codec::soft::SoftCodecFactory;
use crate::container::{DemuxSource, MediaInput};
use crate::container::memory::{MemoryInput, MemoryTrack};
use crate::media::format::{keys, mime};
use crate::render::surface::VideoFrame;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Collected {
    formats: Vec<CodecFormat>,
    samples: Vec<Sample>,
    errors: usize,
    done: bool,
}

#[derive(Default)]
struct Collector {
    state: Mutex<Collected>,
    cond: Condvar,
}

impl Collector {
    fn wait_done(&self) -> MutexGuard<'_, Collected> {
        let mut guard = self.state.lock();
        let timeout = self.cond.wait_while_for(&mut guard, |s| !s.done, WAIT);
        assert!(!timeout.timed_out(), "stage never reached end of stream");
        guard
    }
}

impl StageOutput for Collector {
    fn on_format_changed(&self, format: CodecFormat) {
        self.state.lock().formats.push(format);
    }

    fn on_sample(&self, sample: Sample) {
        let mut s = self.state.lock();
        s.done |= sample.flags.end_of_stream;
        s.samples.push(sample);
        self.cond.notify_all();
    }

    fn on_error(&self, _error: VidmarkError) {
        let mut s = self.state.lock();
        s.errors += 1;
        s.done = true;
        self.cond.notify_all();
    }
}

fn factory() -> Arc<dyn CodecFactory> {
    Arc::new(SoftCodecFactory::new())
}

fn audio_format() -> CodecFormat {
    CodecFormat::audio(mime::AUDIO_RAW, 48_000, 2)
}

#[test]
fn buffer_decoder_delivers_samples_in_order() {
    let stage = CodecStage::new("audio-dec", StageCaps::decoder(mime::AUDIO_RAW), 1, factory());
    let out = Arc::new(Collector::default());
    stage.set_output(out.clone()).unwrap();
    stage.configure(&audio_format(), None).unwrap();
    stage.start().unwrap();
    for i in 0..5i64 {
        stage.feed(vec![i as u8; 8], i * 1_000, SampleFlags::KEY_FRAME).unwrap();
    }
    stage.signal_end_of_stream().unwrap();
    assert_eq!(stage.state(), StageState::Draining);

    let got = out.wait_done();
    assert_eq!(got.errors, 0);
    assert_eq!(got.formats.len(), 1);
    assert_eq!(got.samples.len(), 6);
    let pts: Vec<i64> = got.samples[..5].iter().map(|s| s.presentation_time_us).collect();
    assert_eq!(pts, vec![0, 1_000, 2_000, 3_000, 4_000]);
    assert!(got.samples.iter().all(|s| s.track == 1));
    assert!(got.samples[5].is_eos_marker());
    drop(got);
    assert!(stage.is_output_done());
    stage.release();
}

#[test]
fn rejected_format_is_retried_minimally() {
    let format = CodecFormat::video(mime::VIDEO_RAW, 4, 4)
        .with_int(keys::BIT_RATE, 1_000_000)
        .with_str(keys::PROFILE, "ultra");
    let stage = CodecStage::new("video-enc", StageCaps::encoder(mime::VIDEO_RAW), 0, factory());
    stage.configure(&format, None).unwrap();
    let accepted = stage.configured_format().unwrap();
    assert!(!accepted.contains(keys::PROFILE));
    assert_eq!(accepted.get_int(keys::BIT_RATE), Some(1_000_000));
    stage.release();
}

#[test]
fn configure_errors_are_configuration_errors() {
    let stage = CodecStage::new("dec", StageCaps::decoder(mime::VIDEO_AVC), 0, factory());
    let err = stage
        .configure(&CodecFormat::video(mime::VIDEO_AVC, 4, 4), None)
        .unwrap_err();
    assert_eq!(err.kind(), crate::foundation::error::ErrorKind::Configuration);

    let stage = CodecStage::new("dec", StageCaps::decoder(mime::AUDIO_RAW), 0, factory());
    assert!(stage.configure(&CodecFormat::video(mime::VIDEO_RAW, 4, 4), None).is_err());
    assert!(
        stage
            .configure(&audio_format(), Some(OutputSurface::new()))
            .is_err()
    );
}

#[test]
fn start_requires_consumer_for_callback_delivery() {
    let stage = CodecStage::new("dec", StageCaps::decoder(mime::AUDIO_RAW), 0, factory());
    stage.configure(&audio_format(), None).unwrap();
    assert!(stage.start().is_err());
    assert_eq!(stage.state(), StageState::Configured);
    stage.release();
}

#[test]
fn release_is_idempotent_and_silences_the_stage() {
    let stage = CodecStage::new("dec", StageCaps::decoder(mime::AUDIO_RAW), 0, factory());
    stage.set_output(Arc::new(Collector::default())).unwrap();
    stage.configure(&audio_format(), None).unwrap();
    stage.start().unwrap();
    stage.release();
    stage.release();
    assert_eq!(stage.state(), StageState::Released);
    stage.feed(vec![0u8; 4], 0, SampleFlags::NONE).unwrap();
    stage.signal_end_of_stream().unwrap();
    stage.configure(&audio_format(), None).unwrap();
    stage.start().unwrap();
    assert_eq!(stage.state(), StageState::Released);
}

#[test]
fn feed_before_start_is_rejected() {
    let stage = CodecStage::new("dec", StageCaps::decoder(mime::AUDIO_RAW), 0, factory());
    stage.configure(&audio_format(), None).unwrap();
    assert!(stage.feed(vec![0u8; 4], 0, SampleFlags::NONE).is_err());
    assert!(stage.signal_end_of_stream().is_err());
    stage.release();
}

#[test]
fn polling_delivery_queues_events() {
    let caps = StageCaps::encoder(mime::AUDIO_RAW).with_delivery(Delivery::Polling);
    let stage = CodecStage::new("enc", caps, 0, factory());
    stage.configure(&audio_format(), None).unwrap();
    stage.start().unwrap();
    stage.feed(vec![1u8; 4], 10, SampleFlags::NONE).unwrap();
    stage.signal_end_of_stream().unwrap();

    let mut events = Vec::new();
    while let Some(event) = stage.poll_output(WAIT) {
        let last = matches!(&event, StageEvent::Sample(s) if s.flags.end_of_stream);
        events.push(event);
        if last {
            break;
        }
    }
    assert!(matches!(events[0], StageEvent::FormatChanged(_)));
    match &events[1] {
        StageEvent::Sample(s) => {
            assert_eq!(s.presentation_time_us, 10);
            assert!(s.flags.key_frame);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(events.len(), 3);
    stage.release();
}

#[test]
fn surface_decoder_waits_for_each_acknowledgement() {
    let surface = OutputSurface::new();
    let rendered = Arc::new(Mutex::new(Vec::new()));
    {
        let surface2 = surface.clone();
        let rendered = Arc::clone(&rendered);
        surface.set_on_frame_available(move || {
            if let Some(frame) = surface2.update_tex_image() {
                rendered.lock().push(frame.frame.pts_us);
            }
            surface2.release_frame();
        });
    }
    let stage = CodecStage::new(
        "video-dec",
        StageCaps::surface_decoder(mime::VIDEO_RAW),
        0,
        factory(),
    );
    let out = Arc::new(Collector::default());
    stage.set_output(out.clone()).unwrap();
    stage
        .configure(&CodecFormat::video(mime::VIDEO_RAW, 1, 1), Some(surface.clone()))
        .unwrap();
    stage.start().unwrap();
    for i in 0..4i64 {
        stage.feed(vec![0u8; 4], i * 33_333, SampleFlags::NONE).unwrap();
    }
    stage.signal_end_of_stream().unwrap();

    let got = out.wait_done();
    assert_eq!(got.samples.len(), 1);
    assert!(got.samples[0].is_eos_marker());
    drop(got);
    assert_eq!(*rendered.lock(), vec![0, 33_333, 66_666, 99_999]);
    stage.release();
}

#[test]
fn surface_encoder_receives_frames_and_eos() {
    let stage = CodecStage::new(
        "video-enc",
        StageCaps::surface_encoder(mime::VIDEO_RAW),
        0,
        factory(),
    );
    let out = Arc::new(Collector::default());
    stage.set_output(out.clone()).unwrap();
    assert!(stage.create_input_surface().is_err());
    stage
        .configure(
            &CodecFormat::video(mime::VIDEO_RAW, 1, 1)
                .with_int(keys::FRAME_RATE, 30)
                .with_int(keys::I_FRAME_INTERVAL, 1),
            None,
        )
        .unwrap();
    let surface = stage.create_input_surface().unwrap();
    stage.start().unwrap();
    assert!(stage.feed(vec![0u8; 4], 0, SampleFlags::NONE).is_err());
    for i in 0..3i64 {
        surface
            .submit_frame(VideoFrame::new(1, 1, vec![1u8; 4], i).unwrap())
            .unwrap();
    }
    stage.signal_end_of_stream().unwrap();

    let got = out.wait_done();
    let media: Vec<&Sample> = got.samples.iter().filter(|s| s.is_media()).collect();
    assert_eq!(media.len(), 3);
    assert!(media[0].flags.key_frame);
    assert!(!media[1].flags.key_frame);
    assert!(got.samples.last().unwrap().flags.end_of_stream);
    drop(got);
    stage.release();
}

#[test]
fn pull_source_feeds_from_demuxer_until_exhausted() {
    let samples = (0..3)
        .map(|i| Sample::new(0, vec![i as u8; 4], i * 20_000, SampleFlags::KEY_FRAME))
        .collect();
    let video = MemoryTrack::new(
        CodecFormat::video(mime::VIDEO_RAW, 8, 8),
        vec![Sample::new(0, vec![0u8; 256], 0, SampleFlags::KEY_FRAME)],
    );
    let input = MemoryInput::new(vec![video, MemoryTrack::new(audio_format(), samples)]);
    let mut demuxer = input.open_demuxer().unwrap();
    demuxer.select_track(1).unwrap();
    demuxer.select_track(0).unwrap();
    let demuxer = SharedDemuxer::new(demuxer);

    let stage = CodecStage::new("audio-dec", StageCaps::decoder(mime::AUDIO_RAW), 1, factory());
    let out = Arc::new(Collector::default());
    stage.set_output(out.clone()).unwrap();
    stage.set_pull_source(PullSource { demuxer, track: 1 }).unwrap();
    stage.configure(&audio_format(), None).unwrap();
    stage.start().unwrap();

    let got = out.wait_done();
    let pts: Vec<i64> = got
        .samples
        .iter()
        .filter(|s| s.is_media())
        .map(|s| s.presentation_time_us)
        .collect();
    assert_eq!(pts, vec![0, 20_000, 40_000]);
    drop(got);
    stage.release();
}

/// Driver whose first `failures` output dequeues fail.
struct FlakyDriver {
    inner: Box<dyn CodecDriver>,
    failures: u32,
}

impl CodecDriver for FlakyDriver {
    fn name(&self) -> &str {
        "flaky"
    }

    fn configure(&mut self, format: &CodecFormat, surface: Option<OutputSurface>) -> VidmarkResult<()> {
        self.inner.configure(format, surface)
    }

    fn create_input_surface(&mut self) -> VidmarkResult<InputSurface> {
        self.inner.create_input_surface()
    }

    fn start(&mut self) -> VidmarkResult<()> {
        self.inner.start()
    }

    fn dequeue_input_buffer(&mut self, timeout: Duration) -> VidmarkResult<Option<usize>> {
        self.inner.dequeue_input_buffer(timeout)
    }

    fn queue_input_buffer(
        &mut self,
        index: usize,
        payload: &[u8],
        pts_us: i64,
        flags: SampleFlags,
    ) -> VidmarkResult<()> {
        self.inner.queue_input_buffer(index, payload, pts_us, flags)
    }

    fn dequeue_output_buffer(&mut self, timeout: Duration) -> VidmarkResult<OutputEvent> {
        if self.failures > 0 {
            self.failures -= 1;
            return Err(VidmarkError::codec("transient dequeue failure"));
        }
        self.inner.dequeue_output_buffer(timeout)
    }

    fn output_buffer(&self, index: usize) -> Option<&[u8]> {
        self.inner.output_buffer(index)
    }

    fn release_output_buffer(&mut self, index: usize, render: bool) -> VidmarkResult<()> {
        self.inner.release_output_buffer(index, render)
    }

    fn stop(&mut self) -> VidmarkResult<()> {
        self.inner.stop()
    }

    fn release(&mut self) {
        self.inner.release();
    }
}

struct FlakyFactory(u32);

impl CodecFactory for FlakyFactory {
    fn name(&self) -> &str {
        "flaky"
    }

    fn create_decoder(&self, mime: &str) -> VidmarkResult<Box<dyn CodecDriver>> {
        Ok(Box::new(FlakyDriver {
            inner: SoftCodecFactory::new().create_decoder(mime)?,
            failures: self.0,
        }))
    }

    fn create_encoder(&self, mime: &str) -> VidmarkResult<Box<dyn CodecDriver>> {
        SoftCodecFactory::new().create_encoder(mime)
    }
}

#[test]
fn drain_loop_outlives_a_long_run_of_failures() {
    let stage = CodecStage::new(
        "audio-dec",
        StageCaps::decoder(mime::AUDIO_RAW),
        1,
        Arc::new(FlakyFactory(80)),
    );
    let out = Arc::new(Collector::default());
    stage.set_output(out.clone()).unwrap();
    stage.configure(&audio_format(), None).unwrap();
    stage.start().unwrap();
    for i in 0..3i64 {
        stage.feed(vec![1u8; 8], i * 1_000, SampleFlags::KEY_FRAME).unwrap();
    }
    stage.signal_end_of_stream().unwrap();

    let got = out.wait_done();
    assert_eq!(got.errors, 0);
    assert_eq!(got.samples.len(), 4);
    assert!(got.samples[3].is_eos_marker());
    drop(got);
    stage.release();
}
