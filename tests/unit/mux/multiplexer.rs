use super::*;
use crate::container::memory::MemoryContainer;
use crate::media::format::mime;
use crate::media::sample::SampleFlags;

fn video_format() -> CodecFormat {
    CodecFormat::video(mime::VIDEO_AVC, 16, 16)
}

fn audio_format() -> CodecFormat {
    CodecFormat::audio(mime::AUDIO_AAC, 48_000, 2)
}

fn sample(track: usize, pts: i64) -> Sample {
    Sample::new(track, vec![1, 2, 3], pts, SampleFlags::KEY_FRAME)
}

fn mux(expected: usize, policy: PendingWritePolicy) -> (TrackMultiplexer, MemoryContainer) {
    let container = MemoryContainer::new();
    let mux = TrackMultiplexer::new(Box::new(container.clone()), expected, policy).unwrap();
    (mux, container)
}

#[test]
fn writer_starts_once_all_tracks_registered_in_any_order() {
    for video_first in [true, false] {
        let (mux, container) = mux(2, PendingWritePolicy::Queue);
        let (first, second) = if video_first { (0, 1) } else { (1, 0) };
        let kind = |source: usize| if source == 0 { TrackKind::Video } else { TrackKind::Audio };
        let format = |source: usize| if source == 0 { video_format() } else { audio_format() };

        assert_eq!(mux.add_track(first, kind(first), format(first)).unwrap(), 0);
        assert_eq!(container.recording().start_count, 0);
        assert_eq!(mux.add_track(second, kind(second), format(second)).unwrap(), 1);
        assert_eq!(container.recording().start_count, 1);

        mux.finalize().unwrap();
        let rec = container.recording();
        assert_eq!((rec.start_count, rec.stop_count), (1, 1));
    }
}

#[test]
fn duplicate_registration_leaves_the_counter_alone() {
    let (mux, container) = mux(2, PendingWritePolicy::Queue);
    mux.add_track(0, TrackKind::Video, video_format()).unwrap();
    let err = mux.add_track(0, TrackKind::Video, video_format()).unwrap_err();
    assert_eq!(err.kind(), crate::foundation::error::ErrorKind::Configuration);
    assert_eq!(container.recording().start_count, 0);
    mux.add_track(1, TrackKind::Audio, audio_format()).unwrap();
    assert_eq!(container.recording().start_count, 1);
    assert!(mux.add_track(2, TrackKind::Audio, audio_format()).is_err());
}

#[test]
fn queued_samples_are_flushed_in_order_on_start() {
    let (mux, container) = mux(2, PendingWritePolicy::Queue);
    mux.add_track(0, TrackKind::Video, video_format()).unwrap();
    mux.write_sample(0, sample(0, 0));
    mux.write_sample(0, sample(0, 33_333));
    mux.flush();
    assert!(container.recording().samples.is_empty());

    mux.add_track(1, TrackKind::Audio, audio_format()).unwrap();
    mux.write_sample(1, sample(1, 0));
    mux.write_sample(0, sample(0, 66_666));
    let stats = mux.finalize().unwrap();

    let rec = container.recording();
    let video: Vec<i64> = rec.samples_for(0).iter().map(|s| s.presentation_time_us).collect();
    assert_eq!(video, vec![0, 33_333, 66_666]);
    assert_eq!(rec.samples_for(1).len(), 1);
    assert_eq!(stats.samples_of(TrackKind::Video), 3);
    assert_eq!(stats.dropped, 0);
    assert_eq!(stats.span_us(), 66_666);
}

#[test]
fn drop_policy_discards_early_samples() {
    let (mux, container) = mux(2, PendingWritePolicy::Drop);
    mux.add_track(0, TrackKind::Video, video_format()).unwrap();
    mux.write_sample(0, sample(0, 0));
    mux.add_track(1, TrackKind::Audio, audio_format()).unwrap();
    mux.write_sample(0, sample(0, 33_333));
    let stats = mux.finalize().unwrap();

    let rec = container.recording();
    assert_eq!(rec.samples_for(0).len(), 1);
    assert_eq!(rec.samples_for(0)[0].presentation_time_us, 33_333);
    assert_eq!(stats.dropped, 1);
}

#[test]
fn unknown_sources_and_markers_are_not_written() {
    let (mux, container) = mux(1, PendingWritePolicy::Queue);
    mux.add_track(0, TrackKind::Video, video_format()).unwrap();
    mux.write_sample(7, sample(7, 0));
    mux.write_sample(0, Sample::end_of_stream(0, 0));
    let stats = mux.finalize().unwrap();
    assert!(container.recording().samples.is_empty());
    assert_eq!(stats.dropped, 1);
    assert!(stats.tracks[0].ended);
}

#[test]
fn writes_after_finalize_are_ignored() {
    let (mux, container) = mux(1, PendingWritePolicy::Queue);
    mux.add_track(0, TrackKind::Video, video_format()).unwrap();
    mux.write_sample(0, sample(0, 0));
    let first = mux.finalize().unwrap();
    mux.write_sample(0, sample(0, 33_333));
    let second = mux.finalize().unwrap();
    assert_eq!(first, second);
    assert!(second.finalized);
    let rec = container.recording();
    assert_eq!(rec.samples.len(), 1);
    assert_eq!(rec.stop_count, 1);
}

#[test]
fn orientation_is_only_accepted_before_start() {
    let (mux, container) = mux(1, PendingWritePolicy::Queue);
    assert!(mux.set_orientation_hint(45).is_err());
    mux.set_orientation_hint(270).unwrap();
    mux.add_track(0, TrackKind::Video, video_format()).unwrap();
    let err = mux.set_orientation_hint(90).unwrap_err();
    assert_eq!(err.kind(), crate::foundation::error::ErrorKind::Configuration);
    assert_eq!(container.recording().rotation, Rotation::Cw270);
}

#[test]
fn never_started_writer_is_released_without_stop() {
    let (mux, container) = mux(0, PendingWritePolicy::Queue);
    let stats = mux.finalize().unwrap();
    assert!(!stats.started);
    let rec = container.recording();
    assert_eq!((rec.start_count, rec.stop_count), (0, 0));
    assert!(TrackMultiplexer::new(Box::new(MemoryContainer::new()), 3, PendingWritePolicy::Queue).is_err());
}

#[test]
fn release_is_idempotent() {
    let (mux, container) = mux(1, PendingWritePolicy::Queue);
    mux.add_track(0, TrackKind::Video, video_format()).unwrap();
    mux.release();
    mux.release();
    assert_eq!(container.recording().stop_count, 1);
    assert!(mux.stats().finalized);
    assert!(mux.add_track(1, TrackKind::Audio, audio_format()).is_err());
    mux.write_sample(0, sample(0, 0));
}

#[derive(Default)]
struct BrokenWriter {
    refuse_start: bool,
}

impl ContainerWriter for BrokenWriter {
    fn add_track(&mut self, _kind: TrackKind, _format: &CodecFormat) -> VidmarkResult<usize> {
        Ok(0)
    }

    fn set_orientation_hint(&mut self, _rotation: Rotation) -> VidmarkResult<()> {
        Ok(())
    }

    fn start(&mut self) -> VidmarkResult<()> {
        if self.refuse_start {
            return Err(VidmarkError::io("permission denied"));
        }
        Ok(())
    }

    fn write_sample(&mut self, _dest_index: usize, _sample: &Sample) -> VidmarkResult<()> {
        Err(VidmarkError::io("disk full"))
    }

    fn stop(&mut self) -> VidmarkResult<()> {
        Ok(())
    }
}

#[test]
fn write_failures_surface_at_finalize() {
    let mux = TrackMultiplexer::new(Box::new(BrokenWriter::default()), 1, PendingWritePolicy::Queue)
        .unwrap();
    mux.add_track(0, TrackKind::Video, video_format()).unwrap();
    mux.write_sample(0, sample(0, 0));
    mux.write_sample(0, sample(0, 1));
    let err = mux.finalize().unwrap_err();
    assert_eq!(err.kind(), crate::foundation::error::ErrorKind::Io);
    assert_eq!(mux.stats().dropped, 1);
}

fn failure_channel(mux: &TrackMultiplexer) -> crossbeam_channel::Receiver<VidmarkError> {
    let (tx, rx) = crossbeam_channel::unbounded();
    mux.set_failure_listener(move |error| {
        let _ = tx.send(error);
    });
    rx
}

#[test]
fn first_write_failure_is_reported_immediately() {
    let mux = TrackMultiplexer::new(Box::new(BrokenWriter::default()), 1, PendingWritePolicy::Queue)
        .unwrap();
    let failures = failure_channel(&mux);
    mux.add_track(0, TrackKind::Video, video_format()).unwrap();
    mux.write_sample(0, sample(0, 0));
    mux.write_sample(0, sample(0, 1));
    mux.flush();

    let reported = failures.try_recv().unwrap();
    assert_eq!(reported.kind(), crate::foundation::error::ErrorKind::Io);
    assert!(reported.to_string().contains("disk full"));
    assert!(failures.try_recv().is_err(), "only the first failure is reported");
    assert!(mux.finalize().is_err());
}

#[test]
fn failed_start_drops_queued_and_later_samples() {
    let writer = BrokenWriter { refuse_start: true };
    let mux = TrackMultiplexer::new(Box::new(writer), 2, PendingWritePolicy::Queue).unwrap();
    let failures = failure_channel(&mux);
    mux.add_track(0, TrackKind::Video, video_format()).unwrap();
    for i in 0..5 {
        mux.write_sample(0, sample(0, i));
    }
    mux.add_track(1, TrackKind::Audio, audio_format()).unwrap();
    mux.flush();
    assert!(failures.try_recv().unwrap().to_string().contains("permission denied"));

    for i in 5..1_000 {
        mux.write_sample(0, sample(0, i));
    }
    mux.flush();
    let stats = mux.stats();
    assert!(!stats.started);
    assert_eq!(stats.dropped, 1_000);
    assert_eq!(mux.finalize().unwrap_err().kind(), crate::foundation::error::ErrorKind::Io);
}

#[test]
fn listener_set_after_a_failure_still_hears_it() {
    let writer = BrokenWriter { refuse_start: true };
    let mux = TrackMultiplexer::new(Box::new(writer), 1, PendingWritePolicy::Queue).unwrap();
    mux.add_track(0, TrackKind::Video, video_format()).unwrap();
    let failures = failure_channel(&mux);
    mux.flush();
    assert!(failures.try_recv().is_ok());
}
