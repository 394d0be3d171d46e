//! Track multiplexer: the single owner of a [`ContainerWriter`].
//!
//! Every operation runs on the multiplexer's actor, so the writer is only ever touched from one
//! thread. The writer starts once the expected number of tracks has registered; samples that
//! arrive earlier are queued or dropped according to [`PendingWritePolicy`].

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::actor::Actor;
use crate::container::ContainerWriter;
use crate::foundation::core::{Rotation, TrackKind};
use crate::foundation::error::{VidmarkError, VidmarkResult};
use crate::media::format::CodecFormat;
use crate::media::sample::Sample;

/// Largest number of tracks a run produces (one audio, one video).
pub const MAX_TRACKS: usize = 2;

/// What happens to samples written before the writer has started.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingWritePolicy {
    /// Hold them and write them in arrival order once the writer starts.
    #[default]
    Queue,
    /// Discard them.
    Drop,
}

/// Counters of one output track.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct MuxTrackStats {
    /// Source track the output track was registered for.
    pub source_index: usize,
    /// Audio or video.
    pub kind: TrackKind,
    /// Samples handed to the writer.
    pub samples: u64,
    /// Presentation time of the first written sample.
    pub first_pts_us: Option<i64>,
    /// Presentation time of the last written sample.
    pub last_pts_us: Option<i64>,
    /// An end-of-stream sample arrived for this track.
    pub ended: bool,
}

/// Multiplexer counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct MuxStats {
    /// The writer was started.
    pub started: bool,
    /// `finalize` has run.
    pub finalized: bool,
    /// Per output track, indexed by destination index.
    pub tracks: Vec<MuxTrackStats>,
    /// Samples discarded: early writes under [`PendingWritePolicy::Drop`], unknown sources and
    /// writes after a writer failure.
    pub dropped: u64,
}

impl MuxStats {
    /// Written samples of the first track of `kind`.
    pub fn samples_of(&self, kind: TrackKind) -> u64 {
        self.tracks
            .iter()
            .find(|t| t.kind == kind)
            .map_or(0, |t| t.samples)
    }

    /// Span between the earliest and latest written presentation times.
    pub fn span_us(&self) -> i64 {
        let first = self.tracks.iter().filter_map(|t| t.first_pts_us).min();
        let last = self.tracks.iter().filter_map(|t| t.last_pts_us).max();
        match (first, last) {
            (Some(first), Some(last)) => last - first,
            _ => 0,
        }
    }
}

/// Called on the multiplexer's actor with the first writer failure of a run.
pub type FailureListener = Box<dyn Fn(VidmarkError) + Send>;

struct MuxCore {
    writer: Option<Box<dyn ContainerWriter>>,
    awaiting: usize,
    policy: PendingWritePolicy,
    sources: Vec<usize>,
    pending: VecDeque<(usize, Sample)>,
    failure: Option<VidmarkError>,
    on_failure: Option<FailureListener>,
    stats: MuxStats,
}

impl MuxCore {
    fn dest_of(&self, source_index: usize) -> Option<usize> {
        self.sources.iter().position(|s| *s == source_index)
    }

    fn add_track(
        &mut self,
        source_index: usize,
        kind: TrackKind,
        format: &CodecFormat,
    ) -> VidmarkResult<usize> {
        if self.stats.finalized {
            return Err(VidmarkError::configuration("track added after finalize"));
        }
        if let Some(dest) = self.dest_of(source_index) {
            return Err(VidmarkError::configuration(format!(
                "source track {source_index} is already registered as output track {dest}"
            )));
        }
        if self.awaiting == 0 {
            return Err(VidmarkError::configuration(format!(
                "no more tracks expected (source track {source_index})"
            )));
        }
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| VidmarkError::configuration("container writer already released"))?;
        let dest = writer.add_track(kind, format)?;
        if dest != self.sources.len() {
            tracing::warn!(dest, expected = self.sources.len(), "writer assigned an unexpected track index");
        }
        self.sources.push(source_index);
        self.stats.tracks.push(MuxTrackStats {
            source_index,
            kind,
            samples: 0,
            first_pts_us: None,
            last_pts_us: None,
            ended: false,
        });
        self.awaiting -= 1;
        tracing::debug!(source = source_index, dest, kind = kind.label(), format = %format, "track registered");
        if self.awaiting == 0 {
            self.start();
        }
        Ok(dest)
    }

    fn set_orientation_hint(&mut self, degrees: i32) -> VidmarkResult<()> {
        let rotation = Rotation::from_degrees(degrees)?;
        if self.stats.started || self.stats.finalized {
            return Err(VidmarkError::configuration(
                "orientation hint must be set before the writer starts",
            ));
        }
        match self.writer.as_mut() {
            Some(writer) => writer.set_orientation_hint(rotation),
            None => Err(VidmarkError::configuration("container writer already released")),
        }
    }

    fn start(&mut self) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        if let Err(e) = writer.start() {
            tracing::error!(error = %e, "container writer failed to start");
            self.fail(e);
            self.discard_pending();
            return;
        }
        self.stats.started = true;
        let pending = std::mem::take(&mut self.pending);
        tracing::debug!(tracks = self.sources.len(), queued = pending.len(), "writer started");
        for (dest, sample) in pending {
            self.write(dest, sample);
        }
    }

    /// Record the first failure and report it. Later writes are dropped.
    fn fail(&mut self, error: VidmarkError) {
        if self.failure.is_some() {
            return;
        }
        if let Some(listener) = &self.on_failure {
            listener(error.duplicate());
        }
        self.failure = Some(error);
    }

    fn discard_pending(&mut self) {
        let discarded = self.pending.len();
        self.pending.clear();
        if discarded > 0 {
            tracing::warn!(discarded, "queued samples discarded");
            self.stats.dropped += discarded as u64;
        }
    }

    fn write_sample(&mut self, source_index: usize, sample: Sample) {
        if self.stats.finalized {
            tracing::trace!(source = source_index, "sample written after finalize ignored");
            return;
        }
        let Some(dest) = self.dest_of(source_index) else {
            tracing::warn!(source = source_index, pts_us = sample.presentation_time_us, "sample for unknown track dropped");
            self.stats.dropped += 1;
            return;
        };
        if self.failure.is_some() {
            self.stats.dropped += 1;
            return;
        }
        if self.stats.started {
            self.write(dest, sample);
            return;
        }
        match self.policy {
            PendingWritePolicy::Queue => self.pending.push_back((dest, sample)),
            PendingWritePolicy::Drop => {
                tracing::debug!(source = source_index, pts_us = sample.presentation_time_us, "sample before start dropped");
                self.stats.dropped += 1;
            }
        }
    }

    fn write(&mut self, dest: usize, sample: Sample) {
        let Some(track) = self.stats.tracks.get_mut(dest) else {
            return;
        };
        if sample.flags.end_of_stream {
            if let Some(last) = track.last_pts_us
                && sample.is_eos_marker()
                && sample.presentation_time_us < last
            {
                tracing::debug!(dest, last, eos = sample.presentation_time_us, "end of stream before last sample time");
            }
            track.ended = true;
        }
        if !sample.is_media() {
            return;
        }
        if self.failure.is_some() {
            self.stats.dropped += 1;
            return;
        }
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        match writer.write_sample(dest, &sample) {
            Ok(()) => {
                track.samples += 1;
                track.first_pts_us.get_or_insert(sample.presentation_time_us);
                track.last_pts_us = Some(sample.presentation_time_us);
            }
            Err(e) => {
                tracing::error!(dest, pts_us = sample.presentation_time_us, error = %e, "sample write failed");
                self.fail(e);
            }
        }
    }

    fn finalize(&mut self) -> VidmarkResult<MuxStats> {
        if self.stats.finalized {
            return Ok(self.stats.clone());
        }
        self.stats.finalized = true;
        self.discard_pending();
        if let Some(mut writer) = self.writer.take()
            && self.stats.started
            && let Err(e) = writer.stop()
        {
            tracing::error!(error = %e, "container writer failed to stop");
            self.fail(e);
        }
        tracing::debug!(started = self.stats.started, "multiplexer finalized");
        match self.failure.take() {
            Some(e) => Err(e),
            None => Ok(self.stats.clone()),
        }
    }
}

/// Routes encoded samples from source tracks to output tracks of one container.
///
/// Not clonable; share it behind an `Arc`. Dropping it releases the writer.
pub struct TrackMultiplexer {
    actor: Actor<MuxCore>,
    last_stats: Arc<Mutex<MuxStats>>,
}

impl std::fmt::Debug for TrackMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackMultiplexer")
            .field("actor", &self.actor)
            .finish_non_exhaustive()
    }
}

impl TrackMultiplexer {
    /// Take ownership of `writer`; it starts once `expected_tracks` tracks have registered.
    pub fn new(
        writer: Box<dyn ContainerWriter>,
        expected_tracks: usize,
        policy: PendingWritePolicy,
    ) -> VidmarkResult<Self> {
        if expected_tracks > MAX_TRACKS {
            return Err(VidmarkError::validation(format!(
                "expected track count {expected_tracks} exceeds {MAX_TRACKS}"
            )));
        }
        let core = MuxCore {
            writer: Some(writer),
            awaiting: expected_tracks,
            policy,
            sources: Vec::new(),
            pending: VecDeque::new(),
            failure: None,
            on_failure: None,
            stats: MuxStats::default(),
        };
        Ok(Self {
            actor: Actor::spawn("vidmark-mux", core)?,
            last_stats: Arc::new(Mutex::new(MuxStats::default())),
        })
    }

    fn shut_down_error() -> VidmarkError {
        VidmarkError::configuration("multiplexer is released")
    }

    /// Register output track for `source_index` and return its destination index. Blocks until
    /// the multiplexer has processed the request.
    pub fn add_track(
        &self,
        source_index: usize,
        kind: TrackKind,
        format: CodecFormat,
    ) -> VidmarkResult<usize> {
        self.actor
            .call(move |core| core.add_track(source_index, kind, &format))
            .unwrap_or_else(|| Err(Self::shut_down_error()))
    }

    /// Queue `sample` for the output track registered for `source_index`. Never blocks.
    pub fn write_sample(&self, source_index: usize, sample: Sample) {
        self.actor
            .submit(move |core| core.write_sample(source_index, sample));
    }

    /// Display rotation of the output's video track, in degrees. Only valid before start.
    pub fn set_orientation_hint(&self, degrees: i32) -> VidmarkResult<()> {
        self.actor
            .call(move |core| core.set_orientation_hint(degrees))
            .unwrap_or_else(|| Err(Self::shut_down_error()))
    }

    /// Report the first writer failure to `listener` as soon as it happens.
    ///
    /// A failure that already happened is reported immediately.
    pub fn set_failure_listener(&self, listener: impl Fn(VidmarkError) + Send + 'static) {
        self.actor.submit(move |core| {
            if let Some(failure) = &core.failure {
                listener(failure.duplicate());
            }
            core.on_failure = Some(Box::new(listener));
        });
    }

    /// Wait until every write submitted so far has been processed.
    pub fn flush(&self) {
        self.actor.wait_idle();
    }

    /// Stop and release the writer. Runs once; later calls return the same counters.
    ///
    /// Returns the first writer failure of the run, if any.
    #[tracing::instrument(skip(self))]
    pub fn finalize(&self) -> VidmarkResult<MuxStats> {
        let last = Arc::clone(&self.last_stats);
        self.actor
            .call(move |core| {
                let result = core.finalize();
                *last.lock() = core.stats.clone();
                result
            })
            .unwrap_or_else(|| Ok(self.stats()))
    }

    /// Current counters.
    pub fn stats(&self) -> MuxStats {
        if !self.actor.is_shut_down()
            && let Some(stats) = self.actor.call(|core| core.stats.clone())
        {
            return stats;
        }
        self.last_stats.lock().clone()
    }

    /// Finalize if needed and stop the actor. Idempotent.
    pub fn release(&self) {
        if self.actor.is_shut_down() {
            return;
        }
        if let Err(e) = self.finalize() {
            tracing::warn!(error = %e, "multiplexer finalize failed during release");
        }
        self.actor.shutdown();
    }
}

impl Drop for TrackMultiplexer {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
#[path = "../../tests/unit/mux/multiplexer.rs"]
mod tests;
