//! Container access: demux sources, container writers and the media inputs/outputs that create
//! them.

pub(crate) mod boxes;
pub(crate) mod memory;
pub(crate) mod mp4_demux;
pub(crate) mod mp4_mux;

use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::foundation::core::{Rotation, TrackKind};
use crate::foundation::error::VidmarkResult;
use crate::media::format::CodecFormat;
use crate::media::sample::{Sample, SampleFlags};

/// Sequential reader over the samples of a media container.
///
/// Only selected tracks are returned. The cursor points at one sample; `advance` moves it to the
/// next one in decode order.
pub trait DemuxSource: Send {
    /// Number of tracks in the container.
    fn track_count(&self) -> usize;

    /// Format of track `index`.
    fn track_format(&self, index: usize) -> Option<CodecFormat>;

    /// Include track `index` in reads.
    fn select_track(&mut self, index: usize) -> VidmarkResult<()>;

    /// Exclude track `index` from reads.
    fn unselect_track(&mut self, index: usize) -> VidmarkResult<()>;

    /// Copy the current sample into `buf` (replacing its contents) and return its size, or
    /// `None` once every selected track is exhausted.
    fn read_sample_data(&mut self, buf: &mut Vec<u8>) -> VidmarkResult<Option<usize>>;

    /// Presentation time of the current sample.
    fn sample_time_us(&self) -> Option<i64>;

    /// Flags of the current sample.
    fn sample_flags(&self) -> SampleFlags;

    /// Track of the current sample.
    fn sample_track_index(&self) -> Option<usize>;

    /// Move to the next sample. Returns `false` when nothing follows.
    fn advance(&mut self) -> bool;

    /// Close the underlying reader. Idempotent.
    fn release(&mut self);
}

/// Index of the first track of `kind` in `source`.
pub fn find_track(source: &dyn DemuxSource, kind: TrackKind) -> Option<usize> {
    (0..source.track_count()).find(|i| {
        source
            .track_format(*i)
            .is_some_and(|f| f.kind() == Some(kind))
    })
}

/// A demux source shared between the stage reading it and the pipeline that releases it.
#[derive(Clone)]
pub struct SharedDemuxer {
    inner: Arc<Mutex<Box<dyn DemuxSource>>>,
}

impl std::fmt::Debug for SharedDemuxer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedDemuxer").finish_non_exhaustive()
    }
}

impl SharedDemuxer {
    /// Wrap a demux source.
    pub fn new(source: Box<dyn DemuxSource>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(source)),
        }
    }

    /// Exclusive access to the source.
    pub fn lock(&self) -> MutexGuard<'_, Box<dyn DemuxSource>> {
        self.inner.lock()
    }
}

/// Output container receiving encoded samples.
///
/// Tracks are added before `start`; samples are written only between `start` and `stop`.
pub trait ContainerWriter: Send {
    /// Register a track and return its output index (assigned in call order from zero).
    fn add_track(&mut self, kind: TrackKind, format: &CodecFormat) -> VidmarkResult<usize>;

    /// Display rotation recorded for video tracks.
    fn set_orientation_hint(&mut self, rotation: Rotation) -> VidmarkResult<()>;

    /// Begin writing.
    fn start(&mut self) -> VidmarkResult<()>;

    /// Append one sample to output track `dest_index`.
    fn write_sample(&mut self, dest_index: usize, sample: &Sample) -> VidmarkResult<()>;

    /// Flush and close the container.
    fn stop(&mut self) -> VidmarkResult<()>;
}

/// Stream-level facts about an input.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
pub struct MediaInfo {
    /// An audio track is present.
    pub has_audio: bool,
    /// A video track is present.
    pub has_video: bool,
    /// Display rotation of the video track.
    pub rotation: Rotation,
    /// Longest track duration in microseconds, when known.
    pub duration_us: Option<i64>,
    /// Video width, when a video track is present.
    pub width: Option<u32>,
    /// Video height, when a video track is present.
    pub height: Option<u32>,
}

/// An input that can be inspected and opened any number of times.
pub trait MediaInput: Send + Sync {
    /// Human-readable description for logs.
    fn describe(&self) -> String;

    /// Read stream-level metadata.
    fn inspect(&self) -> VidmarkResult<MediaInfo>;

    /// Open an independent demux source over the input.
    fn open_demuxer(&self) -> VidmarkResult<Box<dyn DemuxSource>>;
}

/// Where a pipeline writes its result.
pub trait OutputTarget: Send {
    /// Create the container writer.
    fn open(&mut self) -> VidmarkResult<Box<dyn ContainerWriter>>;

    /// Filesystem location of the result, if it has one.
    fn location(&self) -> Option<&Path>;

    /// Remove a partial result after a failed run.
    fn discard(&mut self);
}
