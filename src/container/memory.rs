//! In-memory inputs and outputs, mirroring the MP4 ones for tests and embedding.

use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::container::{ContainerWriter, DemuxSource, MediaInfo, MediaInput, OutputTarget};
use crate::foundation::core::{Rotation, TrackKind};
use crate::foundation::error::{VidmarkError, VidmarkResult};
use crate::media::format::{CodecFormat, keys};
use crate::media::sample::{Sample, SampleFlags};

/// One stream of a [`MemoryInput`].
#[derive(Clone, Debug)]
pub struct MemoryTrack {
    /// Stream format (must carry a mime type).
    pub format: CodecFormat,
    /// Samples in decode order. The `track` field of each sample is ignored.
    pub samples: Vec<Sample>,
}

impl MemoryTrack {
    /// Build a track.
    pub fn new(format: CodecFormat, samples: Vec<Sample>) -> Self {
        Self { format, samples }
    }

    fn duration_us(&self) -> Option<i64> {
        self.format
            .get_int(keys::DURATION_US)
            .or_else(|| self.samples.iter().map(|s| s.presentation_time_us).max())
    }
}

/// Input held entirely in memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryInput {
    tracks: Arc<Vec<MemoryTrack>>,
    rotation: Rotation,
}

impl MemoryInput {
    /// Build an input from its tracks.
    pub fn new(tracks: Vec<MemoryTrack>) -> Self {
        Self {
            tracks: Arc::new(tracks),
            rotation: Rotation::None,
        }
    }

    /// Set the rotation reported by `inspect`.
    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }
}

impl MediaInput for MemoryInput {
    fn describe(&self) -> String {
        format!("memory input ({} tracks)", self.tracks.len())
    }

    fn inspect(&self) -> VidmarkResult<MediaInfo> {
        let video = self
            .tracks
            .iter()
            .find(|t| t.format.kind() == Some(TrackKind::Video));
        Ok(MediaInfo {
            has_audio: self
                .tracks
                .iter()
                .any(|t| t.format.kind() == Some(TrackKind::Audio)),
            has_video: video.is_some(),
            rotation: self.rotation,
            duration_us: self.tracks.iter().filter_map(MemoryTrack::duration_us).max(),
            width: video.and_then(|t| t.format.width()),
            height: video.and_then(|t| t.format.height()),
        })
    }

    fn open_demuxer(&self) -> VidmarkResult<Box<dyn DemuxSource>> {
        Ok(Box::new(MemoryDemuxer::new(Arc::clone(&self.tracks))))
    }
}

/// Demux source over a [`MemoryInput`]; selected tracks are merged by presentation time.
pub struct MemoryDemuxer {
    tracks: Arc<Vec<MemoryTrack>>,
    selected: Vec<bool>,
    cursors: Vec<usize>,
    current: Option<usize>,
    released: bool,
}

impl MemoryDemuxer {
    fn new(tracks: Arc<Vec<MemoryTrack>>) -> Self {
        let n = tracks.len();
        Self {
            tracks,
            selected: vec![false; n],
            cursors: vec![0; n],
            current: None,
            released: false,
        }
    }

    fn pick_current(&mut self) {
        self.current = (0..self.tracks.len())
            .filter(|i| self.selected[*i])
            .filter_map(|i| {
                self.tracks[i]
                    .samples
                    .get(self.cursors[i])
                    .map(|s| (s.presentation_time_us, i))
            })
            .min()
            .map(|(_, i)| i);
    }

    fn current_sample(&self) -> Option<&Sample> {
        let track = self.current?;
        self.tracks[track].samples.get(self.cursors[track])
    }

    fn check_index(&self, index: usize) -> VidmarkResult<()> {
        if index >= self.tracks.len() {
            return Err(VidmarkError::validation(format!(
                "track index {index} out of range ({} tracks)",
                self.tracks.len()
            )));
        }
        Ok(())
    }
}

impl DemuxSource for MemoryDemuxer {
    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn track_format(&self, index: usize) -> Option<CodecFormat> {
        self.tracks.get(index).map(|t| t.format.clone())
    }

    fn select_track(&mut self, index: usize) -> VidmarkResult<()> {
        self.check_index(index)?;
        self.selected[index] = true;
        self.pick_current();
        Ok(())
    }

    fn unselect_track(&mut self, index: usize) -> VidmarkResult<()> {
        self.check_index(index)?;
        self.selected[index] = false;
        self.pick_current();
        Ok(())
    }

    fn read_sample_data(&mut self, buf: &mut Vec<u8>) -> VidmarkResult<Option<usize>> {
        if self.released {
            return Err(VidmarkError::io("memory demuxer is released"));
        }
        let Some(sample) = self.current_sample() else {
            return Ok(None);
        };
        buf.clear();
        buf.extend_from_slice(&sample.payload);
        Ok(Some(buf.len()))
    }

    fn sample_time_us(&self) -> Option<i64> {
        self.current_sample().map(|s| s.presentation_time_us)
    }

    fn sample_flags(&self) -> SampleFlags {
        self.current_sample().map(|s| s.flags).unwrap_or_default()
    }

    fn sample_track_index(&self) -> Option<usize> {
        self.current_sample().and(self.current)
    }

    fn advance(&mut self) -> bool {
        let Some(track) = self.current else {
            return false;
        };
        self.cursors[track] += 1;
        self.pick_current();
        self.current.is_some()
    }

    fn release(&mut self) {
        self.released = true;
        self.current = None;
    }
}

/// Everything a [`MemoryContainer`] received.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MemoryRecording {
    /// Registered tracks in output order.
    pub tracks: Vec<(TrackKind, CodecFormat)>,
    /// Orientation hint at start.
    pub rotation: Rotation,
    /// Number of `start` calls.
    pub start_count: usize,
    /// Number of `stop` calls.
    pub stop_count: usize,
    /// Samples as `(dest_index, sample)`, in write order.
    pub samples: Vec<(usize, Sample)>,
}

impl MemoryRecording {
    /// Samples written to output track `dest_index`.
    pub fn samples_for(&self, dest_index: usize) -> Vec<&Sample> {
        self.samples
            .iter()
            .filter(|(d, _)| *d == dest_index)
            .map(|(_, s)| s)
            .collect()
    }

    /// Output index of the first track of `kind`.
    pub fn track_of(&self, kind: TrackKind) -> Option<usize> {
        self.tracks.iter().position(|(k, _)| *k == kind)
    }
}

/// Container writer that records into a shared [`MemoryRecording`].
///
/// It enforces the writer contract strictly: tracks only before start, samples only while
/// started, a single start and a single stop.
#[derive(Clone, Debug, Default)]
pub struct MemoryContainer {
    recording: Arc<Mutex<MemoryRecording>>,
}

impl MemoryContainer {
    /// Create an empty container.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryRecording> {
        self.recording.lock()
    }

    /// Snapshot of what has been recorded so far.
    pub fn recording(&self) -> MemoryRecording {
        self.lock().clone()
    }
}

impl ContainerWriter for MemoryContainer {
    fn add_track(&mut self, kind: TrackKind, format: &CodecFormat) -> VidmarkResult<usize> {
        let mut rec = self.lock();
        if rec.start_count > 0 {
            return Err(VidmarkError::configuration("track added after start"));
        }
        rec.tracks.push((kind, format.clone()));
        Ok(rec.tracks.len() - 1)
    }

    fn set_orientation_hint(&mut self, rotation: Rotation) -> VidmarkResult<()> {
        let mut rec = self.lock();
        if rec.start_count > 0 {
            return Err(VidmarkError::configuration("orientation hint after start"));
        }
        rec.rotation = rotation;
        Ok(())
    }

    fn start(&mut self) -> VidmarkResult<()> {
        let mut rec = self.lock();
        if rec.start_count > 0 {
            return Err(VidmarkError::configuration("container started twice"));
        }
        if rec.tracks.is_empty() {
            return Err(VidmarkError::configuration("container started without tracks"));
        }
        rec.start_count += 1;
        Ok(())
    }

    fn write_sample(&mut self, dest_index: usize, sample: &Sample) -> VidmarkResult<()> {
        let mut rec = self.lock();
        if rec.start_count == 0 || rec.stop_count > 0 {
            return Err(VidmarkError::io("sample written outside start/stop"));
        }
        if dest_index >= rec.tracks.len() {
            return Err(VidmarkError::io(format!("unknown output track {dest_index}")));
        }
        rec.samples.push((dest_index, sample.clone()));
        Ok(())
    }

    fn stop(&mut self) -> VidmarkResult<()> {
        let mut rec = self.lock();
        if rec.start_count == 0 {
            return Err(VidmarkError::io("container stopped before start"));
        }
        if rec.stop_count > 0 {
            return Err(VidmarkError::io("container stopped twice"));
        }
        rec.stop_count += 1;
        Ok(())
    }
}

/// [`OutputTarget`] producing a [`MemoryContainer`].
#[derive(Clone, Debug, Default)]
pub struct MemoryTarget {
    container: MemoryContainer,
    discarded: Arc<Mutex<bool>>,
}

impl MemoryTarget {
    /// Create a target with a fresh container.
    pub fn new() -> Self {
        Self::default()
    }

    /// The container the pipeline writes into.
    pub fn container(&self) -> MemoryContainer {
        self.container.clone()
    }

    /// `true` once a failed run discarded the output.
    pub fn was_discarded(&self) -> bool {
        *self.discarded.lock()
    }
}

impl OutputTarget for MemoryTarget {
    fn open(&mut self) -> VidmarkResult<Box<dyn ContainerWriter>> {
        Ok(Box::new(self.container.clone()))
    }

    fn location(&self) -> Option<&Path> {
        None
    }

    fn discard(&mut self) {
        *self.discarded.lock() = true;
    }
}

#[cfg(test)]
#[path = "../../tests/unit/container/memory.rs"]
mod tests;
