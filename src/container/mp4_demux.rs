//! MP4 input: probing and sample reading through the `mp4` crate.

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::{Path, PathBuf};

use mp4::{AudioObjectType, ChannelConfig, MediaType, Mp4Reader, Mp4Sample, SampleFreqIndex, TrackType};

use crate::codec::bitstream::{self, AacParams};
use crate::container::{DemuxSource, MediaInfo, MediaInput, boxes};
use crate::foundation::core::{Rotation, TrackKind, ticks_to_micros};
use crate::foundation::error::{VidmarkError, VidmarkResult};
use crate::media::format::{CodecFormat, keys, mime};
use crate::media::sample::SampleFlags;

/// An MP4 file on disk.
#[derive(Clone, Debug)]
pub struct Mp4File {
    path: PathBuf,
}

impl Mp4File {
    /// Refer to the file at `path`; nothing is read until `inspect` or `open_demuxer`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MediaInput for Mp4File {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    #[tracing::instrument(skip(self), fields(path = %self.path.display()))]
    fn inspect(&self) -> VidmarkResult<MediaInfo> {
        let demux = Mp4Demuxer::open(&self.path)?;
        let mut info = MediaInfo::default();
        for index in 0..demux.track_count() {
            let Some(format) = demux.track_format(index) else {
                continue;
            };
            match format.kind() {
                Some(TrackKind::Audio) => info.has_audio = true,
                Some(TrackKind::Video) if !info.has_video => {
                    info.has_video = true;
                    info.width = format.width();
                    info.height = format.height();
                    let degrees = format.get_int(keys::ROTATION).unwrap_or(0);
                    info.rotation = Rotation::from_degrees(degrees as i32)?;
                }
                _ => {}
            }
            if let Some(d) = format.get_int(keys::DURATION_US) {
                info.duration_us = Some(info.duration_us.map_or(d, |cur| cur.max(d)));
            }
        }
        tracing::debug!(?info, "inspected input");
        Ok(info)
    }

    fn open_demuxer(&self) -> VidmarkResult<Box<dyn DemuxSource>> {
        Ok(Box::new(Mp4Demuxer::open(&self.path)?))
    }
}

struct TrackSlot {
    id: u32,
    timescale: u32,
    sample_count: u32,
    format: CodecFormat,
    selected: bool,
    next_sample: u32,
    head: Option<Mp4Sample>,
}

/// Demux source over an MP4 file. Selected tracks are interleaved by decode time.
pub struct Mp4Demuxer<R: Read + Seek = BufReader<File>> {
    reader: Option<Mp4Reader<R>>,
    tracks: Vec<TrackSlot>,
    current: Option<usize>,
}

impl Mp4Demuxer {
    /// Open the file at `path`.
    pub fn open(path: &Path) -> VidmarkResult<Self> {
        let file = File::open(path).map_err(|e| {
            VidmarkError::source_error(format!("cannot open '{}': {e}", path.display()))
        })?;
        let size = file.metadata()?.len();
        let rotation = {
            let mut file = File::open(path)?;
            boxes::read_video_rotation(&mut file).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "cannot read display matrix; assuming no rotation");
                Rotation::None
            })
        };
        Self::new(BufReader::new(file), size, rotation)
    }
}

impl<R: Read + Seek> Mp4Demuxer<R> {
    /// Parse the header of an MP4 stream of `size` bytes.
    pub fn new(reader: R, size: u64, rotation: Rotation) -> VidmarkResult<Self> {
        let reader = Mp4Reader::read_header(reader, size)
            .map_err(|e| VidmarkError::source_error(format!("failed to read MP4 header: {e}")))?;
        let mut ids: Vec<u32> = reader.tracks().keys().copied().collect();
        ids.sort_unstable();

        let mut tracks = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(track) = reader.tracks().get(&id) else {
                continue;
            };
            let format = track_format(track, rotation);
            tracing::debug!(track = id, format = %format, "mp4 track");
            tracks.push(TrackSlot {
                id,
                timescale: track.timescale(),
                sample_count: track.sample_count(),
                format,
                selected: false,
                next_sample: 1,
                head: None,
            });
        }
        Ok(Self {
            reader: Some(reader),
            tracks,
            current: None,
        })
    }

    fn fill_heads(&mut self) -> VidmarkResult<()> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(());
        };
        for slot in self.tracks.iter_mut().filter(|t| t.selected && t.head.is_none()) {
            while slot.next_sample <= slot.sample_count && slot.head.is_none() {
                let sample = reader.read_sample(slot.id, slot.next_sample).map_err(|e| {
                    VidmarkError::source_error(format!(
                        "failed to read sample {} of track {}: {e}",
                        slot.next_sample, slot.id
                    ))
                })?;
                slot.next_sample += 1;
                slot.head = sample;
            }
        }
        Ok(())
    }

    fn pick_current(&mut self) -> VidmarkResult<()> {
        self.fill_heads()?;
        self.current = self
            .tracks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.selected)
            .filter_map(|(i, t)| {
                t.head
                    .as_ref()
                    .map(|s| (ticks_to_micros(s.start_time as i64, t.timescale), i))
            })
            .min()
            .map(|(_, i)| i);
        Ok(())
    }

    fn head(&self) -> Option<(&TrackSlot, &Mp4Sample)> {
        let slot = self.tracks.get(self.current?)?;
        slot.head.as_ref().map(|s| (slot, s))
    }

    fn set_selected(&mut self, index: usize, on: bool) -> VidmarkResult<()> {
        let count = self.tracks.len();
        let slot = self.tracks.get_mut(index).ok_or_else(|| {
            VidmarkError::validation(format!("track index {index} out of range ({count} tracks)"))
        })?;
        slot.selected = on;
        self.pick_current()
    }
}

impl<R: Read + Seek + Send> DemuxSource for Mp4Demuxer<R> {
    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn track_format(&self, index: usize) -> Option<CodecFormat> {
        self.tracks.get(index).map(|t| t.format.clone())
    }

    fn select_track(&mut self, index: usize) -> VidmarkResult<()> {
        self.set_selected(index, true)
    }

    fn unselect_track(&mut self, index: usize) -> VidmarkResult<()> {
        self.set_selected(index, false)
    }

    fn read_sample_data(&mut self, buf: &mut Vec<u8>) -> VidmarkResult<Option<usize>> {
        if self.reader.is_none() {
            return Err(VidmarkError::io("mp4 demuxer is released"));
        }
        let Some((_, sample)) = self.head() else {
            return Ok(None);
        };
        buf.clear();
        buf.extend_from_slice(&sample.bytes);
        Ok(Some(buf.len()))
    }

    fn sample_time_us(&self) -> Option<i64> {
        self.head().map(|(slot, s)| {
            ticks_to_micros(
                s.start_time as i64 + i64::from(s.rendering_offset),
                slot.timescale,
            )
        })
    }

    fn sample_flags(&self) -> SampleFlags {
        self.head()
            .map(|(_, s)| SampleFlags::NONE.with_key_frame(s.is_sync))
            .unwrap_or_default()
    }

    fn sample_track_index(&self) -> Option<usize> {
        self.head().and(self.current)
    }

    fn advance(&mut self) -> bool {
        let Some(index) = self.current else {
            return false;
        };
        self.tracks[index].head = None;
        if let Err(e) = self.pick_current() {
            tracing::warn!(error = %e, "mp4 read failed; ending stream");
            self.current = None;
        }
        self.current.is_some()
    }

    fn release(&mut self) {
        self.reader = None;
        self.current = None;
        for slot in &mut self.tracks {
            slot.head = None;
        }
    }
}

fn sample_rate(index: SampleFreqIndex) -> u32 {
    match index {
        SampleFreqIndex::Freq96000 => 96000,
        SampleFreqIndex::Freq88200 => 88200,
        SampleFreqIndex::Freq64000 => 64000,
        SampleFreqIndex::Freq48000 => 48000,
        SampleFreqIndex::Freq44100 => 44100,
        SampleFreqIndex::Freq32000 => 32000,
        SampleFreqIndex::Freq24000 => 24000,
        SampleFreqIndex::Freq22050 => 22050,
        SampleFreqIndex::Freq16000 => 16000,
        SampleFreqIndex::Freq12000 => 12000,
        SampleFreqIndex::Freq11025 => 11025,
        SampleFreqIndex::Freq8000 => 8000,
        SampleFreqIndex::Freq7350 => 7350,
    }
}

/// `(channel count, channel configuration field)`.
fn channel_layout(config: ChannelConfig) -> (u32, u8) {
    match config {
        ChannelConfig::Mono => (1, 1),
        ChannelConfig::Stereo => (2, 2),
        ChannelConfig::Three => (3, 3),
        ChannelConfig::Four => (4, 4),
        ChannelConfig::Five => (5, 5),
        ChannelConfig::FiveOne => (6, 6),
        ChannelConfig::SevenOne => (8, 7),
    }
}

fn object_type(profile: AudioObjectType) -> u8 {
    match profile {
        AudioObjectType::AacMain => 1,
        AudioObjectType::AacScalableSampleRate => 3,
        AudioObjectType::AacLongTermPrediction => 4,
        AudioObjectType::SpectralBandReplication => 5,
        _ => 2,
    }
}

fn track_format(track: &mp4::Mp4Track, rotation: Rotation) -> CodecFormat {
    let duration_us = track.duration().as_micros() as i64;
    let mut format = match track.media_type() {
        Ok(MediaType::H264) => {
            let mut f = CodecFormat::video(
                mime::VIDEO_AVC,
                u32::from(track.width()),
                u32::from(track.height()),
            );
            if let Ok(sps) = track.sequence_parameter_set() {
                f.set_bytes(keys::CSD_0, bitstream::with_start_code(sps));
            }
            if let Ok(pps) = track.picture_parameter_set() {
                f.set_bytes(keys::CSD_1, bitstream::with_start_code(pps));
            }
            f
        }
        Ok(MediaType::H265) => CodecFormat::video(
            mime::VIDEO_HEVC,
            u32::from(track.width()),
            u32::from(track.height()),
        ),
        Ok(MediaType::AAC) => {
            let rate = track.sample_freq_index().map(sample_rate).unwrap_or(44_100);
            let (channels, channel_field) =
                track.channel_config().map(channel_layout).unwrap_or((2, 2));
            let mut f = CodecFormat::audio(mime::AUDIO_AAC, rate, channels);
            if let Some(freq_index) = bitstream::freq_index_for_rate(rate) {
                let params = AacParams {
                    object_type: track.audio_profile().map(object_type).unwrap_or(2),
                    freq_index,
                    channels: channel_field,
                };
                f.set_bytes(keys::CSD_0, bitstream::audio_specific_config(params).to_vec());
                f.set_int(keys::AAC_PROFILE, i64::from(params.object_type));
            }
            f
        }
        Ok(other) => CodecFormat::new(&format!("application/x-mp4-{other:?}").to_lowercase()),
        Err(_) => CodecFormat::new("application/octet-stream"),
    };
    if matches!(track.track_type(), Ok(TrackType::Video)) && format.kind() == Some(TrackKind::Video) {
        let fps = track.frame_rate();
        if fps.is_finite() && fps > 0.0 {
            format.set_int(keys::FRAME_RATE, fps.round() as i64);
        }
        format.set_int(keys::ROTATION, i64::from(rotation.degrees()));
    }
    let bitrate = track.bitrate();
    if bitrate > 0 {
        format.set_int(keys::BIT_RATE, i64::from(bitrate));
    }
    format.set_int(keys::MAX_INPUT_SIZE, max_sample_size(track));
    format.set_int(keys::DURATION_US, duration_us);
    format
}

fn max_sample_size(track: &mp4::Mp4Track) -> i64 {
    let stsz = &track.trak.mdia.minf.stbl.stsz;
    let max = stsz.sample_sizes.iter().copied().max().unwrap_or(stsz.sample_size);
    i64::from(max)
}

#[cfg(test)]
#[path = "../../tests/unit/container/mp4_demux.rs"]
mod tests;
