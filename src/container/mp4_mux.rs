//! MP4 output through the `mp4` crate.
//!
//! The `mp4` writer derives sample timing from per-sample durations, so each track holds its
//! newest sample back until the next one (or `stop`) fixes its duration. Every track's media
//! timeline therefore starts at its first sample; the file starts at the earliest first sample
//! and later tracks are delayed with an edit list. Edit lists and the display rotation are
//! written into the `moov` box after the file is closed.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Context as _;

use bytes::Bytes;
use mp4::{
    AacConfig, AudioObjectType, AvcConfig, ChannelConfig, MediaConfig, Mp4Config,
    Mp4Sample, Mp4Writer, SampleFreqIndex, TrackConfig, TrackType,
};

use crate::codec::bitstream;
use crate::container::{ContainerWriter, OutputTarget, boxes};
use crate::foundation::core::{Rotation, TrackKind, micros_to_ticks};
use crate::foundation::error::{VidmarkError, VidmarkResult};
use crate::media::format::{CodecFormat, keys, mime};
use crate::media::sample::Sample;

/// Timescale of video tracks.
pub const VIDEO_TIMESCALE: u32 = 90_000;
const MOVIE_TIMESCALE: u32 = 1_000;
const AAC_FRAME_SAMPLES: u32 = 1024;

struct Held {
    ticks: i64,
    is_sync: bool,
    bytes: Bytes,
}

struct OutTrack {
    kind: TrackKind,
    config: TrackConfig,
    default_duration: u32,
    held: Option<Held>,
    last_duration: Option<u32>,
    first_us: Option<i64>,
    written: u64,
}

/// Container writer producing an MP4 file.
pub struct Mp4ContainerWriter {
    path: PathBuf,
    tracks: Vec<OutTrack>,
    rotation: Rotation,
    writer: Option<Mp4Writer<BufWriter<File>>>,
    stopped: bool,
}

impl std::fmt::Debug for Mp4ContainerWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mp4ContainerWriter")
            .field("path", &self.path)
            .field("tracks", &self.tracks.len())
            .field("rotation", &self.rotation)
            .field("started", &self.writer.is_some())
            .field("stopped", &self.stopped)
            .finish()
    }
}

impl Mp4ContainerWriter {
    /// Writer for `path`; the file is created by `start`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            tracks: Vec::new(),
            rotation: Rotation::None,
            writer: None,
            stopped: false,
        }
    }

    fn started(&self) -> bool {
        self.writer.is_some() || self.stopped
    }

    fn flush_held(
        writer: &mut Mp4Writer<BufWriter<File>>,
        track_id: u32,
        track: &mut OutTrack,
        next_ticks: Option<i64>,
    ) -> VidmarkResult<()> {
        let Some(held) = track.held.take() else {
            return Ok(());
        };
        let duration = match next_ticks {
            Some(next) if next > held.ticks => u32::try_from(next - held.ticks).unwrap_or(u32::MAX),
            Some(next) => {
                tracing::warn!(track = track_id, held = held.ticks, next, "non-increasing sample time");
                1
            }
            None => track.last_duration.unwrap_or(track.default_duration),
        };
        track.last_duration = Some(duration);
        let sample = Mp4Sample {
            start_time: held.ticks.max(0) as u64,
            duration,
            rendering_offset: 0,
            is_sync: held.is_sync,
            bytes: held.bytes,
        };
        writer
            .write_sample(track_id, &sample)
            .map_err(|e| VidmarkError::io(format!("failed to write mp4 sample: {e}")))?;
        track.written += 1;
        Ok(())
    }
}

fn freq_index(rate: u32) -> VidmarkResult<SampleFreqIndex> {
    Ok(match rate {
        96000 => SampleFreqIndex::Freq96000,
        88200 => SampleFreqIndex::Freq88200,
        64000 => SampleFreqIndex::Freq64000,
        48000 => SampleFreqIndex::Freq48000,
        44100 => SampleFreqIndex::Freq44100,
        32000 => SampleFreqIndex::Freq32000,
        24000 => SampleFreqIndex::Freq24000,
        22050 => SampleFreqIndex::Freq22050,
        16000 => SampleFreqIndex::Freq16000,
        12000 => SampleFreqIndex::Freq12000,
        11025 => SampleFreqIndex::Freq11025,
        8000 => SampleFreqIndex::Freq8000,
        7350 => SampleFreqIndex::Freq7350,
        other => {
            return Err(VidmarkError::configuration(format!(
                "AAC track cannot use sample rate {other}"
            )));
        }
    })
}

fn channel_config(channels: u32) -> VidmarkResult<ChannelConfig> {
    Ok(match channels {
        1 => ChannelConfig::Mono,
        2 => ChannelConfig::Stereo,
        3 => ChannelConfig::Three,
        4 => ChannelConfig::Four,
        5 => ChannelConfig::Five,
        6 => ChannelConfig::FiveOne,
        8 => ChannelConfig::SevenOne,
        other => {
            return Err(VidmarkError::configuration(format!(
                "AAC track cannot carry {other} channels"
            )));
        }
    })
}

fn audio_object_type(object_type: u8) -> AudioObjectType {
    match object_type {
        1 => AudioObjectType::AacMain,
        3 => AudioObjectType::AacScalableSampleRate,
        4 => AudioObjectType::AacLongTermPrediction,
        5 => AudioObjectType::SpectralBandReplication,
        _ => AudioObjectType::AacLowComplexity,
    }
}

fn dimension(format: &CodecFormat, key: &str) -> VidmarkResult<u16> {
    format
        .get_u32(key)
        .and_then(|v| u16::try_from(v).ok())
        .ok_or_else(|| VidmarkError::configuration(format!("video track needs a valid {key}")))
}

/// Translate an encoder output format into an `mp4` track configuration.
fn track_config(kind: TrackKind, format: &CodecFormat) -> VidmarkResult<(TrackConfig, u32)> {
    match (kind, format.mime()) {
        (TrackKind::Video, mime::VIDEO_AVC) => {
            let (Some(sps), Some(pps)) = (format.csd(0), format.csd(1)) else {
                return Err(VidmarkError::configuration(
                    "AVC track needs csd-0 (SPS) and csd-1 (PPS)",
                ));
            };
            let media_conf = MediaConfig::AvcConfig(AvcConfig {
                width: dimension(format, keys::WIDTH)?,
                height: dimension(format, keys::HEIGHT)?,
                seq_param_set: bitstream::strip_start_code(sps).to_vec(),
                pic_param_set: bitstream::strip_start_code(pps).to_vec(),
            });
            Ok((video_track(media_conf), video_frame_ticks(format)))
        }
        (TrackKind::Video, mime::VIDEO_HEVC) => Err(VidmarkError::configuration(
            "mp4 output cannot store HEVC: its sample entry would lack VPS/SPS/PPS",
        )),
        (TrackKind::Audio, mime::AUDIO_AAC) => {
            let (Some(rate), Some(channels)) = (format.sample_rate(), format.channel_count()) else {
                return Err(VidmarkError::configuration(
                    "AAC track needs sample-rate and channel-count",
                ));
            };
            let object_type = match format.csd(0) {
                Some(asc) => bitstream::parse_audio_specific_config(asc)
                    .map_err(|e| VidmarkError::configuration(e.to_string()))?
                    .object_type,
                None => 2,
            };
            let media_conf = MediaConfig::AacConfig(AacConfig {
                bitrate: format.get_u32(keys::BIT_RATE).unwrap_or(0),
                profile: audio_object_type(object_type),
                freq_index: freq_index(rate)?,
                chan_conf: channel_config(channels)?,
            });
            let config = TrackConfig {
                track_type: TrackType::Audio,
                timescale: rate,
                language: "und".to_string(),
                media_conf,
            };
            Ok((config, AAC_FRAME_SAMPLES))
        }
        (kind, other) => Err(VidmarkError::configuration(format!(
            "mp4 output cannot store a {} track of type '{other}'",
            kind.label()
        ))),
    }
}

/// Delay of each track's first sample after the earliest one, in movie ticks.
fn start_delays(tracks: &[OutTrack]) -> Vec<u64> {
    let origin = tracks.iter().filter_map(|t| t.first_us).min().unwrap_or(0);
    tracks
        .iter()
        .map(|t| {
            t.first_us
                .map_or(0, |first| micros_to_ticks(first - origin, MOVIE_TIMESCALE).max(0) as u64)
        })
        .collect()
}

/// Ensure the parent directory of `path` exists.
fn ensure_parent_dir(path: &Path) -> VidmarkResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

fn video_track(media_conf: MediaConfig) -> TrackConfig {
    TrackConfig {
        track_type: TrackType::Video,
        timescale: VIDEO_TIMESCALE,
        language: "und".to_string(),
        media_conf,
    }
}

fn video_frame_ticks(format: &CodecFormat) -> u32 {
    let fps = format.get_u32(keys::FRAME_RATE).unwrap_or(30).max(1);
    VIDEO_TIMESCALE / fps
}

impl ContainerWriter for Mp4ContainerWriter {
    fn add_track(&mut self, kind: TrackKind, format: &CodecFormat) -> VidmarkResult<usize> {
        if self.started() {
            return Err(VidmarkError::configuration("mp4 track added after start"));
        }
        let (config, default_duration) = track_config(kind, format)?;
        self.tracks.push(OutTrack {
            kind,
            config,
            default_duration,
            held: None,
            last_duration: None,
            first_us: None,
            written: 0,
        });
        Ok(self.tracks.len() - 1)
    }

    fn set_orientation_hint(&mut self, rotation: Rotation) -> VidmarkResult<()> {
        if self.started() {
            return Err(VidmarkError::configuration("orientation hint after start"));
        }
        self.rotation = rotation;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(path = %self.path.display()))]
    fn start(&mut self) -> VidmarkResult<()> {
        if self.started() {
            return Err(VidmarkError::configuration("mp4 writer started twice"));
        }
        if self.tracks.is_empty() {
            return Err(VidmarkError::configuration("mp4 writer started without tracks"));
        }
        ensure_parent_dir(&self.path)?;
        let file = File::create(&self.path).map_err(|e| {
            VidmarkError::io(format!("cannot create '{}': {e}", self.path.display()))
        })?;
        let brand = |s: &str| {
            s.parse()
                .map_err(|_| VidmarkError::configuration(format!("invalid brand '{s}'")))
        };
        let config = Mp4Config {
            major_brand: brand("isom")?,
            minor_version: 512,
            compatible_brands: vec![brand("isom")?, brand("iso2")?, brand("avc1")?, brand("mp41")?],
            timescale: MOVIE_TIMESCALE,
        };
        let mut writer = Mp4Writer::write_start(BufWriter::new(file), &config)
            .map_err(|e| VidmarkError::io(format!("failed to write mp4 header: {e}")))?;
        for track in &self.tracks {
            writer
                .add_track(&track.config)
                .map_err(|e| VidmarkError::io(format!("failed to add mp4 track: {e}")))?;
        }
        self.writer = Some(writer);
        tracing::debug!(tracks = self.tracks.len(), "mp4 writer started");
        Ok(())
    }

    fn write_sample(&mut self, dest_index: usize, sample: &Sample) -> VidmarkResult<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| VidmarkError::io("mp4 sample written outside start/stop"))?;
        let track = self
            .tracks
            .get_mut(dest_index)
            .ok_or_else(|| VidmarkError::io(format!("unknown mp4 track {dest_index}")))?;
        if !sample.is_media() {
            return Ok(());
        }
        let ticks = micros_to_ticks(sample.presentation_time_us, track.config.timescale);
        track.first_us.get_or_insert(sample.presentation_time_us);
        let track_id = dest_index as u32 + 1;
        Self::flush_held(writer, track_id, track, Some(ticks))?;
        track.held = Some(Held {
            ticks,
            is_sync: sample.flags.key_frame || track.kind == TrackKind::Audio,
            bytes: sample.payload.clone(),
        });
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(path = %self.path.display()))]
    fn stop(&mut self) -> VidmarkResult<()> {
        let mut writer = self
            .writer
            .take()
            .ok_or_else(|| VidmarkError::io("mp4 writer stopped before start"))?;
        self.stopped = true;
        for (i, track) in self.tracks.iter_mut().enumerate() {
            Self::flush_held(&mut writer, i as u32 + 1, track, None)?;
        }
        writer
            .write_end()
            .map_err(|e| VidmarkError::io(format!("failed to finalize mp4: {e}")))?;
        writer
            .into_writer()
            .flush()
            .map_err(|e| VidmarkError::io(format!("failed to flush mp4: {e}")))?;

        let rotate = self.rotation != Rotation::None
            && self.tracks.iter().any(|t| t.kind == TrackKind::Video);
        let delays = start_delays(&self.tracks);
        if rotate || delays.iter().any(|&d| d > 0) {
            let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
            boxes::write_start_delays(&mut file, &delays)?;
            if rotate {
                boxes::write_video_rotation(&mut file, self.rotation)?;
            }
        }
        tracing::debug!(
            samples = self.tracks.iter().map(|t| t.written).sum::<u64>(),
            rotation = self.rotation.degrees(),
            "mp4 writer stopped"
        );
        Ok(())
    }
}

/// [`OutputTarget`] writing an MP4 file.
#[derive(Clone, Debug)]
pub struct Mp4FileTarget {
    path: PathBuf,
    overwrite: bool,
}

impl Mp4FileTarget {
    /// Target at `path`.
    pub fn new(path: impl Into<PathBuf>, overwrite: bool) -> Self {
        Self {
            path: path.into(),
            overwrite,
        }
    }
}

impl OutputTarget for Mp4FileTarget {
    fn open(&mut self) -> VidmarkResult<Box<dyn ContainerWriter>> {
        if !self.overwrite && self.path.exists() {
            return Err(VidmarkError::configuration(format!(
                "output file '{}' already exists",
                self.path.display()
            )));
        }
        Ok(Box::new(Mp4ContainerWriter::new(&self.path)))
    }

    fn location(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn discard(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::info!(path = %self.path.display(), "removed partial output"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %self.path.display(), error = %e, "cannot remove partial output"),
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/container/mp4_mux.rs"]
mod tests;
