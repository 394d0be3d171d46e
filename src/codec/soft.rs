//! In-process codecs for uncompressed streams.
//!
//! `video/raw` carries RGBA8 frames and `audio/raw` interleaved 16-bit PCM. The "codecs" pass
//! payloads through unchanged but follow the full buffer-exchange contract (format changes,
//! key-frame cadence, end-of-stream, surface input and output), so whole pipelines can run
//! without external tools.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::codec::driver::{BufferInfo, CodecDriver, CodecFactory, OutputEvent};
use crate::foundation::error::{VidmarkError, VidmarkResult};
use crate::media::format::{CodecFormat, keys, mime};
use crate::media::sample::SampleFlags;
use crate::render::surface::{InputSurface, OutputSurface, SurfaceMessage, VideoFrame, frame_len};

const INPUT_SLOTS: usize = 8;
const SURFACE_QUEUE: usize = 4;
const SUPPORTED_PROFILES: &[&str] = &["baseline", "main", "high"];

/// Factory for the in-process raw codecs.
#[derive(Clone, Copy, Debug, Default)]
pub struct SoftCodecFactory;

impl SoftCodecFactory {
    /// Create the factory.
    pub fn new() -> Self {
        Self
    }
}

impl CodecFactory for SoftCodecFactory {
    fn name(&self) -> &str {
        "soft"
    }

    fn create_decoder(&self, mime_type: &str) -> VidmarkResult<Box<dyn CodecDriver>> {
        let kind = match mime_type {
            mime::VIDEO_RAW => SoftKind::VideoDecoder,
            mime::AUDIO_RAW => SoftKind::AudioDecoder,
            other => {
                return Err(VidmarkError::configuration(format!(
                    "soft backend has no decoder for '{other}'"
                )));
            }
        };
        Ok(Box::new(SoftCodec::new(kind)))
    }

    fn create_encoder(&self, mime_type: &str) -> VidmarkResult<Box<dyn CodecDriver>> {
        let kind = match mime_type {
            mime::VIDEO_RAW => SoftKind::VideoEncoder,
            mime::AUDIO_RAW => SoftKind::AudioEncoder,
            other => {
                return Err(VidmarkError::configuration(format!(
                    "soft backend has no encoder for '{other}'"
                )));
            }
        };
        Ok(Box::new(SoftCodec::new(kind)))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SoftKind {
    VideoDecoder,
    VideoEncoder,
    AudioDecoder,
    AudioEncoder,
}

impl SoftKind {
    fn is_video(self) -> bool {
        matches!(self, Self::VideoDecoder | Self::VideoEncoder)
    }

    fn is_encoder(self) -> bool {
        matches!(self, Self::VideoEncoder | Self::AudioEncoder)
    }

    fn label(self) -> &'static str {
        match self {
            Self::VideoDecoder => "soft-video-decoder",
            Self::VideoEncoder => "soft-video-encoder",
            Self::AudioDecoder => "soft-audio-decoder",
            Self::AudioEncoder => "soft-audio-encoder",
        }
    }
}

#[derive(Debug)]
struct Pending {
    payload: Vec<u8>,
    pts_us: i64,
    flags: SampleFlags,
}

/// Pass-through codec for `video/raw` and `audio/raw`.
pub struct SoftCodec {
    kind: SoftKind,
    format: Option<CodecFormat>,
    width: u32,
    height: u32,
    frame_len: usize,
    key_interval_frames: u64,
    output_surface: Option<OutputSurface>,
    surface_rx: Option<Receiver<SurfaceMessage>>,
    started: bool,
    released: bool,
    inputs: VecDeque<Pending>,
    next_input_index: usize,
    outputs: HashMap<usize, Pending>,
    next_output_index: usize,
    format_announced: bool,
    frames_out: u64,
}

impl SoftCodec {
    fn new(kind: SoftKind) -> Self {
        Self {
            kind,
            format: None,
            width: 0,
            height: 0,
            frame_len: 0,
            key_interval_frames: 1,
            output_surface: None,
            surface_rx: None,
            started: false,
            released: false,
            inputs: VecDeque::new(),
            next_input_index: 0,
            outputs: HashMap::new(),
            next_output_index: 0,
            format_announced: false,
            frames_out: 0,
        }
    }

    fn expected_mime(&self) -> &'static str {
        if self.kind.is_video() {
            mime::VIDEO_RAW
        } else {
            mime::AUDIO_RAW
        }
    }

    fn ensure_started(&self) -> VidmarkResult<()> {
        if self.released {
            return Err(VidmarkError::codec(format!("{} is released", self.kind.label())));
        }
        if !self.started {
            return Err(VidmarkError::codec(format!("{} is not started", self.kind.label())));
        }
        Ok(())
    }

    fn output_format(&self) -> CodecFormat {
        let Some(input) = &self.format else {
            return CodecFormat::new(self.expected_mime());
        };
        let mut out = CodecFormat::new(self.expected_mime());
        if self.kind.is_video() {
            out.copy_keys_from(input, &[keys::WIDTH, keys::HEIGHT, keys::FRAME_RATE]);
            if self.kind.is_encoder() {
                out.copy_keys_from(input, &[keys::BIT_RATE, keys::I_FRAME_INTERVAL]);
            } else {
                out.set_str(keys::COLOR_FORMAT, "rgba");
            }
        } else {
            out.copy_keys_from(input, &[keys::SAMPLE_RATE, keys::CHANNEL_COUNT]);
            if self.kind.is_encoder() {
                out.copy_keys_from(input, &[keys::BIT_RATE]);
            }
        }
        out
    }

    fn pull_surface(&mut self, timeout: Duration) {
        let Some(rx) = &self.surface_rx else {
            return;
        };
        match rx.recv_timeout(timeout) {
            Ok(SurfaceMessage::Frame(frame)) => self.inputs.push_back(Pending {
                payload: frame.data.to_vec(),
                pts_us: frame.pts_us,
                flags: SampleFlags::NONE,
            }),
            Ok(SurfaceMessage::EndOfStream) => self.inputs.push_back(Pending {
                payload: Vec::new(),
                pts_us: 0,
                flags: SampleFlags::END_OF_STREAM,
            }),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {}
        }
    }
}

impl CodecDriver for SoftCodec {
    fn name(&self) -> &str {
        self.kind.label()
    }

    fn configure(
        &mut self,
        format: &CodecFormat,
        surface: Option<OutputSurface>,
    ) -> VidmarkResult<()> {
        if self.released {
            return Err(VidmarkError::configuration(format!(
                "{} is released",
                self.kind.label()
            )));
        }
        if format.mime() != self.expected_mime() {
            return Err(VidmarkError::configuration(format!(
                "{} cannot handle '{}'",
                self.kind.label(),
                format.mime()
            )));
        }
        if surface.is_some() && self.kind != SoftKind::VideoDecoder {
            return Err(VidmarkError::configuration(format!(
                "{} cannot render to a surface",
                self.kind.label()
            )));
        }
        if self.kind.is_encoder()
            && let Some(profile) = format.get_str(keys::PROFILE)
            && !SUPPORTED_PROFILES.contains(&profile)
        {
            return Err(VidmarkError::configuration(format!(
                "{} does not support profile '{profile}'",
                self.kind.label()
            )));
        }

        if self.kind.is_video() {
            let (Some(width), Some(height)) = (format.width(), format.height()) else {
                return Err(VidmarkError::configuration("raw video needs width and height"));
            };
            self.width = width;
            self.height = height;
            self.frame_len = frame_len(width, height)?;
            let fps = format.get_int(keys::FRAME_RATE).unwrap_or(30).max(1) as u64;
            let interval_s = format.get_int(keys::I_FRAME_INTERVAL).unwrap_or(1).max(0) as u64;
            self.key_interval_frames = (fps * interval_s).max(1);
        } else if format.sample_rate().is_none() || format.channel_count().is_none() {
            return Err(VidmarkError::configuration(
                "raw audio needs sample-rate and channel-count",
            ));
        }

        self.format = Some(format.clone());
        self.output_surface = surface;
        Ok(())
    }

    fn create_input_surface(&mut self) -> VidmarkResult<InputSurface> {
        if self.kind != SoftKind::VideoEncoder || self.format.is_none() {
            return Err(VidmarkError::configuration(format!(
                "{} cannot create an input surface",
                self.kind.label()
            )));
        }
        let (surface, rx) = InputSurface::new(self.width, self.height, SURFACE_QUEUE);
        self.surface_rx = Some(rx);
        Ok(surface)
    }

    fn start(&mut self) -> VidmarkResult<()> {
        if self.format.is_none() {
            return Err(VidmarkError::codec(format!(
                "{} started before configure",
                self.kind.label()
            )));
        }
        self.started = true;
        Ok(())
    }

    fn dequeue_input_buffer(&mut self, _timeout: Duration) -> VidmarkResult<Option<usize>> {
        self.ensure_started()?;
        if self.surface_rx.is_some() || self.inputs.len() + self.outputs.len() >= INPUT_SLOTS {
            return Ok(None);
        }
        let index = self.next_input_index;
        self.next_input_index = self.next_input_index.wrapping_add(1);
        Ok(Some(index))
    }

    fn queue_input_buffer(
        &mut self,
        _index: usize,
        payload: &[u8],
        pts_us: i64,
        flags: SampleFlags,
    ) -> VidmarkResult<()> {
        self.ensure_started()?;
        if self.kind.is_video() && !payload.is_empty() && payload.len() != self.frame_len {
            return Err(VidmarkError::codec(format!(
                "raw frame is {} bytes, expected {}",
                payload.len(),
                self.frame_len
            )));
        }
        self.inputs.push_back(Pending {
            payload: payload.to_vec(),
            pts_us,
            flags,
        });
        Ok(())
    }

    fn dequeue_output_buffer(&mut self, timeout: Duration) -> VidmarkResult<OutputEvent> {
        self.ensure_started()?;
        if !self.format_announced {
            self.format_announced = true;
            return Ok(OutputEvent::FormatChanged(self.output_format()));
        }
        if self.inputs.is_empty() {
            self.pull_surface(timeout);
        }
        let Some(mut pending) = self.inputs.pop_front() else {
            return Ok(OutputEvent::TryAgainLater);
        };

        if !pending.payload.is_empty() {
            let key = match self.kind {
                SoftKind::VideoEncoder => self.frames_out % self.key_interval_frames == 0,
                SoftKind::AudioEncoder => true,
                _ => pending.flags.key_frame,
            };
            pending.flags = pending.flags.with_key_frame(key);
            self.frames_out += 1;
        }

        let index = self.next_output_index;
        self.next_output_index = self.next_output_index.wrapping_add(1);
        let info = BufferInfo {
            offset: 0,
            size: pending.payload.len(),
            pts_us: pending.pts_us,
            flags: pending.flags,
        };
        self.outputs.insert(index, pending);
        Ok(OutputEvent::Buffer { index, info })
    }

    fn output_buffer(&self, index: usize) -> Option<&[u8]> {
        self.outputs.get(&index).map(|p| p.payload.as_slice())
    }

    fn release_output_buffer(&mut self, index: usize, render: bool) -> VidmarkResult<()> {
        let pending = self
            .outputs
            .remove(&index)
            .ok_or_else(|| VidmarkError::codec(format!("unknown output buffer {index}")))?;
        if !render {
            return Ok(());
        }
        let surface = self
            .output_surface
            .as_ref()
            .ok_or_else(|| VidmarkError::codec("render requested without an output surface"))?;
        let frame = VideoFrame::new(self.width, self.height, pending.payload, pending.pts_us)?;
        surface.post_frame(frame)
    }

    fn stop(&mut self) -> VidmarkResult<()> {
        self.started = false;
        self.inputs.clear();
        self.outputs.clear();
        Ok(())
    }

    fn release(&mut self) {
        self.started = false;
        self.released = true;
        self.inputs.clear();
        self.outputs.clear();
        self.output_surface = None;
        self.surface_rx = None;
    }
}

#[cfg(test)]
#[path = "../../tests/unit/codec/soft.rs"]
mod tests;
