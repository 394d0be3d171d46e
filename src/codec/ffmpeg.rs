//! Codecs backed by the system `ffmpeg` binary.
//!
//! Every codec runs one `ffmpeg` process. Input is written to its stdin by a writer thread,
//! output is read from its stdout by a reader thread, and stderr is drained for error reports.
//! Compressed H.264 travels as Annex-B with access unit delimiters and AAC as ADTS; the drivers
//! convert to and from the container's AVCC and raw AAC framing.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::codec::bitstream::{
    self, AacParams, AccessUnitSplitter, adts_header, nal, parse_adts,
    parse_audio_specific_config,
};
use crate::codec::driver::{BufferInfo, CodecDriver, CodecFactory, OutputEvent};
use crate::foundation::core::{MICROS_PER_SECOND, frame_pts_us};
use crate::foundation::error::{VidmarkError, VidmarkResult};
use crate::media::format::{CodecFormat, keys, mime};
use crate::media::sample::SampleFlags;
use crate::render::surface::{InputSurface, OutputSurface, SurfaceMessage, VideoFrame, frame_len};

const WRITE_QUEUE: usize = 8;
const SURFACE_WRITE_QUEUE: usize = 4;
const SURFACE_QUEUE: usize = 4;
const READ_QUEUE: usize = 4;
const STREAM_CHUNK: usize = 64 * 1024;
const AAC_FRAME_SAMPLES: u64 = 1024;
const PROFILES: &[&str] = &["baseline", "main", "high"];

/// Factory for the `ffmpeg`-backed codecs (H.264 video, AAC audio).
#[derive(Clone, Copy, Debug, Default)]
pub struct FfmpegCodecFactory;

impl FfmpegCodecFactory {
    /// Create the factory.
    pub fn new() -> Self {
        Self
    }
}

impl CodecFactory for FfmpegCodecFactory {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn create_decoder(&self, mime_type: &str) -> VidmarkResult<Box<dyn CodecDriver>> {
        let kind = match mime_type {
            mime::VIDEO_AVC => PipeKind::VideoDecoder,
            mime::AUDIO_AAC => PipeKind::AudioDecoder,
            other => {
                return Err(VidmarkError::configuration(format!(
                    "ffmpeg backend has no decoder for '{other}'"
                )));
            }
        };
        Ok(Box::new(FfmpegCodec::new(kind)))
    }

    fn create_encoder(&self, mime_type: &str) -> VidmarkResult<Box<dyn CodecDriver>> {
        let kind = match mime_type {
            mime::VIDEO_AVC => PipeKind::VideoEncoder,
            mime::AUDIO_AAC => PipeKind::AudioEncoder,
            other => {
                return Err(VidmarkError::configuration(format!(
                    "ffmpeg backend has no encoder for '{other}'"
                )));
            }
        };
        Ok(Box::new(FfmpegCodec::new(kind)))
    }
}

/// Return `true` when `ffmpeg` can be invoked from `PATH`.
pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PipeKind {
    VideoDecoder,
    VideoEncoder,
    AudioDecoder,
    AudioEncoder,
}

impl PipeKind {
    fn label(self) -> &'static str {
        match self {
            Self::VideoDecoder => "ffmpeg-h264-decoder",
            Self::VideoEncoder => "ffmpeg-h264-encoder",
            Self::AudioDecoder => "ffmpeg-aac-decoder",
            Self::AudioEncoder => "ffmpeg-aac-encoder",
        }
    }

    fn mime(self) -> &'static str {
        match self {
            Self::VideoDecoder | Self::VideoEncoder => mime::VIDEO_AVC,
            Self::AudioDecoder | Self::AudioEncoder => mime::AUDIO_AAC,
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum ReadMode {
    /// Forward fixed-size records (raw frames, PCM chunks).
    Fixed(usize),
    /// Forward whatever each read returns.
    Stream,
}

/// A running `ffmpeg` child with its three pipe threads.
struct FfmpegProcess {
    child: Child,
    writer_tx: Option<Sender<Vec<u8>>>,
    writer: Option<JoinHandle<std::io::Result<()>>>,
    chunks: Receiver<Vec<u8>>,
    stderr: Option<JoinHandle<Vec<u8>>>,
}

impl FfmpegProcess {
    fn spawn(label: &str, args: &[String], mode: ReadMode) -> VidmarkResult<Self> {
        if !is_ffmpeg_on_path() {
            return Err(VidmarkError::configuration(
                "ffmpeg is required for this codec, but was not found on PATH",
            ));
        }
        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-hide_banner", "-nostdin", "-loglevel", "error"])
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        tracing::debug!(codec = label, ?args, "spawning ffmpeg");
        let mut child = cmd.spawn().map_err(|e| {
            VidmarkError::codec(format!(
                "failed to spawn ffmpeg (is it installed and on PATH?): {e}"
            ))
        })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| VidmarkError::codec("failed to open ffmpeg stdin (unexpected)"))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| VidmarkError::codec("failed to open ffmpeg stdout (unexpected)"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| VidmarkError::codec("failed to open ffmpeg stderr (unexpected)"))?;

        let (writer_tx, writer_rx) = crossbeam_channel::unbounded::<Vec<u8>>();
        let writer = std::thread::Builder::new()
            .name(format!("{label}-stdin"))
            .spawn(move || {
                for chunk in writer_rx {
                    stdin.write_all(&chunk)?;
                }
                stdin.flush()
            })
            .map_err(|e| VidmarkError::io(format!("failed to spawn ffmpeg writer: {e}")))?;

        let (chunk_tx, chunks) = crossbeam_channel::bounded(READ_QUEUE);
        std::thread::Builder::new()
            .name(format!("{label}-stdout"))
            .spawn(move || read_stdout(&mut stdout, mode, &chunk_tx))
            .map_err(|e| VidmarkError::io(format!("failed to spawn ffmpeg reader: {e}")))?;

        let stderr = std::thread::Builder::new()
            .name(format!("{label}-stderr"))
            .spawn(move || {
                let mut bytes = Vec::new();
                let _ = stderr.read_to_end(&mut bytes);
                bytes
            })
            .map_err(|e| VidmarkError::io(format!("failed to spawn ffmpeg stderr drain: {e}")))?;

        Ok(Self {
            child,
            writer_tx: Some(writer_tx),
            writer: Some(writer),
            chunks,
            stderr: Some(stderr),
        })
    }

    fn queued(&self) -> usize {
        self.writer_tx.as_ref().map_or(0, Sender::len)
    }

    fn write(&self, data: Vec<u8>) -> VidmarkResult<()> {
        let tx = self
            .writer_tx
            .as_ref()
            .ok_or_else(|| VidmarkError::codec("ffmpeg input already closed"))?;
        tx.send(data)
            .map_err(|_| VidmarkError::codec("ffmpeg writer thread has exited"))
    }

    fn close_input(&mut self) {
        self.writer_tx = None;
    }

    /// Wait for the process after its stdout closed and report a failed exit.
    fn finish(&mut self) -> VidmarkResult<()> {
        self.writer_tx = None;
        let write_result = self.writer.take().map(|h| h.join());
        let status = self
            .child
            .wait()
            .map_err(|e| VidmarkError::codec(format!("failed to wait for ffmpeg: {e}")))?;
        let stderr = self
            .stderr
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or_default();
        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(VidmarkError::codec(format!(
                "ffmpeg exited with status {status}: {}",
                stderr.trim()
            )));
        }
        match write_result {
            Some(Ok(Err(e))) => Err(VidmarkError::codec(format!(
                "failed to write to ffmpeg stdin: {e}"
            ))),
            Some(Err(_)) => Err(VidmarkError::codec("ffmpeg writer thread panicked")),
            _ => Ok(()),
        }
    }

    fn kill(mut self) {
        self.writer_tx = None;
        let _ = self.child.kill();
        let _ = self.child.wait();
        // Reader and drain threads end on EOF once the child is gone.
        drop(self.chunks);
        if let Some(h) = self.writer.take() {
            let _ = h.join();
        }
    }
}

fn read_stdout(stdout: &mut impl Read, mode: ReadMode, tx: &Sender<Vec<u8>>) {
    match mode {
        ReadMode::Fixed(size) => loop {
            let mut record = vec![0u8; size];
            let mut filled = 0;
            while filled < size {
                match stdout.read(&mut record[filled..]) {
                    Ok(0) => break,
                    Ok(n) => filled += n,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                    Err(_) => return,
                }
            }
            if filled == 0 {
                return;
            }
            record.truncate(filled);
            let short = filled < size;
            if tx.send(record).is_err() || short {
                return;
            }
        },
        ReadMode::Stream => {
            let mut buf = vec![0u8; STREAM_CHUNK];
            loop {
                match stdout.read(&mut buf) {
                    Ok(0) => return,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            return;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                    Err(_) => return,
                }
            }
        }
    }
}

#[derive(Debug)]
struct Produced {
    payload: Vec<u8>,
    pts_us: i64,
    flags: SampleFlags,
}

#[derive(Debug)]
enum Ready {
    Format(CodecFormat),
    Buffer(Produced),
}

#[derive(Clone, Debug, Default)]
struct PipeConfig {
    width: u32,
    height: u32,
    fps: u32,
    bitrate: Option<i64>,
    gop: u32,
    profile: String,
    sample_rate: u32,
    channels: u32,
    parameter_sets: Vec<u8>,
    aac: Option<AacParams>,
}

/// One `ffmpeg`-backed encoder or decoder.
pub struct FfmpegCodec {
    kind: PipeKind,
    config: Option<PipeConfig>,
    process: Option<FfmpegProcess>,
    output_surface: Option<OutputSurface>,
    surface_rx: Option<Receiver<SurfaceMessage>>,
    released: bool,
    input_closed: bool,
    output_ended: bool,
    next_input_index: usize,
    next_output_index: usize,
    ready: VecDeque<Ready>,
    outputs: HashMap<usize, Produced>,
    format_announced: bool,
    // Decoder: presentation order is the ascending order of the queued timestamps.
    pending_pts: BinaryHeap<Reverse<i64>>,
    // Encoders emit in submission order (no B-frames).
    submitted_pts: VecDeque<i64>,
    last_pts: i64,
    first_pts: Option<i64>,
    produced: u64,
    splitter: AccessUnitSplitter,
    adts_buf: Vec<u8>,
    parameter_sets_sent: bool,
}

impl FfmpegCodec {
    fn new(kind: PipeKind) -> Self {
        Self {
            kind,
            config: None,
            process: None,
            output_surface: None,
            surface_rx: None,
            released: false,
            input_closed: false,
            output_ended: false,
            next_input_index: 0,
            next_output_index: 0,
            ready: VecDeque::new(),
            outputs: HashMap::new(),
            format_announced: false,
            pending_pts: BinaryHeap::new(),
            submitted_pts: VecDeque::new(),
            last_pts: 0,
            first_pts: None,
            produced: 0,
            splitter: AccessUnitSplitter::new(),
            adts_buf: Vec::new(),
            parameter_sets_sent: false,
        }
    }

    fn config(&self) -> VidmarkResult<&PipeConfig> {
        self.config
            .as_ref()
            .ok_or_else(|| VidmarkError::codec(format!("{} is not configured", self.kind.label())))
    }

    fn process(&self) -> VidmarkResult<&FfmpegProcess> {
        if self.released {
            return Err(VidmarkError::codec(format!("{} is released", self.kind.label())));
        }
        self.process
            .as_ref()
            .ok_or_else(|| VidmarkError::codec(format!("{} is not started", self.kind.label())))
    }

    fn parse_config(&self, format: &CodecFormat) -> VidmarkResult<PipeConfig> {
        let mut cfg = PipeConfig {
            fps: format.get_u32(keys::FRAME_RATE).unwrap_or(30),
            bitrate: format.get_int(keys::BIT_RATE),
            profile: "baseline".to_string(),
            ..PipeConfig::default()
        };
        match self.kind {
            PipeKind::VideoDecoder | PipeKind::VideoEncoder => {
                let (Some(width), Some(height)) = (format.width(), format.height()) else {
                    return Err(VidmarkError::configuration("video codec needs width and height"));
                };
                cfg.width = width;
                cfg.height = height;
            }
            PipeKind::AudioDecoder | PipeKind::AudioEncoder => {
                let (Some(rate), Some(channels)) = (format.sample_rate(), format.channel_count())
                else {
                    return Err(VidmarkError::configuration(
                        "audio codec needs sample-rate and channel-count",
                    ));
                };
                cfg.sample_rate = rate;
                cfg.channels = channels;
            }
        }
        match self.kind {
            PipeKind::VideoDecoder => {
                for key in [keys::CSD_0, keys::CSD_1] {
                    if let Some(csd) = format.get_bytes(key) {
                        cfg.parameter_sets
                            .extend(bitstream::with_start_code(bitstream::strip_start_code(csd)));
                    }
                }
            }
            PipeKind::VideoEncoder => {
                if let Some(profile) = format.get_str(keys::PROFILE) {
                    if !PROFILES.contains(&profile) {
                        return Err(VidmarkError::configuration(format!(
                            "unsupported H.264 profile '{profile}'"
                        )));
                    }
                    cfg.profile = profile.to_string();
                }
                let interval = format.get_int(keys::I_FRAME_INTERVAL).unwrap_or(1).max(0) as u32;
                cfg.gop = (cfg.fps * interval).max(1);
            }
            PipeKind::AudioDecoder => {
                let asc = format.csd(0).ok_or_else(|| {
                    VidmarkError::configuration("AAC decoder needs csd-0 (AudioSpecificConfig)")
                })?;
                cfg.aac = Some(parse_audio_specific_config(asc)?);
            }
            PipeKind::AudioEncoder => {
                if bitstream::freq_index_for_rate(cfg.sample_rate).is_none() {
                    return Err(VidmarkError::configuration(format!(
                        "AAC cannot encode at {} Hz",
                        cfg.sample_rate
                    )));
                }
            }
        }
        Ok(cfg)
    }

    fn ffmpeg_args(&self, cfg: &PipeConfig) -> (Vec<String>, ReadMode) {
        let s = |v: &str| v.to_string();
        match self.kind {
            PipeKind::VideoDecoder => (
                vec![
                    s("-f"), s("h264"), s("-i"), s("pipe:0"),
                    s("-fps_mode"), s("passthrough"),
                    s("-f"), s("rawvideo"), s("-pix_fmt"), s("rgba"),
                    s("-s"), format!("{}x{}", cfg.width, cfg.height),
                    s("pipe:1"),
                ],
                ReadMode::Fixed(cfg.width as usize * cfg.height as usize * 4),
            ),
            PipeKind::AudioDecoder => (
                vec![
                    s("-f"), s("aac"), s("-i"), s("pipe:0"),
                    s("-f"), s("s16le"),
                    s("-ar"), cfg.sample_rate.to_string(),
                    s("-ac"), cfg.channels.to_string(),
                    s("pipe:1"),
                ],
                ReadMode::Fixed(AAC_FRAME_SAMPLES as usize * cfg.channels as usize * 2),
            ),
            PipeKind::VideoEncoder => {
                let mut args = vec![
                    s("-f"), s("rawvideo"), s("-pix_fmt"), s("rgba"),
                    s("-s"), format!("{}x{}", cfg.width, cfg.height),
                    s("-r"), cfg.fps.to_string(),
                    s("-i"), s("pipe:0"),
                    s("-c:v"), s("libx264"), s("-pix_fmt"), s("yuv420p"),
                    s("-profile:v"), cfg.profile.clone(),
                    s("-bf"), s("0"),
                    s("-g"), cfg.gop.to_string(),
                    s("-x264-params"), s("aud=1"),
                ];
                if let Some(bitrate) = cfg.bitrate {
                    args.extend([s("-b:v"), bitrate.to_string()]);
                }
                args.extend([s("-f"), s("h264"), s("pipe:1")]);
                (args, ReadMode::Stream)
            }
            PipeKind::AudioEncoder => {
                let mut args = vec![
                    s("-f"), s("s16le"),
                    s("-ar"), cfg.sample_rate.to_string(),
                    s("-ac"), cfg.channels.to_string(),
                    s("-i"), s("pipe:0"),
                    s("-c:a"), s("aac"),
                ];
                if let Some(bitrate) = cfg.bitrate {
                    args.extend([s("-b:a"), bitrate.to_string()]);
                }
                args.extend([s("-f"), s("adts"), s("pipe:1")]);
                (args, ReadMode::Stream)
            }
        }
    }

    fn output_format(&self, cfg: &PipeConfig) -> CodecFormat {
        match self.kind {
            PipeKind::VideoDecoder => CodecFormat::video(mime::VIDEO_RAW, cfg.width, cfg.height)
                .with_int(keys::FRAME_RATE, i64::from(cfg.fps))
                .with_str(keys::COLOR_FORMAT, "rgba"),
            PipeKind::AudioDecoder => {
                CodecFormat::audio(mime::AUDIO_RAW, cfg.sample_rate, cfg.channels)
            }
            PipeKind::VideoEncoder => {
                let mut out = CodecFormat::video(mime::VIDEO_AVC, cfg.width, cfg.height)
                    .with_int(keys::FRAME_RATE, i64::from(cfg.fps));
                if let Some(b) = cfg.bitrate {
                    out.set_int(keys::BIT_RATE, b);
                }
                out
            }
            PipeKind::AudioEncoder => {
                let mut out = CodecFormat::audio(mime::AUDIO_AAC, cfg.sample_rate, cfg.channels);
                if let Some(b) = cfg.bitrate {
                    out.set_int(keys::BIT_RATE, b);
                }
                out
            }
        }
    }

    /// Translate one input buffer into what `ffmpeg` reads on stdin.
    fn encode_input(&mut self, payload: &[u8], pts_us: i64) -> VidmarkResult<Vec<u8>> {
        self.last_pts = self.last_pts.max(pts_us);
        match self.kind {
            PipeKind::VideoDecoder => {
                self.pending_pts.push(Reverse(pts_us));
                let mut out = Vec::new();
                if !self.parameter_sets_sent {
                    out.extend_from_slice(&self.config()?.parameter_sets);
                    self.parameter_sets_sent = true;
                }
                out.extend(bitstream::avcc_to_annex_b(payload)?);
                Ok(out)
            }
            PipeKind::AudioDecoder => {
                self.first_pts.get_or_insert(pts_us);
                let params = self
                    .config()?
                    .aac
                    .ok_or_else(|| VidmarkError::codec("AAC decoder has no stream parameters"))?;
                let mut out = adts_header(params, payload.len()).to_vec();
                out.extend_from_slice(payload);
                Ok(out)
            }
            PipeKind::VideoEncoder => {
                let expected = {
                    let cfg = self.config()?;
                    frame_len(cfg.width, cfg.height)?
                };
                if payload.len() != expected {
                    return Err(VidmarkError::codec(format!(
                        "raw frame is {} bytes, expected {expected}",
                        payload.len()
                    )));
                }
                self.submitted_pts.push_back(pts_us);
                Ok(payload.to_vec())
            }
            PipeKind::AudioEncoder => {
                self.first_pts.get_or_insert(pts_us);
                Ok(payload.to_vec())
            }
        }
    }

    fn pump_surface(&mut self) -> VidmarkResult<()> {
        let Some(rx) = self.surface_rx.clone() else {
            return Ok(());
        };
        while !self.input_closed && self.process()?.queued() < SURFACE_WRITE_QUEUE {
            match rx.try_recv() {
                Ok(SurfaceMessage::Frame(frame)) => {
                    let data = self.encode_input(&frame.data, frame.pts_us)?;
                    self.process()?.write(data)?;
                }
                Ok(SurfaceMessage::EndOfStream) => self.close_input(),
                Err(_) => break,
            }
        }
        Ok(())
    }

    fn close_input(&mut self) {
        self.input_closed = true;
        if let Some(process) = self.process.as_mut() {
            process.close_input();
        }
        tracing::debug!(codec = self.kind.label(), "ffmpeg input closed");
    }

    fn announce_format(&mut self, format: CodecFormat) {
        self.format_announced = true;
        self.ready.push_back(Ready::Format(format));
    }

    fn on_chunk(&mut self, chunk: Vec<u8>) -> VidmarkResult<()> {
        match self.kind {
            PipeKind::VideoDecoder => {
                let pts = match self.pending_pts.pop() {
                    Some(Reverse(pts)) => pts,
                    None => self.last_pts,
                };
                self.ready.push_back(Ready::Buffer(Produced {
                    payload: chunk,
                    pts_us: pts,
                    flags: SampleFlags::KEY_FRAME,
                }));
            }
            PipeKind::AudioDecoder => {
                let cfg = self.config()?;
                let frames = chunk.len() as u64 / (2 * u64::from(cfg.channels.max(1)));
                let pts = self.first_pts.unwrap_or(0)
                    + (self.produced * MICROS_PER_SECOND as u64 / u64::from(cfg.sample_rate))
                        as i64;
                self.produced += frames;
                self.ready.push_back(Ready::Buffer(Produced {
                    payload: chunk,
                    pts_us: pts,
                    flags: SampleFlags::KEY_FRAME,
                }));
            }
            PipeKind::VideoEncoder => {
                for unit in self.splitter.push(&chunk) {
                    self.on_access_unit(&unit)?;
                }
            }
            PipeKind::AudioEncoder => {
                self.adts_buf.extend_from_slice(&chunk);
                self.drain_adts()?;
            }
        }
        Ok(())
    }

    fn on_access_unit(&mut self, unit: &[u8]) -> VidmarkResult<()> {
        let units = bitstream::annex_b_units(unit);
        if !self.format_announced {
            let sps = units.iter().find(|u| bitstream::nal_type(u) == Some(nal::SPS));
            let pps = units.iter().find(|u| bitstream::nal_type(u) == Some(nal::PPS));
            let (Some(sps), Some(pps)) = (sps, pps) else {
                return Err(VidmarkError::codec(
                    "first encoded access unit carries no SPS/PPS",
                ));
            };
            let mut format = self.output_format(self.config()?);
            format.set_bytes(keys::CSD_0, bitstream::with_start_code(sps));
            format.set_bytes(keys::CSD_1, bitstream::with_start_code(pps));
            self.announce_format(format);
        }
        let key = units
            .iter()
            .any(|u| bitstream::nal_type(u) == Some(nal::IDR));
        let payload =
            bitstream::units_to_avcc(units.iter().copied(), &[nal::SPS, nal::PPS, nal::AUD]);
        if payload.is_empty() {
            return Ok(());
        }
        let pts = match self.submitted_pts.pop_front() {
            Some(pts) => pts,
            None => {
                let fps = self.config()?.fps;
                self.last_pts + frame_pts_us(1, fps)
            }
        };
        self.last_pts = self.last_pts.max(pts);
        self.ready.push_back(Ready::Buffer(Produced {
            payload,
            pts_us: pts,
            flags: SampleFlags::NONE.with_key_frame(key),
        }));
        Ok(())
    }

    fn drain_adts(&mut self) -> VidmarkResult<()> {
        while let Some(frame) = parse_adts(&self.adts_buf)? {
            if self.adts_buf.len() < frame.frame_len {
                break;
            }
            if !self.format_announced {
                let mut format = self.output_format(self.config()?);
                format.set_bytes(
                    keys::CSD_0,
                    bitstream::audio_specific_config(frame.params).to_vec(),
                );
                self.announce_format(format);
            }
            let rate = frame
                .params
                .sample_rate()
                .ok_or_else(|| VidmarkError::codec("ADTS frame with invalid sampling index"))?;
            let pts = self.first_pts.unwrap_or(0)
                + (self.produced * AAC_FRAME_SAMPLES * MICROS_PER_SECOND as u64
                    / u64::from(rate)) as i64;
            self.produced += 1;
            let payload = self.adts_buf[frame.header_len..frame.frame_len].to_vec();
            self.adts_buf.drain(..frame.frame_len);
            self.ready.push_back(Ready::Buffer(Produced {
                payload,
                pts_us: pts,
                flags: SampleFlags::KEY_FRAME,
            }));
        }
        Ok(())
    }

    fn on_stdout_closed(&mut self) -> VidmarkResult<()> {
        if let Some(unit) = self.splitter.finish() {
            self.on_access_unit(&unit)?;
        }
        if let Some(process) = self.process.as_mut() {
            process.finish()?;
        }
        self.output_ended = true;
        self.ready.push_back(Ready::Buffer(Produced {
            payload: Vec::new(),
            pts_us: self.last_pts,
            flags: SampleFlags::END_OF_STREAM,
        }));
        tracing::debug!(codec = self.kind.label(), "ffmpeg output ended");
        Ok(())
    }

    fn emit(&mut self, ready: Ready) -> OutputEvent {
        match ready {
            Ready::Format(format) => OutputEvent::FormatChanged(format),
            Ready::Buffer(produced) => {
                let index = self.next_output_index;
                self.next_output_index = self.next_output_index.wrapping_add(1);
                let info = BufferInfo {
                    offset: 0,
                    size: produced.payload.len(),
                    pts_us: produced.pts_us,
                    flags: produced.flags,
                };
                self.outputs.insert(index, produced);
                OutputEvent::Buffer { index, info }
            }
        }
    }
}

impl CodecDriver for FfmpegCodec {
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
        if format.mime() != self.kind.mime() {
            return Err(VidmarkError::configuration(format!(
                "{} cannot handle '{}'",
                self.kind.label(),
                format.mime()
            )));
        }
        if surface.is_some() && self.kind != PipeKind::VideoDecoder {
            return Err(VidmarkError::configuration(format!(
                "{} cannot render to a surface",
                self.kind.label()
            )));
        }
        self.config = Some(self.parse_config(format)?);
        self.output_surface = surface;
        Ok(())
    }

    fn create_input_surface(&mut self) -> VidmarkResult<InputSurface> {
        if self.kind != PipeKind::VideoEncoder {
            return Err(VidmarkError::configuration(format!(
                "{} cannot create an input surface",
                self.kind.label()
            )));
        }
        let (width, height) = {
            let cfg = self.config()?;
            (cfg.width, cfg.height)
        };
        let (surface, rx) = InputSurface::new(width, height, SURFACE_QUEUE);
        self.surface_rx = Some(rx);
        Ok(surface)
    }

    #[tracing::instrument(skip_all, fields(codec = self.kind.label()))]
    fn start(&mut self) -> VidmarkResult<()> {
        if self.process.is_some() {
            return Ok(());
        }
        let cfg = self.config()?.clone();
        let (args, mode) = self.ffmpeg_args(&cfg);
        self.process = Some(FfmpegProcess::spawn(self.kind.label(), &args, mode)?);
        Ok(())
    }

    fn dequeue_input_buffer(&mut self, _timeout: Duration) -> VidmarkResult<Option<usize>> {
        let process = self.process()?;
        if self.surface_rx.is_some() || self.input_closed || process.queued() >= WRITE_QUEUE {
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
        self.process()?;
        if self.input_closed {
            return Err(VidmarkError::codec(format!(
                "{} input already ended",
                self.kind.label()
            )));
        }
        if !payload.is_empty() && !flags.config_data {
            let data = self.encode_input(payload, pts_us)?;
            self.process()?.write(data)?;
        }
        if flags.end_of_stream {
            self.close_input();
        }
        Ok(())
    }

    fn dequeue_output_buffer(&mut self, timeout: Duration) -> VidmarkResult<OutputEvent> {
        self.process()?;
        if !self.format_announced
            && matches!(self.kind, PipeKind::VideoDecoder | PipeKind::AudioDecoder)
        {
            let format = self.output_format(self.config()?);
            self.announce_format(format);
        }
        if let Some(ready) = self.ready.pop_front() {
            return Ok(self.emit(ready));
        }
        if self.output_ended {
            return Ok(OutputEvent::TryAgainLater);
        }
        self.pump_surface()?;

        let received = self.process()?.chunks.recv_timeout(timeout);
        match received {
            Ok(chunk) => self.on_chunk(chunk)?,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => self.on_stdout_closed()?,
        }
        match self.ready.pop_front() {
            Some(ready) => Ok(self.emit(ready)),
            None => Ok(OutputEvent::TryAgainLater),
        }
    }

    fn output_buffer(&self, index: usize) -> Option<&[u8]> {
        self.outputs.get(&index).map(|p| p.payload.as_slice())
    }

    fn release_output_buffer(&mut self, index: usize, render: bool) -> VidmarkResult<()> {
        let produced = self
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
        let cfg = self.config()?;
        let frame = VideoFrame::new(cfg.width, cfg.height, produced.payload, produced.pts_us)?;
        surface.post_frame(frame)
    }

    fn stop(&mut self) -> VidmarkResult<()> {
        if let Some(process) = self.process.take() {
            process.kill();
        }
        self.ready.clear();
        self.outputs.clear();
        Ok(())
    }

    fn release(&mut self) {
        if let Some(process) = self.process.take() {
            process.kill();
        }
        self.released = true;
        self.ready.clear();
        self.outputs.clear();
        self.output_surface = None;
        self.surface_rx = None;
    }
}

#[cfg(test)]
#[path = "../../tests/unit/codec/ffmpeg.rs"]
mod tests;
