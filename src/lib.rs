//! vidmark transcodes a video file while compositing an overlay onto every frame.
//!
//! A run is a fixed pipeline: demux, decode, composite, encode, mux. Audio and video travel on
//! independent paths that meet again in one [`TrackMultiplexer`]:
//!
//! - Describe the job with a [`TranscodeConfig`] (or build a [`Transcoder`] from explicit parts)
//! - Call [`Transcoder::run`] and inspect the [`PipelineOutcome`]
//!
//! Codecs are reached through a [`CodecFactory`]: [`FfmpegCodecFactory`] drives system `ffmpeg`
//! processes for H.264/AAC, [`SoftCodecFactory`] passes raw streams through in process.
#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod foundation;

pub(crate) mod actor;
pub(crate) mod codec;
pub(crate) mod container;
pub(crate) mod media;
pub(crate) mod mux;
pub(crate) mod overlay;
pub(crate) mod pipeline;
pub(crate) mod render;

pub use crate::foundation::core::{
    MICROS_PER_SECOND, Rotation, TrackKind, frame_pts_us, micros_to_ticks, ticks_to_micros,
};
pub use crate::foundation::error::{ErrorKind, VidmarkError, VidmarkResult};
pub use crate::foundation::math::Mat4;

pub use crate::actor::{Actor, Latch, SerialActor, Task, TaskId};

pub use crate::codec::driver::{BufferInfo, CodecDriver, CodecFactory, OutputEvent};
pub use crate::codec::ffmpeg::{FfmpegCodecFactory, is_ffmpeg_on_path};
pub use crate::codec::soft::SoftCodecFactory;
pub use crate::codec::stage::{
    BufferMode, CodecRole, CodecStage, Delivery, PullSource, StageCaps, StageEvent, StageOutput,
    StageState,
};

pub use crate::container::memory::{
    MemoryContainer, MemoryDemuxer, MemoryInput, MemoryRecording, MemoryTarget, MemoryTrack,
};
pub use crate::container::mp4_demux::{Mp4Demuxer, Mp4File};
pub use crate::container::mp4_mux::{Mp4ContainerWriter, Mp4FileTarget};
pub use crate::container::{
    ContainerWriter, DemuxSource, MediaInfo, MediaInput, OutputTarget, SharedDemuxer, find_track,
};

pub use crate::media::format::{CodecFormat, FormatValue, keys, mime};
pub use crate::media::sample::{Sample, SampleFlags, Track};

pub use crate::mux::multiplexer::{
    FailureListener, MuxStats, MuxTrackStats, PendingWritePolicy, TrackMultiplexer,
};

pub use crate::overlay::bitmap::ImageOverlay;
pub use crate::overlay::provider::{
    Layout, OverlayProvider, OverlayTexture, Placement, Rect, TransparentOverlay,
};
pub use crate::overlay::vector::SvgOverlay;

pub use crate::pipeline::config::{
    CodecBackend, EncodeSettings, OverlaySpec, TranscodeConfig, output_file_name,
};
pub use crate::pipeline::format::{audio_encoder_format, encode_frame_rate, video_encoder_format};
pub use crate::pipeline::orchestrator::Transcoder;
pub use crate::pipeline::platform::{LocalPlatform, PlatformServices};
pub use crate::pipeline::state::{PipelineOutcome, PipelineState, TranscodeReport};

pub use crate::render::compositor::FrameCompositor;
pub use crate::render::context::{CurrentContext, RenderContext, WindowSurface};
pub use crate::render::surface::{
    FrameAvailable, InputSurface, OutputSurface, SurfaceMessage, VideoFrame,
};
