//! Run configuration, loadable from JSON.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use chrono::{DateTime, Local};

use crate::foundation::error::{VidmarkError, VidmarkResult};
use crate::media::format::mime;
use crate::mux::multiplexer::PendingWritePolicy;
use crate::overlay::provider::Layout;

/// Lowest frame rate given to the video encoder when the source reports one.
pub const MIN_ENCODE_FPS: u32 = 30;

/// Codec implementation used for decoding and encoding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecBackend {
    /// System `ffmpeg` processes (H.264 / AAC).
    #[default]
    Ffmpeg,
    /// In-process pass-through codecs for raw streams.
    Soft,
}

impl CodecBackend {
    /// Video mime the backend encodes to by default.
    pub fn video_mime(self) -> &'static str {
        match self {
            Self::Ffmpeg => mime::VIDEO_AVC,
            Self::Soft => mime::VIDEO_RAW,
        }
    }

    /// Audio mime the backend encodes to by default.
    pub fn audio_mime(self) -> &'static str {
        match self {
            Self::Ffmpeg => mime::AUDIO_AAC,
            Self::Soft => mime::AUDIO_RAW,
        }
    }
}

impl std::str::FromStr for CodecBackend {
    type Err = VidmarkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ffmpeg" => Ok(Self::Ffmpeg),
            "soft" => Ok(Self::Soft),
            other => Err(VidmarkError::validation(format!(
                "unknown codec backend '{other}' (expected ffmpeg or soft)"
            ))),
        }
    }
}

/// Encoder settings.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EncodeSettings {
    /// Video encoder mime; the backend's default when unset.
    pub video_mime: Option<String>,
    /// Video bit rate in bits per second.
    pub video_bit_rate: u32,
    /// Fixed output frame rate; derived from the source when unset.
    pub frame_rate: Option<u32>,
    /// Upper bound of the output frame rate.
    pub max_frame_rate: u32,
    /// Seconds between key frames.
    pub key_frame_interval_s: u32,
    /// H.264 profile name.
    pub profile: String,
    /// Audio encoder mime; the backend's default when unset.
    pub audio_mime: Option<String>,
    /// Audio bit rate in bits per second.
    pub audio_bit_rate: u32,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            video_mime: None,
            video_bit_rate: 4_000_000,
            frame_rate: None,
            max_frame_rate: 60,
            key_frame_interval_s: 5,
            profile: "baseline".to_string(),
            audio_mime: None,
            audio_bit_rate: 128_000,
        }
    }
}

impl EncodeSettings {
    /// Check ranges.
    pub fn validate(&self) -> VidmarkResult<()> {
        if self.video_bit_rate == 0 || self.audio_bit_rate == 0 {
            return Err(VidmarkError::validation("bit rates must be > 0"));
        }
        if self.max_frame_rate < MIN_ENCODE_FPS {
            return Err(VidmarkError::validation(format!(
                "max_frame_rate must be >= {MIN_ENCODE_FPS}"
            )));
        }
        if let Some(fps) = self.frame_rate
            && (fps == 0 || fps > self.max_frame_rate)
        {
            return Err(VidmarkError::validation(format!(
                "frame_rate must be in 1..={}",
                self.max_frame_rate
            )));
        }
        if self.profile.trim().is_empty() {
            return Err(VidmarkError::validation("profile must be non-empty"));
        }
        Ok(())
    }
}

/// Overlay drawn over every frame.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OverlaySpec {
    /// Image or SVG file; `.svg` selects the vector renderer.
    pub path: PathBuf,
    /// Placement, margin and size.
    #[serde(default)]
    pub layout: Layout,
    /// Global opacity in `[0, 1]`.
    #[serde(default = "default_opacity")]
    pub opacity: f32,
}

fn default_opacity() -> f32 {
    1.0
}

impl OverlaySpec {
    /// `true` when the file is an SVG document.
    pub fn is_svg(&self) -> bool {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("svg"))
    }
}

/// Everything a run needs besides the input.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TranscodeConfig {
    /// Directory receiving generated output names.
    pub output_dir: PathBuf,
    /// Explicit output file; a timestamped name in `output_dir` when unset.
    pub output_path: Option<PathBuf>,
    /// Replace an existing output file.
    pub overwrite: bool,
    /// Encoder settings.
    pub encode: EncodeSettings,
    /// Handling of samples written before every track registered.
    pub pending_writes: PendingWritePolicy,
    /// Announce the finished file to the media index.
    pub notify_media_index: bool,
    /// JSON-lines file the local media index appends to.
    pub media_index_path: Option<PathBuf>,
    /// Codec implementation.
    pub backend: CodecBackend,
    /// Overlay; none draws nothing.
    pub overlay: Option<OverlaySpec>,
    /// Rayon workers used by the compositor; rayon's default when unset.
    pub render_threads: Option<usize>,
    /// Seconds without pipeline progress before the run is abandoned.
    pub stall_timeout_s: u64,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            output_path: None,
            overwrite: false,
            encode: EncodeSettings::default(),
            pending_writes: PendingWritePolicy::Queue,
            notify_media_index: true,
            media_index_path: None,
            backend: CodecBackend::Ffmpeg,
            overlay: None,
            render_threads: None,
            stall_timeout_s: 30,
        }
    }
}

impl TranscodeConfig {
    /// Read a JSON config file.
    pub fn from_json_file(path: &Path) -> VidmarkResult<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config '{}'", path.display()))?;
        Self::from_json_str(&text)
    }

    /// Parse and validate JSON config text.
    pub fn from_json_str(text: &str) -> VidmarkResult<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| VidmarkError::validation(format!("invalid config json: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field.
    pub fn validate(&self) -> VidmarkResult<()> {
        self.encode.validate()?;
        if self.stall_timeout_s == 0 {
            return Err(VidmarkError::validation("stall_timeout_s must be > 0"));
        }
        if self.render_threads == Some(0) {
            return Err(VidmarkError::validation("render_threads must be >= 1 when set"));
        }
        if let Some(overlay) = &self.overlay {
            overlay.layout.validate()?;
            if !(0.0..=1.0).contains(&overlay.opacity) {
                return Err(VidmarkError::validation(format!(
                    "overlay opacity must be in [0, 1], got {}",
                    overlay.opacity
                )));
            }
        }
        Ok(())
    }

    /// Output file for a run started at `now`.
    pub fn resolve_output_path(&self, now: DateTime<Local>) -> PathBuf {
        match &self.output_path {
            Some(path) => path.clone(),
            None => self.output_dir.join(output_file_name(now)),
        }
    }

    /// Video encoder mime for this configuration.
    pub fn video_mime(&self) -> &str {
        self.encode
            .video_mime
            .as_deref()
            .unwrap_or_else(|| self.backend.video_mime())
    }

    /// Audio encoder mime for this configuration.
    pub fn audio_mime(&self) -> &str {
        self.encode
            .audio_mime
            .as_deref()
            .unwrap_or_else(|| self.backend.audio_mime())
    }
}

/// `watermark_<yyyyMMdd_HHmmss>.mp4`.
pub fn output_file_name(now: DateTime<Local>) -> String {
    format!("watermark_{}.mp4", now.format("%Y%m%d_%H%M%S"))
}

#[cfg(test)]
#[path = "../../tests/unit/pipeline/config.rs"]
mod tests;
