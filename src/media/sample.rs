use bytes::Bytes;

use crate::foundation::core::TrackKind;
use crate::foundation::error::{VidmarkError, VidmarkResult};
use crate::media::format::CodecFormat;

/// Per-buffer flags shared by demuxers, codecs and the multiplexer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SampleFlags {
    /// Sync sample (IDR frame, or any audio frame).
    pub key_frame: bool,
    /// Last buffer of the stream; may carry no payload.
    pub end_of_stream: bool,
    /// Codec configuration data rather than media.
    pub config_data: bool,
}

impl SampleFlags {
    /// No flag set.
    pub const NONE: Self = Self {
        key_frame: false,
        end_of_stream: false,
        config_data: false,
    };
    /// Key frame only.
    pub const KEY_FRAME: Self = Self {
        key_frame: true,
        end_of_stream: false,
        config_data: false,
    };
    /// End of stream only.
    pub const END_OF_STREAM: Self = Self {
        key_frame: false,
        end_of_stream: true,
        config_data: false,
    };
    /// Codec config only.
    pub const CONFIG: Self = Self {
        key_frame: false,
        end_of_stream: false,
        config_data: true,
    };

    /// Copy with `key_frame` set to `on`.
    pub fn with_key_frame(mut self, on: bool) -> Self {
        self.key_frame = on;
        self
    }

    /// Copy with `end_of_stream` set.
    pub fn with_end_of_stream(mut self) -> Self {
        self.end_of_stream = true;
        self
    }
}

/// One access unit travelling between pipeline stages.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    /// Source track index the sample belongs to.
    pub track: usize,
    /// Encoded or raw payload; empty for a bare end-of-stream marker.
    pub payload: Bytes,
    /// Presentation time in microseconds.
    pub presentation_time_us: i64,
    /// Buffer flags.
    pub flags: SampleFlags,
}

impl Sample {
    /// Build a sample.
    pub fn new(
        track: usize,
        payload: impl Into<Bytes>,
        presentation_time_us: i64,
        flags: SampleFlags,
    ) -> Self {
        Self {
            track,
            payload: payload.into(),
            presentation_time_us,
            flags,
        }
    }

    /// Empty end-of-stream marker.
    pub fn end_of_stream(track: usize, presentation_time_us: i64) -> Self {
        Self::new(track, Bytes::new(), presentation_time_us, SampleFlags::END_OF_STREAM)
    }

    /// `true` for a bare end-of-stream marker without payload.
    pub fn is_eos_marker(&self) -> bool {
        self.flags.end_of_stream && self.payload.is_empty()
    }

    /// `true` when the sample carries media a consumer should see.
    pub fn is_media(&self) -> bool {
        !self.flags.config_data && !self.payload.is_empty()
    }
}

/// A stream known to the pipeline.
#[derive(Clone, Debug, PartialEq)]
pub struct Track {
    /// Index of the stream in its source.
    pub source_index: usize,
    /// Audio or video.
    pub kind: TrackKind,
    /// Stream format.
    pub format: CodecFormat,
    dest_index: Option<usize>,
}

impl Track {
    /// Describe a source stream; the destination index is not assigned yet.
    pub fn new(source_index: usize, kind: TrackKind, format: CodecFormat) -> Self {
        Self {
            source_index,
            kind,
            format,
            dest_index: None,
        }
    }

    /// Output container track index, once assigned.
    pub fn dest_index(&self) -> Option<usize> {
        self.dest_index
    }

    /// Assign the output track index. Assignment happens exactly once.
    pub fn assign_dest(&mut self, dest_index: usize) -> VidmarkResult<()> {
        if let Some(existing) = self.dest_index {
            return Err(VidmarkError::configuration(format!(
                "track {} already mapped to output track {existing}",
                self.source_index
            )));
        }
        self.dest_index = Some(dest_index);
        Ok(())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/media/sample.rs"]
mod tests;
