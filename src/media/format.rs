use std::collections::BTreeMap;

use crate::foundation::core::TrackKind;

/// Well-known [`CodecFormat`] keys.
pub mod keys {
    /// Mime type (`Str`).
    pub const MIME: &str = "mime";
    /// Frame width in pixels (`Int`).
    pub const WIDTH: &str = "width";
    /// Frame height in pixels (`Int`).
    pub const HEIGHT: &str = "height";
    /// Target bit rate in bits per second (`Int`).
    pub const BIT_RATE: &str = "bitrate";
    /// Frames per second (`Int` or `Float`).
    pub const FRAME_RATE: &str = "frame-rate";
    /// Seconds between key frames (`Int`).
    pub const I_FRAME_INTERVAL: &str = "i-frame-interval";
    /// Encoder profile name (`Str`).
    pub const PROFILE: &str = "profile";
    /// Encoder level (`Int`).
    pub const LEVEL: &str = "level";
    /// Audio sample rate in Hz (`Int`).
    pub const SAMPLE_RATE: &str = "sample-rate";
    /// Audio channel count (`Int`).
    pub const CHANNEL_COUNT: &str = "channel-count";
    /// Pixel layout of raw frames (`Str`): `"rgba"` or `"surface"`.
    pub const COLOR_FORMAT: &str = "color-format";
    /// Largest input buffer the codec must accept (`Int`).
    pub const MAX_INPUT_SIZE: &str = "max-input-size";
    /// First codec-specific data blob (`Bytes`).
    pub const CSD_0: &str = "csd-0";
    /// Second codec-specific data blob (`Bytes`).
    pub const CSD_1: &str = "csd-1";
    /// Stream duration in microseconds (`Int`).
    pub const DURATION_US: &str = "durationUs";
    /// Display rotation in degrees (`Int`).
    pub const ROTATION: &str = "rotation-degrees";
    /// AAC audio object type (`Int`).
    pub const AAC_PROFILE: &str = "aac-profile";
}

/// Well-known mime types.
pub mod mime {
    /// H.264 / AVC video.
    pub const VIDEO_AVC: &str = "video/avc";
    /// H.265 / HEVC video.
    pub const VIDEO_HEVC: &str = "video/hevc";
    /// AAC audio.
    pub const AUDIO_AAC: &str = "audio/mp4a-latm";
    /// Uncompressed RGBA frames.
    pub const VIDEO_RAW: &str = "video/raw";
    /// Interleaved signed 16-bit PCM.
    pub const AUDIO_RAW: &str = "audio/raw";
}

/// Scalar value stored in a [`CodecFormat`].
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatValue {
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// String value.
    Str(String),
    /// Opaque bytes (codec-specific data).
    Bytes(Vec<u8>),
}

/// Key/value description of an elementary stream or a codec configuration.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct CodecFormat {
    entries: BTreeMap<String, FormatValue>,
}

impl CodecFormat {
    /// Format carrying only a mime type.
    pub fn new(mime: &str) -> Self {
        let mut f = Self::default();
        f.set_str(keys::MIME, mime);
        f
    }

    /// Video format with frame dimensions.
    pub fn video(mime: &str, width: u32, height: u32) -> Self {
        Self::new(mime)
            .with_int(keys::WIDTH, i64::from(width))
            .with_int(keys::HEIGHT, i64::from(height))
    }

    /// Audio format with sample rate and channel count.
    pub fn audio(mime: &str, sample_rate: u32, channels: u32) -> Self {
        Self::new(mime)
            .with_int(keys::SAMPLE_RATE, i64::from(sample_rate))
            .with_int(keys::CHANNEL_COUNT, i64::from(channels))
    }

    /// Builder form of [`CodecFormat::set_int`].
    pub fn with_int(mut self, key: &str, value: i64) -> Self {
        self.set_int(key, value);
        self
    }

    /// Builder form of [`CodecFormat::set_float`].
    pub fn with_float(mut self, key: &str, value: f64) -> Self {
        self.set_float(key, value);
        self
    }

    /// Builder form of [`CodecFormat::set_str`].
    pub fn with_str(mut self, key: &str, value: &str) -> Self {
        self.set_str(key, value);
        self
    }

    /// Builder form of [`CodecFormat::set_bytes`].
    pub fn with_bytes(mut self, key: &str, value: impl Into<Vec<u8>>) -> Self {
        self.set_bytes(key, value);
        self
    }

    /// Store an integer.
    pub fn set_int(&mut self, key: &str, value: i64) {
        self.entries.insert(key.to_string(), FormatValue::Int(value));
    }

    /// Store a float.
    pub fn set_float(&mut self, key: &str, value: f64) {
        self.entries.insert(key.to_string(), FormatValue::Float(value));
    }

    /// Store a string.
    pub fn set_str(&mut self, key: &str, value: &str) {
        self.entries
            .insert(key.to_string(), FormatValue::Str(value.to_string()));
    }

    /// Store a byte blob.
    pub fn set_bytes(&mut self, key: &str, value: impl Into<Vec<u8>>) {
        self.entries
            .insert(key.to_string(), FormatValue::Bytes(value.into()));
    }

    /// Raw value lookup.
    pub fn get(&self, key: &str) -> Option<&FormatValue> {
        self.entries.get(key)
    }

    /// Integer lookup. Integral floats are accepted.
    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.entries.get(key)? {
            FormatValue::Int(v) => Some(*v),
            FormatValue::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            _ => None,
        }
    }

    /// Float lookup. Integers are widened.
    pub fn get_float(&self, key: &str) -> Option<f64> {
        match self.entries.get(key)? {
            FormatValue::Float(v) => Some(*v),
            FormatValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// String lookup.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.entries.get(key)? {
            FormatValue::Str(v) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Byte blob lookup.
    pub fn get_bytes(&self, key: &str) -> Option<&[u8]> {
        match self.entries.get(key)? {
            FormatValue::Bytes(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    /// `true` when `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Remove `key`, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<FormatValue> {
        self.entries.remove(key)
    }

    /// Iterate entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FormatValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Mime type, or `""` when unset.
    pub fn mime(&self) -> &str {
        self.get_str(keys::MIME).unwrap_or("")
    }

    /// Track kind derived from the mime type.
    pub fn kind(&self) -> Option<TrackKind> {
        TrackKind::from_mime(self.mime())
    }

    /// Positive `u32` lookup.
    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.get_int(key)
            .and_then(|v| u32::try_from(v).ok())
            .filter(|v| *v > 0)
    }

    /// Frame width.
    pub fn width(&self) -> Option<u32> {
        self.get_u32(keys::WIDTH)
    }

    /// Frame height.
    pub fn height(&self) -> Option<u32> {
        self.get_u32(keys::HEIGHT)
    }

    /// Audio sample rate.
    pub fn sample_rate(&self) -> Option<u32> {
        self.get_u32(keys::SAMPLE_RATE)
    }

    /// Audio channel count.
    pub fn channel_count(&self) -> Option<u32> {
        self.get_u32(keys::CHANNEL_COUNT)
    }

    /// Codec-specific data blob `csd-<index>`.
    pub fn csd(&self, index: usize) -> Option<&[u8]> {
        self.get_bytes(&format!("csd-{index}"))
    }

    /// Reduced format used when a codec rejects the full one: stream shape, rate control and
    /// codec-specific data only.
    pub fn minimal(&self) -> Self {
        let mut f = Self::new(self.mime());
        f.copy_keys_from(
            self,
            &[
                keys::WIDTH,
                keys::HEIGHT,
                keys::SAMPLE_RATE,
                keys::CHANNEL_COUNT,
                keys::BIT_RATE,
                keys::FRAME_RATE,
                keys::I_FRAME_INTERVAL,
                keys::COLOR_FORMAT,
                keys::CSD_0,
                keys::CSD_1,
            ],
        );
        f
    }

    /// Copy `keys` from `other` when present there.
    pub fn copy_keys_from(&mut self, other: &CodecFormat, keys: &[&str]) {
        for key in keys {
            if let Some(v) = other.get(key) {
                self.entries.insert((*key).to_string(), v.clone());
            }
        }
    }
}

impl std::fmt::Display for CodecFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match v {
                FormatValue::Int(x) => write!(f, "{k}={x}")?,
                FormatValue::Float(x) => write!(f, "{k}={x}")?,
                FormatValue::Str(x) => write!(f, "{k}={x}")?,
                FormatValue::Bytes(x) => write!(f, "{k}=<{} bytes>", x.len())?,
            }
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
#[path = "../../tests/unit/media/format.rs"]
mod tests;
