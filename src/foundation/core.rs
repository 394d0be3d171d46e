use crate::foundation::error::{VidmarkError, VidmarkResult};

/// Microseconds per second, the unit of every presentation timestamp.
pub const MICROS_PER_SECOND: i64 = 1_000_000;

/// Clockwise display rotation carried by a video track.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(try_from = "i32", into = "i32")]
pub enum Rotation {
    /// No rotation.
    #[default]
    None,
    /// 90 degrees clockwise.
    Cw90,
    /// 180 degrees.
    Cw180,
    /// 270 degrees clockwise.
    Cw270,
}

impl Rotation {
    /// Parse a rotation in degrees; only multiples of 90 in `[0, 360)` are accepted.
    pub fn from_degrees(degrees: i32) -> VidmarkResult<Self> {
        match degrees {
            0 => Ok(Self::None),
            90 => Ok(Self::Cw90),
            180 => Ok(Self::Cw180),
            270 => Ok(Self::Cw270),
            other => Err(VidmarkError::configuration(format!(
                "unsupported rotation {other} (expected 0, 90, 180 or 270)"
            ))),
        }
    }

    /// Rotation in degrees.
    pub fn degrees(self) -> i32 {
        match self {
            Self::None => 0,
            Self::Cw90 => 90,
            Self::Cw180 => 180,
            Self::Cw270 => 270,
        }
    }
}

impl TryFrom<i32> for Rotation {
    type Error = VidmarkError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Self::from_degrees(value)
    }
}

impl From<Rotation> for i32 {
    fn from(value: Rotation) -> Self {
        value.degrees()
    }
}

/// Kind of an elementary stream.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    /// Audio samples.
    Audio,
    /// Video frames.
    Video,
}

impl TrackKind {
    /// Classify a mime type by its top-level type.
    pub fn from_mime(mime: &str) -> Option<Self> {
        if mime.starts_with("video/") {
            Some(Self::Video)
        } else if mime.starts_with("audio/") {
            Some(Self::Audio)
        } else {
            None
        }
    }

    /// Lowercase label used in logs.
    pub fn label(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

/// Convert a timestamp in microseconds to ticks of `timescale` (rounded to nearest).
pub fn micros_to_ticks(us: i64, timescale: u32) -> i64 {
    let ts = i128::from(timescale);
    let us = i128::from(us);
    let half = i128::from(MICROS_PER_SECOND) / 2;
    let ticks = if us >= 0 {
        (us * ts + half) / i128::from(MICROS_PER_SECOND)
    } else {
        (us * ts - half) / i128::from(MICROS_PER_SECOND)
    };
    ticks as i64
}

/// Convert ticks of `timescale` to microseconds (rounded to nearest).
pub fn ticks_to_micros(ticks: i64, timescale: u32) -> i64 {
    if timescale == 0 {
        return 0;
    }
    let ts = i128::from(timescale);
    let ticks = i128::from(ticks);
    let half = ts / 2;
    let us = if ticks >= 0 {
        (ticks * i128::from(MICROS_PER_SECOND) + half) / ts
    } else {
        (ticks * i128::from(MICROS_PER_SECOND) - half) / ts
    };
    us as i64
}

/// Presentation time of frame `index` at a constant `fps`.
pub fn frame_pts_us(index: u64, fps: u32) -> i64 {
    if fps == 0 {
        return 0;
    }
    ((i128::from(index) * i128::from(MICROS_PER_SECOND)) / i128::from(fps)) as i64
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/core.rs"]
mod tests;
