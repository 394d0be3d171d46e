//! Encoder formats derived from the decoded source formats and the run's settings.

use crate::foundation::error::{VidmarkError, VidmarkResult};
use crate::media::format::{CodecFormat, keys, mime};
use crate::pipeline::config::{EncodeSettings, MIN_ENCODE_FPS};

/// Color format requested from video encoders fed through an input surface.
pub const SURFACE_COLOR_FORMAT: &str = "surface";
/// AAC-LC audio object type.
pub const AAC_LC: i64 = 2;

/// Output frame rate: the fixed setting when present, else the source rate clamped to
/// `MIN_ENCODE_FPS..=max_frame_rate`, else `MIN_ENCODE_FPS`.
pub fn encode_frame_rate(source: &CodecFormat, settings: &EncodeSettings) -> u32 {
    if let Some(fps) = settings.frame_rate {
        return fps;
    }
    match source.get_float(keys::FRAME_RATE) {
        Some(fps) if fps.is_finite() && fps > 0.0 => {
            (fps.round() as u32).clamp(MIN_ENCODE_FPS, settings.max_frame_rate)
        }
        _ => MIN_ENCODE_FPS,
    }
}

/// Video encoder format for frames shaped like `source`.
pub fn video_encoder_format(
    source: &CodecFormat,
    encoder_mime: &str,
    settings: &EncodeSettings,
) -> VidmarkResult<CodecFormat> {
    let (Some(width), Some(height)) = (source.width(), source.height()) else {
        return Err(VidmarkError::configuration(format!(
            "video source format lacks dimensions: {source}"
        )));
    };
    let fps = encode_frame_rate(source, settings);
    Ok(CodecFormat::video(encoder_mime, width, height)
        .with_int(keys::BIT_RATE, i64::from(settings.video_bit_rate))
        .with_int(keys::FRAME_RATE, i64::from(fps))
        .with_int(keys::I_FRAME_INTERVAL, i64::from(settings.key_frame_interval_s))
        .with_str(keys::PROFILE, &settings.profile)
        .with_str(keys::COLOR_FORMAT, SURFACE_COLOR_FORMAT))
}

/// Audio encoder format keeping the source sample rate and channel count.
pub fn audio_encoder_format(
    source: &CodecFormat,
    encoder_mime: &str,
    settings: &EncodeSettings,
) -> VidmarkResult<CodecFormat> {
    let (Some(rate), Some(channels)) = (source.sample_rate(), source.channel_count()) else {
        return Err(VidmarkError::configuration(format!(
            "audio source format lacks sample rate or channel count: {source}"
        )));
    };
    let mut format = CodecFormat::audio(encoder_mime, rate, channels)
        .with_int(keys::BIT_RATE, i64::from(settings.audio_bit_rate));
    if encoder_mime == mime::AUDIO_AAC {
        format.set_int(keys::AAC_PROFILE, AAC_LC);
    }
    Ok(format)
}

#[cfg(test)]
#[path = "../../tests/unit/pipeline/format.rs"]
mod tests;
