use super::*;

fn source(fps: Option<f64>) -> CodecFormat {
    let f = CodecFormat::video(mime::VIDEO_AVC, 1280, 720);
    match fps {
        Some(fps) => f.with_float(keys::FRAME_RATE, fps),
        None => f,
    }
}

#[test]
fn frame_rate_is_clamped_to_the_encoder_range() {
    let settings = EncodeSettings::default();
    assert_eq!(encode_frame_rate(&source(None), &settings), 30);
    assert_eq!(encode_frame_rate(&source(Some(24.0)), &settings), 30);
    assert_eq!(encode_frame_rate(&source(Some(59.94)), &settings), 60);
    assert_eq!(encode_frame_rate(&source(Some(120.0)), &settings), 60);
    assert_eq!(encode_frame_rate(&source(Some(f64::NAN)), &settings), 30);

    let fixed = EncodeSettings {
        frame_rate: Some(25),
        ..EncodeSettings::default()
    };
    assert_eq!(encode_frame_rate(&source(Some(50.0)), &fixed), 25);
}

#[test]
fn video_format_carries_every_encoder_setting() {
    let settings = EncodeSettings::default();
    let f = video_encoder_format(&source(Some(30.0)), mime::VIDEO_AVC, &settings).unwrap();
    assert_eq!(f.mime(), mime::VIDEO_AVC);
    assert_eq!((f.width(), f.height()), (Some(1280), Some(720)));
    assert_eq!(f.get_int(keys::BIT_RATE), Some(4_000_000));
    assert_eq!(f.get_int(keys::FRAME_RATE), Some(30));
    assert_eq!(f.get_int(keys::I_FRAME_INTERVAL), Some(5));
    assert_eq!(f.get_str(keys::PROFILE), Some("baseline"));
    assert_eq!(f.get_str(keys::COLOR_FORMAT), Some(SURFACE_COLOR_FORMAT));
    assert!(f.csd(0).is_none());
}

#[test]
fn audio_format_keeps_source_shape() {
    let settings = EncodeSettings::default();
    let src = CodecFormat::audio(mime::AUDIO_AAC, 44_100, 1);
    let f = audio_encoder_format(&src, mime::AUDIO_AAC, &settings).unwrap();
    assert_eq!((f.sample_rate(), f.channel_count()), (Some(44_100), Some(1)));
    assert_eq!(f.get_int(keys::BIT_RATE), Some(128_000));
    assert_eq!(f.get_int(keys::AAC_PROFILE), Some(AAC_LC));

    let raw = audio_encoder_format(&src, mime::AUDIO_RAW, &settings).unwrap();
    assert!(!raw.contains(keys::AAC_PROFILE));
}

#[test]
fn incomplete_sources_are_configuration_errors() {
    let settings = EncodeSettings::default();
    let err = video_encoder_format(&CodecFormat::new(mime::VIDEO_AVC), mime::VIDEO_AVC, &settings)
        .unwrap_err();
    assert_eq!(err.kind(), crate::foundation::error::ErrorKind::Configuration);
    assert!(audio_encoder_format(&CodecFormat::new(mime::AUDIO_AAC), mime::AUDIO_AAC, &settings).is_err());
}
