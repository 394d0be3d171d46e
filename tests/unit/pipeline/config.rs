use chrono::TimeZone;

use super::*;
use crate::overlay::provider::Placement;

#[test]
fn defaults_match_the_documented_encoder_settings() {
    let config = TranscodeConfig::default();
    assert_eq!(config.encode.video_bit_rate, 4_000_000);
    assert_eq!(config.encode.max_frame_rate, 60);
    assert_eq!(config.encode.key_frame_interval_s, 5);
    assert_eq!(config.encode.profile, "baseline");
    assert_eq!(config.encode.audio_bit_rate, 128_000);
    assert_eq!(config.pending_writes, PendingWritePolicy::Queue);
    assert_eq!(config.video_mime(), mime::VIDEO_AVC);
    assert_eq!(config.audio_mime(), mime::AUDIO_AAC);
    config.validate().unwrap();
}

#[test]
fn json_overrides_selected_fields() {
    let config = TranscodeConfig::from_json_str(
        r#"{
            "output_dir": "out",
            "backend": "soft",
            "pending_writes": "drop",
            "encode": { "video_bit_rate": 2000000, "frame_rate": 25 },
            "overlay": { "path": "logo.SVG", "layout": { "placement": "bottom-right" }, "opacity": 0.5 }
        }"#,
    )
    .unwrap();
    assert_eq!(config.backend, CodecBackend::Soft);
    assert_eq!(config.video_mime(), mime::VIDEO_RAW);
    assert_eq!(config.pending_writes, PendingWritePolicy::Drop);
    assert_eq!(config.encode.video_bit_rate, 2_000_000);
    assert_eq!(config.encode.frame_rate, Some(25));
    assert_eq!(config.encode.audio_bit_rate, 128_000);
    let overlay = config.overlay.unwrap();
    assert!(overlay.is_svg());
    assert_eq!(overlay.layout.placement, Placement::BottomRight);
    assert_eq!(overlay.layout.margin, Layout::default().margin);
}

#[test]
fn invalid_values_are_validation_errors() {
    for json in [
        r#"{ "encode": { "video_bit_rate": 0 } }"#,
        r#"{ "encode": { "frame_rate": 90 } }"#,
        r#"{ "encode": { "max_frame_rate": 24 } }"#,
        r#"{ "stall_timeout_s": 0 }"#,
        r#"{ "overlay": { "path": "a.png", "opacity": 2.0 } }"#,
        r#"{ "unknown_field": true }"#,
        r#"not json"#,
    ] {
        let err = TranscodeConfig::from_json_str(json).unwrap_err();
        assert_eq!(err.kind(), crate::foundation::error::ErrorKind::Validation, "{json}");
    }
}

#[test]
fn output_names_carry_the_start_time() {
    let now = Local.with_ymd_and_hms(2024, 3, 9, 17, 5, 1).unwrap();
    assert_eq!(output_file_name(now), "watermark_20240309_170501.mp4");

    let config = TranscodeConfig {
        output_dir: PathBuf::from("videos"),
        ..TranscodeConfig::default()
    };
    assert_eq!(
        config.resolve_output_path(now),
        PathBuf::from("videos/watermark_20240309_170501.mp4")
    );
    let explicit = TranscodeConfig {
        output_path: Some(PathBuf::from("x.mp4")),
        ..config
    };
    assert_eq!(explicit.resolve_output_path(now), PathBuf::from("x.mp4"));
}

#[test]
fn backend_names_parse() {
    assert_eq!("soft".parse::<CodecBackend>().unwrap(), CodecBackend::Soft);
    assert!("gpu".parse::<CodecBackend>().is_err());
}
