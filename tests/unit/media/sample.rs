use super::*;
use crate::media::format::mime;

#[test]
fn eos_marker_is_not_media() {
    let s = Sample::end_of_stream(3, 1_000);
    assert!(s.is_eos_marker());
    assert!(!s.is_media());
    assert_eq!(s.track, 3);
}

#[test]
fn config_buffers_are_not_media() {
    let s = Sample::new(0, vec![1u8, 2], 0, SampleFlags::CONFIG);
    assert!(!s.is_media());
    let k = Sample::new(0, vec![1u8, 2], 0, SampleFlags::KEY_FRAME);
    assert!(k.is_media());
}

#[test]
fn eos_with_payload_is_media() {
    let s = Sample::new(0, vec![9u8], 10, SampleFlags::NONE.with_end_of_stream());
    assert!(s.is_media());
    assert!(!s.is_eos_marker());
}

#[test]
fn dest_index_is_assigned_once() {
    let mut t = Track::new(1, TrackKind::Audio, CodecFormat::new(mime::AUDIO_AAC));
    assert_eq!(t.dest_index(), None);
    t.assign_dest(0).unwrap();
    assert_eq!(t.dest_index(), Some(0));
    assert!(t.assign_dest(1).is_err());
    assert_eq!(t.dest_index(), Some(0));
}
