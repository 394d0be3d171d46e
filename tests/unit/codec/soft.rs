use super::*;

fn started(kind: SoftKind, format: &CodecFormat) -> SoftCodec {
    let mut codec = SoftCodec::new(kind);
    codec.configure(format, None).unwrap();
    codec.start().unwrap();
    codec
}

fn next_buffer(codec: &mut SoftCodec) -> (usize, BufferInfo) {
    loop {
        match codec.dequeue_output_buffer(Duration::from_millis(5)).unwrap() {
            OutputEvent::Buffer { index, info } => return (index, info),
            OutputEvent::FormatChanged(_) => continue,
            OutputEvent::TryAgainLater => panic!("no output available"),
        }
    }
}

#[test]
fn factory_rejects_compressed_mimes() {
    let factory = SoftCodecFactory::new();
    assert_eq!(factory.name(), "soft");
    assert!(factory.create_decoder(mime::VIDEO_AVC).is_err());
    assert!(factory.create_encoder(mime::AUDIO_AAC).is_err());
    assert!(factory.create_decoder(mime::VIDEO_RAW).is_ok());
    assert!(factory.create_encoder(mime::AUDIO_RAW).is_ok());
}

#[test]
fn encoder_rejects_unknown_profile_but_accepts_minimal() {
    let format = CodecFormat::video(mime::VIDEO_RAW, 2, 2).with_str(keys::PROFILE, "ultra");
    let mut codec = SoftCodec::new(SoftKind::VideoEncoder);
    assert!(codec.configure(&format, None).is_err());
    let mut codec = SoftCodec::new(SoftKind::VideoEncoder);
    codec.configure(&format.minimal(), None).unwrap();
}

#[test]
fn first_output_event_is_format_change() {
    let format = CodecFormat::video(mime::VIDEO_RAW, 2, 2).with_int(keys::FRAME_RATE, 30);
    let mut codec = started(SoftKind::VideoDecoder, &format);
    match codec.dequeue_output_buffer(Duration::ZERO).unwrap() {
        OutputEvent::FormatChanged(out) => {
            assert_eq!(out.width(), Some(2));
            assert_eq!(out.get_str(keys::COLOR_FORMAT), Some("rgba"));
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(matches!(
        codec.dequeue_output_buffer(Duration::ZERO).unwrap(),
        OutputEvent::TryAgainLater
    ));
}

#[test]
fn raw_video_frames_must_match_dimensions() {
    let format = CodecFormat::video(mime::VIDEO_RAW, 2, 2);
    let mut codec = started(SoftKind::VideoDecoder, &format);
    let index = codec.dequeue_input_buffer(Duration::ZERO).unwrap().unwrap();
    assert!(codec.queue_input_buffer(index, &[0u8; 3], 0, SampleFlags::NONE).is_err());
    codec.queue_input_buffer(index, &[1u8; 16], 0, SampleFlags::KEY_FRAME).unwrap();
    let (out, info) = next_buffer(&mut codec);
    assert_eq!(info.size, 16);
    assert!(info.flags.key_frame);
    assert_eq!(codec.output_buffer(out).unwrap(), &[1u8; 16][..]);
    codec.release_output_buffer(out, false).unwrap();
    assert!(codec.output_buffer(out).is_none());
}

#[test]
fn encoder_marks_key_frames_on_interval() {
    let format = CodecFormat::video(mime::VIDEO_RAW, 1, 1)
        .with_int(keys::FRAME_RATE, 2)
        .with_int(keys::I_FRAME_INTERVAL, 1);
    let mut codec = started(SoftKind::VideoEncoder, &format);
    let mut keys_seen = Vec::new();
    for i in 0..5 {
        let index = codec.dequeue_input_buffer(Duration::ZERO).unwrap().unwrap();
        codec.queue_input_buffer(index, &[0u8; 4], i, SampleFlags::NONE).unwrap();
        let (out, info) = next_buffer(&mut codec);
        keys_seen.push(info.flags.key_frame);
        codec.release_output_buffer(out, false).unwrap();
    }
    assert_eq!(keys_seen, vec![true, false, true, false, true]);
}

#[test]
fn input_slots_are_bounded() {
    let format = CodecFormat::audio(mime::AUDIO_RAW, 48_000, 2);
    let mut codec = started(SoftKind::AudioDecoder, &format);
    for i in 0..INPUT_SLOTS {
        let index = codec.dequeue_input_buffer(Duration::ZERO).unwrap().unwrap();
        codec.queue_input_buffer(index, &[0u8; 4], i as i64, SampleFlags::NONE).unwrap();
    }
    assert!(codec.dequeue_input_buffer(Duration::ZERO).unwrap().is_none());
}

#[test]
fn surface_encoder_drains_frames_then_eos() {
    let format = CodecFormat::video(mime::VIDEO_RAW, 1, 1);
    let mut codec = SoftCodec::new(SoftKind::VideoEncoder);
    codec.configure(&format, None).unwrap();
    let surface = codec.create_input_surface().unwrap();
    codec.start().unwrap();
    assert!(codec.dequeue_input_buffer(Duration::ZERO).unwrap().is_none());

    surface
        .submit_frame(VideoFrame::new(1, 1, vec![9u8; 4], 33).unwrap())
        .unwrap();
    surface.signal_end_of_stream().unwrap();

    let (out, info) = next_buffer(&mut codec);
    assert_eq!(info.pts_us, 33);
    assert!(info.flags.key_frame);
    codec.release_output_buffer(out, false).unwrap();
    let (_, info) = next_buffer(&mut codec);
    assert!(info.flags.end_of_stream);
    assert_eq!(info.size, 0);
}

#[test]
fn decoder_renders_into_output_surface() {
    let format = CodecFormat::video(mime::VIDEO_RAW, 1, 1);
    let surface = OutputSurface::new();
    let mut codec = SoftCodec::new(SoftKind::VideoDecoder);
    codec.configure(&format, Some(surface.clone())).unwrap();
    codec.start().unwrap();
    let index = codec.dequeue_input_buffer(Duration::ZERO).unwrap().unwrap();
    codec.queue_input_buffer(index, &[5u8; 4], 7, SampleFlags::KEY_FRAME).unwrap();
    let (out, _) = next_buffer(&mut codec);
    codec.release_output_buffer(out, true).unwrap();
    let frame = surface.update_tex_image().unwrap().frame;
    assert_eq!(frame.pts_us, 7);
    assert_eq!(&frame.data[..], &[5u8; 4][..]);
}

#[test]
fn operations_fail_after_release() {
    let format = CodecFormat::audio(mime::AUDIO_RAW, 44_100, 1);
    let mut codec = started(SoftKind::AudioEncoder, &format);
    codec.release();
    assert!(codec.dequeue_input_buffer(Duration::ZERO).is_err());
    assert!(codec.configure(&format, None).is_err());
}
