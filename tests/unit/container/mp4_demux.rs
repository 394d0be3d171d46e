use super::*;
use crate::container::ContainerWriter;
use crate::container::mp4_mux::Mp4ContainerWriter;
use crate::media::sample::Sample;

fn write_movie(path: &Path, rotation: Rotation) {
    let video = CodecFormat::video(mime::VIDEO_AVC, 64, 48)
        .with_int(keys::FRAME_RATE, 30)
        .with_bytes(keys::CSD_0, vec![0, 0, 0, 1, 0x67, 0x42, 0xc0, 0x1e])
        .with_bytes(keys::CSD_1, vec![0, 0, 0, 1, 0x68, 0xce, 0x3c, 0x80]);
    let audio = CodecFormat::audio(mime::AUDIO_AAC, 48_000, 2).with_bytes(keys::CSD_0, vec![0x11, 0x90]);

    let mut writer = Mp4ContainerWriter::new(path);
    let v = writer.add_track(TrackKind::Video, &video).unwrap();
    let a = writer.add_track(TrackKind::Audio, &audio).unwrap();
    writer.set_orientation_hint(rotation).unwrap();
    writer.start().unwrap();
    for i in 0..3i64 {
        let flags = SampleFlags::NONE.with_key_frame(i == 0);
        writer
            .write_sample(v, &Sample::new(0, vec![0, 0, 0, 1, i as u8], i * 33_333, flags))
            .unwrap();
    }
    for (i, pts) in [0i64, 21_333, 42_667].into_iter().enumerate() {
        writer
            .write_sample(a, &Sample::new(1, vec![0x21, i as u8], pts, SampleFlags::KEY_FRAME))
            .unwrap();
    }
    writer.stop().unwrap();
}

fn read_all(demux: &mut dyn DemuxSource) -> Vec<(usize, i64, bool)> {
    let mut out = Vec::new();
    let mut buf = Vec::new();
    while demux.read_sample_data(&mut buf).unwrap().is_some() {
        out.push((
            demux.sample_track_index().unwrap(),
            demux.sample_time_us().unwrap(),
            demux.sample_flags().key_frame,
        ));
        demux.advance();
    }
    out
}

#[test]
fn aac_tables_match_the_mp4_enums() {
    assert_eq!(sample_rate(SampleFreqIndex::Freq44100), 44_100);
    assert_eq!(sample_rate(SampleFreqIndex::Freq7350), 7_350);
    assert_eq!(channel_layout(ChannelConfig::Stereo), (2, 2));
    assert_eq!(channel_layout(ChannelConfig::SevenOne), (8, 7));
    assert_eq!(object_type(AudioObjectType::AacLowComplexity), 2);
    assert_eq!(object_type(AudioObjectType::AacMain), 1);
}

#[test]
fn missing_files_are_source_errors() {
    let err = Mp4File::new("/nonexistent/input.mp4").inspect().unwrap_err();
    assert!(err.is_source_error());
}

#[test]
fn garbage_is_a_source_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("junk.mp4");
    std::fs::write(&path, b"definitely not a movie").unwrap();
    assert!(Mp4File::new(&path).open_demuxer().is_err());
}

#[test]
fn written_movie_reads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("movie.mp4");
    write_movie(&path, Rotation::Cw90);

    let input = Mp4File::new(&path);
    let info = input.inspect().unwrap();
    assert!(info.has_audio && info.has_video);
    assert_eq!(info.rotation, Rotation::Cw90);
    assert_eq!((info.width, info.height), (Some(64), Some(48)));

    let demux = input.open_demuxer().unwrap();
    assert_eq!(demux.track_count(), 2);
    let video = demux.track_format(0).unwrap();
    assert_eq!(video.mime(), mime::VIDEO_AVC);
    assert_eq!(video.csd(0), Some(&[0, 0, 0, 1, 0x67, 0x42, 0xc0, 0x1e][..]));
    assert_eq!(video.get_int(keys::ROTATION), Some(90));
    let audio = demux.track_format(1).unwrap();
    assert_eq!(audio.mime(), mime::AUDIO_AAC);
    assert_eq!(audio.sample_rate(), Some(48_000));
    assert_eq!(audio.channel_count(), Some(2));
    assert_eq!(audio.csd(0), Some(&[0x11, 0x90][..]));
}

#[test]
fn selected_tracks_interleave_by_time() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("movie.mp4");
    write_movie(&path, Rotation::None);

    let mut demux = Mp4File::new(&path).open_demuxer().unwrap();
    demux.select_track(0).unwrap();
    demux.select_track(1).unwrap();
    let order = read_all(demux.as_mut());
    let video: Vec<i64> = order.iter().filter(|s| s.0 == 0).map(|s| s.1).collect();
    let audio: Vec<i64> = order.iter().filter(|s| s.0 == 1).map(|s| s.1).collect();
    assert_eq!(video, vec![0, 33_333, 66_667]);
    assert_eq!(audio, vec![0, 21_333, 42_667]);
    assert!(order.windows(2).all(|w| w[0].1 <= w[1].1));
    assert!(order.iter().filter(|s| s.0 == 0).map(|s| s.2).eq([true, false, false]));

    demux.release();
    assert!(demux.read_sample_data(&mut Vec::new()).is_err());
}

#[test]
fn unselecting_keeps_other_tracks_flowing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("movie.mp4");
    write_movie(&path, Rotation::None);

    let mut demux = Mp4File::new(&path).open_demuxer().unwrap();
    demux.select_track(0).unwrap();
    demux.select_track(1).unwrap();
    demux.unselect_track(1).unwrap();
    assert!(read_all(demux.as_mut()).iter().all(|s| s.0 == 0));
    assert!(demux.select_track(9).is_err());
}
