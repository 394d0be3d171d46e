use std::sync::atomic::AtomicUsize;

use super::*;

fn frame(pts_us: i64) -> VideoFrame {
    VideoFrame::new(2, 2, vec![7u8; 16], pts_us).unwrap()
}

#[test]
fn video_frame_checks_length() {
    assert!(VideoFrame::new(2, 2, vec![0u8; 15], 0).is_err());
    assert!(VideoFrame::new(0, 2, Vec::<u8>::new(), 0).is_err());
}

#[test]
fn output_surface_holds_one_frame_until_acknowledged() {
    let surface = OutputSurface::new();
    let notified = Arc::new(AtomicUsize::new(0));
    let n = Arc::clone(&notified);
    surface.set_on_frame_available(move || {
        n.fetch_add(1, Ordering::SeqCst);
    });

    surface.post_frame(frame(0)).unwrap();
    assert!(surface.post_frame(frame(1)).is_err());
    assert_eq!(notified.load(Ordering::SeqCst), 1);
    assert!(!surface.wait_frame_released(Duration::from_millis(1)));

    let got = surface.update_tex_image().unwrap();
    assert_eq!(got.frame.pts_us, 0);
    assert_eq!(got.transform, Mat4::IDENTITY);
    surface.release_frame();
    assert!(surface.wait_frame_released(Duration::from_millis(100)));

    surface.post_frame(frame(1)).unwrap();
    assert_eq!(surface.update_tex_image().unwrap().frame.pts_us, 1);
}

#[test]
fn output_surface_reports_transform() {
    let surface = OutputSurface::new();
    surface.set_transform(Mat4::FLIP_VERTICAL);
    surface.post_frame(frame(5)).unwrap();
    assert_eq!(surface.update_tex_image().unwrap().transform, Mat4::FLIP_VERTICAL);
}

#[test]
fn released_output_surface_rejects_posts_and_unblocks_waiter() {
    let surface = OutputSurface::new();
    surface.post_frame(frame(0)).unwrap();
    surface.release();
    surface.release();
    assert!(surface.is_released());
    assert!(surface.update_tex_image().is_none());
    assert!(surface.wait_frame_released(Duration::from_millis(100)));
    assert!(surface.post_frame(frame(1)).is_err());
}

#[test]
fn input_surface_keeps_eos_behind_frames() {
    let (surface, rx) = InputSurface::new(2, 2, 4);
    surface.submit_frame(frame(0)).unwrap();
    surface.submit_frame(frame(1)).unwrap();
    surface.signal_end_of_stream().unwrap();
    surface.signal_end_of_stream().unwrap();
    assert!(surface.submit_frame(frame(2)).is_err());

    let got: Vec<_> = rx.try_iter().collect();
    assert_eq!(got.len(), 3);
    assert!(matches!(&got[0], SurfaceMessage::Frame(f) if f.pts_us == 0));
    assert!(matches!(&got[1], SurfaceMessage::Frame(f) if f.pts_us == 1));
    assert_eq!(got[2], SurfaceMessage::EndOfStream);
}

#[test]
fn input_surface_fails_once_encoder_is_gone() {
    let (surface, rx) = InputSurface::new(2, 2, 1);
    drop(rx);
    assert!(surface.submit_frame(frame(0)).is_err());
}

#[test]
fn input_surface_rejects_wrong_size() {
    let (surface, _rx) = InputSurface::new(4, 4, 1);
    assert!(surface.submit_frame(frame(0)).is_err());
}
