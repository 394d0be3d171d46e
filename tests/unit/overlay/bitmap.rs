use super::*;
use crate::overlay::provider::Placement;

fn red_square(size: u32) -> RgbaImage {
    RgbaImage::from_pixel(size, size, image::Rgba([255, 0, 0, 255]))
}

#[test]
fn fill_stretches_over_the_frame() {
    let mut overlay = ImageOverlay::from_rgba(red_square(2), Layout::default(), 0.5).unwrap();
    overlay.set_dimensions(8, 4).unwrap();
    let texture = overlay.provide().unwrap();
    assert_eq!((texture.width, texture.height), (8, 4));
    assert_eq!(texture.opacity, 0.5);
    assert!(texture.data.chunks_exact(4).all(|px| px == [255, 0, 0, 255]));
}

#[test]
fn corner_placement_leaves_the_rest_transparent() {
    let layout = Layout {
        placement: Placement::BottomRight,
        margin: 2,
        scale: 0.5,
    };
    let mut overlay = ImageOverlay::from_rgba(red_square(4), layout, 1.0).unwrap();
    overlay.set_dimensions(16, 16).unwrap();
    let texture = overlay.provide().unwrap();
    let at = |x: usize, y: usize| texture.data[(y * 16 + x) * 4 + 3];
    assert_eq!(at(0, 0), 0);
    assert_eq!(at(13, 13), 255);
    assert_eq!(at(6, 6), 255);
    assert_eq!(at(5, 5), 0);
    assert_eq!(at(15, 15), 0);
}

#[test]
fn provide_requires_dimensions() {
    let mut overlay = ImageOverlay::from_rgba(red_square(1), Layout::default(), 1.0).unwrap();
    assert!(overlay.provide().is_err());
}

#[test]
fn png_files_decode() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("logo.png");
    red_square(3).save(&path).unwrap();
    let mut overlay = ImageOverlay::open(&path, Layout::default(), 1.0).unwrap();
    overlay.set_dimensions(3, 3).unwrap();
    assert!(!overlay.provide().unwrap().is_invisible());

    assert!(ImageOverlay::open(&dir.path().join("missing.png"), Layout::default(), 1.0).is_err());
}
