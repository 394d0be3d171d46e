use super::*;

const SQUARE: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="10" height="10">
  <rect x="0" y="0" width="10" height="10" fill="#0000ff" fill-opacity="0.5"/>
</svg>"##;

#[test]
fn rasterized_svg_is_straight_alpha() {
    let mut overlay = SvgOverlay::from_data(SQUARE.as_bytes(), Layout::default(), 1.0).unwrap();
    overlay.set_dimensions(20, 20).unwrap();
    let texture = overlay.provide().unwrap();
    let px = &texture.data[(10 * 20 + 10) * 4..][..4];
    assert!(px[2] >= 250, "blue should not stay premultiplied: {px:?}");
    assert!((120..=135).contains(&px[3]));
    assert_eq!(px[0], 0);
}

#[test]
fn invalid_svg_is_rejected() {
    assert!(SvgOverlay::from_data(b"<not-svg", Layout::default(), 1.0).is_err());
}
