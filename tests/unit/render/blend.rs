use super::*;

#[test]
fn zero_opacity_is_noop() {
    let dst = [1, 2, 3, 255];
    assert_eq!(over(dst, [200, 200, 200, 200], 0.0), dst);
}

#[test]
fn transparent_source_is_noop() {
    let dst = [10, 20, 30, 255];
    assert_eq!(over(dst, [255, 255, 255, 0], 1.0), dst);
}

#[test]
fn opaque_source_replaces_destination() {
    assert_eq!(over([0, 0, 0, 255], [255, 0, 0, 255], 1.0), [255, 0, 0, 255]);
}

#[test]
fn half_alpha_mixes_straight_colors() {
    let out = over([0, 0, 0, 255], [255, 255, 255, 128], 1.0);
    assert_eq!(out, [128, 128, 128, 255]);
    let faded = over([0, 0, 0, 255], [255, 255, 255, 255], 0.5);
    assert_eq!(faded, [128, 128, 128, 255]);
}

#[test]
fn in_place_blend_checks_lengths() {
    let mut dst = vec![0u8; 16];
    assert!(over_in_place(&mut dst, &[0u8; 12], 8, 1.0).is_err());
    assert!(over_in_place(&mut dst, &[0u8; 16], 6, 1.0).is_err());

    let mut src = vec![0u8; 16];
    src[12..16].copy_from_slice(&[9, 9, 9, 255]);
    over_in_place(&mut dst, &src, 8, 1.0).unwrap();
    assert_eq!(&dst[..12], &[0u8; 12]);
    assert_eq!(&dst[12..], &[9, 9, 9, 255]);
}

#[test]
fn unpremultiply_restores_straight_colors() {
    let mut px = vec![64, 32, 0, 128, 10, 10, 10, 0, 200, 100, 50, 255];
    unpremultiply_in_place(&mut px);
    assert_eq!(px, vec![128, 64, 0, 128, 10, 10, 10, 0, 200, 100, 50, 255]);
}
