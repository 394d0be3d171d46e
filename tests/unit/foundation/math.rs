use super::*;

#[test]
fn mul_div255_rounds_to_nearest() {
    assert_eq!(mul_div255_u16(255, 255), 255);
    assert_eq!(mul_div255_u16(128, 255), 128);
    assert_eq!(mul_div255_u16(0, 200), 0);
    assert_eq!(mul_div255_u8(100, 128), 50);
}

#[test]
fn identity_keeps_uv() {
    assert_eq!(Mat4::IDENTITY.apply_uv(0.25, 0.75), (0.25, 0.75));
}

#[test]
fn flip_vertical_mirrors_v() {
    let (u, v) = Mat4::FLIP_VERTICAL.apply_uv(0.25, 0.2);
    assert!((u - 0.25).abs() < 1e-6);
    assert!((v - 0.8).abs() < 1e-6);
}

#[test]
fn flipping_twice_is_identity() {
    let m = Mat4::FLIP_VERTICAL.compose(&Mat4::FLIP_VERTICAL);
    for (a, b) in m.0.iter().zip(Mat4::IDENTITY.0.iter()) {
        assert!((a - b).abs() < 1e-6);
    }
}
