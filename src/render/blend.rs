use rayon::prelude::*;

use crate::foundation::error::{VidmarkError, VidmarkResult};
use crate::foundation::math::{mul_div255_u8, mul_div255_u16};

/// Straight-alpha RGBA8 pixel.
pub type Rgba8 = [u8; 4];

fn opacity_u16(opacity: f32) -> u16 {
    ((opacity.clamp(0.0, 1.0) * 255.0).round() as i32).clamp(0, 255) as u16
}

/// Straight-alpha source-over: `src * a + dst * (1 - a)` with `a = src.a * opacity`.
pub fn over(dst: Rgba8, src: Rgba8, opacity: f32) -> Rgba8 {
    over_u16(dst, src, opacity_u16(opacity))
}

fn over_u16(dst: Rgba8, src: Rgba8, op: u16) -> Rgba8 {
    let sa = mul_div255_u16(u16::from(src[3]), op);
    if sa == 0 {
        return dst;
    }
    if sa == 255 {
        return [src[0], src[1], src[2], 255];
    }
    let inv = 255 - sa;
    let mut out = [0u8; 4];
    for i in 0..3 {
        out[i] = mul_div255_u8(u16::from(src[i]), sa).saturating_add(mul_div255_u8(u16::from(dst[i]), inv));
    }
    out[3] = (sa as u8).saturating_add(mul_div255_u8(u16::from(dst[3]), inv));
    out
}

/// Blend `src` over `dst` (equal-length RGBA8 buffers of `stride`-byte rows), row-parallel.
pub fn over_in_place(dst: &mut [u8], src: &[u8], stride: usize, opacity: f32) -> VidmarkResult<()> {
    if dst.len() != src.len() || !dst.len().is_multiple_of(4) || stride == 0 || !stride.is_multiple_of(4) {
        return Err(VidmarkError::validation(
            "over_in_place expects equal-length rgba8 buffers with a whole-pixel stride",
        ));
    }
    let op = opacity_u16(opacity);
    if op == 0 {
        return Ok(());
    }
    dst.par_chunks_mut(stride)
        .zip(src.par_chunks(stride))
        .for_each(|(d_row, s_row)| {
            for (d, s) in d_row.chunks_exact_mut(4).zip(s_row.chunks_exact(4)) {
                if s[3] == 0 {
                    continue;
                }
                let out = over_u16([d[0], d[1], d[2], d[3]], [s[0], s[1], s[2], s[3]], op);
                d.copy_from_slice(&out);
            }
        });
    Ok(())
}

/// Convert premultiplied RGBA8 to straight alpha in place.
pub fn unpremultiply_in_place(data: &mut [u8]) {
    for px in data.chunks_exact_mut(4) {
        let a = u32::from(px[3]);
        if a == 0 || a == 255 {
            continue;
        }
        for c in &mut px[..3] {
            *c = ((u32::from(*c) * 255 + a / 2) / a).min(255) as u8;
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/render/blend.rs"]
mod tests;
