//! Frame compositor: draws each decoded frame plus the overlay into the encoder's window surface.

use rayon::prelude::*;

use crate::foundation::error::{VidmarkError, VidmarkResult};
use crate::foundation::math::Mat4;
use crate::overlay::provider::{OverlayProvider, OverlayTexture};
use crate::render::blend;
use crate::render::context::{RenderContext, WindowSurface};
use crate::render::surface::{FrameAvailable, OutputSurface, VideoFrame};

/// Draws decoded frames with their texture transform, blends the overlay on top and swaps the
/// result into the encoder's input surface.
#[derive(Debug)]
pub struct FrameCompositor {
    context: RenderContext,
    window: WindowSurface,
    source: OutputSurface,
    overlay: OverlayTexture,
    overlay_visible: bool,
    frames: u64,
    released: bool,
}

impl FrameCompositor {
    /// Ask `provider` for an overlay matching the window size and set up the compositor.
    pub fn new(
        context: RenderContext,
        window: WindowSurface,
        source: OutputSurface,
        provider: &mut dyn OverlayProvider,
    ) -> VidmarkResult<Self> {
        let (width, height) = (window.width(), window.height());
        provider.set_dimensions(width, height)?;
        let overlay = provider.provide()?;
        if (overlay.width, overlay.height) != (width, height) || overlay.data.len() != window_len(&window) {
            return Err(VidmarkError::configuration(format!(
                "overlay is {}x{}, output is {width}x{height}",
                overlay.width, overlay.height
            )));
        }
        let overlay_visible = !overlay.is_invisible();
        tracing::debug!(width, height, overlay_visible, "compositor ready");
        Ok(Self {
            context,
            window,
            source,
            overlay,
            overlay_visible,
            frames: 0,
            released: false,
        })
    }

    /// Frames swapped so far.
    pub fn frames_rendered(&self) -> u64 {
        self.frames
    }

    /// Handle one frame-available notification. Returns `false` when no frame was pending.
    ///
    /// The decoder is acknowledged once the frame has been swapped, or dropped on failure.
    pub fn on_frame_available(&mut self) -> VidmarkResult<bool> {
        if self.released {
            return Ok(false);
        }
        let Some(available) = self.source.update_tex_image() else {
            return Ok(false);
        };
        let result = self.draw_frame(&available);
        self.source.release_frame();
        result.map(|()| true)
    }

    fn draw_frame(&mut self, available: &FrameAvailable) -> VidmarkResult<()> {
        let current = self.context.make_current()?;
        let (width, height) = (self.window.width(), self.window.height());
        let overlay = self.overlay_visible.then_some(&self.overlay);
        let back = self.window.back_buffer_mut();
        current.install(|| {
            draw_textured_quad(back, width, height, &available.frame, &available.transform);
            match overlay {
                Some(overlay) => blend::over_in_place(back, &overlay.data, width as usize * 4, overlay.opacity),
                None => Ok(()),
            }
        })?;
        self.window.set_presentation_time(available.frame.pts_us);
        self.window.swap_buffers(&current)?;
        self.frames += 1;
        tracing::trace!(pts_us = available.frame.pts_us, frames = self.frames, "frame swapped");
        Ok(())
    }

    /// Tell the encoder that no more frames follow.
    pub fn signal_end_of_stream(&self) -> VidmarkResult<()> {
        self.window.signal_end_of_stream()
    }

    /// Release the window surface and the render context. Idempotent.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.window.release();
        self.context.release();
        tracing::debug!(frames = self.frames, "compositor released");
    }
}

fn window_len(window: &WindowSurface) -> usize {
    window.width() as usize * window.height() as usize * 4
}

/// Fill `dst` by sampling `frame` (nearest texel, clamped) at each pixel center mapped through
/// `transform`. The output is opaque.
fn draw_textured_quad(dst: &mut [u8], width: u32, height: u32, frame: &VideoFrame, transform: &Mat4) {
    let stride = width as usize * 4;
    let (src_w, src_h) = (frame.width as usize, frame.height as usize);
    let src = &frame.data[..];
    let texel = |coord: f32, size: usize| -> usize {
        let t = (coord * size as f32).floor();
        if t.is_nan() || t < 0.0 {
            0
        } else {
            (t as usize).min(size - 1)
        }
    };
    dst.par_chunks_mut(stride)
        .enumerate()
        .for_each(|(y, row)| {
            let v = (y as f32 + 0.5) / height as f32;
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                let u = (x as f32 + 0.5) / width as f32;
                let (tu, tv) = transform.apply_uv(u, v);
                let at = (texel(tv, src_h) * src_w + texel(tu, src_w)) * 4;
                px[..3].copy_from_slice(&src[at..at + 3]);
                px[3] = 255;
            }
        });
}

#[cfg(test)]
#[path = "../../tests/unit/render/compositor.rs"]
mod tests;
