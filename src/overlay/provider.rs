//! Overlay textures and the providers that produce them.
//!
//! A provider is told the output frame size once, then renders a full-frame straight-alpha
//! texture with its content already placed. The compositor blends that texture over every frame.

use std::str::FromStr;

use crate::foundation::error::{VidmarkError, VidmarkResult};
use crate::render::surface::frame_len;

/// Full-frame overlay pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct OverlayTexture {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Straight-alpha RGBA8, rows top to bottom.
    pub data: Vec<u8>,
    /// Global opacity applied while blending.
    pub opacity: f32,
}

impl OverlayTexture {
    /// Fully transparent texture.
    pub fn transparent(width: u32, height: u32) -> VidmarkResult<Self> {
        Ok(Self {
            width,
            height,
            data: vec![0; frame_len(width, height)?],
            opacity: 1.0,
        })
    }

    /// `true` when blending the texture cannot change a frame.
    pub fn is_invisible(&self) -> bool {
        self.opacity <= 0.0 || self.data.chunks_exact(4).all(|px| px[3] == 0)
    }

    /// Copy `pixels` (`rect.width * rect.height` RGBA8) into `rect`, clipped to the texture.
    pub fn blit(&mut self, rect: Rect, pixels: &[u8]) -> VidmarkResult<()> {
        let row_len = rect.width as usize * 4;
        if pixels.len() != row_len * rect.height as usize {
            return Err(VidmarkError::validation(format!(
                "blit source is {} bytes, expected {}x{} rgba",
                pixels.len(),
                rect.width,
                rect.height
            )));
        }
        let stride = self.width as usize * 4;
        let x0 = rect.x.min(self.width) as usize;
        let copy_w = (rect.x + rect.width).min(self.width) as usize - x0;
        for row in 0..rect.height {
            let y = rect.y + row;
            if y >= self.height {
                break;
            }
            let src = &pixels[row as usize * row_len..][..copy_w * 4];
            let dst_at = y as usize * stride + x0 * 4;
            self.data[dst_at..dst_at + copy_w * 4].copy_from_slice(src);
        }
        Ok(())
    }
}

/// Source of the overlay drawn on top of every frame.
pub trait OverlayProvider: Send {
    /// Output frame size. Called before `provide`.
    fn set_dimensions(&mut self, width: u32, height: u32) -> VidmarkResult<()>;

    /// Render the overlay for the current dimensions.
    fn provide(&mut self) -> VidmarkResult<OverlayTexture>;
}

/// Where overlay content sits inside the frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Placement {
    /// Stretched over the whole frame.
    #[default]
    Fill,
    /// Centered.
    Center,
    /// Top-left corner.
    TopLeft,
    /// Top-right corner.
    TopRight,
    /// Bottom-left corner.
    BottomLeft,
    /// Bottom-right corner.
    BottomRight,
}

impl Placement {
    /// Names accepted by [`Placement::from_str`].
    pub const NAMES: [&'static str; 6] = [
        "fill",
        "center",
        "top-left",
        "top-right",
        "bottom-left",
        "bottom-right",
    ];
}

impl FromStr for Placement {
    type Err = VidmarkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "fill" => Self::Fill,
            "center" => Self::Center,
            "top-left" => Self::TopLeft,
            "top-right" => Self::TopRight,
            "bottom-left" => Self::BottomLeft,
            "bottom-right" => Self::BottomRight,
            other => {
                return Err(VidmarkError::validation(format!(
                    "unknown placement '{other}' (expected one of {})",
                    Self::NAMES.join(", ")
                )));
            }
        })
    }
}

/// Pixel rectangle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rect {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width.
    pub width: u32,
    /// Height.
    pub height: u32,
}

/// Placement, margin and size of overlay content.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Layout {
    /// Anchor of the content.
    pub placement: Placement,
    /// Distance to the frame edges in pixels (ignored by [`Placement::Fill`]).
    pub margin: u32,
    /// Content width as a fraction of the frame width (ignored by [`Placement::Fill`]).
    pub scale: f32,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            placement: Placement::Fill,
            margin: 16,
            scale: 0.25,
        }
    }
}

impl Layout {
    /// Check ranges.
    pub fn validate(&self) -> VidmarkResult<()> {
        if !self.scale.is_finite() || self.scale <= 0.0 || self.scale > 1.0 {
            return Err(VidmarkError::validation(format!(
                "overlay scale must be in (0, 1], got {}",
                self.scale
            )));
        }
        Ok(())
    }

    /// Target rectangle of `content_w x content_h` content in a `frame_w x frame_h` frame.
    ///
    /// Corner and center placements keep the content's aspect ratio and shrink it to fit inside
    /// the margins.
    pub fn rect(&self, frame_w: u32, frame_h: u32, content_w: u32, content_h: u32) -> Rect {
        if self.placement == Placement::Fill || content_w == 0 || content_h == 0 {
            return Rect {
                x: 0,
                y: 0,
                width: frame_w,
                height: frame_h,
            };
        }
        let avail_w = frame_w.saturating_sub(2 * self.margin).max(1) as f64;
        let avail_h = frame_h.saturating_sub(2 * self.margin).max(1) as f64;
        let aspect = content_h as f64 / content_w as f64;
        let mut w = (frame_w as f64 * f64::from(self.scale)).min(avail_w);
        let mut h = w * aspect;
        if h > avail_h {
            h = avail_h;
            w = h / aspect;
        }
        let width = (w.round() as u32).max(1);
        let height = (h.round() as u32).max(1);

        let left = self.margin.min(frame_w.saturating_sub(width));
        let right = frame_w.saturating_sub(width + self.margin);
        let top = self.margin.min(frame_h.saturating_sub(height));
        let bottom = frame_h.saturating_sub(height + self.margin);
        let (x, y) = match self.placement {
            Placement::TopLeft => (left, top),
            Placement::TopRight => (right, top),
            Placement::BottomLeft => (left, bottom),
            Placement::BottomRight => (right, bottom),
            Placement::Center | Placement::Fill => (
                (frame_w.saturating_sub(width)) / 2,
                (frame_h.saturating_sub(height)) / 2,
            ),
        };
        Rect {
            x,
            y,
            width,
            height,
        }
    }
}

/// Overlay that draws nothing.
#[derive(Clone, Debug, Default)]
pub struct TransparentOverlay {
    dims: Option<(u32, u32)>,
}

impl TransparentOverlay {
    /// Create the provider.
    pub fn new() -> Self {
        Self::default()
    }
}

impl OverlayProvider for TransparentOverlay {
    fn set_dimensions(&mut self, width: u32, height: u32) -> VidmarkResult<()> {
        frame_len(width, height)?;
        self.dims = Some((width, height));
        Ok(())
    }

    fn provide(&mut self) -> VidmarkResult<OverlayTexture> {
        let (width, height) = self
            .dims
            .ok_or_else(|| VidmarkError::configuration("overlay dimensions not set"))?;
        let mut texture = OverlayTexture::transparent(width, height)?;
        texture.opacity = 0.0;
        Ok(texture)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/overlay/provider.rs"]
mod tests;
