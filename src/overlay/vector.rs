use std::path::Path;

use anyhow::Context as _;

use crate::foundation::error::{VidmarkError, VidmarkResult};
use crate::overlay::provider::{Layout, OverlayProvider, OverlayTexture};
use crate::render::blend::unpremultiply_in_place;

/// Overlay from an SVG document, rasterized at the placed size.
pub struct SvgOverlay {
    tree: usvg::Tree,
    layout: Layout,
    opacity: f32,
    dims: Option<(u32, u32)>,
}

impl std::fmt::Debug for SvgOverlay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let size = self.tree.size();
        f.debug_struct("SvgOverlay")
            .field("size", &(size.width(), size.height()))
            .field("layout", &self.layout)
            .field("opacity", &self.opacity)
            .field("dims", &self.dims)
            .finish()
    }
}

impl SvgOverlay {
    /// Parse the SVG at `path`.
    pub fn open(path: &Path, layout: Layout, opacity: f32) -> VidmarkResult<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("read overlay svg '{}'", path.display()))?;
        Self::from_data(&bytes, layout, opacity)
    }

    /// Parse SVG source bytes.
    pub fn from_data(bytes: &[u8], layout: Layout, opacity: f32) -> VidmarkResult<Self> {
        layout.validate()?;
        let opts = usvg::Options::default();
        let tree = usvg::Tree::from_data(bytes, &opts).context("parse svg tree")?;
        let size = tree.size();
        if !(size.width().is_finite() && size.height().is_finite())
            || size.width() <= 0.0
            || size.height() <= 0.0
        {
            return Err(VidmarkError::validation("svg has invalid width/height"));
        }
        Ok(Self {
            tree,
            layout,
            opacity: opacity.clamp(0.0, 1.0),
            dims: None,
        })
    }

    fn rasterize(&self, width: u32, height: u32) -> VidmarkResult<Vec<u8>> {
        let mut pixmap = resvg::tiny_skia::Pixmap::new(width, height)
            .ok_or_else(|| VidmarkError::validation("failed to allocate svg pixmap"))?;
        let sx = (width as f32) / self.tree.size().width();
        let sy = (height as f32) / self.tree.size().height();
        let xform = resvg::tiny_skia::Transform::from_scale(sx, sy);
        resvg::render(&self.tree, xform, &mut pixmap.as_mut());
        let mut data = pixmap.take();
        unpremultiply_in_place(&mut data);
        Ok(data)
    }
}

impl OverlayProvider for SvgOverlay {
    fn set_dimensions(&mut self, width: u32, height: u32) -> VidmarkResult<()> {
        self.dims = Some((width, height));
        Ok(())
    }

    fn provide(&mut self) -> VidmarkResult<OverlayTexture> {
        let (width, height) = self
            .dims
            .ok_or_else(|| VidmarkError::configuration("overlay dimensions not set"))?;
        let mut texture = OverlayTexture::transparent(width, height)?;
        texture.opacity = self.opacity;
        let size = self.tree.size();
        let content_w = size.width().ceil().max(1.0) as u32;
        let content_h = size.height().ceil().max(1.0) as u32;
        let rect = self.layout.rect(width, height, content_w, content_h);
        let pixels = self.rasterize(rect.width, rect.height)?;
        texture.blit(rect, &pixels)?;
        tracing::debug!(?rect, "svg overlay rasterized");
        Ok(texture)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/overlay/vector.rs"]
mod tests;
