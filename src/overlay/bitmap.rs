use std::path::Path;

use anyhow::Context as _;
use image::RgbaImage;
use image::imageops::FilterType;

use crate::foundation::error::{VidmarkError, VidmarkResult};
use crate::overlay::provider::{Layout, OverlayProvider, OverlayTexture};

/// Overlay from a raster image (PNG, JPEG, anything `image` decodes).
#[derive(Clone, Debug)]
pub struct ImageOverlay {
    image: RgbaImage,
    layout: Layout,
    opacity: f32,
    dims: Option<(u32, u32)>,
}

impl ImageOverlay {
    /// Decode the image at `path`.
    pub fn open(path: &Path, layout: Layout, opacity: f32) -> VidmarkResult<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("read overlay image '{}'", path.display()))?;
        let image = image::load_from_memory(&bytes)
            .with_context(|| format!("decode overlay image '{}'", path.display()))?
            .to_rgba8();
        Self::from_rgba(image, layout, opacity)
    }

    /// Use already decoded pixels.
    pub fn from_rgba(image: RgbaImage, layout: Layout, opacity: f32) -> VidmarkResult<Self> {
        layout.validate()?;
        if image.width() == 0 || image.height() == 0 {
            return Err(VidmarkError::validation("overlay image is empty"));
        }
        tracing::debug!(width = image.width(), height = image.height(), ?layout, "overlay image loaded");
        Ok(Self {
            image,
            layout,
            opacity: opacity.clamp(0.0, 1.0),
            dims: None,
        })
    }
}

impl OverlayProvider for ImageOverlay {
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
        let rect = self
            .layout
            .rect(width, height, self.image.width(), self.image.height());
        let scaled = if (rect.width, rect.height) == self.image.dimensions() {
            self.image.clone()
        } else {
            image::imageops::resize(&self.image, rect.width, rect.height, FilterType::Triangle)
        };
        texture.blit(rect, scaled.as_raw())?;
        Ok(texture)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/overlay/bitmap.rs"]
mod tests;
