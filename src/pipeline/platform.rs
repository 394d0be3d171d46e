//! Host services a run reaches through an explicit handle.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;

use crate::codec::driver::CodecFactory;
use crate::codec::ffmpeg::FfmpegCodecFactory;
use crate::codec::soft::SoftCodecFactory;
use crate::foundation::error::VidmarkResult;
use crate::pipeline::config::CodecBackend;

/// Codec creation and media-index notification.
pub trait PlatformServices: Send + Sync {
    /// Factory for `backend`'s codecs.
    fn codec_factory(&self, backend: CodecBackend) -> Arc<dyn CodecFactory>;

    /// Tell the media index that `path` is complete.
    fn announce_output(&self, path: &Path) -> VidmarkResult<()>;
}

/// Local host: built-in codec backends and an optional JSON-lines media index.
#[derive(Clone, Debug, Default)]
pub struct LocalPlatform {
    media_index: Option<PathBuf>,
}

impl LocalPlatform {
    /// Platform appending announcements to `media_index` when set.
    pub fn new(media_index: Option<PathBuf>) -> Self {
        Self { media_index }
    }
}

#[derive(serde::Serialize)]
struct IndexEntry<'a> {
    path: &'a Path,
    announced_at: String,
}

impl PlatformServices for LocalPlatform {
    fn codec_factory(&self, backend: CodecBackend) -> Arc<dyn CodecFactory> {
        match backend {
            CodecBackend::Ffmpeg => Arc::new(FfmpegCodecFactory::new()),
            CodecBackend::Soft => Arc::new(SoftCodecFactory::new()),
        }
    }

    fn announce_output(&self, path: &Path) -> VidmarkResult<()> {
        tracing::info!(path = %path.display(), "output announced");
        let Some(index) = &self.media_index else {
            return Ok(());
        };
        let entry = IndexEntry {
            path,
            announced_at: chrono::Local::now().to_rfc3339(),
        };
        let mut line = serde_json::to_string(&entry).context("serialize media index entry")?;
        line.push('\n');
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(index)
            .with_context(|| format!("open media index '{}'", index.display()))?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/pipeline/platform.rs"]
mod tests;
