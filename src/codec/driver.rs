use std::time::Duration;

use crate::foundation::error::VidmarkResult;
use crate::media::format::CodecFormat;
use crate::media::sample::SampleFlags;
use crate::render::surface::{InputSurface, OutputSurface};

/// Metadata of a dequeued output buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferInfo {
    /// Start of valid data inside the buffer.
    pub offset: usize,
    /// Length of valid data.
    pub size: usize,
    /// Presentation time in microseconds.
    pub pts_us: i64,
    /// Buffer flags.
    pub flags: SampleFlags,
}

/// Result of [`CodecDriver::dequeue_output_buffer`].
#[derive(Clone, Debug, PartialEq)]
pub enum OutputEvent {
    /// Nothing available within the timeout.
    TryAgainLater,
    /// The output format changed (or became known).
    FormatChanged(CodecFormat),
    /// An output buffer is ready; it must be released with
    /// [`CodecDriver::release_output_buffer`].
    Buffer {
        /// Buffer index.
        index: usize,
        /// Buffer metadata.
        info: BufferInfo,
    },
}

/// One encoder or decoder instance with an index-based buffer exchange.
///
/// Drivers are used from one thread at a time and never shared.
pub trait CodecDriver: Send {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Apply `format`. Decoders rendering to a surface receive it here.
    fn configure(&mut self, format: &CodecFormat, surface: Option<OutputSurface>)
    -> VidmarkResult<()>;

    /// Create the surface frames are fed through (surface-input encoders only).
    fn create_input_surface(&mut self) -> VidmarkResult<InputSurface>;

    /// Begin processing.
    fn start(&mut self) -> VidmarkResult<()>;

    /// Claim a free input buffer index.
    fn dequeue_input_buffer(&mut self, timeout: Duration) -> VidmarkResult<Option<usize>>;

    /// Fill and submit a claimed input buffer.
    fn queue_input_buffer(
        &mut self,
        index: usize,
        payload: &[u8],
        pts_us: i64,
        flags: SampleFlags,
    ) -> VidmarkResult<()>;

    /// Wait up to `timeout` for output.
    fn dequeue_output_buffer(&mut self, timeout: Duration) -> VidmarkResult<OutputEvent>;

    /// Bytes of a dequeued output buffer.
    fn output_buffer(&self, index: usize) -> Option<&[u8]>;

    /// Return an output buffer; `render` forwards a decoded frame to the configured surface.
    fn release_output_buffer(&mut self, index: usize, render: bool) -> VidmarkResult<()>;

    /// Stop processing; buffers are discarded.
    fn stop(&mut self) -> VidmarkResult<()>;

    /// Free every resource. Must be safe to call more than once.
    fn release(&mut self);
}

/// Creates codec drivers by mime type.
pub trait CodecFactory: Send + Sync {
    /// Backend name used in logs.
    fn name(&self) -> &str;

    /// Decoder for `mime`, or a configuration error when unsupported.
    fn create_decoder(&self, mime: &str) -> VidmarkResult<Box<dyn CodecDriver>>;

    /// Encoder for `mime`, or a configuration error when unsupported.
    fn create_encoder(&self, mime: &str) -> VidmarkResult<Box<dyn CodecDriver>>;
}
