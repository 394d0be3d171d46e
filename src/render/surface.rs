//! Frame handoff surfaces.
//!
//! [`OutputSurface`] sits between a decoder and the compositor: the decoder posts one frame,
//! the compositor consumes it and acknowledges, and only then may the decoder post the next.
//! [`InputSurface`] sits between the compositor and a surface-input encoder: swapped frames and
//! the end-of-stream marker travel on one bounded channel, so their order is preserved.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;

use crate::foundation::error::{VidmarkError, VidmarkResult};
use crate::foundation::math::Mat4;

/// Decoded RGBA8 frame (straight alpha, rows top to bottom).
#[derive(Clone, Debug, PartialEq)]
pub struct VideoFrame {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// `width * height * 4` bytes.
    pub data: Bytes,
    /// Presentation time in microseconds.
    pub pts_us: i64,
}

impl VideoFrame {
    /// Wrap `data`, checking its length against the dimensions.
    pub fn new(width: u32, height: u32, data: impl Into<Bytes>, pts_us: i64) -> VidmarkResult<Self> {
        let data = data.into();
        let expected = frame_len(width, height)?;
        if data.len() != expected {
            return Err(VidmarkError::validation(format!(
                "frame data is {} bytes, expected {expected} for {width}x{height} rgba",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
            pts_us,
        })
    }
}

/// Byte length of an RGBA8 frame.
pub fn frame_len(width: u32, height: u32) -> VidmarkResult<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(4))
        .filter(|v| *v > 0)
        .ok_or_else(|| VidmarkError::validation(format!("invalid frame size {width}x{height}")))
}

/// Frame handed to the compositor together with its texture transform.
#[derive(Clone, Debug)]
pub struct FrameAvailable {
    /// The decoded frame.
    pub frame: VideoFrame,
    /// Texture-coordinate transform to apply when sampling the frame.
    pub transform: Mat4,
}

type FrameListener = Arc<dyn Fn() + Send + Sync>;

struct OutputSurfaceInner {
    slot_tx: Sender<FrameAvailable>,
    slot_rx: Receiver<FrameAvailable>,
    ack_tx: Sender<()>,
    ack_rx: Receiver<()>,
    listener: Mutex<Option<FrameListener>>,
    transform: Mutex<Mat4>,
    released: AtomicBool,
}

/// Decoder-side surface with a one-slot frame handoff.
#[derive(Clone)]
pub struct OutputSurface {
    inner: Arc<OutputSurfaceInner>,
}

impl std::fmt::Debug for OutputSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputSurface")
            .field("pending", &self.inner.slot_rx.len())
            .field("released", &self.inner.released.load(Ordering::Acquire))
            .finish()
    }
}

impl Default for OutputSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputSurface {
    /// Create an empty surface with an identity transform.
    pub fn new() -> Self {
        let (slot_tx, slot_rx) = crossbeam_channel::bounded(1);
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        Self {
            inner: Arc::new(OutputSurfaceInner {
                slot_tx,
                slot_rx,
                ack_tx,
                ack_rx,
                listener: Mutex::new(None),
                transform: Mutex::new(Mat4::IDENTITY),
                released: AtomicBool::new(false),
            }),
        }
    }

    /// Transform reported with every subsequent frame.
    pub fn set_transform(&self, transform: Mat4) {
        *self.inner.transform.lock() = transform;
    }

    /// Register the frame-available notification. Runs on the posting thread.
    pub fn set_on_frame_available(&self, listener: impl Fn() + Send + Sync + 'static) {
        *self.inner.listener.lock() = Some(Arc::new(listener));
    }

    /// Post a decoded frame. Fails if the previous frame has not been consumed.
    pub fn post_frame(&self, frame: VideoFrame) -> VidmarkResult<()> {
        if self.inner.released.load(Ordering::Acquire) {
            return Err(VidmarkError::codec("output surface is released"));
        }
        let transform = *self.inner.transform.lock();
        match self
            .inner
            .slot_tx
            .try_send(FrameAvailable { frame, transform })
        {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                return Err(VidmarkError::codec(
                    "output surface still holds an unconsumed frame",
                ));
            }
            Err(TrySendError::Disconnected(_)) => {
                return Err(VidmarkError::codec("output surface is disconnected"));
            }
        }
        let listener = self.inner.listener.lock().clone();
        if let Some(listener) = listener {
            listener();
        }
        Ok(())
    }

    /// Take the pending frame, if any.
    pub fn update_tex_image(&self) -> Option<FrameAvailable> {
        self.inner.slot_rx.try_recv().ok()
    }

    /// Acknowledge that the last taken frame has been fully consumed.
    pub fn release_frame(&self) {
        let _ = self.inner.ack_tx.try_send(());
    }

    /// Wait up to `timeout` for the consumer's acknowledgement.
    pub fn wait_frame_released(&self, timeout: Duration) -> bool {
        self.inner.ack_rx.recv_timeout(timeout).is_ok()
    }

    /// Drop any pending frame and the listener. Later posts fail. Idempotent.
    pub fn release(&self) {
        if self.inner.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.listener.lock().take();
        while self.inner.slot_rx.try_recv().is_ok() {}
        // Unblock a producer waiting for the ack of a frame nobody will draw.
        let _ = self.inner.ack_tx.try_send(());
    }

    /// `true` after [`OutputSurface::release`].
    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }
}

/// Message carried from the compositor to a surface-input encoder.
#[derive(Clone, Debug, PartialEq)]
pub enum SurfaceMessage {
    /// A swapped frame.
    Frame(VideoFrame),
    /// No more frames will follow.
    EndOfStream,
}

/// Encoder-side surface: the producer end of the encoder's frame queue.
#[derive(Clone, Debug)]
pub struct InputSurface {
    tx: Sender<SurfaceMessage>,
    width: u32,
    height: u32,
    eos_sent: Arc<AtomicBool>,
}

impl InputSurface {
    /// Create a surface of `width x height` with room for `capacity` queued frames.
    ///
    /// The receiver belongs to the encoder; once it is dropped every send fails.
    pub fn new(width: u32, height: u32, capacity: usize) -> (Self, Receiver<SurfaceMessage>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        (
            Self {
                tx,
                width,
                height,
                eos_sent: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    /// Surface width.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Surface height.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Queue a frame, blocking while the encoder's queue is full.
    pub fn submit_frame(&self, frame: VideoFrame) -> VidmarkResult<()> {
        if self.eos_sent.load(Ordering::Acquire) {
            return Err(VidmarkError::codec(
                "frame submitted after end of stream was signalled",
            ));
        }
        if frame.width != self.width || frame.height != self.height {
            return Err(VidmarkError::validation(format!(
                "frame is {}x{}, surface is {}x{}",
                frame.width, frame.height, self.width, self.height
            )));
        }
        self.tx
            .send(SurfaceMessage::Frame(frame))
            .map_err(|_| VidmarkError::codec("encoder input surface is disconnected"))
    }

    /// Queue the end-of-stream marker behind every frame already submitted. Idempotent.
    pub fn signal_end_of_stream(&self) -> VidmarkResult<()> {
        if self.eos_sent.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.tx
            .send(SurfaceMessage::EndOfStream)
            .map_err(|_| VidmarkError::codec("encoder input surface is disconnected"))
    }
}

#[cfg(test)]
#[path = "../../tests/unit/render/surface.rs"]
mod tests;
