//! Software render context and the window surface bound to an encoder's input surface.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::ThreadId;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::foundation::error::{VidmarkError, VidmarkResult};
use crate::render::surface::{InputSurface, VideoFrame, frame_len};

/// Rendering state that can be current on at most one thread at a time.
#[derive(Debug)]
pub struct RenderContext {
    pool: rayon::ThreadPool,
    /// Owning thread and the number of live guards it holds.
    owner: Mutex<Option<(ThreadId, usize)>>,
    released: AtomicBool,
}

impl RenderContext {
    /// Create a context whose draws use `threads` rayon workers (`None` for rayon's default).
    pub fn new(threads: Option<usize>) -> VidmarkResult<Self> {
        Ok(Self {
            pool: build_thread_pool(threads)?,
            owner: Mutex::new(None),
            released: AtomicBool::new(false),
        })
    }

    /// Bind the context to the calling thread until the guard drops.
    ///
    /// Nested calls on the owning thread are allowed; the context stays bound until the
    /// outermost guard drops.
    pub fn make_current(&self) -> VidmarkResult<CurrentContext<'_>> {
        if self.released.load(Ordering::Acquire) {
            return Err(VidmarkError::configuration("render context is released"));
        }
        let me = std::thread::current().id();
        let mut owner = self.owner.lock();
        match owner.as_mut() {
            Some((thread, _)) if *thread != me => Err(VidmarkError::configuration(
                "render context is current on another thread",
            )),
            Some((_, depth)) => {
                *depth += 1;
                Ok(CurrentContext { context: self })
            }
            None => {
                *owner = Some((me, 1));
                Ok(CurrentContext { context: self })
            }
        }
    }

    /// `true` while some thread holds the context.
    pub fn is_current_anywhere(&self) -> bool {
        self.owner.lock().is_some()
    }

    /// Refuse further `make_current` calls. Idempotent.
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            tracing::debug!("render context released");
        }
    }
}

/// Proof that the render context is current on this thread.
#[derive(Debug)]
pub struct CurrentContext<'a> {
    context: &'a RenderContext,
}

impl CurrentContext<'_> {
    /// Run `op` on the context's worker pool.
    pub fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        self.context.pool.install(op)
    }
}

impl Drop for CurrentContext<'_> {
    fn drop(&mut self) {
        let mut owner = self.context.owner.lock();
        if let Some((_, depth)) = owner.as_mut() {
            *depth -= 1;
            if *depth == 0 {
                *owner = None;
            }
        }
    }
}

fn build_thread_pool(threads: Option<usize>) -> VidmarkResult<rayon::ThreadPool> {
    if let Some(n) = threads
        && n == 0
    {
        return Err(VidmarkError::validation(
            "render threads must be >= 1 when set",
        ));
    }

    let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("vidmark-render-{i}"));
    if let Some(n) = threads {
        builder = builder.num_threads(n);
    }
    builder
        .build()
        .map_err(|e| VidmarkError::io(format!("failed to build rayon thread pool: {e}")))
}

/// Back buffer whose swaps feed an encoder's [`InputSurface`].
#[derive(Debug)]
pub struct WindowSurface {
    input: InputSurface,
    back: Vec<u8>,
    pts_us: i64,
    swapped: u64,
    released: bool,
}

impl WindowSurface {
    /// Bind a back buffer sized like `input`.
    pub fn new(input: InputSurface) -> VidmarkResult<Self> {
        let len = frame_len(input.width(), input.height())?;
        Ok(Self {
            input,
            back: vec![0; len],
            pts_us: 0,
            swapped: 0,
            released: false,
        })
    }

    /// Surface width.
    pub fn width(&self) -> u32 {
        self.input.width()
    }

    /// Surface height.
    pub fn height(&self) -> u32 {
        self.input.height()
    }

    /// Pixels of the next frame (straight RGBA8, rows top to bottom).
    pub fn back_buffer_mut(&mut self) -> &mut [u8] {
        &mut self.back
    }

    /// Presentation time given to the next swapped frame.
    pub fn set_presentation_time(&mut self, pts_us: i64) {
        self.pts_us = pts_us;
    }

    /// Frames swapped so far.
    pub fn swapped(&self) -> u64 {
        self.swapped
    }

    /// Hand the back buffer to the encoder. Blocks while the encoder's queue is full.
    pub fn swap_buffers(&mut self, _current: &CurrentContext<'_>) -> VidmarkResult<()> {
        if self.released {
            return Err(VidmarkError::codec("window surface is released"));
        }
        let frame = VideoFrame::new(
            self.width(),
            self.height(),
            Bytes::copy_from_slice(&self.back),
            self.pts_us,
        )?;
        self.input.submit_frame(frame)?;
        self.swapped += 1;
        Ok(())
    }

    /// Tell the encoder no more frames follow.
    pub fn signal_end_of_stream(&self) -> VidmarkResult<()> {
        self.input.signal_end_of_stream()
    }

    /// Drop the back buffer. Idempotent.
    pub fn release(&mut self) {
        self.released = true;
        self.back = Vec::new();
    }
}

#[cfg(test)]
#[path = "../../tests/unit/render/context.rs"]
mod tests;
