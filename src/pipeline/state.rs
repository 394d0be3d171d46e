//! Pipeline lifecycle and the terminal result of a run.

use std::path::PathBuf;

use crate::foundation::core::Rotation;
use crate::foundation::error::{VidmarkError, VidmarkResult};

/// Orchestrator lifecycle. Moves forward one step at a time; any state may jump to `Released`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Nothing inspected yet.
    Unconfigured,
    /// Input inspected and demux sources opened.
    SourcesReady,
    /// Multiplexer and codec stages created.
    TracksNegotiating,
    /// Every stage started.
    Running,
    /// The primary path finished encoding.
    Draining,
    /// The container was finalized.
    Finalized,
    /// Every resource released. Terminal.
    Released,
}

impl PipelineState {
    /// The state following `self` on the success path.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Unconfigured => Some(Self::SourcesReady),
            Self::SourcesReady => Some(Self::TracksNegotiating),
            Self::TracksNegotiating => Some(Self::Running),
            Self::Running => Some(Self::Draining),
            Self::Draining => Some(Self::Finalized),
            Self::Finalized => Some(Self::Released),
            Self::Released => None,
        }
    }

    /// `true` when `to` is a legal transition from `self`.
    pub fn can_move_to(self, to: Self) -> bool {
        self.next() == Some(to) || (to == Self::Released && self != Self::Released)
    }
}

/// Tracks the current [`PipelineState`] and reports each transition.
pub(crate) struct StateTracker {
    state: PipelineState,
    observer: Option<Box<dyn Fn(PipelineState) + Send>>,
}

impl std::fmt::Debug for StateTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateTracker")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl StateTracker {
    pub(crate) fn new(observer: Option<Box<dyn Fn(PipelineState) + Send>>) -> Self {
        Self {
            state: PipelineState::Unconfigured,
            observer,
        }
    }

    pub(crate) fn state(&self) -> PipelineState {
        self.state
    }

    pub(crate) fn advance(&mut self, to: PipelineState) -> VidmarkResult<()> {
        if !self.state.can_move_to(to) {
            return Err(VidmarkError::configuration(format!(
                "illegal pipeline transition {:?} -> {to:?}",
                self.state
            )));
        }
        tracing::debug!(from = ?self.state, to = ?to, "pipeline state");
        self.state = to;
        if let Some(observer) = &self.observer {
            observer(to);
        }
        Ok(())
    }
}

/// Summary of a successful run.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct TranscodeReport {
    /// Output file, when the target has a filesystem location.
    pub output: Option<PathBuf>,
    /// Frames drawn by the compositor.
    pub frames_rendered: u64,
    /// Encoded video samples written.
    pub video_samples: u64,
    /// Encoded audio samples written.
    pub audio_samples: u64,
    /// Span between the first and last written sample, in microseconds.
    pub duration_us: i64,
    /// Wall-clock run time in milliseconds.
    pub elapsed_ms: u64,
    /// Display rotation carried over from the source.
    pub rotation: Rotation,
}

/// Terminal result of a run.
#[derive(Debug)]
pub enum PipelineOutcome {
    /// The output is complete.
    Success(TranscodeReport),
    /// The input could not be read; nothing was allocated or written.
    SourceError(VidmarkError),
    /// A stage failed; the partial output was removed.
    ProcessingError(VidmarkError),
}

impl PipelineOutcome {
    /// Classify a failed run.
    pub fn from_error(error: VidmarkError) -> Self {
        if error.is_source_error() {
            Self::SourceError(error)
        } else {
            Self::ProcessingError(error)
        }
    }

    /// `true` for [`PipelineOutcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// The report, or the error of a failed run.
    pub fn into_result(self) -> VidmarkResult<TranscodeReport> {
        match self {
            Self::Success(report) => Ok(report),
            Self::SourceError(e) | Self::ProcessingError(e) => Err(e),
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/pipeline/state.rs"]
mod tests;
