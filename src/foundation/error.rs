/// Result alias used across the crate.
pub type VidmarkResult<T> = Result<T, VidmarkError>;

/// Error taxonomy of the transcoding pipeline.
#[derive(thiserror::Error, Debug)]
pub enum VidmarkError {
    /// A codec, track or container rejected its configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The input is unreadable or carries no usable stream.
    #[error("source error: {0}")]
    Source(String),

    /// A codec failed while exchanging buffers.
    #[error("codec runtime error: {0}")]
    CodecRuntime(String),

    /// Reading or writing a file or pipe failed.
    #[error("io error: {0}")]
    Io(String),

    /// A caller-supplied value is out of range.
    #[error("validation error: {0}")]
    Validation(String),

    /// Any other failure, with its source chain preserved.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coarse class of a [`VidmarkError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// See [`VidmarkError::Configuration`].
    Configuration,
    /// See [`VidmarkError::Source`].
    Source,
    /// See [`VidmarkError::CodecRuntime`].
    CodecRuntime,
    /// See [`VidmarkError::Io`].
    Io,
    /// See [`VidmarkError::Validation`].
    Validation,
    /// See [`VidmarkError::Other`].
    Other,
}

impl VidmarkError {
    /// Build a [`VidmarkError::Configuration`].
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Build a [`VidmarkError::Source`].
    pub fn source_error(msg: impl Into<String>) -> Self {
        Self::Source(msg.into())
    }

    /// Build a [`VidmarkError::CodecRuntime`].
    pub fn codec(msg: impl Into<String>) -> Self {
        Self::CodecRuntime(msg.into())
    }

    /// Build a [`VidmarkError::Io`].
    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    /// Build a [`VidmarkError::Validation`].
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Source(_) => ErrorKind::Source,
            Self::CodecRuntime(_) => ErrorKind::CodecRuntime,
            Self::Io(_) => ErrorKind::Io,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Other(_) => ErrorKind::Other,
        }
    }

    /// `true` when the failure happened before any pipeline resource was allocated.
    pub fn is_source_error(&self) -> bool {
        self.kind() == ErrorKind::Source
    }

    /// Copy of the error with the same kind and message, for reporting one failure twice.
    pub(crate) fn duplicate(&self) -> Self {
        match self {
            Self::Configuration(m) => Self::Configuration(m.clone()),
            Self::Source(m) => Self::Source(m.clone()),
            Self::CodecRuntime(m) => Self::CodecRuntime(m.clone()),
            Self::Io(m) => Self::Io(m.clone()),
            Self::Validation(m) => Self::Validation(m.clone()),
            Self::Other(e) => Self::Other(anyhow::anyhow!("{e:#}")),
        }
    }

    /// Re-tag the error as a source error, keeping its message.
    pub fn into_source(self) -> Self {
        match self {
            Self::Source(_) => self,
            other => Self::Source(other.to_string()),
        }
    }
}

impl From<std::io::Error> for VidmarkError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
