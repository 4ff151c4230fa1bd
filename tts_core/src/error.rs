//! Error types shared by every worker component.

use thiserror::Error;

/// Result type alias using [`TtsError`].
pub type Result<T> = std::result::Result<T, TtsError>;

/// Failures raised while serving a request.
///
/// Messages are sent back to the caller verbatim, so variants that carry a
/// string display it unprefixed.
#[derive(Debug, Error)]
pub enum TtsError {
    /// Missing or malformed request parameter, unknown model id.
    #[error("{0}")]
    InvalidInput(String),

    /// Referenced model, voice or audio file is not on disk.
    #[error("{0}")]
    NotFound(String),

    /// The external conversion utility is missing or exited with an error.
    #[error("Could not convert audio. Is ffmpeg installed? ({0})")]
    ConversionFailed(String),

    #[error("No model loaded. Call load_model first.")]
    NoModelLoaded,

    #[error("Generation produced no audio file")]
    NoAudioProduced,

    /// `load_model` was called before an engine was attached.
    #[error("No inference engine attached to this worker")]
    EngineUnavailable,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Audio(#[from] hound::Error),

    /// Opaque failure reported by the inference engine.
    #[error("{0:#}")]
    Engine(#[from] anyhow::Error),
}

impl TtsError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        TtsError::InvalidInput(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        TtsError::NotFound(msg.into())
    }
}
