use std::sync::Arc;

/// Result alias that carries the custom [`VizError`] type.
pub type Result<T> = std::result::Result<T, VizError>;

/// Injectable sink for errors that are recovered from rather than returned.
pub type ErrorReporter = Arc<dyn Fn(&VizError) + Send + Sync>;

/// Reporter that forwards to `tracing` at warn level.
pub fn log_reporter() -> ErrorReporter {
    Arc::new(|err: &VizError| tracing::warn!(error = %err, "recovered error"))
}

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum VizError {
    /// Invalid construction-time settings (FFT size, window, backend,
    /// buffer capacity, frame rate). Raised before anything starts running.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The show definition could not be read, parsed or resolved.
    #[error("scene load failed: {0}")]
    SceneLoad(String),
    /// Capture or decoding failure. The broadcaster recovers from these by
    /// substituting silence.
    #[error("audio source error: {0}")]
    AudioSource(String),
    /// Something failed while building one frame.
    #[error("frame build failed during {stage}: {message}")]
    FrameBuild {
        stage: &'static str,
        message: String,
    },
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl VizError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn scene_load<T: Into<String>>(msg: T) -> Self {
        Self::SceneLoad(msg.into())
    }

    pub fn audio_source<T: Into<String>>(msg: T) -> Self {
        Self::AudioSource(msg.into())
    }

    pub fn frame_build(stage: &'static str, error: impl std::fmt::Display) -> Self {
        Self::FrameBuild {
            stage,
            message: error.to_string(),
        }
    }
}

impl From<&str> for VizError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for VizError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_build_errors_carry_their_stage() {
        let err = VizError::frame_build("serialize", "bad float");
        assert_eq!(err.to_string(), "frame build failed during serialize: bad float");
    }

    #[test]
    fn plain_strings_become_messages() {
        let err: VizError = "boom".into();
        assert!(matches!(err, VizError::Message(ref m) if m == "boom"));
    }
}
