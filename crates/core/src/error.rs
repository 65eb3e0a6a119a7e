/// Result alias that carries the custom [`AudioCoreError`] type.
pub type Result<T> = std::result::Result<T, AudioCoreError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum AudioCoreError {
    /// The audio clock could not be created or resumed. Usually the host has
    /// not granted audio yet (no user gesture); callers should offer a retry.
    #[error("audio unavailable: {0}")]
    AudioUnavailable(String),
    /// Anything that went wrong inside an encode job.
    #[error("encode failed: {0}")]
    EncodeFailure(String),
    /// A caller supplied a value outside the documented range.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("wav: {0}")]
    Wav(#[from] hound::Error),
    #[error("{0}")]
    Message(String),
}

impl AudioCoreError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn audio_unavailable<T: Into<String>>(reason: T) -> Self {
        Self::AudioUnavailable(reason.into())
    }

    pub fn encode_failure<T: Into<String>>(reason: T) -> Self {
        Self::EncodeFailure(reason.into())
    }

    /// True for failures the caller can retry after a user interaction.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::AudioUnavailable(_))
    }
}

impl From<&str> for AudioCoreError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for AudioCoreError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
