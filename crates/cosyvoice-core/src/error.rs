//! Error types for the streaming speech pipeline

use thiserror::Error;

/// Every failure the pipeline can report.
///
/// All stream-level variants are terminal for the current utterance. The
/// type is `Clone` so it can ride inside [`StreamEvent::Error`] and the
/// published [`PlaybackStatus`].
///
/// [`StreamEvent::Error`]: crate::audio::StreamEvent::Error
/// [`PlaybackStatus`]: crate::status::PlaybackStatus
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Synthesis request timed out")]
    Timeout,

    #[error("Synthesis server rejected the request with status {0}")]
    ServerRejected(u16),

    #[error("Network failure: {0}")]
    NetworkFailure(String),

    #[error("Stream cancelled")]
    Cancelled,

    #[error("Audio device initialization failed: {0}")]
    DeviceInitFailure(String),

    #[error("Audio device write failed: {0}")]
    DeviceWriteFailure(String),

    #[error("Invalid synthesis request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the failure came from the output device rather than the network.
    pub fn is_device_error(&self) -> bool {
        matches!(
            self,
            Error::DeviceInitFailure(_) | Error::DeviceWriteFailure(_)
        )
    }

    /// Short description suitable for a status line.
    pub fn user_message(&self) -> String {
        match self {
            Error::Timeout => "The voice server did not respond in time.".to_string(),
            Error::ServerRejected(code) => format!("The voice server refused the request ({}).", code),
            Error::NetworkFailure(_) => "The connection to the voice server was lost.".to_string(),
            Error::Cancelled => "Playback was cancelled.".to_string(),
            Error::DeviceInitFailure(_) => "The speaker could not be opened.".to_string(),
            Error::DeviceWriteFailure(_) => "Audio output stopped unexpectedly.".to_string(),
            Error::InvalidRequest(reason) => format!("Nothing to say: {}", reason),
            Error::ConfigError(_) => "Configuration error. Please check settings.".to_string(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout
        } else {
            Error::NetworkFailure(e.to_string())
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::ConfigError(e.to_string())
    }
}
