use thiserror::Error;

/// Errors produced by the replay engine.
///
/// Only `InvalidConfig` and `DeviceNotAvailable` are fatal to a session
/// attempt. Everything else is reported and the session carries on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("source enumeration timed out")]
    EnumerationTimeout,

    #[error("source lost: {0}")]
    SourceLost(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("device not available: {0}")]
    DeviceNotAvailable(String),

    #[error("a flush is already in progress")]
    FlushBusy,

    #[error("flush failed: {0}")]
    FlushFailed(String),

    #[error("flush cancelled")]
    FlushCancelled,

    #[error("encoding failed: {0}")]
    EncodingFailed(String),

    #[error("storage error: {0}")]
    StorageError(String),
}

impl CaptureError {
    /// Whether the session survives this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::InvalidConfig(_) | Self::DeviceNotAvailable(_))
    }
}
