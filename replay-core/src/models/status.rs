use super::artifact::OutputArtifact;
use super::error::CaptureError;

/// Notifications pushed from the session controller to the UI layer.
///
/// Delivery is one-way and best effort over a bounded channel.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    Started,
    /// A fatal failure after validation, e.g. no usable video source.
    StartFailed(CaptureError),
    SourceLost(String),
    FlushStarted,
    FlushSucceeded(OutputArtifact),
    FlushFailed(CaptureError),
    Stopped,
}

impl StatusEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::StartFailed(_) => "start-failed",
            Self::SourceLost(_) => "source-lost",
            Self::FlushStarted => "flush-started",
            Self::FlushSucceeded(_) => "flush-succeeded",
            Self::FlushFailed(_) => "flush-failed",
            Self::Stopped => "stopped",
        }
    }
}
