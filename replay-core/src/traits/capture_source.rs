use std::time::Duration;

use crate::models::chunk::MediaUnit;
use crate::models::error::CaptureError;
use crate::models::source::SourceDescriptor;

/// A bound capture endpoint that delivers units at its native cadence.
///
/// Implemented by platform backends and by the virtual sources in
/// `crate::sources`.
pub trait CaptureSource: Send {
    /// The descriptor this source was opened from.
    fn descriptor(&self) -> &SourceDescriptor;

    /// Block up to `timeout` for the next unit.
    ///
    /// Returns `Ok(None)` when nothing arrived in time and
    /// `Err(CaptureError::SourceLost)` once the endpoint has gone away.
    fn next_unit(&mut self, timeout: Duration) -> Result<Option<MediaUnit>, CaptureError>;

    /// Release the endpoint. Called once when the ingest worker exits.
    fn close(&mut self) {}
}

/// Platform capability behind the source registry.
pub trait SourceBackend: Send + Sync {
    /// List the endpoints currently present. May be slow; the registry
    /// bounds how long it waits.
    fn enumerate(&self) -> Result<Vec<SourceDescriptor>, CaptureError>;

    /// Open an endpoint for capture.
    fn open(&self, source: &SourceDescriptor) -> Result<Box<dyn CaptureSource>, CaptureError>;
}
