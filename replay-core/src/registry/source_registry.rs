//! Source registry: a versioned, cached view of the capture endpoints.
//!
//! Enumeration runs on a helper thread so a wedged backend can never block
//! the caller for longer than the configured timeout. When it does time out
//! the caller gets the last good snapshot back along with the error, and the
//! still-running enumeration is picked up again by the next call.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use parking_lot::{Mutex, RwLock};

use crate::models::error::CaptureError;
use crate::models::source::{alias_kind, SourceDescriptor, SourceKind};
use crate::traits::capture_source::{CaptureSource, SourceBackend};

pub const DEFAULT_ENUMERATION_TIMEOUT: Duration = Duration::from_secs(2);

type EnumerationResult = Result<Vec<SourceDescriptor>, CaptureError>;

/// One enumeration result. A new version is produced on every successful
/// enumeration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrySnapshot {
    pub version: u64,
    pub sources: Vec<SourceDescriptor>,
}

impl RegistrySnapshot {
    /// Look up a source by id. `default_input` / `default_output` resolve to
    /// the default microphone / system-sound endpoint.
    pub fn resolve(&self, id: &str) -> Option<&SourceDescriptor> {
        match alias_kind(id) {
            Some(kind) => self.default_of(kind),
            None => self.sources.iter().find(|s| s.id == id),
        }
    }

    /// The default endpoint of `kind`, or the first one if none is flagged.
    pub fn default_of(&self, kind: SourceKind) -> Option<&SourceDescriptor> {
        self.sources
            .iter()
            .find(|s| s.kind == kind && s.is_default)
            .or_else(|| self.sources.iter().find(|s| s.kind == kind))
    }

    pub fn of_kind(&self, kind: SourceKind) -> impl Iterator<Item = &SourceDescriptor> {
        self.sources.iter().filter(move |s| s.kind == kind)
    }
}

/// Enumeration did not produce a fresh snapshot.
#[derive(Debug, Clone)]
pub struct EnumerationFailure {
    pub error: CaptureError,
    /// Best-known snapshot from an earlier enumeration.
    pub cached: Arc<RegistrySnapshot>,
}

impl fmt::Display for EnumerationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (cached snapshot v{})", self.error, self.cached.version)
    }
}

impl std::error::Error for EnumerationFailure {}

impl From<EnumerationFailure> for CaptureError {
    fn from(failure: EnumerationFailure) -> Self {
        failure.error
    }
}

pub struct SourceRegistry {
    backend: Arc<dyn SourceBackend>,
    snapshot: RwLock<Arc<RegistrySnapshot>>,
    pending: Mutex<Option<Receiver<EnumerationResult>>>,
    timeout: Duration,
}

impl SourceRegistry {
    pub fn new(backend: Arc<dyn SourceBackend>) -> Self {
        Self::with_timeout(backend, DEFAULT_ENUMERATION_TIMEOUT)
    }

    pub fn with_timeout(backend: Arc<dyn SourceBackend>, timeout: Duration) -> Self {
        Self {
            backend,
            snapshot: RwLock::new(Arc::new(RegistrySnapshot::default())),
            pending: Mutex::new(None),
            timeout,
        }
    }

    /// Re-enumerate the backend, waiting at most the configured timeout.
    pub fn enumerate(&self) -> Result<Arc<RegistrySnapshot>, EnumerationFailure> {
        // Only one enumeration runs at a time; a call that timed out leaves
        // its receiver behind for the next caller.
        let mut pending = self.pending.lock();
        let rx = match pending.take() {
            Some(rx) => rx,
            None => self.spawn_enumeration().map_err(|error| self.failure(error))?,
        };

        match rx.recv_timeout(self.timeout) {
            Ok(Ok(sources)) => Ok(self.install(sources)),
            Ok(Err(error)) => {
                log::warn!("Source enumeration failed: {}", error);
                Err(self.failure(error))
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!("Source enumeration timed out after {:?}", self.timeout);
                *pending = Some(rx);
                Err(self.failure(CaptureError::EnumerationTimeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(self.failure(CaptureError::DeviceNotAvailable(
                "enumeration thread exited without a result".into(),
            ))),
        }
    }

    /// The most recent successful enumeration.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Resolve an id (or alias) against the cached snapshot.
    pub fn resolve(&self, id: &str) -> Option<SourceDescriptor> {
        self.snapshot.read().resolve(id).cloned()
    }

    /// The default endpoint of `kind` from the cached snapshot.
    pub fn resolve_default(&self, kind: SourceKind) -> Result<SourceDescriptor, CaptureError> {
        self.snapshot
            .read()
            .default_of(kind)
            .cloned()
            .ok_or_else(|| CaptureError::DeviceNotAvailable(format!("no {:?} source", kind)))
    }

    /// Bind `id` to a fresh capture capability.
    ///
    /// An id absent from the cached snapshot is reported as lost, not as a
    /// configuration error: it was valid at some point and went away.
    pub fn open(&self, id: &str) -> Result<Box<dyn CaptureSource>, CaptureError> {
        let descriptor = self
            .resolve(id)
            .ok_or_else(|| CaptureError::SourceLost(id.to_string()))?;
        self.backend.open(&descriptor)
    }

    fn spawn_enumeration(&self) -> Result<Receiver<EnumerationResult>, CaptureError> {
        let (tx, rx) = bounded(1);
        let backend = Arc::clone(&self.backend);
        thread::Builder::new()
            .name("source-enumeration".into())
            .spawn(move || {
                let _ = tx.send(backend.enumerate());
            })
            .map_err(|e| CaptureError::DeviceNotAvailable(format!("failed to spawn enumeration: {}", e)))?;
        Ok(rx)
    }

    fn install(&self, sources: Vec<SourceDescriptor>) -> Arc<RegistrySnapshot> {
        let mut unique: Vec<SourceDescriptor> = Vec::with_capacity(sources.len());
        for source in sources {
            if unique.iter().any(|s| s.id == source.id) {
                log::debug!("Ignoring duplicate source id {}", source.id);
                continue;
            }
            unique.push(source);
        }

        let mut current = self.snapshot.write();
        let next = Arc::new(RegistrySnapshot {
            version: current.version + 1,
            sources: unique,
        });
        log::debug!("Source registry v{}: {} sources", next.version, next.sources.len());
        *current = Arc::clone(&next);
        next
    }

    fn failure(&self, error: CaptureError) -> EnumerationFailure {
        EnumerationFailure {
            error,
            cached: self.snapshot(),
        }
    }
}
