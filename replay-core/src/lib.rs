//! # replay-core
//!
//! Platform-agnostic replay buffer engine.
//!
//! Records the last few minutes of screen and audio into memory and saves
//! them to disk on demand. Platform backends implement `SourceBackend` and
//! plug into the generic `SessionController`; the built-in
//! `VirtualBackend` provides synthetic sources for demos and tests.
//!
//! ## Architecture
//!
//! ```text
//! replay-core (this crate)
//! ├── traits/       ← CaptureSource, SourceBackend, Encoder
//! ├── models/       ← CaptureError, CaptureConfig, Chunk, StatusEvent, OutputArtifact, etc.
//! ├── registry/     ← SourceRegistry, ActiveWindowTracker
//! ├── processing/   ← RingBuffer, TrackMixer, PCM helpers
//! ├── session/      ← SessionController, ingest and mixer workers
//! ├── pipeline/     ← FlushPipeline, naming, retiming, replay muxer
//! ├── storage/      ← AtomicFileWriter, metadata sidecar
//! └── sources/      ← VirtualBackend
//! ```

pub mod models;
pub mod pipeline;
pub mod processing;
pub mod registry;
pub mod session;
pub mod sources;
pub mod storage;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use models::artifact::{OutputArtifact, TrackInfo, TrackKind};
pub use models::chunk::{AudioFrame, Chunk, MediaUnit, StreamId, Timestamp, VideoFrame};
pub use models::config::{AudioTrackConfig, CaptureConfig, Codec, Container, MergeMode, MixerSettings, NamingMode, Quality};
pub use models::diagnostics::{SessionDiagnostics, SourceDiagnostics};
pub use models::error::CaptureError;
pub use models::source::{SourceDescriptor, SourceKind, DEFAULT_INPUT_ALIAS, DEFAULT_OUTPUT_ALIAS};
pub use models::state::SessionState;
pub use models::status::StatusEvent;
pub use pipeline::flush::{FlushPipeline, FlushRequest};
pub use pipeline::muxer::{ReplayFile, ReplayManifest, ReplayMuxer};
pub use processing::audio_mixer::TrackMixer;
pub use processing::ring_buffer::{BufferSnapshot, BufferStats, RingBuffer};
pub use registry::active_window::ActiveWindowTracker;
pub use registry::source_registry::{EnumerationFailure, RegistrySnapshot, SourceRegistry};
pub use session::controller::SessionController;
pub use sources::virtual_backend::{SourceFeed, VirtualBackend};
pub use storage::atomic_writer::AtomicFileWriter;
pub use traits::capture_source::{CaptureSource, SourceBackend};
pub use traits::encoder::{EncodeJob, EncodeSettings, Encoder};
