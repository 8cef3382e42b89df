use std::io::Write;
use std::time::Duration;

use crate::models::artifact::TrackInfo;
use crate::models::chunk::Chunk;
use crate::models::config::{Codec, Container, Quality};
use crate::models::error::CaptureError;

/// Output format requested for one flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeSettings {
    pub container: Container,
    pub codec: Codec,
    pub quality: Quality,
    pub framerate: u32,
}

/// Everything an encoder needs for one flush.
#[derive(Debug)]
pub struct EncodeJob<'a> {
    pub settings: EncodeSettings,
    pub tracks: &'a [TrackInfo],
    /// All records in presentation order. Video is already retimed to
    /// `settings.framerate`.
    pub records: &'a [Chunk],
    pub duration: Duration,
}

/// Turns a buffer snapshot into container bytes.
pub trait Encoder: Send + Sync {
    /// Container actually written when `requested` is configured. Decides
    /// the file extension and `OutputArtifact::container`.
    fn container(&self, requested: Container) -> Container {
        requested
    }

    fn encode(&self, job: &EncodeJob<'_>, out: &mut dyn Write) -> Result<(), CaptureError>;
}
