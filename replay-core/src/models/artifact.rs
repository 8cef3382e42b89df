use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::chunk::StreamId;
use super::config::Container;

/// Kind of an output track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

/// One entry of an artifact's track manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub stream_id: StreamId,
    pub kind: TrackKind,
    /// Source ids feeding this track.
    pub sources: Vec<String>,
    /// Codec name (`h264`, `pcm_s16le`, ...).
    pub codec: String,
    pub framerate: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    /// Number of records written for this track.
    pub chunk_count: usize,
}

impl TrackInfo {
    pub fn video(source_id: &str, codec: &str, framerate: u32) -> Self {
        Self {
            stream_id: StreamId::VIDEO,
            kind: TrackKind::Video,
            sources: vec![source_id.to_string()],
            codec: codec.to_string(),
            framerate: Some(framerate),
            sample_rate: None,
            channels: None,
            chunk_count: 0,
        }
    }

    pub fn audio(stream_id: StreamId, sources: Vec<String>, sample_rate: u32, channels: u16) -> Self {
        Self {
            stream_id,
            kind: TrackKind::Audio,
            sources,
            codec: "pcm_s16le".to_string(),
            framerate: None,
            sample_rate: Some(sample_rate),
            channels: Some(channels),
            chunk_count: 0,
        }
    }
}

/// A saved replay. Created once by the flush pipeline and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputArtifact {
    pub id: String,
    pub path: PathBuf,
    pub container: Container,
    pub duration_secs: f64,
    pub track_manifest: Vec<TrackInfo>,
    /// SHA-256 hex digest of the final file.
    pub checksum: String,
    pub created_at: String,
}
