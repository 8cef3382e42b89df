//! Built-in replay container.
//!
//! ```text
//! +--------+-------------+--------------+----------------------+
//! | "RPLY" | version u16 | manifest u32 | manifest JSON (N)    |
//! +--------+-------------+--------------+----------------------+
//! | stream u16 | pts_us u64 | len u32 | payload (len) |  ... repeated
//! +------------+------------+---------+---------------+
//! ```
//!
//! All integers are little-endian. Records are interleaved in presentation
//! order. Payloads are stored as captured: video frames as delivered by the
//! display source, audio as PCM16 from the mixer. The manifest records the
//! requested container, codec and quality so a transcoder can produce the
//! final file. Files are always named `.rply`, whatever was requested.

use std::io::Write;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::models::artifact::TrackInfo;
use crate::models::chunk::{Chunk, StreamId, Timestamp};
use crate::models::config::{Codec, Container, Quality};
use crate::models::error::CaptureError;
use crate::traits::encoder::{EncodeJob, Encoder};

pub const MAGIC: &[u8; 4] = b"RPLY";
pub const FORMAT_VERSION: u16 = 1;

const RECORD_HEADER_LEN: usize = 2 + 8 + 4;

/// JSON header of a replay file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayManifest {
    /// Container requested in the session config, for a later transcode.
    pub container: Container,
    pub codec: Codec,
    pub quality: Quality,
    pub quantizer: u8,
    pub framerate: u32,
    pub duration_us: u64,
    pub tracks: Vec<TrackInfo>,
}

/// Writes `EncodeJob`s in the replay container format.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayMuxer;

impl ReplayMuxer {
    pub fn new() -> Self {
        Self
    }
}

impl Encoder for ReplayMuxer {
    fn container(&self, _requested: Container) -> Container {
        Container::Replay
    }

    fn encode(&self, job: &EncodeJob<'_>, out: &mut dyn Write) -> Result<(), CaptureError> {
        let manifest = ReplayManifest {
            container: job.settings.container,
            codec: job.settings.codec,
            quality: job.settings.quality,
            quantizer: job.settings.quality.quantizer(),
            framerate: job.settings.framerate,
            duration_us: job.duration.as_micros().min(u128::from(u64::MAX)) as u64,
            tracks: job.tracks.to_vec(),
        };
        let manifest = serde_json::to_vec(&manifest)
            .map_err(|e| CaptureError::EncodingFailed(format!("manifest: {}", e)))?;

        let mut header = BytesMut::with_capacity(4 + 2 + 4 + manifest.len());
        header.put_slice(MAGIC);
        header.put_u16_le(FORMAT_VERSION);
        header.put_u32_le(manifest.len() as u32);
        header.put_slice(&manifest);
        out.write_all(&header).map_err(write_error)?;

        let mut record = BytesMut::with_capacity(RECORD_HEADER_LEN);
        for chunk in job.records {
            let len = u32::try_from(chunk.payload.len())
                .map_err(|_| CaptureError::EncodingFailed("record too large".into()))?;
            record.clear();
            record.put_u16_le(chunk.stream_id.0);
            record.put_u64_le(chunk.timestamp.as_micros());
            record.put_u32_le(len);
            out.write_all(&record).map_err(write_error)?;
            out.write_all(&chunk.payload).map_err(write_error)?;
        }
        out.flush().map_err(write_error)?;
        Ok(())
    }
}

fn write_error(e: std::io::Error) -> CaptureError {
    CaptureError::StorageError(format!("write failed: {}", e))
}

/// A parsed replay file.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayFile {
    pub manifest: ReplayManifest,
    pub records: Vec<Chunk>,
}

impl ReplayFile {
    pub fn parse(data: impl Into<Bytes>) -> Result<Self, CaptureError> {
        let mut buf: Bytes = data.into();
        if buf.remaining() < 10 || &buf[..4] != MAGIC {
            return Err(malformed("bad magic"));
        }
        buf.advance(4);
        let version = buf.get_u16_le();
        if version != FORMAT_VERSION {
            return Err(malformed(&format!("unsupported version {}", version)));
        }
        let manifest_len = buf.get_u32_le() as usize;
        if buf.remaining() < manifest_len {
            return Err(malformed("truncated manifest"));
        }
        let manifest_bytes = buf.split_to(manifest_len);
        let manifest: ReplayManifest = serde_json::from_slice(&manifest_bytes)
            .map_err(|e| malformed(&format!("manifest: {}", e)))?;

        let video_streams: Vec<StreamId> = manifest
            .tracks
            .iter()
            .filter(|t| t.kind == crate::models::artifact::TrackKind::Video)
            .map(|t| t.stream_id)
            .collect();

        let mut records = Vec::new();
        while buf.has_remaining() {
            if buf.remaining() < RECORD_HEADER_LEN {
                return Err(malformed("truncated record header"));
            }
            let stream_id = StreamId(buf.get_u16_le());
            let timestamp = Timestamp::from_micros(buf.get_u64_le());
            let len = buf.get_u32_le() as usize;
            if buf.remaining() < len {
                return Err(malformed("truncated record"));
            }
            records.push(Chunk {
                stream_id,
                timestamp,
                payload: buf.split_to(len),
                is_video: video_streams.contains(&stream_id),
            });
        }

        Ok(Self { manifest, records })
    }

    pub fn read(path: &std::path::Path) -> Result<Self, CaptureError> {
        let data = std::fs::read(path)
            .map_err(|e| CaptureError::StorageError(format!("failed to read replay: {}", e)))?;
        Self::parse(data)
    }

    pub fn stream(&self, stream_id: StreamId) -> impl Iterator<Item = &Chunk> {
        self.records.iter().filter(move |c| c.stream_id == stream_id)
    }
}

fn malformed(reason: &str) -> CaptureError {
    CaptureError::EncodingFailed(format!("malformed replay file: {}", reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::traits::encoder::EncodeSettings;

    fn settings() -> EncodeSettings {
        EncodeSettings {
            container: Container::Mkv,
            codec: Codec::Hevc,
            quality: Quality::High,
            framerate: 30,
        }
    }

    #[test]
    fn writes_manifest_and_records() {
        let mut video = TrackInfo::video("screen", "hevc", 30);
        video.chunk_count = 1;
        let tracks = vec![
            video,
            TrackInfo::audio(StreamId(1), vec!["mic".into()], 48_000, 2),
        ];
        let records = vec![
            Chunk::video(Timestamp::ZERO, vec![1, 2, 3]),
            Chunk::audio(StreamId(1), Timestamp::from_millis(20), vec![9; 8]),
        ];
        let job = EncodeJob {
            settings: settings(),
            tracks: &tracks,
            records: &records,
            duration: Duration::from_millis(40),
        };

        let mut out = Vec::new();
        ReplayMuxer::new().encode(&job, &mut out).unwrap();
        assert_eq!(&out[..4], MAGIC);

        let file = ReplayFile::parse(out).unwrap();
        assert_eq!(file.manifest.container, Container::Mkv);
        assert_eq!(file.manifest.codec, Codec::Hevc);
        assert_eq!(file.manifest.quantizer, 26);
        assert_eq!(file.manifest.duration_us, 40_000);
        assert_eq!(file.manifest.tracks, tracks);
        assert_eq!(file.records, records);
    }

    #[test]
    fn always_writes_its_own_container() {
        let muxer = ReplayMuxer::new();
        assert_eq!(muxer.container(Container::Mp4), Container::Replay);
        assert_eq!(muxer.container(Container::Replay).extension(), "rply");
    }

    #[test]
    fn rejects_garbage() {
        assert!(ReplayFile::parse(b"not a replay".to_vec()).is_err());
        let mut truncated = Vec::new();
        truncated.extend_from_slice(MAGIC);
        truncated.extend_from_slice(&1u16.to_le_bytes());
        truncated.extend_from_slice(&100u32.to_le_bytes());
        assert!(matches!(
            ReplayFile::parse(truncated),
            Err(CaptureError::EncodingFailed(_))
        ));
    }
}
