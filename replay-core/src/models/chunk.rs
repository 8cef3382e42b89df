use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Microseconds on the shared capture clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    pub fn from_duration(duration: Duration) -> Self {
        Self(duration.as_micros().min(u128::from(u64::MAX)) as u64)
    }

    pub fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1000))
    }

    pub const fn as_micros(&self) -> u64 {
        self.0
    }

    pub fn saturating_sub(&self, duration: Duration) -> Timestamp {
        Self(self.0.saturating_sub(Self::from_duration(duration).0))
    }

    pub fn saturating_add(&self, duration: Duration) -> Timestamp {
        Self(self.0.saturating_add(Self::from_duration(duration).0))
    }

    /// Elapsed time from `earlier` to `self`, zero if `earlier` is later.
    pub fn duration_since(&self, earlier: Timestamp) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.0 as f64 / 1_000_000.0)
    }
}

/// Output stream a chunk belongs to. The video stream is always 0; audio
/// tracks follow in manifest order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamId(pub u16);

impl StreamId {
    pub const VIDEO: StreamId = StreamId(0);

    pub fn audio(track_index: usize) -> Self {
        Self(track_index as u16 + 1)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Smallest unit held by the replay buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub stream_id: StreamId,
    pub timestamp: Timestamp,
    pub payload: Bytes,
    pub is_video: bool,
}

impl Chunk {
    pub fn video(timestamp: Timestamp, payload: impl Into<Bytes>) -> Self {
        Self {
            stream_id: StreamId::VIDEO,
            timestamp,
            payload: payload.into(),
            is_video: true,
        }
    }

    pub fn audio(stream_id: StreamId, timestamp: Timestamp, payload: impl Into<Bytes>) -> Self {
        Self {
            stream_id,
            timestamp,
            payload: payload.into(),
            is_video: false,
        }
    }

    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

/// A raw video frame as delivered by a display source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
}

/// A block of interleaved f32 samples as delivered by an audio source.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFrame {
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }
}

/// One unit pulled from a capture source.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaUnit {
    Video(VideoFrame),
    Audio(AudioFrame),
}
