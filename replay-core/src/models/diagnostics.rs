use std::collections::BTreeMap;

use crate::processing::audio_mixer::MixerDiagnostics;
use crate::processing::ring_buffer::BufferStats;

/// Counters for one bound source.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SourceDiagnostics {
    /// Units read from the source.
    pub units: u64,
    /// Units dropped because the mixer queue was full.
    pub dropped: u64,
    /// Peak level of the most recent audio block, 0.0 for video.
    pub peak_level: f32,
    pub lost: bool,
}

/// Diagnostics for debugging recording sessions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionDiagnostics {
    /// Keyed by resolved source id.
    pub sources: BTreeMap<String, SourceDiagnostics>,
    /// One entry per configured audio track.
    pub mixers: Vec<MixerDiagnostics>,
    pub buffer: BufferStats,
    pub flushes_succeeded: u64,
    pub flushes_failed: u64,
    /// Status events that did not fit in the channel.
    pub events_dropped: u64,
}
