//! Windowed audio mixer for one configured audio track.
//!
//! Every source gets a lane holding normalized samples keyed by absolute
//! frame position on the capture clock. Output is produced one fixed-size
//! window at a time, aligned to multiples of the window length:
//!
//! ```text
//! lane A ─┐
//! lane B ─┼→ window k = [k·W, (k+1)·W) → sum · gain → clip → PCM16 chunk   (merged)
//! lane C ─┘                           → one PCM16 chunk per lane            (separate)
//! ```
//!
//! A window is emitted once input (or the clock) has moved `latency` past
//! its end. Lanes with nothing for a window contribute silence, so a silent
//! or lost source never holds the mix back.

use std::collections::VecDeque;
use std::time::Duration;

use crate::models::artifact::TrackInfo;
use crate::models::chunk::{AudioFrame, Chunk, StreamId, Timestamp};
use crate::models::config::{MergeMode, MixerSettings};
use crate::processing::pcm;

/// Lanes further than this behind their timestamps are restarted instead of
/// padded with silence.
const MAX_GAP: Duration = Duration::from_secs(10);

/// Counters for one track mixer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MixerDiagnostics {
    pub windows_emitted: u64,
    /// Frames that arrived after their window had been emitted.
    pub late_frames: u64,
    /// Times a lane was realigned to its timestamps.
    pub resyncs: u64,
}

#[derive(Debug)]
struct SourceLane {
    id: String,
    gain: f32,
    stream_id: StreamId,
    /// Interleaved samples in the output format.
    pending: VecDeque<f32>,
    /// Absolute frame index of `pending[0]`.
    start_frame: Option<u64>,
}

impl SourceLane {
    fn pending_frames(&self, channels: usize) -> usize {
        self.pending.len() / channels
    }

    /// Remove and return the samples for `[window_start, window_start + frames)`,
    /// zero-filled where the lane has nothing. Returns the output and the
    /// number of frames discarded as too old.
    fn take_window(&mut self, window_start: u64, frames: usize, channels: usize) -> (Vec<f32>, u64) {
        let mut out = vec![0.0f32; frames * channels];
        let Some(mut start) = self.start_frame else {
            return (out, 0);
        };

        let mut discarded = 0u64;
        if start < window_start {
            let skip = ((window_start - start) as usize).min(self.pending_frames(channels));
            self.pending.drain(..skip * channels);
            start += skip as u64;
            discarded = skip as u64;
            self.start_frame = Some(start);
        }

        let window_end = window_start + frames as u64;
        if self.pending.is_empty() || start >= window_end {
            return (out, discarded);
        }

        let lead = start.saturating_sub(window_start) as usize;
        let take = self.pending_frames(channels).min(frames - lead);
        for (slot, sample) in out[lead * channels..]
            .iter_mut()
            .zip(self.pending.drain(..take * channels))
        {
            *slot = sample * self.gain;
        }
        self.start_frame = Some(start + take as u64);
        (out, discarded)
    }
}

/// Mixer for one `AudioTrackConfig`.
#[derive(Debug)]
pub struct TrackMixer {
    mode: MergeMode,
    settings: MixerSettings,
    /// Sorted by source id so summation order never depends on configuration order.
    lanes: Vec<SourceLane>,
    /// Source ids in configuration order, for the manifest.
    configured: Vec<String>,
    merged_stream: StreamId,
    next_window: Option<u64>,
    horizon_frame: u64,
    diagnostics: MixerDiagnostics,
}

impl TrackMixer {
    /// `sources` are `(id, gain)` pairs in configuration order. Output
    /// streams are numbered from `first_stream`: one for a merged track, one
    /// per source for a separate track.
    pub fn new(
        mode: MergeMode,
        sources: Vec<(String, f32)>,
        first_stream: StreamId,
        settings: MixerSettings,
    ) -> Self {
        let configured: Vec<String> = sources.iter().map(|(id, _)| id.clone()).collect();
        let mut lanes: Vec<SourceLane> = sources
            .into_iter()
            .enumerate()
            .map(|(index, (id, gain))| SourceLane {
                id,
                gain,
                stream_id: match mode {
                    MergeMode::Merged => first_stream,
                    MergeMode::Separate => StreamId(first_stream.0 + index as u16),
                },
                pending: VecDeque::new(),
                start_frame: None,
            })
            .collect();
        lanes.sort_by(|a, b| a.id.cmp(&b.id));

        Self {
            mode,
            settings,
            lanes,
            configured,
            merged_stream: first_stream,
            next_window: None,
            horizon_frame: 0,
            diagnostics: MixerDiagnostics::default(),
        }
    }

    pub fn mode(&self) -> MergeMode {
        self.mode
    }

    pub fn accepts(&self, source_id: &str) -> bool {
        self.lanes.iter().any(|l| l.id == source_id)
    }

    pub fn output_streams(&self) -> Vec<StreamId> {
        match self.mode {
            MergeMode::Merged => vec![self.merged_stream],
            MergeMode::Separate => (0..self.configured.len())
                .map(|i| StreamId(self.merged_stream.0 + i as u16))
                .collect(),
        }
    }

    /// Manifest entries for the streams this mixer produces.
    pub fn track_infos(&self) -> Vec<TrackInfo> {
        let rate = self.settings.sample_rate;
        let channels = self.settings.channels;
        match self.mode {
            MergeMode::Merged => vec![TrackInfo::audio(
                self.merged_stream,
                self.configured.clone(),
                rate,
                channels,
            )],
            MergeMode::Separate => self
                .configured
                .iter()
                .zip(self.output_streams())
                .map(|(id, stream)| TrackInfo::audio(stream, vec![id.clone()], rate, channels))
                .collect(),
        }
    }

    pub fn diagnostics(&self) -> MixerDiagnostics {
        self.diagnostics
    }

    /// Start emitting windows from `timestamp` even if no source has
    /// delivered yet.
    pub fn anchor(&mut self, timestamp: Timestamp) {
        if self.next_window.is_none() {
            self.next_window = Some(self.frame_at(timestamp) / self.window_frames());
        }
    }

    /// Feed one block captured at `timestamp` from `source_id`.
    ///
    /// Returns `false` if the source is not part of this track.
    pub fn push(&mut self, source_id: &str, timestamp: Timestamp, frame: &AudioFrame) -> bool {
        let Some(index) = self.lanes.iter().position(|l| l.id == source_id) else {
            return false;
        };
        if frame.samples.is_empty() || frame.channels == 0 {
            return true;
        }

        let channels = self.settings.channels;
        let samples = pcm::to_channels(&frame.samples, frame.channels, channels);
        let samples = pcm::resample(&samples, channels, frame.sample_rate, self.settings.sample_rate);

        let position = self.frame_at(timestamp);
        let window = self.window_frames();
        let max_gap = self.frame_at(Timestamp::from_duration(MAX_GAP));
        let ch = channels as usize;
        let lane = &mut self.lanes[index];

        match lane.start_frame {
            None => lane.start_frame = Some(position),
            Some(start) => {
                let expected = start + lane.pending_frames(ch) as u64;
                if position > expected + window {
                    let gap = position - expected;
                    if lane.pending.is_empty() || gap > max_gap {
                        lane.pending.clear();
                        lane.start_frame = Some(position);
                    } else {
                        lane.pending.extend(std::iter::repeat(0.0).take(gap as usize * ch));
                    }
                    self.diagnostics.resyncs += 1;
                    log::debug!("Realigned {} after a {} frame gap", lane.id, gap);
                } else if position + window < expected && lane.pending.is_empty() {
                    lane.start_frame = Some(position);
                    self.diagnostics.resyncs += 1;
                }
            }
        }

        lane.pending.extend(samples);
        let end = lane.start_frame.unwrap_or(position) + lane.pending_frames(ch) as u64;
        self.horizon_frame = self.horizon_frame.max(end);
        if self.next_window.is_none() {
            self.next_window = Some(position / window);
        }
        true
    }

    /// Emit every window that has closed, either because input moved past it
    /// or because `now` did.
    pub fn drain(&mut self, now: Option<Timestamp>) -> Vec<Chunk> {
        let Some(mut next) = self.next_window else {
            return Vec::new();
        };
        let window = self.window_frames();
        let latency = self.frame_at(Timestamp::from_duration(self.settings.latency()));
        let horizon = now.map_or(self.horizon_frame, |now| self.horizon_frame.max(self.frame_at(now)));

        let mut chunks = Vec::new();
        while (next + 1) * window + latency <= horizon {
            chunks.extend(self.emit_window(next));
            next += 1;
        }
        self.next_window = Some(next);
        chunks
    }

    /// Emit every window that holds buffered input, ignoring latency.
    pub fn drain_all(&mut self) -> Vec<Chunk> {
        let Some(mut next) = self.next_window else {
            return Vec::new();
        };
        let window = self.window_frames();
        let mut chunks = Vec::new();
        while next * window < self.horizon_frame {
            chunks.extend(self.emit_window(next));
            next += 1;
        }
        self.next_window = Some(next);
        chunks
    }

    fn emit_window(&mut self, index: u64) -> Vec<Chunk> {
        let frames = self.window_frames() as usize;
        let channels = self.settings.channels as usize;
        let start = index * frames as u64;
        let timestamp = self.timestamp_of(start);
        self.diagnostics.windows_emitted += 1;

        match self.mode {
            MergeMode::Merged => {
                let mut mixed = vec![0.0f32; frames * channels];
                for lane in &mut self.lanes {
                    let (part, discarded) = lane.take_window(start, frames, channels);
                    self.diagnostics.late_frames += discarded;
                    for (m, p) in mixed.iter_mut().zip(&part) {
                        *m += *p;
                    }
                }
                for sample in &mut mixed {
                    *sample = sample.clamp(-1.0, 1.0);
                }
                vec![Chunk::audio(self.merged_stream, timestamp, pcm::to_pcm16_le(&mixed))]
            }
            MergeMode::Separate => {
                let mut chunks: Vec<Chunk> = self
                    .lanes
                    .iter_mut()
                    .map(|lane| {
                        let (part, discarded) = lane.take_window(start, frames, channels);
                        self.diagnostics.late_frames += discarded;
                        Chunk::audio(lane.stream_id, timestamp, pcm::to_pcm16_le(&part))
                    })
                    .collect();
                chunks.sort_by_key(|c| c.stream_id);
                chunks
            }
        }
    }

    fn window_frames(&self) -> u64 {
        self.settings.window_frames().max(1) as u64
    }

    fn frame_at(&self, timestamp: Timestamp) -> u64 {
        (u128::from(timestamp.as_micros()) * u128::from(self.settings.sample_rate) / 1_000_000) as u64
    }

    fn timestamp_of(&self, frame: u64) -> Timestamp {
        Timestamp::from_micros(
            (u128::from(frame) * 1_000_000 / u128::from(self.settings.sample_rate.max(1))) as u64,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// 1 kHz mono, 10 ms windows, no latency: one window is 10 frames.
    fn settings() -> MixerSettings {
        MixerSettings {
            sample_rate: 1000,
            channels: 1,
            window_ms: 10,
            latency_ms: 0,
        }
    }

    fn mono(samples: Vec<f32>) -> AudioFrame {
        AudioFrame {
            samples,
            sample_rate: 1000,
            channels: 1,
        }
    }

    fn decode(chunk: &Chunk) -> Vec<f32> {
        pcm::from_pcm16_le(&chunk.payload)
    }

    fn merged(ids: &[&str]) -> TrackMixer {
        TrackMixer::new(
            MergeMode::Merged,
            ids.iter().map(|id| (id.to_string(), 1.0)).collect(),
            StreamId(1),
            settings(),
        )
    }

    #[test]
    fn merges_aligned_windows() {
        let mut mixer = merged(&["a", "b"]);
        mixer.push("a", Timestamp::ZERO, &mono(vec![0.25; 20]));
        mixer.push("b", Timestamp::ZERO, &mono(vec![0.5; 20]));

        let chunks = mixer.drain(None);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].timestamp, Timestamp::ZERO);
        assert_eq!(chunks[1].timestamp, Timestamp::from_millis(10));
        for chunk in &chunks {
            assert_eq!(chunk.stream_id, StreamId(1));
            for sample in decode(chunk) {
                assert_relative_eq!(sample, 0.75, epsilon = 1e-3);
            }
        }
    }

    #[test]
    fn merged_output_clips() {
        let mut mixer = merged(&["a", "b"]);
        mixer.push("a", Timestamp::ZERO, &mono(vec![0.8; 10]));
        mixer.push("b", Timestamp::ZERO, &mono(vec![0.8; 10]));
        let chunks = mixer.drain(None);
        assert!(decode(&chunks[0]).iter().all(|s| (*s - 1.0).abs() < 1e-6));
    }

    #[test]
    fn silent_source_contributes_silence() {
        let mut mixer = merged(&["a", "silent"]);
        mixer.push("a", Timestamp::ZERO, &mono(vec![0.5; 30]));

        let chunks = mixer.drain(None);
        assert_eq!(chunks.len(), 3);
        for chunk in &chunks {
            for sample in decode(chunk) {
                assert_relative_eq!(sample, 0.5, epsilon = 1e-3);
            }
        }
    }

    #[test]
    fn clock_closes_windows_without_input() {
        let mut mixer = merged(&["a", "b"]);
        mixer.anchor(Timestamp::ZERO);
        assert!(mixer.drain(None).is_empty());

        let chunks = mixer.drain(Some(Timestamp::from_millis(50)));
        assert_eq!(chunks.len(), 5);
        assert!(chunks.iter().all(|c| decode(c).iter().all(|s| *s == 0.0)));
    }

    #[test]
    fn merge_is_independent_of_source_order() {
        let a: Vec<f32> = (0..40).map(|i| (i as f32 * 0.37).sin() * 0.3).collect();
        let b: Vec<f32> = (0..40).map(|i| (i as f32 * 0.11).cos() * 0.3).collect();
        let c: Vec<f32> = (0..40).map(|i| (i as f32 * 0.05).sin() * 0.3).collect();

        let mut forward = merged(&["a", "b", "c"]);
        let mut reverse = merged(&["c", "b", "a"]);
        for (id, data) in [("a", &a), ("b", &b), ("c", &c)] {
            forward.push(id, Timestamp::ZERO, &mono(data.clone()));
        }
        for (id, data) in [("c", &c), ("a", &a), ("b", &b)] {
            reverse.push(id, Timestamp::ZERO, &mono(data.clone()));
        }

        let forward = forward.drain_all();
        let reverse = reverse.drain_all();
        assert_eq!(forward.len(), 4);
        assert_eq!(forward, reverse);
    }

    #[test]
    fn gain_is_applied_before_summing() {
        let mut mixer = TrackMixer::new(
            MergeMode::Merged,
            vec![("a".into(), 0.5), ("b".into(), 2.0)],
            StreamId(1),
            settings(),
        );
        mixer.push("a", Timestamp::ZERO, &mono(vec![0.4; 10]));
        mixer.push("b", Timestamp::ZERO, &mono(vec![0.1; 10]));
        let chunks = mixer.drain(None);
        for sample in decode(&chunks[0]) {
            assert_relative_eq!(sample, 0.4, epsilon = 1e-3);
        }
    }

    #[test]
    fn separate_mode_keeps_sources_apart() {
        let mut mixer = TrackMixer::new(
            MergeMode::Separate,
            vec![("mic".into(), 1.0), ("desktop".into(), 1.0)],
            StreamId(2),
            settings(),
        );
        assert_eq!(mixer.output_streams(), vec![StreamId(2), StreamId(3)]);

        mixer.push("mic", Timestamp::ZERO, &mono(vec![0.25; 10]));
        mixer.push("desktop", Timestamp::ZERO, &mono(vec![-0.5; 10]));
        let chunks = mixer.drain(None);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].stream_id, StreamId(2));
        assert_relative_eq!(decode(&chunks[0])[0], 0.25, epsilon = 1e-3);
        assert_eq!(chunks[1].stream_id, StreamId(3));
        assert_relative_eq!(decode(&chunks[1])[0], -0.5, epsilon = 1e-3);

        let infos = mixer.track_infos();
        assert_eq!(infos[0].sources, vec!["mic"]);
        assert_eq!(infos[1].sources, vec!["desktop"]);
    }

    #[test]
    fn unaligned_input_is_quantized_to_windows() {
        let mut mixer = merged(&["a"]);
        mixer.anchor(Timestamp::ZERO);
        // starts 5 ms into the first window
        mixer.push("a", Timestamp::from_millis(5), &mono(vec![0.5; 15]));
        let chunks = mixer.drain(None);
        assert_eq!(chunks.len(), 2);

        let first = decode(&chunks[0]);
        assert!(first[..5].iter().all(|s| *s == 0.0));
        assert!(first[5..].iter().all(|s| (*s - 0.5).abs() < 1e-3));
        assert!(decode(&chunks[1]).iter().all(|s| (*s - 0.5).abs() < 1e-3));
    }

    #[test]
    fn late_input_is_dropped() {
        let mut mixer = merged(&["a", "b"]);
        mixer.push("a", Timestamp::ZERO, &mono(vec![0.5; 30]));
        assert_eq!(mixer.drain(None).len(), 3);

        // b shows up for a window that is already gone
        mixer.push("b", Timestamp::ZERO, &mono(vec![0.5; 10]));
        mixer.push("a", Timestamp::from_millis(30), &mono(vec![0.5; 10]));
        let chunks = mixer.drain(None);
        assert_eq!(chunks.len(), 1);
        assert!(decode(&chunks[0]).iter().all(|s| (*s - 0.5).abs() < 1e-3));
        assert_eq!(mixer.diagnostics().late_frames, 10);
    }

    #[test]
    fn gap_is_filled_with_silence() {
        let mut mixer = merged(&["a", "b"]);
        mixer.push("a", Timestamp::ZERO, &mono(vec![0.5; 10]));
        mixer.push("b", Timestamp::ZERO, &mono(vec![0.0; 40]));
        // a skips 20 ms, then resumes
        mixer.push("a", Timestamp::from_millis(30), &mono(vec![0.5; 10]));

        let chunks = mixer.drain(None);
        assert_eq!(chunks.len(), 4);
        let levels: Vec<f32> = chunks.iter().map(|c| decode(c)[0]).collect();
        assert_relative_eq!(levels[0], 0.5, epsilon = 1e-3);
        assert_eq!(levels[1], 0.0);
        assert_eq!(levels[2], 0.0);
        assert_relative_eq!(levels[3], 0.5, epsilon = 1e-3);
        assert_eq!(mixer.diagnostics().resyncs, 1);
    }

    #[test]
    fn input_is_normalized_to_output_format() {
        let mut mixer = TrackMixer::new(
            MergeMode::Merged,
            vec![("a".into(), 1.0)],
            StreamId(1),
            MixerSettings {
                sample_rate: 1000,
                channels: 2,
                window_ms: 10,
                latency_ms: 0,
            },
        );
        // 500 Hz mono → 1 kHz stereo
        mixer.push(
            "a",
            Timestamp::ZERO,
            &AudioFrame {
                samples: vec![0.5; 5],
                sample_rate: 500,
                channels: 1,
            },
        );
        let chunks = mixer.drain_all();
        assert_eq!(chunks.len(), 1);
        let samples = decode(&chunks[0]);
        assert_eq!(samples.len(), 20);
        assert_relative_eq!(samples[0], 0.5, epsilon = 1e-3);
        assert_relative_eq!(samples[1], 0.5, epsilon = 1e-3);
    }

    #[test]
    fn ignores_unknown_sources() {
        let mut mixer = merged(&["a"]);
        assert!(!mixer.push("other", Timestamp::ZERO, &mono(vec![0.5; 10])));
        assert!(mixer.accepts("a"));
        assert!(!mixer.accepts("other"));
    }
}
