use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::models::chunk::{Chunk, StreamId, Timestamp};

/// Time-bounded replay buffer shared by every producer in a session.
///
/// Chunks are kept per stream, so producers on different streams never
/// contend on the same lock. Each push takes a global sequence number while
/// holding its lane lock; `snapshot` uses that sequence as a cut, which makes
/// every snapshot a prefix of the global push order.
///
/// Retention is by time: anything older than `newest - window` is evicted
/// on push. Pushes evict their own lane and try (without blocking) to
/// evict the others; `snapshot` filters whatever eviction missed.
#[derive(Debug)]
pub struct RingBuffer {
    window: Duration,
    lanes: RwLock<BTreeMap<StreamId, Arc<Mutex<VecDeque<Entry>>>>>,
    sequence: AtomicU64,
    newest: AtomicU64,
    evicted: AtomicU64,
}

#[derive(Debug, Clone)]
struct Entry {
    seq: u64,
    chunk: Chunk,
}

/// Point-in-time counters for a buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub chunks: usize,
    pub bytes: usize,
    pub streams: usize,
    pub oldest: Option<Timestamp>,
    pub newest: Option<Timestamp>,
    /// Chunks dropped by time-based eviction since creation.
    pub evicted: u64,
}

/// An immutable copy of the buffer contents, ordered by timestamp and then
/// by push order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BufferSnapshot {
    chunks: Vec<Chunk>,
}

impl BufferSnapshot {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn into_chunks(self) -> Vec<Chunk> {
        self.chunks
    }

    pub fn oldest(&self) -> Option<Timestamp> {
        self.chunks.first().map(|c| c.timestamp)
    }

    pub fn newest(&self) -> Option<Timestamp> {
        self.chunks.last().map(|c| c.timestamp)
    }

    /// Span between the oldest and newest chunk.
    pub fn duration(&self) -> Duration {
        match (self.oldest(), self.newest()) {
            (Some(oldest), Some(newest)) => newest.duration_since(oldest),
            _ => Duration::ZERO,
        }
    }

    /// Chunks belonging to one stream, in order.
    pub fn stream(&self, stream_id: StreamId) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter().filter(move |c| c.stream_id == stream_id)
    }

    pub fn total_bytes(&self) -> usize {
        self.chunks.iter().map(Chunk::size).sum()
    }
}

impl RingBuffer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            lanes: RwLock::new(BTreeMap::new()),
            sequence: AtomicU64::new(0),
            newest: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Append a chunk and evict anything that fell out of the window.
    pub fn push(&self, chunk: Chunk) {
        let stream_id = chunk.stream_id;
        let lane = self.lane(stream_id);

        let newest = self
            .newest
            .fetch_max(chunk.timestamp.as_micros(), Ordering::AcqRel)
            .max(chunk.timestamp.as_micros());
        let horizon = Timestamp::from_micros(newest).saturating_sub(self.window);

        {
            let mut entries = lane.lock();
            let seq = self.sequence.fetch_add(1, Ordering::AcqRel);
            entries.push_back(Entry { seq, chunk });
            self.evict(&mut entries, horizon);
        }

        let lanes = self.lanes.read();
        for (id, other) in lanes.iter() {
            if *id == stream_id {
                continue;
            }
            if let Some(mut entries) = other.try_lock() {
                self.evict(&mut entries, horizon);
            }
        }
    }

    /// Copy out a consistent view of the buffer.
    pub fn snapshot(&self) -> BufferSnapshot {
        let cut = self.sequence.load(Ordering::Acquire);
        let lanes: Vec<_> = self.lanes.read().values().cloned().collect();

        let mut entries: Vec<Entry> = Vec::new();
        for lane in lanes {
            let lane = lane.lock();
            entries.extend(lane.iter().filter(|e| e.seq < cut).cloned());
        }

        let Some(newest) = entries.iter().map(|e| e.chunk.timestamp).max() else {
            return BufferSnapshot::default();
        };
        let horizon = newest.saturating_sub(self.window);
        entries.retain(|e| e.chunk.timestamp >= horizon);
        entries.sort_by_key(|e| (e.chunk.timestamp, e.seq));

        BufferSnapshot {
            chunks: entries.into_iter().map(|e| e.chunk).collect(),
        }
    }

    /// Drop everything pushed so far. Pushes racing with the clear survive.
    pub fn clear(&self) {
        let cut = self.sequence.load(Ordering::Acquire);
        let lanes = self.lanes.read();
        for lane in lanes.values() {
            lane.lock().retain(|e| e.seq >= cut);
        }
        log::debug!("Replay buffer cleared");
    }

    pub fn stats(&self) -> BufferStats {
        let lanes = self.lanes.read();
        let mut stats = BufferStats {
            streams: lanes.len(),
            evicted: self.evicted.load(Ordering::Relaxed),
            ..BufferStats::default()
        };
        for lane in lanes.values() {
            let entries = lane.lock();
            stats.chunks += entries.len();
            stats.bytes += entries.iter().map(|e| e.chunk.size()).sum::<usize>();
            for entry in entries.iter() {
                let ts = entry.chunk.timestamp;
                stats.oldest = Some(stats.oldest.map_or(ts, |o| o.min(ts)));
                stats.newest = Some(stats.newest.map_or(ts, |n| n.max(ts)));
            }
        }
        stats
    }

    fn lane(&self, stream_id: StreamId) -> Arc<Mutex<VecDeque<Entry>>> {
        if let Some(lane) = self.lanes.read().get(&stream_id) {
            return Arc::clone(lane);
        }
        Arc::clone(self.lanes.write().entry(stream_id).or_default())
    }

    fn evict(&self, entries: &mut VecDeque<Entry>, horizon: Timestamp) {
        let mut dropped = 0u64;
        while entries.front().is_some_and(|e| e.chunk.timestamp < horizon) {
            entries.pop_front();
            dropped += 1;
        }
        if dropped > 0 {
            self.evicted.fetch_add(dropped, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn video(ms: u64) -> Chunk {
        Chunk::video(Timestamp::from_millis(ms), vec![0u8; 4])
    }

    fn audio(stream: u16, ms: u64) -> Chunk {
        Chunk::audio(StreamId(stream), Timestamp::from_millis(ms), vec![0u8; 8])
    }

    #[test]
    fn empty_snapshot() {
        let buf = RingBuffer::new(Duration::from_secs(5));
        let snap = buf.snapshot();
        assert!(snap.is_empty());
        assert_eq!(snap.duration(), Duration::ZERO);
        assert_eq!(snap.oldest(), None);
    }

    #[test]
    fn keeps_only_the_window() {
        let buf = RingBuffer::new(Duration::from_secs(1));
        for ms in (0..=3000).step_by(100) {
            buf.push(video(ms));
        }
        let snap = buf.snapshot();
        assert_eq!(snap.oldest(), Some(Timestamp::from_millis(2000)));
        assert_eq!(snap.newest(), Some(Timestamp::from_millis(3000)));
        assert_eq!(snap.duration(), Duration::from_secs(1));
        assert_eq!(snap.len(), 11);
        assert_eq!(buf.stats().evicted, 20);
    }

    #[test]
    fn window_applies_across_streams() {
        let buf = RingBuffer::new(Duration::from_secs(1));
        buf.push(audio(1, 0));
        buf.push(audio(1, 500));
        // only the video lane sees new data
        buf.push(video(2000));

        let snap = buf.snapshot();
        assert_eq!(snap.len(), 1);
        assert!(snap.chunks()[0].is_video);
    }

    #[test]
    fn snapshot_is_ordered_by_timestamp() {
        let buf = RingBuffer::new(Duration::from_secs(10));
        buf.push(video(30));
        buf.push(audio(1, 10));
        buf.push(audio(2, 20));
        buf.push(video(0));

        let ts: Vec<u64> = buf
            .snapshot()
            .chunks()
            .iter()
            .map(|c| c.timestamp.as_micros() / 1000)
            .collect();
        assert_eq!(ts, vec![0, 10, 20, 30]);
    }

    #[test]
    fn equal_timestamps_keep_push_order() {
        let buf = RingBuffer::new(Duration::from_secs(10));
        buf.push(audio(2, 10));
        buf.push(audio(1, 10));
        buf.push(video(10));

        let streams: Vec<StreamId> = buf.snapshot().chunks().iter().map(|c| c.stream_id).collect();
        assert_eq!(streams, vec![StreamId(2), StreamId(1), StreamId::VIDEO]);
    }

    #[test]
    fn stream_filter_and_bytes() {
        let buf = RingBuffer::new(Duration::from_secs(10));
        buf.push(video(0));
        buf.push(audio(1, 0));
        buf.push(audio(1, 10));

        let snap = buf.snapshot();
        assert_eq!(snap.stream(StreamId(1)).count(), 2);
        assert_eq!(snap.stream(StreamId::VIDEO).count(), 1);
        assert_eq!(snap.total_bytes(), 4 + 8 + 8);

        let stats = buf.stats();
        assert_eq!(stats.chunks, 3);
        assert_eq!(stats.streams, 2);
        assert_eq!(stats.bytes, 20);
    }

    #[test]
    fn clear_empties_buffer() {
        let buf = RingBuffer::new(Duration::from_secs(10));
        buf.push(video(0));
        buf.push(audio(1, 5));
        buf.clear();
        assert!(buf.snapshot().is_empty());

        buf.push(video(10));
        assert_eq!(buf.snapshot().len(), 1);
    }

    #[test]
    fn snapshot_is_unaffected_by_later_pushes() {
        let buf = RingBuffer::new(Duration::from_secs(10));
        buf.push(video(0));
        let snap = buf.snapshot();
        buf.push(video(10));
        buf.clear();
        assert_eq!(snap.len(), 1);
    }

    #[test]
    fn concurrent_snapshots_see_a_prefix_of_each_stream() {
        let buf = Arc::new(RingBuffer::new(Duration::from_secs(3600)));
        let producers: Vec<_> = (0..4u16)
            .map(|stream| {
                let buf = Arc::clone(&buf);
                thread::spawn(move || {
                    for i in 0..2000u64 {
                        buf.push(Chunk::audio(
                            StreamId(stream),
                            Timestamp::from_micros(i),
                            i.to_le_bytes().to_vec(),
                        ));
                    }
                })
            })
            .collect();

        for _ in 0..50 {
            let snap = buf.snapshot();
            for stream in 0..4u16 {
                let seen: Vec<u64> = snap
                    .stream(StreamId(stream))
                    .map(|c| c.timestamp.as_micros())
                    .collect();
                let expected: Vec<u64> = (0..seen.len() as u64).collect();
                assert_eq!(seen, expected, "stream {stream} has a hole");
            }
        }

        for producer in producers {
            producer.join().unwrap();
        }
        assert_eq!(buf.snapshot().len(), 8000);
    }
}
