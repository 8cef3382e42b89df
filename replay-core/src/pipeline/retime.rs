use crate::models::chunk::{Chunk, Timestamp};

/// Map captured video frames onto a constant frame rate.
///
/// Slots start at the first frame and are spaced `1 / framerate` apart up
/// to `end`. Each slot repeats the latest frame at or before it, so slow
/// sources are padded and fast sources are decimated. `frames` must be in
/// timestamp order.
pub fn retime_video(frames: &[Chunk], framerate: u32, end: Timestamp) -> Vec<Chunk> {
    let Some(first) = frames.first() else {
        return Vec::new();
    };
    let framerate = u64::from(framerate.max(1));
    let start = first.timestamp.as_micros();
    let end = end.as_micros().max(start);

    let slot_count = (end - start) * framerate / 1_000_000 + 1;
    let mut output = Vec::with_capacity(slot_count as usize);
    let mut current = 0usize;

    for slot in 0..slot_count {
        let slot_time = start + slot * 1_000_000 / framerate;
        while current + 1 < frames.len() && frames[current + 1].timestamp.as_micros() <= slot_time {
            current += 1;
        }
        let frame = &frames[current];
        output.push(Chunk {
            stream_id: frame.stream_id,
            timestamp: Timestamp::from_micros(slot_time),
            payload: frame.payload.clone(),
            is_video: true,
        });
    }
    output
}
