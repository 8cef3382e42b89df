//! One thread per bound source.
//!
//! Video goes straight into the ring buffer. Audio is stamped and handed to
//! the mix worker over a bounded queue; a full queue drops the block rather
//! than stalling the source.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Sender, TrySendError};
use parking_lot::Mutex;

use crate::models::chunk::{AudioFrame, Chunk, MediaUnit, Timestamp};
use crate::models::diagnostics::SourceDiagnostics;
use crate::models::error::CaptureError;
use crate::processing::pcm;
use crate::processing::ring_buffer::RingBuffer;
use crate::session::clock::CaptureClock;
use crate::session::events::EventSink;
use crate::session::worker::WorkerHandle;
use crate::traits::capture_source::CaptureSource;

/// How long a worker blocks on its source before rechecking the stop flag.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// One audio block on its way to the mixer.
#[derive(Debug, Clone)]
pub struct MixInput {
    pub source_id: String,
    pub timestamp: Timestamp,
    pub frame: AudioFrame,
}

/// Where a worker delivers its units.
#[derive(Clone)]
pub enum IngestRoute {
    Video(Arc<RingBuffer>),
    Audio(Sender<MixInput>),
}

pub struct IngestContext {
    pub clock: CaptureClock,
    pub running: Arc<AtomicBool>,
    pub events: Arc<EventSink>,
    pub stats: Arc<Mutex<SourceDiagnostics>>,
}

pub fn spawn_ingest(
    mut source: Box<dyn CaptureSource>,
    route: IngestRoute,
    ctx: IngestContext,
) -> Result<WorkerHandle, CaptureError> {
    let id = source.descriptor().id.clone();
    WorkerHandle::spawn(format!("ingest-{}", id), move || {
        log::debug!("Ingest started for {}", id);
        run(source.as_mut(), &route, &ctx);
        source.close();
        log::debug!("Ingest stopped for {}", id);
    })
}

fn run(source: &mut dyn CaptureSource, route: &IngestRoute, ctx: &IngestContext) {
    let id = source.descriptor().id.clone();
    let mut mismatched = false;

    while ctx.running.load(Ordering::SeqCst) {
        let unit = match source.next_unit(POLL_INTERVAL) {
            Ok(Some(unit)) => unit,
            Ok(None) => continue,
            Err(e) => {
                if !matches!(e, CaptureError::SourceLost(_)) {
                    log::error!("Capture error on {}: {}", id, e);
                }
                ctx.stats.lock().lost = true;
                if ctx.running.load(Ordering::SeqCst) {
                    ctx.events.source_lost(&id);
                }
                return;
            }
        };

        match (unit, route) {
            (MediaUnit::Video(frame), IngestRoute::Video(ring)) => {
                ring.push(Chunk::video(ctx.clock.now(), frame.data));
                ctx.stats.lock().units += 1;
            }
            (MediaUnit::Audio(frame), IngestRoute::Audio(mixer)) => {
                let block = Duration::from_micros(
                    frame.frame_count() as u64 * 1_000_000 / u64::from(frame.sample_rate.max(1)),
                );
                // stamp with the capture time of the first sample
                let timestamp = ctx.clock.now().saturating_sub(block);
                let peak = pcm::peak_level(&frame.samples);

                let input = MixInput {
                    source_id: id.clone(),
                    timestamp,
                    frame,
                };
                let mut stats = ctx.stats.lock();
                stats.units += 1;
                stats.peak_level = peak;
                match mixer.try_send(input) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => stats.dropped += 1,
                    Err(TrySendError::Disconnected(_)) => return,
                }
            }
            _ => {
                if !mismatched {
                    log::warn!("{} delivered a unit of the wrong kind, ignoring", id);
                    mismatched = true;
                }
                ctx.stats.lock().dropped += 1;
            }
        }
    }
}
