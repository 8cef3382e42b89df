use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;

use crate::models::error::CaptureError;
use crate::processing::audio_mixer::{MixerDiagnostics, TrackMixer};
use crate::processing::ring_buffer::RingBuffer;
use crate::session::clock::CaptureClock;
use crate::session::ingest::MixInput;
use crate::session::worker::WorkerHandle;

/// Runs every track mixer of a session on one thread.
///
/// Wakes on each incoming block or once per window, whichever comes first,
/// and moves closed windows into the ring buffer. Windows close on the
/// session clock too, so tracks keep advancing (with silence) when every
/// source is quiet or gone.
pub fn spawn_mixer(
    mut mixers: Vec<TrackMixer>,
    inputs: Receiver<MixInput>,
    ring: Arc<RingBuffer>,
    clock: CaptureClock,
    running: Arc<AtomicBool>,
    stats: Arc<Mutex<Vec<MixerDiagnostics>>>,
    poll: std::time::Duration,
) -> Result<WorkerHandle, CaptureError> {
    let start = clock.now();
    for mixer in &mut mixers {
        mixer.anchor(start);
    }

    WorkerHandle::spawn("audio-mixer", move || {
        while running.load(Ordering::SeqCst) {
            match inputs.recv_timeout(poll) {
                Ok(input) => {
                    for mixer in mixers.iter_mut().filter(|m| m.accepts(&input.source_id)) {
                        mixer.push(&input.source_id, input.timestamp, &input.frame);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            let now = clock.now();
            for mixer in &mut mixers {
                for chunk in mixer.drain(Some(now)) {
                    ring.push(chunk);
                }
            }
            *stats.lock() = mixers.iter().map(TrackMixer::diagnostics).collect();
        }
        log::debug!("Mixer stopped");
    })
}
