use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::NaiveDateTime;
use parking_lot::Mutex;

use crate::models::artifact::{OutputArtifact, TrackInfo};
use crate::models::chunk::{Chunk, Timestamp};
use crate::models::config::CaptureConfig;
use crate::models::error::CaptureError;
use crate::pipeline::{naming, retime};
use crate::processing::ring_buffer::BufferSnapshot;
use crate::storage::atomic_writer::AtomicFileWriter;
use crate::storage::metadata;
use crate::traits::encoder::{EncodeJob, EncodeSettings, Encoder};

/// Everything one flush needs, captured at trigger time.
#[derive(Debug, Clone)]
pub struct FlushRequest {
    pub snapshot: BufferSnapshot,
    pub config: Arc<CaptureConfig>,
    /// Manifest skeleton: the video track followed by every audio output stream.
    pub tracks: Vec<TrackInfo>,
    /// Full-screen application at trigger time.
    pub app: Option<String>,
    /// Local wall-clock time used for the file name.
    pub requested_at: NaiveDateTime,
}

/// The claim on the flush slot for one flush.
///
/// Dropping the guard releases the slot. `finish` releases it and runs the
/// reporting step in one go, unless the flush was abandoned first.
#[derive(Debug)]
pub struct FlushGuard {
    id: u64,
    cancel: Arc<AtomicBool>,
    active: Arc<Mutex<Option<ActiveFlush>>>,
}

impl FlushGuard {
    /// Whether this flush still owns the slot.
    pub fn is_current(&self) -> bool {
        self.active.lock().as_ref().is_some_and(|a| a.id == self.id)
    }

    /// Release the slot and run `report` while no other flush can begin.
    /// Returns `false` without running `report` if the flush was abandoned.
    pub fn finish(self, report: impl FnOnce()) -> bool {
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|a| a.id == self.id) {
            *active = None;
            report();
            true
        } else {
            false
        }
    }
}

impl Drop for FlushGuard {
    fn drop(&mut self) {
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|a| a.id == self.id) {
            *active = None;
        }
    }
}

#[derive(Debug)]
struct ActiveFlush {
    id: u64,
    cancel: Arc<AtomicBool>,
    /// Temporary file of the running flush, once it has one.
    temp_path: Option<PathBuf>,
}

/// Turns buffer snapshots into files. At most one flush runs at a time.
pub struct FlushPipeline {
    encoder: Arc<dyn Encoder>,
    active: Arc<Mutex<Option<ActiveFlush>>>,
    next_id: AtomicU64,
}

impl FlushPipeline {
    pub fn new(encoder: Arc<dyn Encoder>) -> Self {
        Self {
            encoder,
            active: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Claim the flush slot, or `FlushBusy` if a flush is already running.
    pub fn begin(&self) -> Result<FlushGuard, CaptureError> {
        let mut active = self.active.lock();
        if active.is_some() {
            return Err(CaptureError::FlushBusy);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = Arc::new(AtomicBool::new(false));
        *active = Some(ActiveFlush {
            id,
            cancel: Arc::clone(&cancel),
            temp_path: None,
        });
        Ok(FlushGuard {
            id,
            cancel,
            active: Arc::clone(&self.active),
        })
    }

    pub fn is_flushing(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Ask the running flush to stop. It fails with `FlushCancelled` and
    /// removes its temporary file on its own thread.
    pub fn cancel(&self) {
        if let Some(active) = self.active.lock().as_ref() {
            log::info!("Cancelling flush in progress");
            active.cancel.store(true, Ordering::SeqCst);
        }
    }

    /// Give up on the running flush without waiting for its thread: cancel
    /// it, delete its temporary file and free the slot. The abandoned
    /// flush can no longer commit or report.
    ///
    /// Returns `false` if no flush was running.
    pub fn abandon(&self) -> bool {
        let Some(active) = self.active.lock().take() else {
            return false;
        };
        active.cancel.store(true, Ordering::SeqCst);
        if let Some(path) = active.temp_path {
            match fs::remove_file(&path) {
                Ok(()) => log::info!("Removed partial output {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => log::warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
        log::warn!("Abandoned flush {}", active.id);
        true
    }

    /// Encode `request` and move the result into place. Requires the guard
    /// from `begin`; the slot stays claimed until the guard is finished or
    /// dropped.
    pub fn flush(&self, request: FlushRequest, guard: &FlushGuard) -> Result<OutputArtifact, CaptureError> {
        let config = &request.config;
        let (Some(start), Some(end)) = (request.snapshot.oldest(), request.snapshot.newest()) else {
            return Err(CaptureError::FlushFailed("replay buffer is empty".into()));
        };

        let (records, tracks) = assemble(&request.snapshot, &request.tracks, config.framerate, start, end);
        let duration = end.duration_since(start);
        let container = self.encoder.container(config.container);

        let path = naming::unique_path(&naming::output_path(
            config,
            container,
            request.app.as_deref(),
            &request.requested_at,
        ));
        log::info!(
            "Saving {} records ({:.1}s) to {}",
            records.len(),
            duration.as_secs_f64(),
            path.display()
        );

        let mut writer = AtomicFileWriter::create(path, Arc::clone(&guard.cancel))?;
        self.track_temp_file(guard, writer.temp_path())?;

        let job = EncodeJob {
            settings: EncodeSettings {
                container: config.container,
                codec: config.codec,
                quality: config.quality,
                framerate: config.framerate,
            },
            tracks: &tracks,
            records: &records,
            duration,
        };

        if let Err(e) = self.encoder.encode(&job, &mut writer) {
            if writer.is_cancelled() {
                return Err(CaptureError::FlushCancelled);
            }
            return Err(e);
        }

        let final_path = writer.final_path().to_path_buf();
        let checksum = {
            // an abandoned flush must not move its file into place
            let active = self.active.lock();
            if !active.as_ref().is_some_and(|a| a.id == guard.id) {
                return Err(CaptureError::FlushCancelled);
            }
            writer.commit()?
        };

        let artifact = OutputArtifact {
            id: uuid::Uuid::new_v4().to_string(),
            path: final_path,
            container,
            duration_secs: duration.as_secs_f64(),
            track_manifest: tracks,
            checksum,
            created_at: chrono::Utc::now().to_rfc3339(),
        };

        if config.write_sidecar {
            if let Err(e) = metadata::write_metadata(&artifact) {
                log::warn!("Failed to write metadata sidecar: {}", e);
            }
        }

        log::info!("Saved replay {}", artifact.path.display());
        Ok(artifact)
    }

    fn track_temp_file(&self, guard: &FlushGuard, temp_path: &Path) -> Result<(), CaptureError> {
        match self.active.lock().as_mut() {
            Some(active) if active.id == guard.id => {
                active.temp_path = Some(temp_path.to_path_buf());
                Ok(())
            }
            _ => Err(CaptureError::FlushCancelled),
        }
    }
}

/// Retime video, rebase every record to the start of the replay and fill in
/// per-track record counts.
fn assemble(
    snapshot: &BufferSnapshot,
    tracks: &[TrackInfo],
    framerate: u32,
    start: Timestamp,
    end: Timestamp,
) -> (Vec<Chunk>, Vec<TrackInfo>) {
    let (video, audio): (Vec<Chunk>, Vec<Chunk>) =
        snapshot.chunks().iter().cloned().partition(|c| c.is_video);

    let mut records = retime::retime_video(&video, framerate, end);
    records.extend(audio);
    for record in &mut records {
        record.timestamp = Timestamp::from_micros(record.timestamp.as_micros() - start.as_micros());
    }
    records.sort_by_key(|c| (c.timestamp, c.stream_id));

    let tracks = tracks
        .iter()
        .cloned()
        .map(|mut track| {
            track.chunk_count = records.iter().filter(|c| c.stream_id == track.stream_id).count();
            track
        })
        .collect();
    (records, tracks)
}
