//! Session controller: owns one recording session at a time.
//!
//! ```text
//! [display]  → ingest ──────────────────────────────┐
//! [audio 1]  → ingest ─┐                            ├→ [RingBuffer] ─ trigger → [FlushPipeline] → file
//! [audio 2]  → ingest ─┴→ mix queue → [TrackMixers] ┘
//! ```
//!
//! All public methods take `&self`; share the controller behind an `Arc`.
//! Start, stop and trigger are serialized with each other; `state`,
//! `is_flushing` and `status_events` never wait on them.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use parking_lot::Mutex;

use crate::models::artifact::TrackInfo;
use crate::models::chunk::StreamId;
use crate::models::config::CaptureConfig;
use crate::models::diagnostics::{SessionDiagnostics, SourceDiagnostics};
use crate::models::error::CaptureError;
use crate::models::source::SourceDescriptor;
use crate::models::state::SessionState;
use crate::models::status::StatusEvent;
use crate::pipeline::flush::{FlushPipeline, FlushRequest};
use crate::processing::audio_mixer::{MixerDiagnostics, TrackMixer};
use crate::processing::ring_buffer::{BufferSnapshot, RingBuffer};
use crate::registry::active_window::ActiveWindowTracker;
use crate::registry::source_registry::{RegistrySnapshot, SourceRegistry};
use crate::session::clock::CaptureClock;
use crate::session::events::{EventSink, STATUS_CHANNEL_CAPACITY};
use crate::session::ingest::{spawn_ingest, IngestContext, IngestRoute};
use crate::session::mix_worker::spawn_mixer;
use crate::session::worker::WorkerHandle;
use crate::traits::capture_source::CaptureSource;
use crate::traits::encoder::Encoder;

/// How long `stop` waits for workers and a running flush.
pub const STOP_GRACE: Duration = Duration::from_secs(2);

const MIX_QUEUE_CAPACITY: usize = 512;

/// Everything that exists only while recording.
struct ActiveSession {
    config: Arc<CaptureConfig>,
    ring: Arc<RingBuffer>,
    running: Arc<AtomicBool>,
    workers: Vec<WorkerHandle>,
    flush_handle: Option<WorkerHandle>,
    tracks: Vec<TrackInfo>,
    source_stats: BTreeMap<String, Arc<Mutex<SourceDiagnostics>>>,
    mixer_stats: Arc<Mutex<Vec<MixerDiagnostics>>>,
}

/// Bound sources and mixers waiting for their threads.
struct Workers {
    video: Box<dyn CaptureSource>,
    video_id: String,
    audio: Vec<SourceDescriptor>,
    mixers: Vec<TrackMixer>,
    clock: CaptureClock,
}

#[derive(Debug, Default)]
struct FlushCounters {
    succeeded: AtomicU64,
    failed: AtomicU64,
}

pub struct SessionController {
    registry: Arc<SourceRegistry>,
    pipeline: Arc<FlushPipeline>,
    tracker: ActiveWindowTracker,
    events: Arc<EventSink>,
    events_rx: Receiver<StatusEvent>,
    state: Mutex<SessionState>,
    session: Mutex<Option<ActiveSession>>,
    counters: Arc<FlushCounters>,
}

impl SessionController {
    pub fn new(registry: Arc<SourceRegistry>, encoder: Arc<dyn Encoder>) -> Self {
        Self::with_tracker(registry, encoder, ActiveWindowTracker::new())
    }

    pub fn with_tracker(
        registry: Arc<SourceRegistry>,
        encoder: Arc<dyn Encoder>,
        tracker: ActiveWindowTracker,
    ) -> Self {
        let (events, events_rx) = EventSink::new(STATUS_CHANNEL_CAPACITY);
        Self {
            registry,
            pipeline: Arc::new(FlushPipeline::new(encoder)),
            tracker,
            events: Arc::new(events),
            events_rx,
            state: Mutex::new(SessionState::Idle),
            session: Mutex::new(None),
            counters: Arc::new(FlushCounters::default()),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn is_flushing(&self) -> bool {
        self.pipeline.is_flushing()
    }

    /// Receiving end of the status channel. Clones share one queue.
    pub fn status_events(&self) -> Receiver<StatusEvent> {
        self.events_rx.clone()
    }

    /// Configuration of the running session.
    pub fn config(&self) -> Option<Arc<CaptureConfig>> {
        self.session.lock().as_ref().map(|s| Arc::clone(&s.config))
    }

    pub fn active_window(&self) -> &ActiveWindowTracker {
        &self.tracker
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    /// Manifest of the running session: video first, then audio streams.
    pub fn track_manifest(&self) -> Vec<TrackInfo> {
        self.session
            .lock()
            .as_ref()
            .map(|s| s.tracks.clone())
            .unwrap_or_default()
    }

    /// Current buffer contents. Empty when idle.
    pub fn buffer_snapshot(&self) -> BufferSnapshot {
        self.session
            .lock()
            .as_ref()
            .map(|s| s.ring.snapshot())
            .unwrap_or_default()
    }

    pub fn diagnostics(&self) -> SessionDiagnostics {
        let mut diagnostics = SessionDiagnostics {
            flushes_succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            flushes_failed: self.counters.failed.load(Ordering::Relaxed),
            events_dropped: self.events.dropped(),
            ..SessionDiagnostics::default()
        };
        if let Some(session) = self.session.lock().as_ref() {
            diagnostics.sources = session
                .source_stats
                .iter()
                .map(|(id, stats)| (id.clone(), *stats.lock()))
                .collect();
            diagnostics.mixers = session.mixer_stats.lock().clone();
            diagnostics.buffer = session.ring.stats();
        }
        diagnostics
    }

    /// Bind sources and start recording into a fresh replay buffer.
    ///
    /// Fails with `InvalidConfig` (state stays `Idle`) for a config that
    /// does not validate or names an unknown audio source, and with
    /// `DeviceNotAvailable` when the display cannot be bound.
    pub fn start(&self, config: CaptureConfig) -> Result<(), CaptureError> {
        let mut session = self.session.lock();
        {
            let state = self.state.lock();
            if !state.is_idle() {
                return Err(CaptureError::InvalidState(format!("cannot start while {:?}", *state)));
            }
        }
        config.validate().map_err(CaptureError::InvalidConfig)?;

        self.set_state(SessionState::Starting);
        match self.bind(config) {
            Ok(active) => {
                log::info!(
                    "Recording started: {} tracks, {}s window",
                    active.tracks.len(),
                    active.config.buffer_duration_secs
                );
                *session = Some(active);
                self.set_state(SessionState::Recording);
                self.events.emit(StatusEvent::Started);
                Ok(())
            }
            Err(e) => {
                self.set_state(SessionState::Idle);
                if !matches!(e, CaptureError::InvalidConfig(_)) {
                    log::error!("Failed to start recording: {}", e);
                    self.events.emit(StatusEvent::StartFailed(e.clone()));
                }
                Err(e)
            }
        }
    }

    /// Halt all workers and discard the buffer.
    ///
    /// A running flush gets until `STOP_GRACE` to finish and report. Past
    /// that it is abandoned: its partial file is removed, `FlushFailed`
    /// with `FlushCancelled` is emitted before `Stopped`, and its thread
    /// can no longer report.
    pub fn stop(&self) -> Result<(), CaptureError> {
        let mut session = self.session.lock();
        let Some(mut active) = session.take() else {
            return Err(CaptureError::InvalidState("not recording".into()));
        };
        self.set_state(SessionState::Stopping);

        active.running.store(false, Ordering::SeqCst);
        let deadline = Instant::now() + STOP_GRACE;

        if let Some(flush) = active.flush_handle.take() {
            if let Err(flush) = flush.join_until(deadline) {
                log::warn!("{} did not finish within {:?}, detaching", flush.name(), STOP_GRACE);
                if self.pipeline.abandon() {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    self.events.emit(StatusEvent::FlushFailed(CaptureError::FlushCancelled));
                }
            }
        }
        for worker in active.workers.drain(..) {
            if let Err(worker) = worker.join_until(deadline) {
                log::warn!("{} did not stop within {:?}, detaching", worker.name(), STOP_GRACE);
            }
        }

        active.ring.clear();
        drop(active);

        self.set_state(SessionState::Idle);
        self.events.emit(StatusEvent::Stopped);
        log::info!("Recording stopped");
        Ok(())
    }

    /// Save the current replay buffer in the background.
    ///
    /// Returns once the flush has been handed to its thread; the outcome
    /// arrives as `FlushSucceeded` or `FlushFailed`.
    pub fn trigger(&self) -> Result<(), CaptureError> {
        let mut session = self.session.lock();
        let active = match session.as_mut() {
            Some(active) if self.state().is_recording() => active,
            _ => return Err(CaptureError::InvalidState("not recording".into())),
        };

        let guard = self.pipeline.begin()?;
        if let Some(previous) = active.flush_handle.take() {
            // the slot is free, so this thread is done
            let _ = previous.join();
        }

        let request = FlushRequest {
            snapshot: active.ring.snapshot(),
            config: Arc::clone(&active.config),
            tracks: active.tracks.clone(),
            app: self.tracker.fullscreen_app(),
            requested_at: chrono::Local::now().naive_local(),
        };
        self.events.emit(StatusEvent::FlushStarted);

        let pipeline = Arc::clone(&self.pipeline);
        let events = Arc::clone(&self.events);
        let counters = Arc::clone(&self.counters);
        let ring = Arc::clone(&active.ring);
        let clear_on_save = active.config.clear_buffer_on_save;

        let handle = WorkerHandle::spawn("replay-flush", move || {
            let result = pipeline.flush(request, &guard);
            let reported = guard.finish(|| match result {
                Ok(artifact) => {
                    if clear_on_save {
                        ring.clear();
                    }
                    counters.succeeded.fetch_add(1, Ordering::Relaxed);
                    events.emit(StatusEvent::FlushSucceeded(artifact));
                }
                Err(e) => {
                    log::error!("Flush failed: {}", e);
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    events.emit(StatusEvent::FlushFailed(e));
                }
            });
            if !reported {
                log::debug!("Abandoned flush exited");
            }
        })
        .map_err(|e| CaptureError::FlushFailed(e.to_string()))?;

        active.flush_handle = Some(handle);
        Ok(())
    }

    fn set_state(&self, state: SessionState) {
        let mut current = self.state.lock();
        if *current != state {
            log::debug!("Session state {:?} -> {:?}", *current, state);
            *current = state;
        }
    }

    /// Resolve, open and spawn everything a session needs.
    fn bind(&self, config: CaptureConfig) -> Result<ActiveSession, CaptureError> {
        let snapshot = self.enumerate()?;

        let video = match snapshot.resolve(&config.video_source_id) {
            Some(source) if source.kind.is_video() => source.clone(),
            Some(source) => {
                return Err(CaptureError::InvalidConfig(format!(
                    "{} is not a video source",
                    source.id
                )))
            }
            None => return Err(CaptureError::DeviceNotAvailable(config.video_source_id.clone())),
        };
        let (mixers, audio_sources) = resolve_tracks(&config, &snapshot)?;

        let video_source = self
            .registry
            .open(&video.id)
            .map_err(|e| CaptureError::DeviceNotAvailable(format!("{}: {}", video.id, e)))?;

        let config = Arc::new(config);
        let ring = Arc::new(RingBuffer::new(config.buffer_duration()));
        let running = Arc::new(AtomicBool::new(true));
        let clock = CaptureClock::start();
        self.events.reset();

        let mut manifest = vec![TrackInfo::video(&video.id, config.codec.name(), config.framerate)];
        manifest.extend(mixers.iter().flat_map(TrackMixer::track_infos));

        let mut active = ActiveSession {
            config: Arc::clone(&config),
            ring: Arc::clone(&ring),
            running: Arc::clone(&running),
            workers: Vec::new(),
            flush_handle: None,
            tracks: manifest,
            source_stats: BTreeMap::new(),
            mixer_stats: Arc::new(Mutex::new(vec![MixerDiagnostics::default(); mixers.len()])),
        };

        let workers = Workers {
            video: video_source,
            video_id: video.id.clone(),
            audio: audio_sources,
            mixers,
            clock,
        };
        if let Err(e) = self.spawn_workers(&mut active, workers) {
            running.store(false, Ordering::SeqCst);
            let deadline = Instant::now() + STOP_GRACE;
            for worker in active.workers.drain(..) {
                if let Err(worker) = worker.join_until(deadline) {
                    log::warn!("{} did not stop within {:?}, detaching", worker.name(), STOP_GRACE);
                }
            }
            return Err(e);
        }
        Ok(active)
    }

    fn spawn_workers(&self, active: &mut ActiveSession, workers: Workers) -> Result<(), CaptureError> {
        let stats = active.stats_for(&workers.video_id);
        let handle = spawn_ingest(
            workers.video,
            IngestRoute::Video(Arc::clone(&active.ring)),
            self.ingest_context(active, workers.clock, stats),
        )?;
        active.workers.push(handle);

        let (mix_tx, mix_rx) = crossbeam_channel::bounded(MIX_QUEUE_CAPACITY);
        for source in &workers.audio {
            let stats = active.stats_for(&source.id);
            let capture = match self.registry.open(&source.id) {
                Ok(capture) => capture,
                Err(e) => {
                    log::warn!("Could not open {}: {}", source.id, e);
                    stats.lock().lost = true;
                    self.events.source_lost(&source.id);
                    continue;
                }
            };
            let handle = spawn_ingest(
                capture,
                IngestRoute::Audio(mix_tx.clone()),
                self.ingest_context(active, workers.clock, stats),
            )?;
            active.workers.push(handle);
        }
        drop(mix_tx);

        let handle = spawn_mixer(
            workers.mixers,
            mix_rx,
            Arc::clone(&active.ring),
            workers.clock,
            Arc::clone(&active.running),
            Arc::clone(&active.mixer_stats),
            active.config.mixer.window(),
        )?;
        active.workers.push(handle);
        Ok(())
    }

    fn ingest_context(
        &self,
        active: &ActiveSession,
        clock: CaptureClock,
        stats: Arc<Mutex<SourceDiagnostics>>,
    ) -> IngestContext {
        IngestContext {
            clock,
            running: Arc::clone(&active.running),
            events: Arc::clone(&self.events),
            stats,
        }
    }

    /// Fresh registry snapshot, or the cached one if enumeration is slow.
    fn enumerate(&self) -> Result<Arc<RegistrySnapshot>, CaptureError> {
        match self.registry.enumerate() {
            Ok(snapshot) => Ok(snapshot),
            Err(failure) if failure.cached.version > 0 => {
                log::warn!("Using cached sources: {}", failure);
                Ok(failure.cached)
            }
            Err(failure) => Err(failure.error),
        }
    }
}

impl ActiveSession {
    fn stats_for(&mut self, id: &str) -> Arc<Mutex<SourceDiagnostics>> {
        Arc::clone(self.source_stats.entry(id.to_string()).or_default())
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if self.session.lock().is_some() {
            let _ = self.stop();
        }
    }
}

/// Resolve every track's source ids. Returns one mixer per track and the
/// distinct audio sources to open, in first-seen order.
fn resolve_tracks(
    config: &CaptureConfig,
    snapshot: &RegistrySnapshot,
) -> Result<(Vec<TrackMixer>, Vec<SourceDescriptor>), CaptureError> {
    let mut mixers = Vec::with_capacity(config.audio_tracks.len());
    let mut sources: Vec<SourceDescriptor> = Vec::new();
    let mut next_stream = StreamId::audio(0);

    for (index, track) in config.audio_tracks.iter().enumerate() {
        let mut lanes: Vec<(String, f32)> = Vec::with_capacity(track.sources.len());
        for id in &track.sources {
            let source = snapshot
                .resolve(id)
                .ok_or_else(|| CaptureError::InvalidConfig(format!("unknown audio source: {}", id)))?;
            if !source.kind.is_audio() {
                return Err(CaptureError::InvalidConfig(format!("{} is not an audio source", id)));
            }
            if lanes.iter().any(|(lane, _)| *lane == source.id) {
                return Err(CaptureError::InvalidConfig(format!(
                    "audio track {} resolves {} twice",
                    index, source.id
                )));
            }
            lanes.push((source.id.clone(), track.gain_of(id)));
            if !sources.iter().any(|s| s.id == source.id) {
                sources.push(source.clone());
            }
        }

        mixers.push(TrackMixer::new(track.merge_mode, lanes, next_stream, config.mixer));
        next_stream = StreamId(next_stream.0 + track.output_track_count() as u16);
    }
    Ok((mixers, sources))
}
