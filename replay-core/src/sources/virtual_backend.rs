//! In-process capture backend.
//!
//! Hosts synthetic endpoints that behave like real devices: they appear in
//! enumeration, can be opened, deliver units at a fixed cadence and can be
//! unplugged while a session is reading from them. Used by the CLI demo and
//! by tests; platform backends implement the same `SourceBackend` trait.

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::models::chunk::{AudioFrame, MediaUnit, VideoFrame};
use crate::models::error::CaptureError;
use crate::models::source::{SourceDescriptor, SourceKind};
use crate::traits::capture_source::{CaptureSource, SourceBackend};

/// Length of one generated audio block.
const AUDIO_BLOCK: Duration = Duration::from_millis(10);

const FEED_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy)]
enum Generator {
    /// Units are pushed through a `SourceFeed`.
    Feed,
    Tone {
        frequency: f32,
        amplitude: f32,
        sample_rate: u32,
        channels: u16,
    },
    TestPattern {
        width: u32,
        height: u32,
        framerate: u32,
    },
}

struct VirtualEntry {
    descriptor: SourceDescriptor,
    generator: Generator,
    present: Arc<AtomicBool>,
    fail_open: bool,
    feed: (Sender<MediaUnit>, Receiver<MediaUnit>),
}

impl VirtualEntry {
    fn new(descriptor: SourceDescriptor, generator: Generator) -> Self {
        Self {
            descriptor,
            generator,
            present: Arc::new(AtomicBool::new(true)),
            fail_open: false,
            feed: crossbeam_channel::bounded(FEED_CAPACITY),
        }
    }
}

#[derive(Default)]
struct Inner {
    entries: Vec<VirtualEntry>,
    enumeration_delay: Duration,
}

/// A `SourceBackend` whose endpoints are created by the caller.
#[derive(Default)]
pub struct VirtualBackend {
    inner: Mutex<Inner>,
}

impl VirtualBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend with one display, a default microphone and default desktop
    /// audio, all generating content.
    pub fn with_demo_sources() -> Self {
        let backend = Self::new();
        backend.add_test_pattern("screen", "Virtual Display", 64, 36, 30);
        backend.add_tone("mic", SourceKind::Microphone, "Virtual Microphone", 440.0, true);
        backend.add_tone("desktop", SourceKind::SystemSound, "Virtual Desktop Audio", 660.0, true);
        backend
    }

    pub fn add_display(&self, id: &str, name: &str) {
        self.insert(
            SourceDescriptor::new(id, SourceKind::VideoDisplay, name),
            Generator::Feed,
        );
    }

    pub fn add_microphone(&self, id: &str, name: &str, is_default: bool) {
        self.insert(
            SourceDescriptor::new(id, SourceKind::Microphone, name).with_default(is_default),
            Generator::Feed,
        );
    }

    pub fn add_system_sound(&self, id: &str, name: &str, is_default: bool) {
        self.insert(
            SourceDescriptor::new(id, SourceKind::SystemSound, name).with_default(is_default),
            Generator::Feed,
        );
    }

    pub fn add_application_audio(&self, id: &str, name: &str) {
        self.insert(
            SourceDescriptor::new(id, SourceKind::ApplicationAudio, name),
            Generator::Feed,
        );
    }

    /// Audio source producing a 48 kHz stereo sine in 10 ms blocks.
    pub fn add_tone(&self, id: &str, kind: SourceKind, name: &str, frequency: f32, is_default: bool) {
        self.insert(
            SourceDescriptor::new(id, kind, name).with_default(is_default),
            Generator::Tone {
                frequency,
                amplitude: 0.25,
                sample_rate: 48_000,
                channels: 2,
            },
        );
    }

    /// Display source producing solid RGBA frames whose value counts up.
    pub fn add_test_pattern(&self, id: &str, name: &str, width: u32, height: u32, framerate: u32) {
        self.insert(
            SourceDescriptor::new(id, SourceKind::VideoDisplay, name),
            Generator::TestPattern {
                width,
                height,
                framerate: framerate.max(1),
            },
        );
    }

    /// Unplug a source. Open handles start reporting `SourceLost`.
    pub fn remove(&self, id: &str) {
        let mut inner = self.inner.lock();
        if let Some(pos) = inner.entries.iter().position(|e| e.descriptor.id == id) {
            let entry = inner.entries.remove(pos);
            entry.present.store(false, Ordering::SeqCst);
            log::info!("Virtual source removed: {}", id);
        }
    }

    /// Make `open` fail for `id` with `DeviceNotAvailable`.
    pub fn set_open_failure(&self, id: &str, fail: bool) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.iter_mut().find(|e| e.descriptor.id == id) {
            entry.fail_open = fail;
        }
    }

    /// Slow down every following `enumerate` call.
    pub fn set_enumeration_delay(&self, delay: Duration) {
        self.inner.lock().enumeration_delay = delay;
    }

    /// Handle for pushing units into a feed-driven source.
    pub fn feed(&self, id: &str) -> Option<SourceFeed> {
        let inner = self.inner.lock();
        inner
            .entries
            .iter()
            .find(|e| e.descriptor.id == id)
            .map(|e| SourceFeed {
                sender: e.feed.0.clone(),
                present: Arc::clone(&e.present),
            })
    }

    fn insert(&self, descriptor: SourceDescriptor, generator: Generator) {
        let mut inner = self.inner.lock();
        if let Some(old) = inner.entries.iter().position(|e| e.descriptor.id == descriptor.id) {
            let old = inner.entries.remove(old);
            old.present.store(false, Ordering::SeqCst);
        }
        log::debug!("Virtual source added: {} ({:?})", descriptor.id, descriptor.kind);
        inner.entries.push(VirtualEntry::new(descriptor, generator));
    }
}

impl SourceBackend for VirtualBackend {
    fn enumerate(&self) -> Result<Vec<SourceDescriptor>, CaptureError> {
        let delay = self.inner.lock().enumeration_delay;
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        let inner = self.inner.lock();
        Ok(inner.entries.iter().map(|e| e.descriptor.clone()).collect())
    }

    fn open(&self, source: &SourceDescriptor) -> Result<Box<dyn CaptureSource>, CaptureError> {
        let inner = self.inner.lock();
        let entry = inner
            .entries
            .iter()
            .find(|e| e.descriptor.id == source.id)
            .ok_or_else(|| CaptureError::SourceLost(source.id.clone()))?;
        if entry.fail_open {
            return Err(CaptureError::DeviceNotAvailable(source.id.clone()));
        }

        Ok(Box::new(VirtualSource {
            descriptor: entry.descriptor.clone(),
            generator: entry.generator,
            present: Arc::clone(&entry.present),
            feed: entry.feed.1.clone(),
            next_due: Instant::now(),
            produced: 0,
        }))
    }
}

/// Pushes units into a feed-driven virtual source.
#[derive(Clone)]
pub struct SourceFeed {
    sender: Sender<MediaUnit>,
    present: Arc<AtomicBool>,
}

impl SourceFeed {
    /// Returns `false` if the source is gone or its queue is full.
    pub fn push_audio(&self, samples: Vec<f32>, sample_rate: u32, channels: u16) -> bool {
        self.push(MediaUnit::Audio(AudioFrame {
            samples,
            sample_rate,
            channels,
        }))
    }

    pub fn push_video(&self, width: u32, height: u32, data: impl Into<Bytes>) -> bool {
        self.push(MediaUnit::Video(VideoFrame {
            width,
            height,
            data: data.into(),
        }))
    }

    fn push(&self, unit: MediaUnit) -> bool {
        self.present.load(Ordering::SeqCst) && self.sender.try_send(unit).is_ok()
    }
}

struct VirtualSource {
    descriptor: SourceDescriptor,
    generator: Generator,
    present: Arc<AtomicBool>,
    feed: Receiver<MediaUnit>,
    next_due: Instant,
    produced: u64,
}

impl VirtualSource {
    /// Sleep until the next generated unit is due. Returns `false` if that
    /// is further away than `timeout`.
    fn wait_for_next(&mut self, period: Duration, timeout: Duration) -> bool {
        let now = Instant::now();
        if self.next_due > now {
            let wait = self.next_due - now;
            if wait > timeout {
                thread::sleep(timeout);
                return false;
            }
            thread::sleep(wait);
        }
        self.next_due += period;
        true
    }

    fn tone_block(&mut self, frequency: f32, amplitude: f32, sample_rate: u32, channels: u16) -> AudioFrame {
        let frames = (sample_rate as u64 * AUDIO_BLOCK.as_micros() as u64 / 1_000_000) as usize;
        let start = self.produced * frames as u64;
        let mut samples = Vec::with_capacity(frames * channels as usize);
        for i in 0..frames as u64 {
            let t = ((start + i) % u64::from(sample_rate)) as f32 / sample_rate as f32;
            let value = (TAU * frequency * t).sin() * amplitude;
            samples.extend(std::iter::repeat(value).take(channels as usize));
        }
        AudioFrame {
            samples,
            sample_rate,
            channels,
        }
    }

    fn pattern_frame(&self, width: u32, height: u32) -> VideoFrame {
        let value = (self.produced % 256) as u8;
        VideoFrame {
            width,
            height,
            data: Bytes::from(vec![value; (width * height * 4) as usize]),
        }
    }
}

impl CaptureSource for VirtualSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    fn next_unit(&mut self, timeout: Duration) -> Result<Option<MediaUnit>, CaptureError> {
        if !self.present.load(Ordering::SeqCst) {
            return Err(CaptureError::SourceLost(self.descriptor.id.clone()));
        }

        let unit = match self.generator {
            Generator::Feed => match self.feed.recv_timeout(timeout) {
                Ok(unit) => Some(unit),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(CaptureError::SourceLost(self.descriptor.id.clone()))
                }
            },
            Generator::Tone {
                frequency,
                amplitude,
                sample_rate,
                channels,
            } => {
                if self.wait_for_next(AUDIO_BLOCK, timeout) {
                    Some(MediaUnit::Audio(self.tone_block(frequency, amplitude, sample_rate, channels)))
                } else {
                    None
                }
            }
            Generator::TestPattern {
                width,
                height,
                framerate,
            } => {
                let period = Duration::from_micros(1_000_000 / u64::from(framerate));
                if self.wait_for_next(period, timeout) {
                    Some(MediaUnit::Video(self.pattern_frame(width, height)))
                } else {
                    None
                }
            }
        };

        if unit.is_some() {
            self.produced += 1;
        }
        Ok(unit)
    }

    fn close(&mut self) {
        log::debug!("Virtual source closed: {}", self.descriptor.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumerate_lists_added_sources() {
        let backend = VirtualBackend::new();
        backend.add_display("screen", "Display");
        backend.add_microphone("mic", "Mic", true);
        let sources = backend.enumerate().unwrap();
        assert_eq!(sources.len(), 2);
        assert!(sources[1].is_default);
    }

    #[test]
    fn readding_an_id_replaces_it() {
        let backend = VirtualBackend::new();
        backend.add_microphone("mic", "Old", false);
        backend.add_microphone("mic", "New", true);
        let sources = backend.enumerate().unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].display_name, "New");
    }

    #[test]
    fn feed_delivers_units() {
        let backend = VirtualBackend::new();
        backend.add_microphone("mic", "Mic", true);
        let descriptor = backend.enumerate().unwrap().remove(0);
        let mut source = backend.open(&descriptor).unwrap();

        let feed = backend.feed("mic").unwrap();
        assert!(feed.push_audio(vec![0.5; 4], 48_000, 2));

        match source.next_unit(Duration::from_millis(100)).unwrap() {
            Some(MediaUnit::Audio(frame)) => assert_eq!(frame.frame_count(), 2),
            other => panic!("unexpected unit: {:?}", other),
        }
        assert_eq!(source.next_unit(Duration::from_millis(10)).unwrap(), None);
    }

    #[test]
    fn removed_source_reports_lost() {
        let backend = VirtualBackend::new();
        backend.add_microphone("mic", "Mic", true);
        let descriptor = backend.enumerate().unwrap().remove(0);
        let mut source = backend.open(&descriptor).unwrap();
        let feed = backend.feed("mic").unwrap();

        backend.remove("mic");
        assert_eq!(
            source.next_unit(Duration::from_millis(10)),
            Err(CaptureError::SourceLost("mic".into()))
        );
        assert!(!feed.push_audio(vec![0.0; 2], 48_000, 2));
        assert!(backend.open(&descriptor).is_err());
    }

    #[test]
    fn open_failure_is_device_not_available() {
        let backend = VirtualBackend::new();
        backend.add_display("screen", "Display");
        backend.set_open_failure("screen", true);
        let descriptor = backend.enumerate().unwrap().remove(0);
        assert_eq!(
            backend.open(&descriptor).err(),
            Some(CaptureError::DeviceNotAvailable("screen".into()))
        );
    }

    #[test]
    fn tone_produces_ten_millisecond_blocks() {
        let backend = VirtualBackend::new();
        backend.add_tone("mic", SourceKind::Microphone, "Tone", 440.0, true);
        let descriptor = backend.enumerate().unwrap().remove(0);
        let mut source = backend.open(&descriptor).unwrap();

        match source.next_unit(Duration::from_millis(100)).unwrap() {
            Some(MediaUnit::Audio(frame)) => {
                assert_eq!(frame.sample_rate, 48_000);
                assert_eq!(frame.frame_count(), 480);
                assert!(frame.samples.iter().any(|s| s.abs() > 0.1));
            }
            other => panic!("unexpected unit: {:?}", other),
        }
    }

    #[test]
    fn test_pattern_respects_framerate() {
        let backend = VirtualBackend::new();
        backend.add_test_pattern("screen", "Pattern", 4, 2, 10);
        let descriptor = backend.enumerate().unwrap().remove(0);
        let mut source = backend.open(&descriptor).unwrap();

        let first = source.next_unit(Duration::from_millis(10)).unwrap();
        assert!(matches!(first, Some(MediaUnit::Video(ref f)) if f.data.len() == 32));
        // the next frame is 100 ms away
        assert_eq!(source.next_unit(Duration::from_millis(10)).unwrap(), None);
    }
}
