use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;

use crate::models::status::StatusEvent;

pub const STATUS_CHANNEL_CAPACITY: usize = 64;

/// Sending half of the status channel.
///
/// Delivery is best effort: a full channel drops the event instead of
/// blocking a capture thread. `SourceLost` is reported once per source per
/// session.
#[derive(Debug)]
pub struct EventSink {
    sender: Sender<StatusEvent>,
    dropped: AtomicU64,
    lost: Mutex<HashSet<String>>,
}

impl EventSink {
    pub fn new(capacity: usize) -> (Self, Receiver<StatusEvent>) {
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        let sink = Self {
            sender,
            dropped: AtomicU64::new(0),
            lost: Mutex::new(HashSet::new()),
        };
        (sink, receiver)
    }

    pub fn emit(&self, event: StatusEvent) {
        log::debug!("Status event: {}", event.name());
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("Status channel full, dropped {}", event.name());
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn source_lost(&self, id: &str) {
        if self.lost.lock().insert(id.to_string()) {
            log::warn!("Source lost: {}", id);
            self.emit(StatusEvent::SourceLost(id.to_string()));
        }
    }

    /// Forget reported losses. Called when a session starts.
    pub fn reset(&self) {
        self.lost.lock().clear();
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
