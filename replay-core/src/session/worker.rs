use std::thread;
use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::models::error::CaptureError;

/// A named thread whose exit can be awaited with a deadline.
///
/// The thread holds the sending half of a zero-capacity channel; it is
/// dropped when the thread returns or unwinds, which disconnects `done`.
#[derive(Debug)]
pub struct WorkerHandle {
    name: String,
    handle: thread::JoinHandle<()>,
    done: Receiver<()>,
}

impl WorkerHandle {
    pub fn spawn<F>(name: impl Into<String>, f: F) -> Result<Self, CaptureError>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = name.into();
        let (signal, done) = crossbeam_channel::bounded::<()>(0);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let _signal = signal;
                f();
            })
            .map_err(|e| CaptureError::DeviceNotAvailable(format!("failed to spawn {}: {}", name, e)))?;
        Ok(Self { name, handle, done })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.done.try_recv(), Err(crossbeam_channel::TryRecvError::Disconnected))
    }

    /// Wait for the thread to exit.
    pub fn join(self) -> thread::Result<()> {
        self.handle.join()
    }

    /// Join if the thread exits before `deadline`; otherwise hand the
    /// handle back untouched.
    pub fn join_until(self, deadline: Instant) -> Result<(), Self> {
        match self.done.recv_deadline(deadline) {
            Err(RecvTimeoutError::Timeout) => Err(self),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.handle.join().is_err() {
                    log::error!("{} thread panicked", self.name);
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn joins_a_finished_thread() {
        let worker = WorkerHandle::spawn("quick", || {}).unwrap();
        assert!(worker
            .join_until(Instant::now() + Duration::from_secs(1))
            .is_ok());
    }

    #[test]
    fn returns_the_handle_at_the_deadline() {
        let (release, gate) = crossbeam_channel::bounded::<()>(1);
        let worker = WorkerHandle::spawn("stuck", move || {
            let _ = gate.recv();
        })
        .unwrap();

        let worker = worker
            .join_until(Instant::now() + Duration::from_millis(50))
            .unwrap_err();
        assert_eq!(worker.name(), "stuck");
        assert!(!worker.is_finished());

        release.send(()).unwrap();
        worker.join().unwrap();
    }

    #[test]
    fn panicking_thread_still_signals() {
        let worker = WorkerHandle::spawn("panics", || panic!("boom")).unwrap();
        assert!(worker
            .join_until(Instant::now() + Duration::from_secs(1))
            .is_ok());
    }
}
