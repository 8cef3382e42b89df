use std::time::Instant;

use crate::models::chunk::Timestamp;

/// Monotonic clock shared by every worker of a session. Timestamps count
/// from session start.
#[derive(Debug, Clone, Copy)]
pub struct CaptureClock {
    origin: Instant,
}

impl CaptureClock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn now(&self) -> Timestamp {
        Timestamp::from_duration(self.origin.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn advances_monotonically() {
        let clock = CaptureClock::start();
        let a = clock.now();
        std::thread::sleep(Duration::from_millis(5));
        let b = clock.now();
        assert!(b > a);
        assert!(b.duration_since(a) >= Duration::from_millis(5));
    }
}
