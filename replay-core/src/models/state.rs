use serde::{Deserialize, Serialize};

/// Session controller state machine.
///
/// ```text
/// idle → starting → recording → stopping → idle
/// ```
///
/// Flushing happens inside `Recording` and is not a separate state; use
/// `SessionController::is_flushing` to observe it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Starting,
    Recording,
    Stopping,
}

impl SessionState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Recording)
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Idle
    }
}
