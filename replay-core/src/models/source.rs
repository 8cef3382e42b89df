use serde::{Deserialize, Serialize};

/// What a capture endpoint delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    VideoDisplay,
    Microphone,
    SystemSound,
    ApplicationAudio,
}

impl SourceKind {
    pub fn is_video(&self) -> bool {
        matches!(self, Self::VideoDisplay)
    }

    pub fn is_audio(&self) -> bool {
        !self.is_video()
    }
}

/// An enumerable capture endpoint.
///
/// Descriptors are values: a fresh enumeration produces new descriptors and
/// nothing holds on to the backend object behind them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub id: String,
    pub kind: SourceKind,
    pub display_name: String,
    #[serde(default)]
    pub is_default: bool,
}

impl SourceDescriptor {
    pub fn new(id: impl Into<String>, kind: SourceKind, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            display_name: display_name.into(),
            is_default: false,
        }
    }

    pub fn with_default(mut self, is_default: bool) -> Self {
        self.is_default = is_default;
        self
    }
}

/// Id alias that resolves to the default microphone.
pub const DEFAULT_INPUT_ALIAS: &str = "default_input";

/// Id alias that resolves to the default system-sound loopback.
pub const DEFAULT_OUTPUT_ALIAS: &str = "default_output";

/// Maps an alias id to the kind whose default it stands for.
pub fn alias_kind(id: &str) -> Option<SourceKind> {
    match id {
        DEFAULT_INPUT_ALIAS => Some(SourceKind::Microphone),
        DEFAULT_OUTPUT_ALIAS => Some(SourceKind::SystemSound),
        _ => None,
    }
}
