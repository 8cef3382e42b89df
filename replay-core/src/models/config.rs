use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::CaptureError;
use super::source::{DEFAULT_INPUT_ALIAS, DEFAULT_OUTPUT_ALIAS};

/// Output container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    Mkv,
    Mp4,
    Flv,
    Webm,
    /// The built-in interleaved replay format (`pipeline::muxer`).
    Replay,
}

impl Container {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mkv => "mkv",
            Self::Mp4 => "mp4",
            Self::Flv => "flv",
            Self::Webm => "webm",
            Self::Replay => "rply",
        }
    }
}

/// Video codec requested from the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Codec {
    #[serde(rename = "h264")]
    H264,
    #[serde(rename = "hevc")]
    Hevc,
    #[serde(rename = "hevc_hdr")]
    HevcHdr,
    #[serde(rename = "hevc_10bit")]
    Hevc10Bit,
    #[serde(rename = "av1")]
    Av1,
    #[serde(rename = "av1_hdr")]
    Av1Hdr,
    #[serde(rename = "av1_10bit")]
    Av110Bit,
    #[serde(rename = "vp8")]
    Vp8,
    #[serde(rename = "vp9")]
    Vp9,
}

impl Codec {
    pub fn name(&self) -> &'static str {
        match self {
            Self::H264 => "h264",
            Self::Hevc => "hevc",
            Self::HevcHdr => "hevc_hdr",
            Self::Hevc10Bit => "hevc_10bit",
            Self::Av1 => "av1",
            Self::Av1Hdr => "av1_hdr",
            Self::Av110Bit => "av1_10bit",
            Self::Vp8 => "vp8",
            Self::Vp9 => "vp9",
        }
    }
}

/// Encoder quality preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Medium,
    High,
    VeryHigh,
    Ultra,
}

impl Quality {
    /// Constant quantizer handed to the encoder (lower is better).
    pub fn quantizer(&self) -> u8 {
        match self {
            Self::Medium => 30,
            Self::High => 26,
            Self::VeryHigh => 22,
            Self::Ultra => 18,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Medium => "medium",
            Self::High => "high",
            Self::VeryHigh => "very_high",
            Self::Ultra => "ultra",
        }
    }
}

/// How the sources of one audio track are turned into output tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// All sources summed into one track.
    Merged,
    /// One output track per source.
    Separate,
}

/// One configured audio track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioTrackConfig {
    pub sources: Vec<String>,
    #[serde(default = "default_merge_mode")]
    pub merge_mode: MergeMode,
    /// Per-source gain applied before mixing. Missing entries mean 1.0.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub gains: BTreeMap<String, f32>,
}

impl AudioTrackConfig {
    pub fn merged<I, S>(sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sources: sources.into_iter().map(Into::into).collect(),
            merge_mode: MergeMode::Merged,
            gains: BTreeMap::new(),
        }
    }

    pub fn separate<I, S>(sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sources: sources.into_iter().map(Into::into).collect(),
            merge_mode: MergeMode::Separate,
            gains: BTreeMap::new(),
        }
    }

    pub fn with_gain(mut self, source_id: impl Into<String>, gain: f32) -> Self {
        self.gains.insert(source_id.into(), gain);
        self
    }

    pub fn gain_of(&self, source_id: &str) -> f32 {
        self.gains.get(source_id).copied().unwrap_or(1.0)
    }

    /// Number of output tracks this config yields.
    pub fn output_track_count(&self) -> usize {
        match self.merge_mode {
            MergeMode::Merged => usize::from(!self.sources.is_empty()),
            MergeMode::Separate => self.sources.len(),
        }
    }
}

/// How the output file name is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingMode {
    /// `<dir>/<app>/<app>_replay_<date>_<time>`
    ByAppName,
    /// `<dir>/Replay_<date>_<time>`
    FixedDirectory,
    /// `naming_pattern` expanded relative to the output directory.
    CustomPattern,
}

/// Output format of mixed audio tracks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerSettings {
    /// Output sample rate in Hz (default: 48000).
    pub sample_rate: u32,

    /// Output channels, 1 or 2 (default: 2).
    pub channels: u16,

    /// Mixing window length in milliseconds (default: 20).
    pub window_ms: u32,

    /// How long a window stays open for late input, in milliseconds
    /// (default: 100).
    pub latency_ms: u32,
}

impl MixerSettings {
    pub fn window(&self) -> Duration {
        Duration::from_millis(u64::from(self.window_ms))
    }

    pub fn latency(&self) -> Duration {
        Duration::from_millis(u64::from(self.latency_ms))
    }

    /// Frames per mixing window.
    pub fn window_frames(&self) -> usize {
        (u64::from(self.sample_rate) * u64::from(self.window_ms) / 1000) as usize
    }
}

impl Default for MixerSettings {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            window_ms: 20,
            latency_ms: 100,
        }
    }
}

/// Configuration snapshot for one recording session.
///
/// Immutable for the lifetime of a session; changing anything requires a
/// stop/start cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Registry id of the display to capture.
    pub video_source_id: String,

    /// Audio tracks in output order.
    pub audio_tracks: Vec<AudioTrackConfig>,

    /// Length of the replay window in seconds. Must be positive.
    pub buffer_duration_secs: i64,

    pub container: Container,
    pub codec: Codec,
    pub quality: Quality,

    /// Output frame rate of the video track.
    pub framerate: u32,

    /// Clear the replay buffer after a successful save.
    pub clear_buffer_on_save: bool,

    pub naming_mode: NamingMode,

    /// Template used by `NamingMode::CustomPattern`.
    pub naming_pattern: Option<String>,

    /// Root directory for all saved replays.
    pub output_directory: PathBuf,

    /// Also write `<artifact>.metadata.json` next to each saved replay.
    pub write_sidecar: bool,

    pub mixer: MixerSettings,
}

impl CaptureConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.buffer_duration_secs <= 0 {
            return Err(format!(
                "buffer duration must be positive, got {}",
                self.buffer_duration_secs
            ));
        }
        if self.video_source_id.trim().is_empty() {
            return Err("video source id is empty".into());
        }
        if self.framerate == 0 || self.framerate > 1000 {
            return Err(format!("unsupported framerate: {}", self.framerate));
        }
        for (index, track) in self.audio_tracks.iter().enumerate() {
            if track.sources.is_empty() {
                return Err(format!("audio track {} has no sources", index));
            }
            if track.sources.iter().any(|s| s.trim().is_empty()) {
                return Err(format!("audio track {} has an empty source id", index));
            }
            for (i, id) in track.sources.iter().enumerate() {
                if track.sources[..i].contains(id) {
                    return Err(format!("audio track {} lists {} twice", index, id));
                }
            }
            if let Some((id, gain)) = track.gains.iter().find(|(_, g)| !g.is_finite() || **g < 0.0) {
                return Err(format!("audio track {} has invalid gain {} for {}", index, gain, id));
            }
        }
        if self.naming_mode == NamingMode::CustomPattern
            && self.naming_pattern.as_deref().map_or(true, |p| p.trim().is_empty())
        {
            return Err("custom naming mode requires a naming pattern".into());
        }
        if self.mixer.sample_rate == 0 {
            return Err("mixer sample rate must be positive".into());
        }
        if ![1, 2].contains(&self.mixer.channels) {
            return Err(format!("unsupported channel count: {}", self.mixer.channels));
        }
        if self.mixer.window_frames() == 0 {
            return Err(format!("mixer window too short: {} ms", self.mixer.window_ms));
        }
        Ok(())
    }

    /// The replay window as a `Duration`. Zero for invalid configs.
    pub fn buffer_duration(&self) -> Duration {
        Duration::from_secs(self.buffer_duration_secs.max(0) as u64)
    }

    /// Every distinct audio source id referenced by any track, in first-seen order.
    pub fn audio_source_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for id in self.audio_tracks.iter().flat_map(|t| t.sources.iter()) {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids
    }

    pub fn from_json_str(json: &str) -> Result<Self, CaptureError> {
        serde_json::from_str(json)
            .map_err(|e| CaptureError::InvalidConfig(format!("failed to parse config: {}", e)))
    }

    pub fn to_json_string(&self) -> Result<String, CaptureError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| CaptureError::StorageError(format!("failed to serialize config: {}", e)))
    }

    pub fn load_json(path: &Path) -> Result<Self, CaptureError> {
        let json = fs::read_to_string(path)
            .map_err(|e| CaptureError::StorageError(format!("failed to read config: {}", e)))?;
        Self::from_json_str(&json)
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            video_source_id: "screen".into(),
            audio_tracks: vec![
                AudioTrackConfig::merged([DEFAULT_OUTPUT_ALIAS]),
                AudioTrackConfig::merged([DEFAULT_INPUT_ALIAS]),
            ],
            buffer_duration_secs: 180,
            container: Container::Mkv,
            codec: Codec::H264,
            quality: Quality::VeryHigh,
            framerate: 60,
            clear_buffer_on_save: true,
            naming_mode: NamingMode::ByAppName,
            naming_pattern: Some(default_naming_pattern()),
            output_directory: PathBuf::from("."),
            write_sidecar: false,
            mixer: MixerSettings::default(),
        }
    }
}

fn default_merge_mode() -> MergeMode {
    MergeMode::Merged
}

pub fn default_naming_pattern() -> String {
    "%app%/%app%_replay_%year%-%month%-%day%_%hour%-%minute%-%second%".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(CaptureConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_non_positive_duration() {
        let config = CaptureConfig {
            buffer_duration_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = CaptureConfig {
            buffer_duration_secs: -5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(config.buffer_duration(), Duration::ZERO);
    }

    #[test]
    fn rejects_empty_track() {
        let config = CaptureConfig {
            audio_tracks: vec![AudioTrackConfig::merged(Vec::<String>::new())],
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().contains("no sources"));
    }

    #[test]
    fn custom_pattern_requires_pattern() {
        let config = CaptureConfig {
            naming_mode: NamingMode::CustomPattern,
            naming_pattern: None,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_source_in_track() {
        let config = CaptureConfig {
            audio_tracks: vec![AudioTrackConfig::separate(["mic", "mic"])],
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().contains("twice"));
    }

    #[test]
    fn rejects_negative_gain() {
        let config = CaptureConfig {
            audio_tracks: vec![AudioTrackConfig::merged(["mic"]).with_gain("mic", -1.0)],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn output_track_counts() {
        assert_eq!(AudioTrackConfig::merged(["a", "b", "c"]).output_track_count(), 1);
        assert_eq!(AudioTrackConfig::separate(["a", "b", "c"]).output_track_count(), 3);
    }

    #[test]
    fn audio_source_ids_are_deduplicated() {
        let config = CaptureConfig {
            audio_tracks: vec![
                AudioTrackConfig::merged(["mic", "desktop"]),
                AudioTrackConfig::separate(["desktop", "game"]),
            ],
            ..Default::default()
        };
        assert_eq!(config.audio_source_ids(), vec!["mic", "desktop", "game"]);
    }

    #[test]
    fn json_uses_wire_names() {
        let json = r#"{
            "video_source_id": "screen",
            "audio_tracks": [{"sources": ["mic"], "merge_mode": "separate"}],
            "buffer_duration_secs": 30,
            "codec": "hevc_10bit",
            "quality": "very_high",
            "container": "webm",
            "naming_mode": "fixed_directory"
        }"#;
        let config = CaptureConfig::from_json_str(json).unwrap();
        assert_eq!(config.codec, Codec::Hevc10Bit);
        assert_eq!(config.quality, Quality::VeryHigh);
        assert_eq!(config.container, Container::Webm);
        assert_eq!(config.naming_mode, NamingMode::FixedDirectory);
        assert_eq!(config.audio_tracks[0].merge_mode, MergeMode::Separate);
        // unspecified fields fall back to defaults
        assert_eq!(config.framerate, 60);
        assert!(config.clear_buffer_on_save);
    }

    #[test]
    fn invalid_json_is_invalid_config() {
        let err = CaptureConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, CaptureError::InvalidConfig(_)));
    }

    #[test]
    fn window_frames() {
        let settings = MixerSettings {
            sample_rate: 48000,
            channels: 2,
            window_ms: 20,
            latency_ms: 100,
        };
        assert_eq!(settings.window_frames(), 960);
    }
}
