//! Output path templates.
//!
//! Variables are `%app%`, `%year%`, `%month%`, `%day%`, `%hour%`, `%minute%`
//! and `%second%`. Everything but the year is zero-padded to two digits.

use std::path::{Component, Path, PathBuf};

use chrono::{Datelike, NaiveDateTime, Timelike};

use crate::models::config::{default_naming_pattern, CaptureConfig, Container, NamingMode};
use crate::registry::active_window::UNKNOWN_APP;

const FIXED_DIRECTORY_PATTERN: &str = "Replay_%year%-%month%-%day%_%hour%-%minute%-%second%";

/// Substitute template variables. `app` is sanitized for use in a file name.
pub fn expand_pattern(pattern: &str, app: &str, time: &NaiveDateTime) -> String {
    let app = sanitize_component(app);
    pattern
        .replace("%app%", &app)
        .replace("%year%", &format!("{:04}", time.year()))
        .replace("%month%", &format!("{:02}", time.month()))
        .replace("%day%", &format!("{:02}", time.day()))
        .replace("%hour%", &format!("{:02}", time.hour()))
        .replace("%minute%", &format!("{:02}", time.minute()))
        .replace("%second%", &format!("{:02}", time.second()))
}

/// Replace characters that are not allowed in a file name with `_`.
pub fn sanitize_component(name: &str) -> String {
    let name = name.trim();
    if name.is_empty() {
        return UNKNOWN_APP.to_string();
    }
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    match cleaned.as_str() {
        "." | ".." => cleaned.replace('.', "_"),
        _ => cleaned,
    }
}

/// Full output path for a replay, ending in the extension of `container`.
///
/// The expanded template always stays below `output_directory`: absolute
/// prefixes and `..` components are dropped.
pub fn output_path(
    config: &CaptureConfig,
    container: Container,
    app: Option<&str>,
    time: &NaiveDateTime,
) -> PathBuf {
    let pattern = match config.naming_mode {
        NamingMode::ByAppName => default_naming_pattern(),
        NamingMode::FixedDirectory => FIXED_DIRECTORY_PATTERN.to_string(),
        NamingMode::CustomPattern => config
            .naming_pattern
            .clone()
            .unwrap_or_else(default_naming_pattern),
    };
    let expanded = expand_pattern(&pattern, app.unwrap_or(UNKNOWN_APP), time);

    let mut path = config.output_directory.clone();
    for component in Path::new(&expanded).components() {
        if let Component::Normal(part) = component {
            path.push(part);
        }
    }
    if path == config.output_directory {
        path.push(UNKNOWN_APP);
    }

    let mut name = path.into_os_string();
    name.push(".");
    name.push(container.extension());
    PathBuf::from(name)
}

/// `path`, or `path` with `_1`, `_2`, ... before the extension if it exists.
pub fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path.extension().map(|e| e.to_string_lossy().into_owned());
    (1u32..)
        .map(|n| {
            let name = match &extension {
                Some(ext) => format!("{}_{}.{}", stem, n, ext),
                None => format!("{}_{}", stem, n),
            };
            path.with_file_name(name)
        })
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn unknown_app_with_date() {
        let time = at(2024, 3, 7, 9, 5, 1);
        assert_eq!(
            expand_pattern("%app%_%year%-%month%-%day%", UNKNOWN_APP, &time),
            "unknown_2024-03-07"
        );
    }

    #[test]
    fn all_variables_are_padded() {
        let time = at(2025, 1, 2, 3, 4, 5);
        assert_eq!(
            expand_pattern("%year%%month%%day%%hour%%minute%%second%", "x", &time),
            "20250102030405"
        );
    }

    #[test]
    fn app_name_is_sanitized() {
        let time = at(2024, 3, 7, 0, 0, 0);
        assert_eq!(
            expand_pattern("%app%", "Half-Life: Alyx / VR?", &time),
            "Half-Life_ Alyx _ VR_"
        );
        assert_eq!(sanitize_component(".."), "__");
        assert_eq!(sanitize_component("  "), "unknown");
    }

    #[test]
    fn by_app_name_layout() {
        let config = CaptureConfig {
            output_directory: PathBuf::from("/videos"),
            ..CaptureConfig::default()
        };
        let path = output_path(&config, config.container, Some("Game"), &at(2024, 3, 7, 21, 30, 9));
        assert_eq!(
            path,
            PathBuf::from("/videos/Game/Game_replay_2024-03-07_21-30-09.mkv")
        );
    }

    #[test]
    fn fixed_directory_layout() {
        let config = CaptureConfig {
            output_directory: PathBuf::from("/videos"),
            naming_mode: NamingMode::FixedDirectory,
            container: Container::Mp4,
            ..CaptureConfig::default()
        };
        let path = output_path(&config, config.container, Some("Game"), &at(2024, 3, 7, 21, 30, 9));
        assert_eq!(path, PathBuf::from("/videos/Replay_2024-03-07_21-30-09.mp4"));

        let path = output_path(&config, Container::Replay, Some("Game"), &at(2024, 3, 7, 21, 30, 9));
        assert_eq!(path, PathBuf::from("/videos/Replay_2024-03-07_21-30-09.rply"));
    }

    #[test]
    fn custom_pattern_stays_inside_output_directory() {
        let config = CaptureConfig {
            output_directory: PathBuf::from("/videos"),
            naming_mode: NamingMode::CustomPattern,
            naming_pattern: Some("/../clips/%app%_%year%".into()),
            container: Container::Webm,
            ..CaptureConfig::default()
        };
        let path = output_path(&config, config.container, None, &at(2024, 3, 7, 0, 0, 0));
        assert_eq!(path, PathBuf::from("/videos/clips/unknown_2024.webm"));
    }

    #[test]
    fn unique_path_appends_counter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mkv");
        assert_eq!(unique_path(&path), path);

        std::fs::write(&path, b"x").unwrap();
        assert_eq!(unique_path(&path), dir.path().join("clip_1.mkv"));
        std::fs::write(dir.path().join("clip_1.mkv"), b"x").unwrap();
        assert_eq!(unique_path(&path), dir.path().join("clip_2.mkv"));
    }
}
