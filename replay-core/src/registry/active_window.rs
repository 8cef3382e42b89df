use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

/// Value substituted for `%app%` when no full-screen application is known.
pub const UNKNOWN_APP: &str = "unknown";

/// Tracks the current full-screen application.
///
/// Fed by the desktop integration layer; read by the flush pipeline when it
/// names an output file. Cloning shares the same state.
#[derive(Debug, Clone)]
pub struct ActiveWindowTracker {
    current: Arc<RwLock<Option<String>>>,
    search_dirs: Arc<Vec<PathBuf>>,
}

impl Default for ActiveWindowTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ActiveWindowTracker {
    pub fn new() -> Self {
        Self::with_search_dirs(default_search_dirs())
    }

    /// Look up desktop entries in `dirs` only. Later directories override
    /// earlier ones.
    pub fn with_search_dirs(dirs: Vec<PathBuf>) -> Self {
        Self {
            current: Arc::new(RwLock::new(None)),
            search_dirs: Arc::new(dirs),
        }
    }

    /// Report the focused window.
    ///
    /// Only full-screen windows name the app. The name comes from the
    /// `Name` key of `<desktop_file>.desktop`, or the window title when no
    /// entry is found.
    pub fn set_active_window(&self, desktop_file: &str, title: &str, fullscreen: bool) {
        if !fullscreen {
            if self.current.read().is_some() {
                log::info!("Current app is {}", UNKNOWN_APP);
                *self.current.write() = None;
            }
            return;
        }

        let name = self
            .app_name(desktop_file)
            .unwrap_or_else(|| title.trim().to_string());
        let mut current = self.current.write();
        if name.is_empty() {
            *current = None;
        } else if current.as_deref() != Some(name.as_str()) {
            log::info!("Current app is now {}", name);
            *current = Some(name);
        }
    }

    /// Display name from the desktop entry for `desktop_file`, if one exists.
    pub fn app_name(&self, desktop_file: &str) -> Option<String> {
        let id = desktop_file.trim();
        let id = id.strip_suffix(".desktop").unwrap_or(id);
        if id.is_empty() {
            return None;
        }
        let file_name = format!("{}.desktop", id);
        let path = self
            .search_dirs
            .iter()
            .rev()
            .map(|dir| dir.join(&file_name))
            .find(|path| path.is_file())?;
        read_entry_name(&path)
    }

    /// The full-screen application, if any.
    pub fn fullscreen_app(&self) -> Option<String> {
        self.current.read().clone()
    }

    /// The full-screen application or `unknown`.
    pub fn current_app(&self) -> String {
        self.fullscreen_app().unwrap_or_else(|| UNKNOWN_APP.to_string())
    }
}

/// System applications, the user's data directory, flatpak exports and the
/// working directory, in that order.
pub fn default_search_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![PathBuf::from("/usr/share/applications")];
    if let Some(data) = dirs_next::data_dir() {
        dirs.push(data.join("applications"));
    }
    dirs.push(PathBuf::from("/var/lib/flatpak/exports/share/applications"));
    dirs.push(PathBuf::new());
    dirs
}

fn read_entry_name(path: &Path) -> Option<String> {
    match freedesktop_entry_parser::parse_entry(path) {
        Ok(entry) => entry
            .section("Desktop Entry")
            .attr("Name")
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty()),
        Err(_) => {
            log::warn!("Unreadable desktop entry {}", path.display());
            None
        }
    }
}
