//! Persisted CLI defaults — a flat JSON blob in the user config directory.
//!
//! Values are stored in `~/.config/bookshot/settings.json`. A missing or
//! unreadable file yields the built-in defaults; unknown keys are ignored.
//! No schema versioning, no migration. Effective values for a run are
//! CLI flag → settings file → built-in default.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub app_name: String,
    pub window_title: String,
    pub output_dir: String,
    pub book_title: String,
    pub start_page: u32,
    pub end_page: u32,
    pub next_key: String,
    /// Delay between page captures, in milliseconds.
    pub delay_ms: u64,
    /// Resize the target window before capturing; 0 disables.
    pub width: u32,
    pub height: u32,
    pub top_margin: i32,
    pub bottom_margin: i32,
    pub left_margin: i32,
    pub right_margin: i32,
    /// Explicit tesseract binary path; empty means search PATH.
    pub tesseract_path: String,
    pub lang: String,
    pub merge: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "Windows App".to_string(),
            window_title: "Mini PC".to_string(),
            output_dir: "output".to_string(),
            book_title: "book".to_string(),
            start_page: 1,
            end_page: 5,
            next_key: "right".to_string(),
            delay_ms: 100,
            width: 2880,
            height: 1800,
            top_margin: 50,
            bottom_margin: 50,
            left_margin: 0,
            right_margin: 0,
            tesseract_path: String::new(),
            lang: "kor+eng".to_string(),
            merge: true,
        }
    }
}

/// Full path to the settings file.
pub fn settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("bookshot")
        .join("settings.json")
}

/// Load settings, falling back to defaults when the file is missing or
/// does not parse.
pub fn load() -> Settings {
    load_from(&settings_path())
}

pub fn load_from(path: &Path) -> Settings {
    match std::fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(settings) => {
                log::debug!("[SETTINGS] Loaded {}", path.display());
                settings
            }
            Err(err) => {
                log::warn!(
                    "[SETTINGS] {} is not valid settings JSON ({}) — using defaults",
                    path.display(),
                    err
                );
                Settings::default()
            }
        },
        Err(_) => Settings::default(),
    }
}

/// Persist settings, creating the config directory if needed.
pub fn save(settings: &Settings) -> anyhow::Result<()> {
    save_to(settings, &settings_path())
}

pub fn save_to(settings: &Settings, path: &Path) -> anyhow::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, json)?;
    log::info!("[SETTINGS] Saved {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let settings = load_from(Path::new("/nonexistent/bookshot-settings.json"));
        assert_eq!(settings.book_title, "book");
        assert_eq!(settings.start_page, 1);
        assert!(settings.merge);
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut settings = Settings::default();
        settings.book_title = "moby-dick".to_string();
        settings.end_page = 310;
        settings.lang = "eng".to_string();

        save_to(&settings, &path).unwrap();
        let loaded = load_from(&path);
        assert_eq!(loaded.book_title, "moby-dick");
        assert_eq!(loaded.end_page, 310);
        assert_eq!(loaded.lang, "eng");
    }

    #[test]
    fn unknown_and_missing_keys_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"book_title":"partial","future_key":42}"#).unwrap();

        let loaded = load_from(&path);
        assert_eq!(loaded.book_title, "partial");
        // everything else defaulted
        assert_eq!(loaded.end_page, 5);
    }

    #[test]
    fn invalid_json_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json at all").unwrap();
        assert_eq!(load_from(&path).book_title, "book");
    }
}
