//! Application settings and their on-disk persistence.
//!
//! Settings are a flat record stored as pretty-printed JSON in the per-user
//! config directory. A missing or unreadable file is never an error: the
//! store falls back to built-in defaults and logs what happened.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::llm::DEFAULT_CLEANUP_PROMPT;

/// Default LLM model used for transcript cleanup.
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

/// Default language code for transcription.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Directory name under the user's config dir holding `settings.json`.
const CONFIG_DIR_NAME: &str = "transcribe-desk";

/// Languages the speech service accepts, as (label, code) pairs.
///
/// The code is what goes over the wire.
pub const LANGUAGES: &[(&str, &str)] = &[
    ("Global English", "en"),
    ("US English", "en_us"),
    ("British English", "en_uk"),
    ("Australian English", "en_au"),
    ("Spanish", "es"),
    ("French", "fr"),
    ("German", "de"),
    ("Italian", "it"),
    ("Portuguese", "pt"),
    ("Dutch", "nl"),
    ("Hindi", "hi"),
    ("Japanese", "ja"),
    ("Chinese", "zh"),
    ("Finnish", "fi"),
    ("Korean", "ko"),
    ("Polish", "pl"),
    ("Russian", "ru"),
    ("Turkish", "tr"),
    ("Ukrainian", "uk"),
    ("Vietnamese", "vi"),
];

/// Persisted application settings.
///
/// Held as an owned value and passed explicitly into the components that need
/// it; nothing in the crate reads settings ambiently.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// API key for the speech-to-text service.
    pub speech_api_key: String,
    /// API key for the LLM service used for cleanup/summary.
    pub llm_api_key: String,
    /// Directory under which per-session folders are created.
    pub output_dir: PathBuf,
    /// Prompt template for transcript cleanup; `{transcript}` is substituted.
    pub cleanup_prompt: String,
    /// LLM model name.
    pub model: String,
    /// Vocabulary hints (technical terms, proper nouns) sent to the speech
    /// service to improve recognition. Order is preserved.
    pub custom_vocabulary: Vec<String>,
    /// Enable speaker diarization.
    pub speaker_labels: bool,
    /// Transcription language code (see [`LANGUAGES`]).
    pub language_code: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            speech_api_key: String::new(),
            llm_api_key: String::new(),
            output_dir: default_output_dir(),
            cleanup_prompt: DEFAULT_CLEANUP_PROMPT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            custom_vocabulary: Vec::new(),
            speaker_labels: false,
            language_code: DEFAULT_LANGUAGE.to_string(),
        }
    }
}

impl Settings {
    /// Whether the key required for transcription is present.
    pub fn has_speech_credentials(&self) -> bool {
        !self.speech_api_key.trim().is_empty()
    }

    /// Whether the key required for summary generation is present.
    pub fn has_llm_credentials(&self) -> bool {
        !self.llm_api_key.trim().is_empty()
    }

    /// Parse a comma-separated vocabulary string into the ordered hint list.
    pub fn parse_vocabulary(input: &str) -> Vec<String> {
        input
            .split(',')
            .map(|w| w.trim())
            .filter(|w| !w.is_empty())
            .map(|w| w.to_string())
            .collect()
    }
}

/// Default output directory: `~/Documents/Transcriptions`.
fn default_output_dir() -> PathBuf {
    dirs::document_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Transcriptions")
}

/// Loads and saves [`Settings`] at a fixed per-user path.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Store at the default per-user location
    /// (`<config dir>/transcribe-desk/settings.json`).
    pub fn new() -> Self {
        let dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(CONFIG_DIR_NAME);
        Self {
            path: dir.join("settings.json"),
        }
    }

    /// Store backed by an explicit file path.
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the settings file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings, falling back to defaults on any problem.
    ///
    /// A missing file is the normal first-run case; corrupt content is
    /// logged and replaced with defaults rather than surfaced.
    pub fn load(&self) -> Settings {
        match fs::read_to_string(&self.path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(settings) => {
                    log::info!("Loaded settings from {}", self.path.display());
                    settings
                }
                Err(e) => {
                    log::warn!(
                        "Could not parse settings at {} ({}); using defaults",
                        self.path.display(),
                        e
                    );
                    Settings::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!(
                    "No settings file at {}; using defaults",
                    self.path.display()
                );
                Settings::default()
            }
            Err(e) => {
                log::warn!(
                    "Could not read settings at {} ({}); using defaults",
                    self.path.display(),
                    e
                );
                Settings::default()
            }
        }
    }

    /// Persist settings, creating the config directory as needed.
    pub fn save(&self, settings: &Settings) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(settings)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(&self.path, json)?;
        log::info!("Saved settings to {}", self.path.display());
        Ok(())
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_settings_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::at_path(dir.path().join("settings.json"));

        let settings = Settings {
            speech_api_key: "speech-key".to_string(),
            llm_api_key: "llm-key".to_string(),
            output_dir: PathBuf::from("/tmp/out"),
            cleanup_prompt: "Clean: {transcript}".to_string(),
            model: "gemini-1.5-pro".to_string(),
            custom_vocabulary: vec!["serde".to_string(), "tokio".to_string()],
            speaker_labels: true,
            language_code: "de".to_string(),
        };

        store.save(&settings).unwrap();
        assert_eq!(store.load(), settings);
    }

    #[test]
    fn test_empty_vocabulary_serializes_to_empty_array() {
        let settings = Settings::default();
        let json = serde_json::to_value(&settings).unwrap();
        assert_eq!(json["custom_vocabulary"], serde_json::json!([]));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::at_path(dir.path().join("nope.json"));
        assert_eq!(store.load(), Settings::default());
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{not json").unwrap();
        let store = ConfigStore::at_path(&path);
        assert_eq!(store.load(), Settings::default());
    }

    #[test]
    fn test_parse_vocabulary() {
        assert_eq!(
            Settings::parse_vocabulary(" serde , tokio,,cpal "),
            vec!["serde", "tokio", "cpal"]
        );
        assert!(Settings::parse_vocabulary("   ").is_empty());
    }
}
