//! Recording session metadata.

use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};

/// File name of the transcript inside a session directory.
const TRANSCRIPT_FILE: &str = "transcript.txt";

/// Suffix appended to the transcript stem for the summary file.
const SUMMARY_SUFFIX: &str = "_summary";

/// A single recording or upload session.
///
/// A session names the directory its artifacts live in. The directory is
/// created lazily via [`Session::ensure_directory`]; constructing a session
/// touches nothing on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Display name; also the directory name under the output dir.
    pub name: String,
    /// Directory holding this session's files.
    pub directory: PathBuf,
    /// When the session was created.
    pub started_at: DateTime<Local>,
}

impl Session {
    /// Create a session under `output_dir`.
    ///
    /// An empty or missing name defaults to a timestamp-derived one
    /// (`%Y%m%d_%H%M%S`).
    pub fn new(name: Option<&str>, output_dir: &Path) -> Self {
        let started_at = Local::now();
        let name = match name.map(str::trim) {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => started_at.format("%Y%m%d_%H%M%S").to_string(),
        };
        let directory = output_dir.join(&name);
        Self {
            name,
            directory,
            started_at,
        }
    }

    /// Session named after a media file (upload path); falls back to the
    /// timestamp default if the file name has no usable stem.
    pub fn for_media_file(name: Option<&str>, media_path: &Path, output_dir: &Path) -> Self {
        match name.map(str::trim) {
            Some(n) if !n.is_empty() => Self::new(Some(n), output_dir),
            _ => {
                let stem = media_path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .map(str::to_string);
                Self::new(stem.as_deref(), output_dir)
            }
        }
    }

    /// Path of the transcript file.
    pub fn transcript_path(&self) -> PathBuf {
        self.directory.join(TRANSCRIPT_FILE)
    }

    /// Path of the summary file: transcript stem plus a fixed suffix.
    pub fn summary_path(&self) -> PathBuf {
        self.directory
            .join(format!("transcript{}.txt", SUMMARY_SUFFIX))
    }

    /// Create the session directory if it does not exist yet.
    pub fn ensure_directory(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.directory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_name() {
        let s = Session::new(Some("standup"), Path::new("/out"));
        assert_eq!(s.name, "standup");
        assert_eq!(s.directory, PathBuf::from("/out/standup"));
        assert_eq!(s.transcript_path(), PathBuf::from("/out/standup/transcript.txt"));
        assert_eq!(
            s.summary_path(),
            PathBuf::from("/out/standup/transcript_summary.txt")
        );
    }

    #[test]
    fn test_default_name_is_timestamp_shaped() {
        let s = Session::new(None, Path::new("/out"));
        // %Y%m%d_%H%M%S: 8 digits, underscore, 6 digits.
        assert_eq!(s.name.len(), 15);
        assert_eq!(s.name.as_bytes()[8], b'_');
        assert!(s
            .name
            .chars()
            .all(|c| c.is_ascii_digit() || c == '_'));
    }

    #[test]
    fn test_blank_name_falls_back() {
        let s = Session::new(Some("   "), Path::new("/out"));
        assert_ne!(s.name.trim(), "");
        assert_eq!(s.name.len(), 15);
    }

    #[test]
    fn test_media_file_name() {
        let s = Session::for_media_file(
            None,
            Path::new("/media/team call.mp4"),
            Path::new("/out"),
        );
        assert_eq!(s.name, "team call");
    }
}
