//! Transcript events and the transcript file sink.
//!
//! Two write modes exist, matching the two transcription paths:
//! append-only line-at-a-time during live recording ([`TranscriptSink`]),
//! and wholesale overwrite after a batch upload ([`write_batch_transcript`]).

use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::stt::BatchTranscript;

/// A transcript fragment produced by the capture task.
///
/// Final fragments are committed by the speech service and will not be
/// revised; partial fragments are provisional, shown live, and never stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptEvent {
    pub text: String,
    pub is_final: bool,
    #[serde(default)]
    pub speaker: Option<String>,
}

impl TranscriptEvent {
    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
            speaker: None,
        }
    }

    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
            speaker: None,
        }
    }
}

/// Append-only sink for finalized utterances during a live session.
///
/// The relay task is the sole writer while recording; each final utterance
/// becomes one newline-terminated line, flushed immediately so a crash loses
/// at most the in-flight event.
#[derive(Debug)]
pub struct TranscriptSink {
    file: File,
    path: PathBuf,
}

impl TranscriptSink {
    /// Open (or create) the transcript file in append mode.
    pub fn open_append(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { file, path })
    }

    /// Append one finalized utterance followed by a newline.
    pub fn append_final(&mut self, text: &str) -> std::io::Result<()> {
        self.file.write_all(text.as_bytes())?;
        self.file.write_all(b"\n")?;
        self.file.flush()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Render a batch transcript: per-speaker blocks when diarization was
/// requested, plain text otherwise.
pub fn format_batch(transcript: &BatchTranscript, diarized: bool) -> String {
    if diarized {
        let mut out = String::new();
        for utterance in &transcript.utterances {
            out.push_str(&format!(
                "Speaker {}: {}\n\n",
                utterance.speaker, utterance.text
            ));
        }
        out
    } else {
        transcript.text.clone()
    }
}

/// Write a batch transcript to `path`, replacing any previous contents.
pub fn write_batch_transcript(
    path: &Path,
    transcript: &BatchTranscript,
    diarized: bool,
) -> std::io::Result<String> {
    let formatted = format_batch(transcript, diarized);
    std::fs::write(path, &formatted)?;
    log::info!(
        "Wrote transcript ({} chars) to {}",
        formatted.len(),
        path.display()
    );
    Ok(formatted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stt::Utterance;
    use tempfile::TempDir;

    #[test]
    fn test_sink_appends_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("transcript.txt");
        let mut sink = TranscriptSink::open_append(&path).unwrap();
        sink.append_final("first").unwrap();
        sink.append_final("second").unwrap();
        drop(sink);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "first\nsecond\n");
    }

    #[test]
    fn test_sink_reopen_keeps_existing_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("transcript.txt");
        TranscriptSink::open_append(&path)
            .unwrap()
            .append_final("kept")
            .unwrap();
        TranscriptSink::open_append(&path)
            .unwrap()
            .append_final("added")
            .unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "kept\nadded\n");
    }

    #[test]
    fn test_format_batch_diarized() {
        let transcript = BatchTranscript {
            text: "Hi Hello".to_string(),
            utterances: vec![
                Utterance {
                    speaker: "A".to_string(),
                    text: "Hi".to_string(),
                },
                Utterance {
                    speaker: "B".to_string(),
                    text: "Hello".to_string(),
                },
            ],
        };
        assert_eq!(
            format_batch(&transcript, true),
            "Speaker A: Hi\n\nSpeaker B: Hello\n\n"
        );
    }

    #[test]
    fn test_format_batch_plain() {
        let transcript = BatchTranscript {
            text: "Just the text.".to_string(),
            utterances: vec![],
        };
        assert_eq!(format_batch(&transcript, false), "Just the text.");
    }

    #[test]
    fn test_write_batch_transcript_overwrites() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("transcript.txt");
        std::fs::write(&path, "stale live transcript\n").unwrap();

        let transcript = BatchTranscript {
            text: "fresh".to_string(),
            utterances: vec![],
        };
        write_batch_transcript(&path, &transcript, false).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "fresh");
    }
}
