//! Batch transcription of uploaded media files.

use std::path::{Path, PathBuf};

use crate::media::{self, MediaError};
use crate::session::Session;
use crate::settings::Settings;
use crate::stt::{SpeechProvider, SttError, TranscribeOptions};
use crate::transcript;

/// Errors from the upload transcription path. These abort the upload only;
/// the recording controller is unaffected.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Speech API key is not configured")]
    MissingCredentials,

    #[error("Media file not found: {0}")]
    FileNotFound(PathBuf),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Stt(#[from] SttError),

    #[error("Failed to write transcript: {0}")]
    Io(#[from] std::io::Error),
}

/// Transcribe a media file into the session's transcript (overwrite mode).
///
/// Video containers get their audio track extracted to a temporary WAV
/// first; the temporary file is deleted on every path out of this function.
/// Blocks until the service returns the full transcript. Returns the
/// formatted transcript text as written.
pub async fn transcribe_media_file(
    media_path: &Path,
    session: &Session,
    settings: &Settings,
    provider: &dyn SpeechProvider,
) -> Result<String, UploadError> {
    if !settings.has_speech_credentials() {
        return Err(UploadError::MissingCredentials);
    }
    if !media_path.is_file() {
        return Err(UploadError::FileNotFound(media_path.to_path_buf()));
    }

    session.ensure_directory()?;

    // The guard keeps the temporary file alive for the duration of the
    // request and removes it on drop, error paths included.
    let temp = if media::is_video_file(media_path) {
        let temp_dir = settings.output_dir.join("_tmp");
        Some(media::extract_audio_track(media_path, &temp_dir)?)
    } else {
        None
    };
    let audio_path = temp.as_ref().map(|t| t.path()).unwrap_or(media_path);
    let audio = std::fs::read(audio_path)?;

    let options = TranscribeOptions {
        language_code: settings.language_code.clone(),
        speaker_labels: settings.speaker_labels,
        word_boost: settings.custom_vocabulary.clone(),
        ..TranscribeOptions::default()
    };

    log::info!(
        "Transcribing {} ({} bytes) via {}",
        media_path.display(),
        audio.len(),
        provider.name()
    );
    let result = provider.transcribe(&audio, &options).await?;

    let formatted = transcript::write_batch_transcript(
        &session.transcript_path(),
        &result,
        settings.speaker_labels,
    )?;
    Ok(formatted)
}
