//! Transcript cleanup / summary generation.

use std::path::PathBuf;

use crate::llm::{render_prompt, LlmError, LlmProvider};
use crate::session::Session;
use crate::settings::Settings;

/// Errors from summary generation. These abort the summary action only.
#[derive(Debug, thiserror::Error)]
pub enum SummaryError {
    #[error("No transcript file at {0}")]
    MissingTranscript(PathBuf),

    #[error("Transcript file is empty")]
    EmptyTranscript,

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("Failed to write summary: {0}")]
    Io(#[from] std::io::Error),
}

/// Generate the cleanup/summary for a session's transcript.
///
/// Reads the transcript, substitutes it into the configured prompt template,
/// submits one request to the LLM service, and writes the returned text
/// verbatim to the summary file. A failed request leaves no partial summary
/// file behind. Returns the summary file path.
pub async fn generate_summary(
    session: &Session,
    settings: &Settings,
    provider: &dyn LlmProvider,
) -> Result<PathBuf, SummaryError> {
    let transcript_path = session.transcript_path();
    let transcript = match std::fs::read_to_string(&transcript_path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(SummaryError::MissingTranscript(transcript_path));
        }
        Err(e) => return Err(SummaryError::Io(e)),
    };
    if transcript.trim().is_empty() {
        return Err(SummaryError::EmptyTranscript);
    }

    let prompt = render_prompt(&settings.cleanup_prompt, &transcript);
    log::info!(
        "Requesting summary from {} ({} transcript chars)",
        provider.name(),
        transcript.len()
    );
    let summary = provider.complete(&prompt).await?;

    let summary_path = session.summary_path();
    std::fs::write(&summary_path, &summary)?;
    log::info!("Summary saved to {}", summary_path.display());
    Ok(summary_path)
}
