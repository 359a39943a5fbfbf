//! LLM service abstraction for transcript cleanup and summarization.

mod gemini;

pub use gemini::GeminiProvider;

use async_trait::async_trait;
use std::time::Duration;

/// Default timeout for LLM API requests.
pub const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(60);

/// Placeholder substituted with the transcript when rendering the cleanup
/// prompt template.
pub const TRANSCRIPT_PLACEHOLDER: &str = "{transcript}";

/// Built-in cleanup prompt template.
pub const DEFAULT_CLEANUP_PROMPT: &str = "\
Clean up a transcript to enhance readability and coherence.

Focus on removing filler words, correcting grammatical errors, and maintaining the original meaning while ensuring the text flows smoothly.

# Steps

1. **Remove Filler Words:** Identify common filler words such as \"um,\" \"uh,\" \"like,\" and \"you know,\" and remove them from the transcript.

2. **Correct Grammatical Errors:** Identify and fix any grammatical errors, such as subject-verb agreement and punctuation mistakes.

3. **Enhance Readability:** Restructure sentences where needed to improve clarity and coherence, ensuring the text flows logically from one point to the next.

4. **Preserve Core Meaning:** While editing, make sure to maintain the original meaning and intent of the transcript.

5. Maintain the original tone of voice and perspective.

6. Suggest improvements to the transcript.

7. Apply suggested improvements in a finalised edited version.

# Notes

- Avoid removing any essential information that could alter the meaning of the transcript.
- Pay attention to the context to ensure continuity and coherence in the conversation.

# Example output

%CLEANED UP
[Provide a clean, edited transcript, formatted as a coherent paragraph or series of paragraphs. Use section headings as appropriate to clarify meaning]

%SUGGESTIONS FOR IMPROVEMENT
[Critique the transcript and suggest improvements]

%SUGGESTED FINAL
[Review suggested improvements and apply into this edited version]

Transcript:
{transcript}";

/// Errors that can occur during LLM operations.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("API error: {0}")]
    Api(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("No API key configured for provider: {0}")]
    NoApiKey(String),
}

/// Trait for LLM providers that can complete a prompt.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Submit a prompt and return the generated text.
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;

    /// List model names available on this provider; implementations fall
    /// back to a built-in default list on any error.
    async fn list_models(&self) -> Vec<String>;

    /// Get the provider name.
    fn name(&self) -> &'static str;

    /// Get the current model being used.
    fn model(&self) -> &str;
}

/// Render a prompt template by substituting the transcript.
///
/// The transcript is inserted literally at every `{transcript}` placeholder.
/// A template without the placeholder still gets the transcript, appended at
/// the end, so a misconfigured template never silently drops the content.
pub fn render_prompt(template: &str, transcript: &str) -> String {
    if template.contains(TRANSCRIPT_PLACEHOLDER) {
        template.replace(TRANSCRIPT_PLACEHOLDER, transcript)
    } else {
        format!("{}\n\n{}", template, transcript)
    }
}
