//! Speech-to-text service abstraction and implementation.
//!
//! The speech service is consumed behind two narrow seams: [`SpeechProvider`]
//! for one-shot batch transcription of recorded audio, and
//! [`LiveTranscriber`] for the realtime streaming connection owned by the
//! capture task. Both are traits so the controller and the upload path can be
//! exercised against mocks.

mod assemblyai;

pub use assemblyai::AssemblyAiProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::transcript::TranscriptEvent;

/// Errors that can occur talking to the speech service.
#[derive(Debug, thiserror::Error)]
pub enum SttError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Streaming connection error: {0}")]
    Connection(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("API error: {0}")]
    Api(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Audio capture error: {0}")]
    Capture(#[from] crate::capture::CaptureError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Knobs applied to both the streaming and the batch request.
#[derive(Debug, Clone)]
pub struct TranscribeOptions {
    /// Capture sample rate in Hz.
    pub sample_rate: u32,
    /// Language code, e.g. "en" or "en_us".
    pub language_code: String,
    /// Request speaker diarization.
    pub speaker_labels: bool,
    /// Vocabulary hints, in order.
    pub word_boost: Vec<String>,
}

impl Default for TranscribeOptions {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            language_code: "en".to_string(),
            speaker_labels: false,
            word_boost: Vec::new(),
        }
    }
}

/// One diarized utterance of a batch transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Utterance {
    pub speaker: String,
    pub text: String,
}

/// Result of a completed batch transcription.
#[derive(Debug, Clone, Default)]
pub struct BatchTranscript {
    /// Full transcript text.
    pub text: String,
    /// Per-speaker utterances; empty unless diarization was requested.
    pub utterances: Vec<Utterance>,
}

/// Messages delivered from the capture task to the session controller.
///
/// Delivery is one-directional over a bounded channel; the controller's relay
/// task is the single consumption point.
#[derive(Debug, Clone)]
pub enum CaptureMessage {
    /// The streaming connection is live; recording has effectively begun.
    Ready,
    /// A partial or final transcript fragment.
    Transcript(TranscriptEvent),
    /// The capture task hit an unrecoverable error and is terminating.
    Error(String),
}

/// One-shot batch transcription of a complete audio file.
#[async_trait]
pub trait SpeechProvider: Send + Sync {
    /// Submit `audio` (an encoded audio file, typically WAV or MP3 bytes) and
    /// block until the service returns the full transcript.
    async fn transcribe(
        &self,
        audio: &[u8],
        options: &TranscribeOptions,
    ) -> Result<BatchTranscript, SttError>;

    /// Provider name, for logging.
    fn name(&self) -> &'static str;
}

/// The realtime streaming session run by the capture task.
///
/// Implementations own the microphone and the network connection for the
/// duration of the call: open the connection, send [`CaptureMessage::Ready`]
/// once it is live, relay transcript fragments, and shut everything down when
/// `cancel` fires or the service ends the session. Resources must be released
/// on every exit path.
#[async_trait]
pub trait LiveTranscriber: Send + Sync {
    async fn run(
        &self,
        options: TranscribeOptions,
        events: mpsc::Sender<CaptureMessage>,
        cancel: CancellationToken,
    ) -> Result<(), SttError>;

    /// Provider name, for logging.
    fn name(&self) -> &'static str;
}
