//! Desktop recording and transcription assistant.
//!
//! The crate records live microphone audio, streams it to a speech-to-text
//! service, and persists finalized transcript lines as they arrive; it can
//! also transcribe uploaded media files in batch mode and ask an LLM to
//! clean up and summarize a finished transcript.
//!
//! The moving part is [`controller::SessionController`], which owns the
//! lifecycle of at most one capture task and guarantees a bounded,
//! exactly-once-terminating stop sequence. Everything else is request/response
//! glue around the two external services plus JSON settings persistence.

pub mod capture;
pub mod controller;
pub mod llm;
pub mod media;
pub mod session;
pub mod settings;
pub mod stt;
pub mod summary;
pub mod transcript;
pub mod upload;

pub use controller::{RecordingState, SessionController, SessionError, SessionNotice};
pub use session::Session;
pub use settings::{ConfigStore, Settings};
pub use transcript::TranscriptEvent;
