//! Recording session lifecycle controller.
//!
//! Owns at most one capture task at a time and drives it through an explicit
//! state machine: Idle → Starting → Recording → Stopping → Idle. The capture
//! task reports back over a bounded channel; a relay task is the single
//! consumption point, translating capture messages into transcript-file
//! appends and notices for the presentation layer.
//!
//! Stopping is two-phase: cancel the capture task's token, wait up to a fixed
//! timeout for it to wind down on its own, then abort it. Whether the session
//! ends through a stop request or a capture-task error, the caller receives
//! exactly one `Stopped` notice. That is enforced structurally: the active
//! capture lives in a single `Option` slot and only the path that takes the
//! slot finishes the session.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::session::Session;
use crate::settings::Settings;
use crate::stt::{CaptureMessage, LiveTranscriber, TranscribeOptions};
use crate::transcript::TranscriptSink;

/// How long a stop request waits for the capture task before aborting it.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity of the capture-task event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Recording lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    /// No session active; ready to start.
    Idle,
    /// Capture task spawned, streaming connection not yet live.
    Starting,
    /// Streaming connection live, transcript events flowing.
    Recording,
    /// Stop requested or teardown in progress.
    Stopping,
}

impl RecordingState {
    /// Check if this state allows starting a new session.
    pub fn can_start(&self) -> bool {
        matches!(self, RecordingState::Idle)
    }

    /// Check if this state allows requesting a stop. A stop while Starting
    /// is treated as a cancel.
    pub fn can_stop(&self) -> bool {
        matches!(self, RecordingState::Starting | RecordingState::Recording)
    }
}

/// Notices emitted to the presentation layer.
#[derive(Debug, Clone)]
pub enum SessionNotice {
    /// The streaming connection is live and transcription has begun.
    Started { session_name: String },
    /// A provisional fragment; display-only, never persisted.
    Partial(String),
    /// A finalized utterance; already appended to the transcript file.
    Final(String),
    /// Terminal notice: the session is over and the controller is Idle.
    /// Emitted exactly once per session.
    Stopped {
        session_name: String,
        error: Option<String>,
    },
}

/// Errors returned by controller operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("A recording session is already active")]
    AlreadyActive,

    #[error("No recording session is active")]
    NotActive,

    #[error("Speech API key is not configured")]
    MissingCredentials,

    #[error("Failed to prepare session: {0}")]
    Io(#[from] std::io::Error),

    #[error("Lock error: {0}")]
    Lock(String),
}

/// Handles to the running capture machinery. One per session, held in a
/// single optional slot.
struct ActiveCapture {
    session: Session,
    cancel: CancellationToken,
    capture: JoinHandle<()>,
    relay: JoinHandle<()>,
}

struct ControllerInner {
    state: RecordingState,
    active: Option<ActiveCapture>,
    /// Error recorded by the relay, surfaced in the Stopped notice by
    /// whichever path finishes the session.
    pending_error: Option<String>,
}

/// The session controller. Cheap to share; all methods take `&self`.
pub struct SessionController {
    inner: Arc<Mutex<ControllerInner>>,
    notices: mpsc::UnboundedSender<SessionNotice>,
    stop_timeout: Duration,
}

impl SessionController {
    /// Create a controller and the notice stream for the presentation layer.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionNotice>) {
        let (notices, notice_rx) = mpsc::unbounded_channel();
        let controller = Self {
            inner: Arc::new(Mutex::new(ControllerInner {
                state: RecordingState::Idle,
                active: None,
                pending_error: None,
            })),
            notices,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        };
        (controller, notice_rx)
    }

    /// Override the graceful-stop timeout.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RecordingState {
        self.inner
            .lock()
            .map(|guard| guard.state)
            .unwrap_or(RecordingState::Idle)
    }

    /// Start a live recording session.
    ///
    /// Fails fast, with no state change, when credentials are missing or a
    /// session is already active. On success the state is Starting; the
    /// transition to Recording happens when the capture task reports its
    /// connection is live.
    pub fn start(
        &self,
        session: Session,
        settings: &Settings,
        live: Arc<dyn LiveTranscriber>,
    ) -> Result<(), SessionError> {
        if !settings.has_speech_credentials() {
            return Err(SessionError::MissingCredentials);
        }

        let mut inner = self
            .inner
            .lock()
            .map_err(|e| SessionError::Lock(e.to_string()))?;

        if !inner.state.can_start() {
            return Err(SessionError::AlreadyActive);
        }

        session.ensure_directory()?;
        let sink = TranscriptSink::open_append(session.transcript_path())?;

        let options = TranscribeOptions {
            language_code: settings.language_code.clone(),
            speaker_labels: settings.speaker_labels,
            word_boost: settings.custom_vocabulary.clone(),
            ..TranscribeOptions::default()
        };

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        // Capture task: owns the microphone and the streaming connection for
        // the lifetime of the session. An error return is folded into the
        // event stream so the relay sees every outcome on one channel.
        let task_cancel = cancel.clone();
        let error_tx = event_tx.clone();
        let capture = tokio::spawn(async move {
            if let Err(e) = live.run(options, event_tx, task_cancel).await {
                let _ = error_tx.send(CaptureMessage::Error(e.to_string())).await;
            }
        });

        let relay = tokio::spawn(relay_events(
            self.inner.clone(),
            event_rx,
            sink,
            self.notices.clone(),
            session.clone(),
            cancel.clone(),
            self.stop_timeout,
        ));

        inner.state = RecordingState::Starting;
        inner.pending_error = None;
        inner.active = Some(ActiveCapture {
            session,
            cancel,
            capture,
            relay,
        });

        log::info!("Recording session starting");
        Ok(())
    }

    /// Stop the active session (or cancel one that is still starting).
    ///
    /// Blocks the caller up to the stop timeout waiting for the capture task
    /// to terminate gracefully, then forces termination. Returns once the
    /// controller is Idle again; the terminal `Stopped` notice has been
    /// emitted by then.
    pub async fn request_stop(&self) -> Result<(), SessionError> {
        let active = {
            let mut inner = self
                .inner
                .lock()
                .map_err(|e| SessionError::Lock(e.to_string()))?;

            if !inner.state.can_stop() {
                return Err(SessionError::NotActive);
            }
            inner.state = RecordingState::Stopping;
            inner.active.take()
        };

        // If the relay's own teardown won the race for the slot it also owns
        // the terminal notice; nothing left to do here.
        let Some(mut active) = active else {
            return Ok(());
        };

        log::info!("Stopping recording session");
        active.cancel.cancel();
        join_capture_task(&mut active.capture, self.stop_timeout).await;

        // Let the relay drain events that raced the stop before the session
        // is declared over; the channel is closed now, so this is quick.
        if tokio::time::timeout(self.stop_timeout, &mut active.relay)
            .await
            .is_err()
        {
            log::warn!("Relay task did not drain in time; aborting it");
            active.relay.abort();
        }

        let error = {
            let mut inner = self
                .inner
                .lock()
                .map_err(|e| SessionError::Lock(e.to_string()))?;
            inner.state = RecordingState::Idle;
            inner.pending_error.take()
        };

        let _ = self.notices.send(SessionNotice::Stopped {
            session_name: active.session.name.clone(),
            error,
        });
        log::info!("Recording session stopped");
        Ok(())
    }
}

/// Wait for the capture task to end, forcing termination on timeout.
async fn join_capture_task(task: &mut JoinHandle<()>, stop_timeout: Duration) {
    match tokio::time::timeout(stop_timeout, &mut *task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::warn!("Capture task ended abnormally: {}", e),
        Err(_) => {
            log::warn!(
                "Capture task did not stop within {:?}; forcing termination",
                stop_timeout
            );
            task.abort();
            let _ = task.await;
        }
    }
}

/// Relay loop: the single consumer of capture messages and the sole writer
/// of the transcript sink. Runs until the capture task is gone (channel
/// closed), then finishes the session unless a stop request already claimed
/// it.
async fn relay_events(
    inner: Arc<Mutex<ControllerInner>>,
    mut events: mpsc::Receiver<CaptureMessage>,
    mut sink: TranscriptSink,
    notices: mpsc::UnboundedSender<SessionNotice>,
    session: Session,
    cancel: CancellationToken,
    stop_timeout: Duration,
) {
    while let Some(message) = events.recv().await {
        match message {
            CaptureMessage::Ready => {
                let became_recording = match inner.lock() {
                    Ok(mut guard) => {
                        if guard.state == RecordingState::Starting {
                            guard.state = RecordingState::Recording;
                            true
                        } else {
                            false
                        }
                    }
                    Err(e) => {
                        log::error!("Controller lock poisoned: {}", e);
                        return;
                    }
                };
                if became_recording {
                    log::info!("Session '{}' is recording", session.name);
                    let _ = notices.send(SessionNotice::Started {
                        session_name: session.name.clone(),
                    });
                }
            }
            CaptureMessage::Transcript(event) => {
                if event.is_final {
                    if let Err(e) = sink.append_final(&event.text) {
                        log::error!("Failed to append to transcript: {}", e);
                        record_error(&inner, format!("Failed to write transcript: {}", e));
                        // The transcript is being lost; end the session.
                        cancel.cancel();
                    }
                    let _ = notices.send(SessionNotice::Final(event.text));
                } else {
                    let _ = notices.send(SessionNotice::Partial(event.text));
                }
            }
            CaptureMessage::Error(message) => {
                log::error!("Capture task error: {}", message);
                record_error(&inner, message);
                // Keep draining: the channel closes once the task exits, and
                // events already in flight are still processed.
            }
        }
    }

    // Channel closed: the capture task has terminated. Claim the session
    // unless a stop request already did.
    let taken = match inner.lock() {
        Ok(mut guard) => match guard.active.take() {
            Some(active) => {
                guard.state = RecordingState::Stopping;
                Some(active)
            }
            None => None,
        },
        Err(e) => {
            log::error!("Controller lock poisoned: {}", e);
            return;
        }
    };

    let Some(mut active) = taken else {
        // A stop request owns the finish; it is awaiting this relay.
        return;
    };

    active.cancel.cancel();
    join_capture_task(&mut active.capture, stop_timeout).await;

    let error = match inner.lock() {
        Ok(mut guard) => {
            guard.state = RecordingState::Idle;
            guard.pending_error.take()
        }
        Err(e) => {
            log::error!("Controller lock poisoned: {}", e);
            None
        }
    };

    let _ = notices.send(SessionNotice::Stopped {
        session_name: session.name.clone(),
        error,
    });
    log::info!("Session '{}' stopped", session.name);
}

/// Record the first error for the session; later ones only get logged.
fn record_error(inner: &Arc<Mutex<ControllerInner>>, message: String) {
    if let Ok(mut guard) = inner.lock() {
        guard.pending_error.get_or_insert(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stt::SttError;
    use crate::transcript::TranscriptEvent;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Scripted capture task: plays back a fixed list of messages, then
    /// either waits for cancellation or ignores it entirely.
    struct ScriptedLive {
        script: Vec<CaptureMessage>,
        runs: AtomicUsize,
        ignore_cancel: bool,
    }

    impl ScriptedLive {
        fn new(script: Vec<CaptureMessage>) -> Self {
            Self {
                script,
                runs: AtomicUsize::new(0),
                ignore_cancel: false,
            }
        }

        fn ignoring_cancel(mut self) -> Self {
            self.ignore_cancel = true;
            self
        }
    }

    #[async_trait]
    impl LiveTranscriber for ScriptedLive {
        async fn run(
            &self,
            _options: TranscribeOptions,
            events: mpsc::Sender<CaptureMessage>,
            cancel: CancellationToken,
        ) -> Result<(), SttError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            for message in &self.script {
                if events.send(message.clone()).await.is_err() {
                    return Ok(());
                }
            }
            if self.ignore_cancel {
                // A misbehaving connection that never winds down.
                tokio::time::sleep(Duration::from_secs(300)).await;
            } else {
                cancel.cancelled().await;
            }
            Ok(())
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    fn test_settings(dir: &TempDir) -> Settings {
        Settings {
            speech_api_key: "test-key".to_string(),
            output_dir: dir.path().to_path_buf(),
            ..Settings::default()
        }
    }

    async fn recv_notice(
        rx: &mut mpsc::UnboundedReceiver<SessionNotice>,
    ) -> SessionNotice {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for notice")
            .expect("notice channel closed")
    }

    async fn wait_for_stopped(
        rx: &mut mpsc::UnboundedReceiver<SessionNotice>,
    ) -> (String, Option<String>) {
        loop {
            if let SessionNotice::Stopped {
                session_name,
                error,
            } = recv_notice(rx).await
            {
                return (session_name, error);
            }
        }
    }

    #[tokio::test]
    async fn test_only_final_events_are_persisted_in_order() {
        let dir = TempDir::new().unwrap();
        let settings = test_settings(&dir);
        let (controller, mut notices) = SessionController::new();
        let session = Session::new(Some("meeting"), &settings.output_dir);
        let transcript_path = session.transcript_path();

        let live = Arc::new(ScriptedLive::new(vec![
            CaptureMessage::Ready,
            CaptureMessage::Transcript(TranscriptEvent::partial("Hel")),
            CaptureMessage::Transcript(TranscriptEvent::final_text("Hello world.")),
            CaptureMessage::Transcript(TranscriptEvent::partial("How")),
            CaptureMessage::Transcript(TranscriptEvent::final_text("How are you?")),
        ]));

        controller.start(session, &settings, live).unwrap();

        // Wait until the second final has been relayed, then stop.
        loop {
            if let SessionNotice::Final(text) = recv_notice(&mut notices).await {
                if text == "How are you?" {
                    break;
                }
            }
        }
        controller.request_stop().await.unwrap();

        let contents = std::fs::read_to_string(transcript_path).unwrap();
        assert_eq!(contents, "Hello world.\nHow are you?\n");
        assert_eq!(controller.state(), RecordingState::Idle);
    }

    #[tokio::test]
    async fn test_request_stop_while_idle_is_rejected() {
        let (controller, _notices) = SessionController::new();
        let result = controller.request_stop().await;
        assert!(matches!(result, Err(SessionError::NotActive)));
        assert_eq!(controller.state(), RecordingState::Idle);
    }

    #[tokio::test]
    async fn test_start_while_recording_is_rejected() {
        let dir = TempDir::new().unwrap();
        let settings = test_settings(&dir);
        let (controller, mut notices) = SessionController::new();

        let live = Arc::new(ScriptedLive::new(vec![CaptureMessage::Ready]));

        controller
            .start(Session::new(Some("one"), &settings.output_dir), &settings, live)
            .unwrap();
        // Wait until the session is actually recording.
        loop {
            if let SessionNotice::Started { .. } = recv_notice(&mut notices).await {
                break;
            }
        }

        let second_live = Arc::new(ScriptedLive::new(vec![CaptureMessage::Ready]));
        let second = controller.start(
            Session::new(Some("two"), &settings.output_dir),
            &settings,
            second_live.clone(),
        );
        assert!(matches!(second, Err(SessionError::AlreadyActive)));
        // The rejected start must not have spawned a second capture task.
        assert_eq!(second_live.runs.load(Ordering::SeqCst), 0);

        controller.request_stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_fast() {
        let dir = TempDir::new().unwrap();
        let settings = Settings {
            output_dir: dir.path().to_path_buf(),
            ..Settings::default()
        };
        let (controller, _notices) = SessionController::new();

        let result = controller.start(
            Session::new(Some("s"), &settings.output_dir),
            &settings,
            Arc::new(ScriptedLive::new(vec![])),
        );
        assert!(matches!(result, Err(SessionError::MissingCredentials)));
        assert_eq!(controller.state(), RecordingState::Idle);
    }

    #[tokio::test]
    async fn test_forced_termination_on_stuck_capture_task() {
        let dir = TempDir::new().unwrap();
        let settings = test_settings(&dir);
        let (controller, mut notices) = SessionController::new();
        let controller = controller.with_stop_timeout(Duration::from_millis(100));

        let live =
            Arc::new(ScriptedLive::new(vec![CaptureMessage::Ready]).ignoring_cancel());
        controller
            .start(Session::new(Some("stuck"), &settings.output_dir), &settings, live)
            .unwrap();
        loop {
            if let SessionNotice::Started { .. } = recv_notice(&mut notices).await {
                break;
            }
        }

        // The capture task ignores cancellation; the stop must still return
        // and leave the controller idle.
        controller.request_stop().await.unwrap();
        assert_eq!(controller.state(), RecordingState::Idle);

        let (name, error) = wait_for_stopped(&mut notices).await;
        assert_eq!(name, "stuck");
        assert!(error.is_none());
    }

    #[tokio::test]
    async fn test_capture_task_error_drives_controller_to_idle() {
        let dir = TempDir::new().unwrap();
        let settings = test_settings(&dir);
        let (controller, mut notices) = SessionController::new();

        let live = Arc::new(ScriptedLive {
            script: vec![
                CaptureMessage::Ready,
                CaptureMessage::Transcript(TranscriptEvent::final_text("so far")),
                CaptureMessage::Error("connection lost".to_string()),
            ],
            runs: AtomicUsize::new(0),
            ignore_cancel: false,
        });
        let session = Session::new(Some("flaky"), &settings.output_dir);
        let transcript_path = session.transcript_path();

        controller.start(session, &settings, live).unwrap();

        let (name, error) = wait_for_stopped(&mut notices).await;
        assert_eq!(name, "flaky");
        assert_eq!(error.as_deref(), Some("connection lost"));
        assert_eq!(controller.state(), RecordingState::Idle);

        // The final delivered before the error is still on disk.
        let contents = std::fs::read_to_string(transcript_path).unwrap();
        assert_eq!(contents, "so far\n");
    }

    #[tokio::test]
    async fn test_exactly_one_stopped_notice() {
        let dir = TempDir::new().unwrap();
        let settings = test_settings(&dir);
        let (controller, mut notices) = SessionController::new();

        let live = Arc::new(ScriptedLive::new(vec![CaptureMessage::Ready]));
        controller
            .start(Session::new(Some("once"), &settings.output_dir), &settings, live)
            .unwrap();
        loop {
            if let SessionNotice::Started { .. } = recv_notice(&mut notices).await {
                break;
            }
        }

        controller.request_stop().await.unwrap();

        // Give any duplicate a chance to appear, then count.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let mut stopped = 0;
        while let Ok(notice) = notices.try_recv() {
            if matches!(notice, SessionNotice::Stopped { .. }) {
                stopped += 1;
            }
        }
        assert_eq!(stopped, 1);
    }

    #[tokio::test]
    async fn test_session_can_restart_after_stop() {
        let dir = TempDir::new().unwrap();
        let settings = test_settings(&dir);
        let (controller, mut notices) = SessionController::new();

        for name in ["first", "second"] {
            let live = Arc::new(ScriptedLive::new(vec![CaptureMessage::Ready]));
            controller
                .start(Session::new(Some(name), &settings.output_dir), &settings, live)
                .unwrap();
            loop {
                if let SessionNotice::Started { .. } = recv_notice(&mut notices).await {
                    break;
                }
            }
            controller.request_stop().await.unwrap();
            assert_eq!(controller.state(), RecordingState::Idle);
        }
    }
}
