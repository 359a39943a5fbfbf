//! AssemblyAI speech-to-text provider.
//!
//! Implements both service modes: batch transcription (upload the audio,
//! create a transcript job, poll until it settles) and the realtime WebSocket
//! session used by the capture task during live recording.

use super::{BatchTranscript, CaptureMessage, LiveTranscriber, SpeechProvider, SttError, TranscribeOptions, Utterance};
use crate::capture::MicrophoneStream;
use crate::transcript::TranscriptEvent;
use async_trait::async_trait;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

const API_ROOT: &str = "https://api.assemblyai.com/v2";
const REALTIME_URL: &str = "wss://api.assemblyai.com/v2/realtime/ws";

/// How often the batch path polls for transcript completion.
const POLL_INTERVAL: Duration = Duration::from_secs(3);

/// How long the realtime session waits for the service to acknowledge
/// termination before closing the socket regardless.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// AssemblyAI provider for batch and realtime transcription.
pub struct AssemblyAiProvider {
    client: reqwest::Client,
    api_key: String,
}

impl AssemblyAiProvider {
    pub fn new(api_key: String) -> Result<Self, SttError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self { client, api_key })
    }

    /// Create a provider with a custom HTTP client.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn with_client(client: reqwest::Client, api_key: String) -> Self {
        Self { client, api_key }
    }

    /// Build the realtime WebSocket URL with the session parameters.
    fn realtime_url(options: &TranscribeOptions) -> Result<Url, SttError> {
        let mut url = Url::parse(REALTIME_URL)
            .map_err(|e| SttError::Config(format!("Invalid realtime base URL: {}", e)))?;

        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("sample_rate", &options.sample_rate.to_string());
            pairs.append_pair("language_code", &options.language_code);
            if options.speaker_labels {
                pairs.append_pair("speaker_labels", "true");
            }
            if !options.word_boost.is_empty() {
                let boost = serde_json::to_string(&options.word_boost)
                    .map_err(|e| SttError::Config(format!("Invalid vocabulary list: {}", e)))?;
                pairs.append_pair("word_boost", &boost);
            }
        }

        Ok(url)
    }

    /// Upload raw audio bytes; returns the service-side URL for them.
    async fn upload_audio(&self, audio: &[u8]) -> Result<String, SttError> {
        let response = self
            .client
            .post(format!("{}/upload", API_ROOT))
            .header("authorization", &self.api_key)
            .header("content-type", "application/octet-stream")
            .body(audio.to_vec())
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SttError::Api(format!(
                "Upload failed ({}): {}",
                status, body
            )));
        }

        let value: serde_json::Value = response.json().await?;
        value["upload_url"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                SttError::InvalidResponse("Upload response missing upload_url".to_string())
            })
    }

    /// Create a transcript job for an uploaded audio URL.
    async fn create_transcript(
        &self,
        audio_url: &str,
        options: &TranscribeOptions,
    ) -> Result<String, SttError> {
        let mut body = json!({
            "audio_url": audio_url,
            "language_code": options.language_code,
            "speaker_labels": options.speaker_labels,
        });
        if !options.word_boost.is_empty() {
            body["word_boost"] = json!(options.word_boost);
        }

        let response = self
            .client
            .post(format!("{}/transcript", API_ROOT))
            .header("authorization", &self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SttError::Api(format!(
                "Transcript request failed ({}): {}",
                status, body
            )));
        }

        let value: serde_json::Value = response.json().await?;
        value["id"].as_str().map(str::to_string).ok_or_else(|| {
            SttError::InvalidResponse("Transcript response missing id".to_string())
        })
    }

    /// Poll a transcript job until it completes or errors.
    async fn poll_transcript(&self, id: &str) -> Result<BatchTranscript, SttError> {
        loop {
            let response = self
                .client
                .get(format!("{}/transcript/{}", API_ROOT, id))
                .header("authorization", &self.api_key)
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(SttError::Api(format!(
                    "Transcript poll failed ({}): {}",
                    status, body
                )));
            }

            let status: TranscriptStatusResponse = response.json().await?;
            match status.status.as_str() {
                "completed" => {
                    return Ok(BatchTranscript {
                        text: status.text.unwrap_or_default(),
                        utterances: status
                            .utterances
                            .unwrap_or_default()
                            .into_iter()
                            .map(|u| Utterance {
                                speaker: u.speaker,
                                text: u.text,
                            })
                            .collect(),
                    });
                }
                "error" => {
                    return Err(SttError::Api(
                        status
                            .error
                            .unwrap_or_else(|| "Transcription failed".to_string()),
                    ));
                }
                other => {
                    log::debug!("Transcript {} status: {}", id, other);
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptStatusResponse {
    status: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    utterances: Option<Vec<UtteranceResponse>>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UtteranceResponse {
    speaker: String,
    text: String,
}

#[async_trait]
impl SpeechProvider for AssemblyAiProvider {
    async fn transcribe(
        &self,
        audio: &[u8],
        options: &TranscribeOptions,
    ) -> Result<BatchTranscript, SttError> {
        log::info!("Uploading {} bytes for batch transcription", audio.len());
        let audio_url = self.upload_audio(audio).await?;
        let id = self.create_transcript(&audio_url, options).await?;
        log::info!("Transcript job {} created, polling", id);
        self.poll_transcript(&id).await
    }

    fn name(&self) -> &'static str {
        "assemblyai"
    }
}

/// A decoded realtime message from the service.
#[derive(Debug, PartialEq)]
enum RealtimeEvent {
    Began,
    Transcript(TranscriptEvent),
    Terminated,
    ServiceError(String),
    /// Empty-text or unknown message; nothing to do.
    Ignored,
}

/// Decode one text frame from the realtime socket.
///
/// Messages are discriminated by `message_type`; errors arrive as a bare
/// `{"error": ...}` object. Unknown message types are ignored so protocol
/// additions do not break the session.
fn parse_realtime_message(text: &str) -> RealtimeEvent {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            log::warn!("Unparseable realtime message ({}): {}", e, text);
            return RealtimeEvent::Ignored;
        }
    };

    if let Some(error) = value.get("error").and_then(|e| e.as_str()) {
        return RealtimeEvent::ServiceError(error.to_string());
    }

    let transcript_of = |value: &serde_json::Value, is_final: bool| {
        let text = value["text"].as_str().unwrap_or("").to_string();
        if text.is_empty() {
            return RealtimeEvent::Ignored;
        }
        RealtimeEvent::Transcript(TranscriptEvent {
            text,
            is_final,
            speaker: value["speaker"].as_str().map(str::to_string),
        })
    };

    match value["message_type"].as_str() {
        Some("SessionBegins") => RealtimeEvent::Began,
        Some("PartialTranscript") => transcript_of(&value, false),
        Some("FinalTranscript") => transcript_of(&value, true),
        Some("SessionTerminated") => RealtimeEvent::Terminated,
        _ => RealtimeEvent::Ignored,
    }
}

/// Interleaved i16 PCM to little-endian bytes.
fn pcm_to_bytes(frame: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(frame.len() * 2);
    for sample in frame {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Average interleaved channels down to mono; the realtime endpoint expects a
/// single channel.
fn downmix_to_mono(frame: &[i16], channels: u16) -> Vec<i16> {
    let channels = channels.max(1) as usize;
    if channels == 1 {
        return frame.to_vec();
    }
    frame
        .chunks(channels)
        .map(|chunk| {
            let sum: i32 = chunk.iter().map(|&s| s as i32).sum();
            (sum / chunk.len() as i32) as i16
        })
        .collect()
}

#[async_trait]
impl LiveTranscriber for AssemblyAiProvider {
    async fn run(
        &self,
        mut options: TranscribeOptions,
        events: mpsc::Sender<CaptureMessage>,
        cancel: CancellationToken,
    ) -> Result<(), SttError> {
        // Open the microphone first: the session must be created with the
        // device's actual sample rate.
        let mut mic = MicrophoneStream::start()?;
        options.sample_rate = mic.sample_rate();
        let channels = mic.channels();

        let url = Self::realtime_url(&options)?;
        let mut request = url.as_str().into_client_request()?;
        request.headers_mut().insert(
            "Authorization",
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| SttError::Config(format!("Invalid API key format: {}", e)))?,
        );

        log::info!("Connecting realtime session ({} Hz)", options.sample_rate);
        let ws = tokio::select! {
            _ = cancel.cancelled() => {
                log::info!("Realtime session cancelled before connect");
                return Ok(());
            }
            result = connect_async(request) => result?.0,
        };
        let (mut write, mut read) = ws.split();

        let b64 = base64::engine::general_purpose::STANDARD;
        let mut session_error: Option<SttError> = None;

        // Main loop: pump microphone frames out, transcripts in, until the
        // session is cancelled, the mic ends, or the service drops us.
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("Realtime session stop requested");
                    break;
                }

                frame = mic.next_frame() => {
                    match frame {
                        Some(frame) => {
                            let mono = downmix_to_mono(&frame, channels);
                            let payload = json!({
                                "audio_data": b64.encode(pcm_to_bytes(&mono)),
                            });
                            if write.send(Message::Text(payload.to_string())).await.is_err() {
                                log::warn!("Realtime socket closed while sending audio");
                                break;
                            }
                        }
                        None => {
                            log::warn!("Microphone stream ended");
                            break;
                        }
                    }
                }

                incoming = read.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            match parse_realtime_message(&text) {
                                RealtimeEvent::Began => {
                                    log::info!("Realtime session is live");
                                    if events.send(CaptureMessage::Ready).await.is_err() {
                                        break;
                                    }
                                }
                                RealtimeEvent::Transcript(event) => {
                                    if events.send(CaptureMessage::Transcript(event)).await.is_err() {
                                        break;
                                    }
                                }
                                RealtimeEvent::Terminated => break,
                                RealtimeEvent::ServiceError(message) => {
                                    session_error = Some(SttError::Api(message));
                                    break;
                                }
                                RealtimeEvent::Ignored => {}
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Realtime socket closed by service");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            session_error = Some(e.into());
                            break;
                        }
                    }
                }
            }
        }

        // Release the audio source before the shutdown handshake.
        drop(mic);

        // Graceful termination: ask the service to close the session and
        // drain the tail. Final transcripts can still arrive here and must be
        // forwarded. The wait is bounded; a mute service cannot hang us.
        let _ = write
            .send(Message::Text(json!({"terminate_session": true}).to_string()))
            .await;

        let drain = async {
            while let Some(Ok(message)) = read.next().await {
                if let Message::Text(text) = message {
                    match parse_realtime_message(&text) {
                        RealtimeEvent::Transcript(event) => {
                            if events.send(CaptureMessage::Transcript(event)).await.is_err() {
                                break;
                            }
                        }
                        RealtimeEvent::Terminated => break,
                        _ => {}
                    }
                }
            }
        };
        if tokio::time::timeout(TERMINATE_GRACE, drain).await.is_err() {
            log::warn!("Realtime session did not acknowledge termination in time");
        }

        let _ = write.close().await;
        log::info!("Realtime session closed");

        match session_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn name(&self) -> &'static str {
        "assemblyai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_realtime_url_parameters() {
        let options = TranscribeOptions {
            sample_rate: 44_100,
            language_code: "en_us".to_string(),
            speaker_labels: true,
            word_boost: vec!["serde".to_string(), "tokio".to_string()],
        };
        let url = AssemblyAiProvider::realtime_url(&options).unwrap();
        let query = url.query().unwrap();
        assert!(query.contains("sample_rate=44100"));
        assert!(query.contains("language_code=en_us"));
        assert!(query.contains("speaker_labels=true"));
        assert!(query.contains("word_boost"));
    }

    #[test]
    fn test_realtime_url_omits_empty_options() {
        let url = AssemblyAiProvider::realtime_url(&TranscribeOptions::default()).unwrap();
        let query = url.query().unwrap();
        assert!(!query.contains("word_boost"));
        assert!(!query.contains("speaker_labels"));
    }

    #[test]
    fn test_parse_session_begins() {
        let event = parse_realtime_message(
            r#"{"message_type": "SessionBegins", "session_id": "abc"}"#,
        );
        assert_eq!(event, RealtimeEvent::Began);
    }

    #[test]
    fn test_parse_partial_and_final() {
        let partial =
            parse_realtime_message(r#"{"message_type": "PartialTranscript", "text": "hel"}"#);
        assert_eq!(
            partial,
            RealtimeEvent::Transcript(TranscriptEvent::partial("hel"))
        );

        let final_ =
            parse_realtime_message(r#"{"message_type": "FinalTranscript", "text": "Hello."}"#);
        assert_eq!(
            final_,
            RealtimeEvent::Transcript(TranscriptEvent::final_text("Hello."))
        );
    }

    #[test]
    fn test_parse_empty_text_is_ignored() {
        let event =
            parse_realtime_message(r#"{"message_type": "PartialTranscript", "text": ""}"#);
        assert_eq!(event, RealtimeEvent::Ignored);
    }

    #[test]
    fn test_parse_error_payload() {
        let event = parse_realtime_message(r#"{"error": "not authorized"}"#);
        assert_eq!(
            event,
            RealtimeEvent::ServiceError("not authorized".to_string())
        );
    }

    #[test]
    fn test_parse_unknown_message_type_is_ignored() {
        let event = parse_realtime_message(r#"{"message_type": "SomethingNew"}"#);
        assert_eq!(event, RealtimeEvent::Ignored);
    }

    #[test]
    fn test_pcm_to_bytes_little_endian() {
        assert_eq!(pcm_to_bytes(&[1, -2]), vec![0x01, 0x00, 0xFE, 0xFF]);
    }

    #[test]
    fn test_downmix_to_mono() {
        assert_eq!(downmix_to_mono(&[10, 20, 30, 50], 2), vec![15, 40]);
        assert_eq!(downmix_to_mono(&[10, 20], 1), vec![10, 20]);
    }
}
