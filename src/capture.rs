//! Microphone capture on a dedicated thread.
//!
//! `cpal::Stream` is not `Send`, so the stream lives on its own thread and
//! hands interleaved 16-bit PCM frames to the async side over a bounded
//! channel. The thread is stopped through a command channel and joined; the
//! `Drop` impl makes release of the audio handle unconditional.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;

/// Frames buffered toward the streaming task before old audio is dropped.
const FRAME_CHANNEL_CAPACITY: usize = 64;

/// Errors that can occur while capturing audio.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("No input device available")]
    NoInputDevice,

    #[error("Failed to get device config: {0}")]
    DeviceConfig(String),

    #[error("Failed to build audio stream: {0}")]
    StreamBuild(String),

    #[error("Failed to start audio stream: {0}")]
    StreamStart(String),

    #[error("Capture thread terminated unexpectedly")]
    ThreadGone,
}

/// Commands sent to the capture thread.
enum CaptureCommand {
    Stop,
}

/// A live microphone stream delivering PCM frames.
pub struct MicrophoneStream {
    frames: mpsc::Receiver<Vec<i16>>,
    command_tx: std_mpsc::Sender<CaptureCommand>,
    thread: Option<JoinHandle<()>>,
    sample_rate: u32,
    channels: u16,
}

impl MicrophoneStream {
    /// Open the default input device and start capturing.
    ///
    /// Returns once the stream is actually playing; a device or stream
    /// failure surfaces here rather than as a silent dead channel.
    pub fn start() -> Result<Self, CaptureError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(CaptureError::NoInputDevice)?;

        let config = device
            .default_input_config()
            .map_err(|e| CaptureError::DeviceConfig(e.to_string()))?;

        let sample_rate = config.sample_rate().0;
        let channels = config.channels();
        let sample_format = config.sample_format();

        log::info!(
            "Audio input: {} Hz, {} channels, {:?}",
            sample_rate,
            channels,
            sample_format
        );

        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let (command_tx, command_rx) = std_mpsc::channel();
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let stream_config: cpal::StreamConfig = config.into();

        let thread = thread::spawn(move || {
            run_capture_thread(
                device,
                stream_config,
                sample_format,
                frame_tx,
                command_rx,
                ready_tx,
            );
        });

        // Wait for the thread to report the stream is up (or why it is not).
        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                frames: frame_rx,
                command_tx,
                thread: Some(thread),
                sample_rate,
                channels,
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(CaptureError::ThreadGone)
            }
        }
    }

    /// Receive the next PCM frame; `None` once capture has stopped.
    pub async fn next_frame(&mut self) -> Option<Vec<i16>> {
        self.frames.recv().await
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    fn stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            log::info!("Stopping microphone capture");
            let _ = self.command_tx.send(CaptureCommand::Stop);
            let _ = thread.join();
        }
    }
}

impl Drop for MicrophoneStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Convert an f32 sample in [-1, 1] to i16.
fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

fn run_capture_thread(
    device: cpal::Device,
    config: cpal::StreamConfig,
    sample_format: SampleFormat,
    frame_tx: mpsc::Sender<Vec<i16>>,
    command_rx: std_mpsc::Receiver<CaptureCommand>,
    ready_tx: std_mpsc::Sender<Result<(), CaptureError>>,
) {
    use cpal::Sample;

    let err_fn = |err| {
        log::error!("Audio stream error: {}", err);
    };

    // Frames are dropped rather than buffered without bound if the network
    // side falls behind.
    let push = move |frame: Vec<i16>, tx: &mpsc::Sender<Vec<i16>>| {
        if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(frame) {
            log::debug!("Audio frame dropped: channel full");
        }
    };

    let stream = match sample_format {
        SampleFormat::F32 => {
            let tx = frame_tx.clone();
            device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let frame: Vec<i16> = data.iter().map(|&s| f32_to_i16(s)).collect();
                    push(frame, &tx);
                },
                err_fn,
                None,
            )
        }
        SampleFormat::I16 => {
            let tx = frame_tx.clone();
            device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    push(data.to_vec(), &tx);
                },
                err_fn,
                None,
            )
        }
        SampleFormat::U16 => {
            let tx = frame_tx.clone();
            device.build_input_stream(
                &config,
                move |data: &[u16], _: &cpal::InputCallbackInfo| {
                    let frame: Vec<i16> = data
                        .iter()
                        .map(|&s| f32_to_i16(s.to_float_sample()))
                        .collect();
                    push(frame, &tx);
                },
                err_fn,
                None,
            )
        }
        other => {
            let _ = ready_tx.send(Err(CaptureError::DeviceConfig(format!(
                "Unsupported sample format: {:?}",
                other
            ))));
            return;
        }
    };

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(CaptureError::StreamBuild(e.to_string())));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(CaptureError::StreamStart(e.to_string())));
        return;
    }

    let _ = ready_tx.send(Ok(()));

    // Wait for the stop command.
    loop {
        match command_rx.recv_timeout(std::time::Duration::from_millis(100)) {
            Ok(CaptureCommand::Stop) => break,
            Err(std_mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    // Stream is dropped here, stopping capture.
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_to_i16_range() {
        assert_eq!(f32_to_i16(0.0), 0);
        assert_eq!(f32_to_i16(1.0), i16::MAX);
        assert_eq!(f32_to_i16(2.0), i16::MAX);
        assert_eq!(f32_to_i16(-2.0), -i16::MAX);
    }
}
