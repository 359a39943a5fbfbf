//! Audio handling for uploaded media files.
//!
//! The batch path accepts audio files as-is; for recognized video containers
//! the audio track is decoded with symphonia and re-encoded as a temporary
//! WAV, which is always removed afterward (the [`TempAudio`] guard deletes it
//! on drop, success or failure).

use hound::{WavSpec, WavWriter};
use std::fs::File;
use std::path::{Path, PathBuf};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Container extensions treated as video (audio track gets extracted).
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "webm", "flv"];

/// Errors that can occur while preparing media for transcription.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("Failed to read media file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to decode media: {0}")]
    Decode(String),

    #[error("No audio track found in media file")]
    NoAudioTrack,

    #[error("Failed to encode audio: {0}")]
    Encode(String),
}

/// Whether the path names a recognized video container.
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_lowercase();
            VIDEO_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

/// A temporary extracted-audio file, deleted when dropped.
#[derive(Debug)]
pub struct TempAudio {
    path: PathBuf,
}

impl TempAudio {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempAudio {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!(
                    "Could not remove temporary audio file {}: {}",
                    self.path.display(),
                    e
                );
            }
        }
    }
}

/// Decode the audio track of `media_path` into a temporary 16-bit WAV under
/// `temp_dir`.
pub fn extract_audio_track(media_path: &Path, temp_dir: &Path) -> Result<TempAudio, MediaError> {
    log::info!("Extracting audio track from {}", media_path.display());

    let file = File::open(media_path)?;
    let stream = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = media_path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| MediaError::Decode(e.to_string()))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(MediaError::NoAudioTrack)?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| MediaError::Decode(e.to_string()))?;

    let mut samples: Vec<i16> = Vec::new();
    let mut signal_spec = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(MediaError::Decode(e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let mut buffer = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buffer.samples());
                signal_spec.get_or_insert(spec);
            }
            // Skip over corrupt packets rather than failing the extraction.
            Err(SymphoniaError::DecodeError(e)) => {
                log::warn!("Skipping undecodable packet: {}", e);
            }
            Err(e) => return Err(MediaError::Decode(e.to_string())),
        }
    }

    let spec = signal_spec.ok_or(MediaError::NoAudioTrack)?;
    if samples.is_empty() {
        return Err(MediaError::NoAudioTrack);
    }

    std::fs::create_dir_all(temp_dir)?;
    let temp_path = temp_dir.join(format!(
        "temp_audio_{}.wav",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    ));

    let wav_spec = WavSpec {
        channels: spec.channels.count() as u16,
        sample_rate: spec.rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = WavWriter::create(&temp_path, wav_spec)
        .map_err(|e| MediaError::Encode(e.to_string()))?;
    // The file exists from here on; the guard owns its cleanup even if a
    // later step fails.
    let temp = TempAudio { path: temp_path };

    for &sample in &samples {
        writer
            .write_sample(sample)
            .map_err(|e| MediaError::Encode(e.to_string()))?;
    }
    writer
        .finalize()
        .map_err(|e| MediaError::Encode(e.to_string()))?;

    log::info!(
        "Extracted {:.1}s of audio to {}",
        samples.len() as f64 / (spec.rate as f64 * spec.channels.count() as f64),
        temp.path().display()
    );

    Ok(temp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_is_video_file() {
        assert!(is_video_file(Path::new("call.mp4")));
        assert!(is_video_file(Path::new("call.MKV")));
        assert!(!is_video_file(Path::new("call.mp3")));
        assert!(!is_video_file(Path::new("call")));
    }

    #[test]
    fn test_temp_audio_removed_on_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("temp_audio_test.wav");
        std::fs::write(&path, b"bytes").unwrap();

        let temp = TempAudio { path: path.clone() };
        assert!(path.exists());
        drop(temp);
        assert!(!path.exists());
    }

    #[test]
    fn test_extract_from_wav_round_trips_audio() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source.wav");

        let spec = WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&source, spec).unwrap();
        for i in 0..1600i16 {
            writer.write_sample(i % 128).unwrap();
        }
        writer.finalize().unwrap();

        let temp_dir = dir.path().join("_tmp");
        let extracted = extract_audio_track(&source, &temp_dir).unwrap();

        let reader = hound::WavReader::open(extracted.path()).unwrap();
        assert_eq!(reader.spec().sample_rate, 16_000);
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.len(), 1600);
    }

    #[test]
    fn test_extract_from_garbage_fails() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("noise.mp4");
        std::fs::write(&source, b"definitely not a media file").unwrap();

        let result = extract_audio_track(&source, &dir.path().join("_tmp"));
        assert!(result.is_err());
    }
}
