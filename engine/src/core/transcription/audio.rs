//! Transcription Audio Input
//!
//! The transcription stage always hands engines a 16 kHz mono WAV produced by
//! the encoder. This module reads those files back for in-process engines.

use std::path::Path;

use crate::core::{CoreError, CoreResult};

/// Sample rate engines expect
pub const TRANSCRIPTION_SAMPLE_RATE: u32 = 16_000;

/// Loads a 16 kHz mono WAV file as f32 samples normalized to [-1.0, 1.0]
pub fn load_audio_samples(wav_path: &Path) -> CoreResult<Vec<f32>> {
    let reader = hound::WavReader::open(wav_path).map_err(|e| {
        CoreError::tool("audio", format!("Failed to open WAV file: {e}"))
    })?;

    let spec = reader.spec();

    if spec.sample_rate != TRANSCRIPTION_SAMPLE_RATE {
        return Err(CoreError::tool(
            "audio",
            format!("Expected 16kHz sample rate, got {} Hz", spec.sample_rate),
        ));
    }

    if spec.channels != 1 {
        return Err(CoreError::tool(
            "audio",
            format!("Expected mono audio, got {} channels", spec.channels),
        ));
    }

    let samples: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => reader
            .into_samples::<i16>()
            .filter_map(Result::ok)
            .map(|s| s as f32 / 32768.0)
            .collect(),
        (hound::SampleFormat::Int, 32) => reader
            .into_samples::<i32>()
            .filter_map(Result::ok)
            .map(|s| s as f32 / 2147483648.0)
            .collect(),
        (hound::SampleFormat::Float, 32) => reader
            .into_samples::<f32>()
            .filter_map(Result::ok)
            .collect(),
        (_, bits) => {
            return Err(CoreError::tool(
                "audio",
                format!("Unsupported bit depth: {bits}"),
            ));
        }
    };

    Ok(samples)
}

/// Duration of a WAV file in seconds, read from its header
pub fn wav_duration(wav_path: &Path) -> CoreResult<f64> {
    let reader = hound::WavReader::open(wav_path).map_err(|e| {
        CoreError::tool("audio", format!("Failed to open WAV file: {e}"))
    })?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Ok(0.0);
    }
    Ok(reader.duration() as f64 / spec.sample_rate as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_wav(path: &Path, channels: u16, sample_rate: u32, frames: usize) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames * channels as usize {
            let sample = ((i as f32 / 100.0).sin() * 16000.0) as i16;
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_load_audio_samples_file_not_found() {
        let result = load_audio_samples(Path::new("/nonexistent/audio.wav"));
        assert!(matches!(result, Err(CoreError::ExternalTool { .. })));
    }

    #[test]
    fn test_load_audio_samples_valid_wav() {
        let temp_dir = TempDir::new().unwrap();
        let wav_path = temp_dir.path().join("test.wav");
        write_wav(&wav_path, 1, 16000, 1600);

        let samples = load_audio_samples(&wav_path).unwrap();
        assert_eq!(samples.len(), 1600);
        assert!(samples.iter().all(|&s| (-1.0..=1.0).contains(&s)));
        assert!((wav_duration(&wav_path).unwrap() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_load_audio_wrong_sample_rate() {
        let temp_dir = TempDir::new().unwrap();
        let wav_path = temp_dir.path().join("wrong_rate.wav");
        write_wav(&wav_path, 1, 44100, 1);

        let err = load_audio_samples(&wav_path).unwrap_err();
        assert!(err.to_string().contains("16kHz"));
    }

    #[test]
    fn test_load_audio_wrong_channels() {
        let temp_dir = TempDir::new().unwrap();
        let wav_path = temp_dir.path().join("stereo.wav");
        write_wav(&wav_path, 2, 16000, 1);

        let err = load_audio_samples(&wav_path).unwrap_err();
        assert!(err.to_string().contains("mono"));
    }
}
