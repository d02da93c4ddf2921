// Integration tests for audio file processing
//
// These tests verify that we can read WAV segments back and extract audio data correctly.

use anyhow::Result;
use segmented_recorder::audio::AudioFile;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn write_fixture(dir: &Path, name: &str, sample_rate: u32, channels: u16, frames: usize) -> Result<PathBuf> {
    let path = dir.join(name);
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec)?;
    for i in 0..frames {
        for ch in 0..channels {
            writer.write_sample((i as i16).wrapping_mul(3).wrapping_add(ch as i16))?;
        }
    }
    writer.finalize()?;
    Ok(path)
}

#[test]
fn test_audio_file_open() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = write_fixture(temp_dir.path(), "segment.wav", 16000, 1, 24000)?;

    let audio = AudioFile::open(&path)?;

    assert!((audio.duration_seconds - 1.5).abs() < 1e-9, "Duration should be 1.5s");
    assert_eq!(audio.sample_rate, 16000);
    assert_eq!(audio.channels, 1);
    assert_eq!(audio.samples.len(), 24000);
    assert!(audio.path.contains("segment.wav"));

    Ok(())
}

#[test]
fn test_audio_file_nonexistent() {
    let path = PathBuf::from("/nonexistent/path/to/audio.wav");
    let result = AudioFile::open(&path);

    assert!(result.is_err(), "Opening nonexistent file should fail");
}

#[test]
fn test_audio_file_rejects_float_wav() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("float.wav");
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16000,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(&path, spec)?;
    writer.write_sample(0.5f32)?;
    writer.finalize()?;

    assert!(AudioFile::open(&path).is_err(), "Only 16-bit integer PCM is supported");

    Ok(())
}

#[test]
fn test_audio_file_interleaved_channels() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = write_fixture(temp_dir.path(), "stereo.wav", 44100, 2, 441)?;

    let audio = AudioFile::open(&path)?;

    assert_eq!(audio.samples.len() % 2, 0, "Stereo audio should have even number of samples");
    assert_eq!(audio.frame_count(), 441);
    assert_eq!(audio.samples[0], 0);
    assert_eq!(audio.samples[1], 1, "Right channel follows left");

    Ok(())
}

#[test]
fn test_audio_file_to_frames() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = write_fixture(temp_dir.path(), "frames.wav", 8000, 2, 2000)?;
    let audio = AudioFile::open(&path)?;

    let frames = audio.to_frames(800);

    assert_eq!(frames.len(), 3);
    assert_eq!(frames[0].samples.len(), 1600);
    assert_eq!(frames[2].samples.len(), 800, "Last frame carries the remainder");
    assert_eq!(
        frames.iter().map(|f| f.timestamp_ms).collect::<Vec<_>>(),
        vec![0, 100, 200]
    );

    let rejoined: Vec<i16> = frames.into_iter().flat_map(|f| f.samples).collect();
    assert_eq!(rejoined, audio.samples);

    Ok(())
}
