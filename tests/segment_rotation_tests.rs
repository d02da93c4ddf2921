// Integration tests for sample-accurate segment rotation
//
// These tests verify that audio frames are correctly split into
// fixed-length segments and saved to disk as WAV files.

use anyhow::Result;
use chrono::{TimeZone, Utc};
use segmented_recorder::audio::{AudioFile, AudioFormat, AudioFrame, AudioSegment, RotationConfig, SegmentRotator};
use segmented_recorder::RecorderError;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

const MONO_16K: AudioFormat = AudioFormat {
    sample_rate: 16000,
    channels: 1,
};

fn rotation(dir: &Path, interval_secs: f64) -> RotationConfig {
    RotationConfig {
        directory: dir.to_path_buf(),
        segment_interval: Duration::from_secs_f64(interval_secs),
        file_prefix: "test".to_string(),
        max_name_attempts: 16,
    }
}

fn frame(samples: Vec<i16>, format: AudioFormat, timestamp_ms: u64) -> AudioFrame {
    AudioFrame {
        samples,
        sample_rate: format.sample_rate,
        channels: format.channels,
        timestamp_ms,
    }
}

/// Feed `total_frames` of a ramp signal in buffers of `frames_per_buffer`
fn feed_ramp(
    rotator: &mut SegmentRotator,
    format: AudioFormat,
    total_frames: usize,
    frames_per_buffer: usize,
) -> Result<Vec<AudioSegment>> {
    let mut segments = Vec::new();
    let channels = format.channels as usize;
    let mut position = 0usize;

    while position < total_frames {
        let frames = frames_per_buffer.min(total_frames - position);
        let mut samples = Vec::with_capacity(frames * channels);
        for i in position..position + frames {
            for _ in 0..channels {
                samples.push((i % 30000) as i16);
            }
        }
        let timestamp_ms = (position as u64 * 1000) / format.sample_rate as u64;
        rotator.write_frame(&frame(samples, format, timestamp_ms), |segment| segments.push(segment))?;
        position += frames;
    }

    Ok(segments)
}

fn wav_count(dir: &Path) -> Result<usize> {
    Ok(fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().map_or(false, |ext| ext == "wav"))
        .count())
}

#[test]
fn test_rotation_creates_single_segment() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let mut rotator = SegmentRotator::new(&rotation(temp_dir.path(), 10.0), MONO_16K, Utc::now())?;
    rotator.open()?;

    // 5 seconds in 100ms buffers
    let segments = feed_ramp(&mut rotator, MONO_16K, 5 * 16000, 1600)?;
    assert!(segments.is_empty(), "Nothing should complete before the interval");

    let last = rotator.finish()?.expect("Final segment should be emitted");

    assert_eq!(last.index, 0);
    assert_eq!(last.sample_rate, 16000);
    assert_eq!(last.channels, 1);
    assert_eq!(last.frame_count, 80000);
    assert_eq!(last.duration, Duration::from_secs(5));
    assert!(last.file_path.exists(), "Segment file should exist");
    assert!(fs::metadata(&last.file_path)?.len() > 0, "Segment file should not be empty");

    Ok(())
}

#[test]
fn test_rotation_splits_into_multiple_segments() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let mut rotator = SegmentRotator::new(&rotation(temp_dir.path(), 2.0), MONO_16K, Utc::now())?;
    rotator.open()?;

    // 5 seconds with 2 second segments: [0-2s], [2-4s], [4-5s]
    let mut segments = feed_ramp(&mut rotator, MONO_16K, 5 * 16000, 1600)?;
    segments.extend(rotator.finish()?);

    assert_eq!(segments.len(), 3, "Should create 3 segments for 5s recording with 2s segments");

    let durations: Vec<Duration> = segments.iter().map(|s| s.duration).collect();
    assert_eq!(
        durations,
        vec![Duration::from_secs(2), Duration::from_secs(2), Duration::from_secs(1)]
    );

    for (i, segment) in segments.iter().enumerate() {
        assert_eq!(segment.index, i);
        assert!(segment.file_path.exists(), "Segment {} file should exist", i);
    }

    Ok(())
}

#[test]
fn test_rotation_boundary_inside_frame_loses_nothing() -> Result<()> {
    let temp_dir = TempDir::new()?;
    // 0.25s = 4000 frames; 1500-frame buffers never line up with the boundary
    let mut rotator = SegmentRotator::new(&rotation(temp_dir.path(), 0.25), MONO_16K, Utc::now())?;
    rotator.open()?;

    let total_frames = 11_000;
    let mut segments = feed_ramp(&mut rotator, MONO_16K, total_frames, 1500)?;
    segments.extend(rotator.finish()?);

    let counts: Vec<u64> = segments.iter().map(|s| s.frame_count).collect();
    assert_eq!(counts, vec![4000, 4000, 3000]);

    // Concatenating the files must reproduce the input exactly
    let mut recovered = Vec::new();
    for segment in &segments {
        recovered.extend(AudioFile::open(&segment.file_path)?.samples);
    }
    let expected: Vec<i16> = (0..total_frames).map(|i| (i % 30000) as i16).collect();
    assert_eq!(recovered, expected, "No sample lost or duplicated across boundaries");

    Ok(())
}

#[test]
fn test_rotation_segments_are_contiguous_in_time() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let session_start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let mut rotator = SegmentRotator::new(&rotation(temp_dir.path(), 1.0), MONO_16K, session_start)?;
    rotator.open()?;

    let mut segments = feed_ramp(&mut rotator, MONO_16K, 3 * 16000 + 800, 1024)?;
    segments.extend(rotator.finish()?);

    assert_eq!(segments.len(), 4);
    assert_eq!(segments[0].started_at, session_start);

    for pair in segments.windows(2) {
        assert_eq!(pair[1].started_at, pair[0].ended_at, "Segments should abut");
        assert!(pair[1].started_at > pair[0].started_at, "Strictly increasing start times");
        assert_ne!(pair[0].file_path, pair[1].file_path);
    }

    Ok(())
}

#[test]
fn test_rotation_boundaries_abut_exactly_at_44k() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let format = AudioFormat {
        sample_rate: 44100,
        channels: 1,
    };
    let session_start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    // 14700 frames per segment, a third of a second that no whole number of nanoseconds matches
    let mut rotator = SegmentRotator::new(&rotation(temp_dir.path(), 1.0 / 3.0), format, session_start)?;
    rotator.open()?;
    assert_eq!(rotator.frames_per_segment(), 14700);

    let mut segments = feed_ramp(&mut rotator, format, 44100 + 1000, 1024)?;
    segments.extend(rotator.finish()?);

    assert_eq!(segments.len(), 4);
    for pair in segments.windows(2) {
        assert_eq!(pair[1].started_at, pair[0].ended_at, "No drift between consecutive segments");
    }

    let total_ns = (44100u64 + 1000) * 1_000_000_000 / 44100;
    let last = segments.last().map(|s| s.ended_at).unwrap_or(session_start);
    assert_eq!(last, session_start + chrono::Duration::nanoseconds(total_ns as i64));

    Ok(())
}

#[test]
fn test_rotation_exact_multiple_discards_empty_tail() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let mut rotator = SegmentRotator::new(&rotation(temp_dir.path(), 1.0), MONO_16K, Utc::now())?;
    rotator.open()?;

    let segments = feed_ramp(&mut rotator, MONO_16K, 2 * 16000, 1600)?;
    assert_eq!(segments.len(), 2);

    // The third file opened at the boundary but never received audio
    assert_eq!(wav_count(temp_dir.path())?, 3);
    assert!(rotator.finish()?.is_none(), "Empty trailing segment is not emitted");
    assert_eq!(wav_count(temp_dir.path())?, 2, "Empty trailing file is removed");

    Ok(())
}

#[test]
fn test_rotation_handles_empty_input() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let mut rotator = SegmentRotator::new(&rotation(temp_dir.path(), 5.0), MONO_16K, Utc::now())?;
    rotator.open()?;

    assert!(rotator.finish()?.is_none(), "Should create 0 segments for empty input");
    assert_eq!(wav_count(temp_dir.path())?, 0);

    Ok(())
}

#[test]
fn test_rotation_preserves_stereo_format() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let stereo = AudioFormat {
        sample_rate: 48000,
        channels: 2,
    };
    let mut rotator = SegmentRotator::new(&rotation(temp_dir.path(), 0.5), stereo, Utc::now())?;
    rotator.open()?;

    let mut segments = feed_ramp(&mut rotator, stereo, 48000, 480)?;
    segments.extend(rotator.finish()?);

    assert_eq!(segments.len(), 2);
    for segment in &segments {
        assert_eq!(segment.frame_count, 24000);
        let audio = AudioFile::open(&segment.file_path)?;
        assert_eq!(audio.sample_rate, 48000, "Sample rate should be preserved");
        assert_eq!(audio.channels, 2, "Channel count should be preserved");
        assert_eq!(audio.samples.len(), 48000);
    }

    Ok(())
}

#[test]
fn test_rotation_rejects_format_change() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let mut rotator = SegmentRotator::new(&rotation(temp_dir.path(), 1.0), MONO_16K, Utc::now())?;
    rotator.open()?;

    let wrong = AudioFormat {
        sample_rate: 44100,
        channels: 1,
    };
    let result = rotator.write_frame(&frame(vec![0; 441], wrong, 0), |_| {});

    assert!(matches!(result, Err(RecorderError::CaptureError(_))));

    Ok(())
}

#[test]
fn test_rotation_rejects_partial_stereo_frame() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let stereo = AudioFormat {
        sample_rate: 16000,
        channels: 2,
    };
    let mut rotator = SegmentRotator::new(&rotation(temp_dir.path(), 1.0), stereo, Utc::now())?;
    rotator.open()?;

    let result = rotator.write_frame(&frame(vec![1, 2, 3], stereo, 0), |_| {});

    assert!(matches!(result, Err(RecorderError::CaptureError(_))));

    Ok(())
}

#[test]
fn test_rotation_discard_removes_partial_file() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let mut rotator = SegmentRotator::new(&rotation(temp_dir.path(), 10.0), MONO_16K, Utc::now())?;
    rotator.open()?;
    feed_ramp(&mut rotator, MONO_16K, 16000, 1600)?;

    let partial = rotator.current_path().map(Path::to_path_buf).expect("Segment should be open");
    assert!(partial.exists());

    rotator.discard();

    assert!(!partial.exists(), "Partial segment must not survive a discard");

    Ok(())
}

#[test]
fn test_rotation_rejects_interval_below_one_sample() {
    let temp_dir = TempDir::new().unwrap();
    let config = RotationConfig {
        segment_interval: Duration::from_nanos(10),
        ..rotation(temp_dir.path(), 1.0)
    };

    let result = SegmentRotator::new(&config, MONO_16K, Utc::now());

    assert!(matches!(result, Err(RecorderError::InvalidConfiguration(_))));
}

#[test]
fn test_frames_per_segment_rounds_to_nearest_sample() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let rotator = SegmentRotator::new(&rotation(temp_dir.path(), 0.1), MONO_16K, Utc::now())?;

    assert_eq!(rotator.frames_per_segment(), 1600);

    Ok(())
}
