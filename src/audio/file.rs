use anyhow::{bail, Context, Result};
use hound::WavReader;
use std::path::Path;
use tracing::info;

use super::backend::{AudioFormat, AudioFrame};

/// A WAV file loaded fully into memory
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
            bail!(
                "Unsupported WAV encoding: {:?} {}-bit (expected 16-bit integer PCM)",
                spec.sample_format,
                spec.bits_per_sample
            );
        }

        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read audio samples")?;

        let duration_seconds = samples.len() as f64 / (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    pub fn format(&self) -> AudioFormat {
        AudioFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }

    /// Number of sample frames (one sample per channel)
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Split the file into capture-sized frames, timestamped from zero
    pub fn to_frames(&self, frames_per_buffer: usize) -> Vec<AudioFrame> {
        let chunk_len = frames_per_buffer.max(1) * self.channels.max(1) as usize;
        let mut position = 0u64;

        self.samples
            .chunks(chunk_len)
            .map(|chunk| {
                let timestamp_ms = position * 1000 / self.sample_rate.max(1) as u64;
                position += (chunk.len() / self.channels.max(1) as usize) as u64;
                AudioFrame {
                    samples: chunk.to_vec(),
                    sample_rate: self.sample_rate,
                    channels: self.channels,
                    timestamp_ms,
                }
            })
            .collect()
    }
}
