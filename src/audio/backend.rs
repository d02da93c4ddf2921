use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Number of sample frames (one sample per channel)
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn format(&self) -> AudioFormat {
        AudioFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }
}

/// Negotiated stream format, fixed for the lifetime of a capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Item pushed by the capture context into the frame buffer
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    Frame(AudioFrame),
    /// The device reported a fatal error (disconnect, OS I/O error)
    Failed(String),
}

/// A running capture: its format plus the bounded buffer the producer fills.
///
/// The producer drops its sender when the backend is stopped, which is how
/// the consumer learns that no more frames will arrive.
#[derive(Debug)]
pub struct CaptureStream {
    pub format: AudioFormat,
    pub frames: mpsc::Receiver<CaptureEvent>,
}

/// Configuration for audio backend
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Target sample rate (devices may negotiate a different one)
    pub target_sample_rate: u32,
    /// Target channel count (1 = mono, 2 = stereo)
    pub target_channels: u16,
    /// Buffer size in milliseconds (affects latency)
    pub buffer_duration_ms: u64,
    /// Capacity of the frame buffer between capture and writer, in frames
    pub channel_capacity: usize,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16000,
            target_channels: 1,
            buffer_duration_ms: 100,
            channel_capacity: 64,
        }
    }
}

impl AudioBackendConfig {
    pub fn format(&self) -> AudioFormat {
        AudioFormat {
            sample_rate: self.target_sample_rate,
            channels: self.target_channels,
        }
    }

    /// Sample frames per buffer at the target rate
    pub fn frames_per_buffer(&self) -> usize {
        ((self.target_sample_rate as u64 * self.buffer_duration_ms) / 1000).max(1) as usize
    }
}

/// Audio capture backend trait
///
/// Implementations:
/// - `microphone`: default input device through cpal (feature `microphone`)
/// - `synthetic`: generated tone, or replay of a WAV file
/// - `injected`: frames pushed by hand (tests, embedding)
///
/// The capture context must never block on disk I/O; it only pushes
/// [`CaptureEvent`]s into the stream returned by `start`.
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Acquire the device and start capturing
    async fn start(&mut self) -> Result<CaptureStream>;

    /// Stop capturing and release the device. Closes the frame stream.
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;

    /// Frames lost because the buffer was full when the device delivered them
    fn dropped_frames(&self) -> u64 {
        0
    }
}

/// Audio backend factory
pub struct AudioBackendFactory;

impl AudioBackendFactory {
    /// Create audio backend based on platform and configuration
    pub fn create(source: AudioSource, config: AudioBackendConfig) -> Result<Box<dyn AudioBackend>> {
        match source {
            AudioSource::Microphone => {
                #[cfg(feature = "microphone")]
                {
                    use super::microphone::MicrophoneBackend;
                    Ok(Box::new(MicrophoneBackend::new(config)))
                }

                #[cfg(not(feature = "microphone"))]
                {
                    let _ = config;
                    anyhow::bail!("Microphone capture requires the `microphone` feature")
                }
            }

            AudioSource::Tone { frequency_hz } => {
                use super::synthetic::ToneBackend;
                Ok(Box::new(ToneBackend::new(config, frequency_hz)))
            }

            AudioSource::File(path) => {
                use super::synthetic::FileBackend;
                Ok(Box::new(FileBackend::new(config, path, true)))
            }
        }
    }
}

/// Audio source type
#[derive(Debug, Clone)]
pub enum AudioSource {
    /// Default input device
    Microphone,
    /// Generated sine tone, paced in real time
    Tone { frequency_hz: f32 },
    /// Replay of a WAV file, paced in real time
    File(PathBuf),
}
