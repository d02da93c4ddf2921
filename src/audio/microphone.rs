//! Default input device capture through CPAL.
//!
//! `cpal::Stream` is not `Send`, so each capture owns a dedicated thread that
//! builds the stream, keeps it alive and drops it when told to stop. The
//! driver callback only converts samples and offers them to the bounded
//! frame buffer; it never touches the disk.

use anyhow::{anyhow, bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Sample, SampleFormat, SizedSample, StreamConfig};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFormat, AudioFrame, CaptureEvent, CaptureStream};

struct CaptureThread {
    stop_tx: std_mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct MicrophoneBackend {
    config: AudioBackendConfig,
    thread: Option<CaptureThread>,
    device_name: String,
    dropped: Arc<AtomicU64>,
}

impl MicrophoneBackend {
    pub fn new(config: AudioBackendConfig) -> Self {
        Self {
            config,
            thread: None,
            device_name: "microphone".to_string(),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for MicrophoneBackend {
    async fn start(&mut self) -> Result<CaptureStream> {
        if self.thread.is_some() {
            bail!("Already capturing");
        }

        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(String, AudioFormat)>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let dropped = Arc::clone(&self.dropped);
        let target_rate = self.config.target_sample_rate;
        let buffer_ms = self.config.buffer_duration_ms;

        let handle = std::thread::Builder::new()
            .name("segrec-capture".to_string())
            .spawn(move || {
                let stream = match open_stream(target_rate, buffer_ms, tx, dropped) {
                    Ok((stream, name, format)) => {
                        let _ = ready_tx.send(Ok((name, format)));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Blocks until stop() signals or the backend is dropped
                let _ = stop_rx.recv();
                drop(stream);
            })
            .context("Failed to spawn capture thread")?;

        let ready = tokio::task::spawn_blocking(move || ready_rx.recv())
            .await
            .context("Capture thread handshake panicked")?
            .map_err(|_| anyhow!("Capture thread exited before opening the device"))?;

        let (name, format) = match ready {
            Ok(ready) => ready,
            Err(e) => {
                let _ = handle.join();
                return Err(e);
            }
        };

        info!(
            "Microphone capture started: {} ({}Hz, {} channels)",
            name, format.sample_rate, format.channels
        );

        self.device_name = name;
        self.thread = Some(CaptureThread { stop_tx, handle });

        Ok(CaptureStream { format, frames: rx })
    }

    async fn stop(&mut self) -> Result<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };

        info!("Stopping microphone capture: {}", self.device_name);

        let _ = thread.stop_tx.send(());
        tokio::task::spawn_blocking(move || thread.handle.join())
            .await
            .context("Capture thread join panicked")?
            .map_err(|_| anyhow!("Capture thread panicked"))?;

        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.thread.is_some()
    }

    fn name(&self) -> &str {
        &self.device_name
    }

    fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

fn open_stream(
    target_rate: u32,
    buffer_ms: u64,
    tx: mpsc::Sender<CaptureEvent>,
    dropped: Arc<AtomicU64>,
) -> Result<(cpal::Stream, String, AudioFormat)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow!("No default input device found"))?;
    let name = device.name().unwrap_or_else(|_| "Unknown Device".to_string());

    let supported = device
        .supported_input_configs()
        .context("Failed to query input configurations")?
        .filter(|range| {
            range.min_sample_rate().0 <= target_rate && range.max_sample_rate().0 >= target_rate
        })
        .min_by_key(|range| range.channels())
        .map(|range| range.with_sample_rate(cpal::SampleRate(target_rate)));

    let supported = match supported {
        Some(config) => config,
        None => device
            .default_input_config()
            .context("Failed to get default input config")?,
    };

    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();
    let format = AudioFormat {
        sample_rate: config.sample_rate.0,
        channels: config.channels,
    };

    // Buffer length follows the negotiated rate, not the requested one
    let frames_per_buffer = ((format.sample_rate as u64 * buffer_ms) / 1000).max(1) as usize;

    let stream = match sample_format {
        SampleFormat::I16 => build_stream::<i16>(&device, &config, format, frames_per_buffer, tx, dropped)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, format, frames_per_buffer, tx, dropped)?,
        SampleFormat::F32 => build_stream::<f32>(&device, &config, format, frames_per_buffer, tx, dropped)?,
        other => bail!("Unsupported input sample format: {:?}", other),
    };

    stream.play().context("Failed to start input stream")?;

    Ok((stream, name, format))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    format: AudioFormat,
    frames_per_buffer: usize,
    tx: mpsc::Sender<CaptureEvent>,
    dropped: Arc<AtomicU64>,
) -> Result<cpal::Stream>
where
    T: Sample + SizedSample + Send + 'static,
    i16: cpal::FromSample<T>,
{
    let error_tx = tx.clone();
    let mut assembler = FrameAssembler::new(format, frames_per_buffer, tx, dropped);

    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| assembler.push(data),
        move |err| {
            error!("Audio input stream error: {}", err);
            let _ = error_tx.try_send(CaptureEvent::Failed(err.to_string()));
        },
        None,
    )?;

    Ok(stream)
}

/// Gathers driver callbacks of arbitrary size into fixed-size frames.
///
/// Samples land in one preallocated buffer and only a full buffer is handed
/// off, so the real-time thread allocates once per frame rather than once per
/// callback. Whatever is left when the stream is dropped goes out as a short
/// final frame.
struct FrameAssembler {
    format: AudioFormat,
    frames_per_buffer: usize,
    pending: Vec<i16>,
    position: u64,
    tx: mpsc::Sender<CaptureEvent>,
    dropped: Arc<AtomicU64>,
}

impl FrameAssembler {
    fn new(format: AudioFormat, frames_per_buffer: usize, tx: mpsc::Sender<CaptureEvent>, dropped: Arc<AtomicU64>) -> Self {
        Self {
            format,
            frames_per_buffer,
            pending: Vec::with_capacity(Self::buffer_len(format, frames_per_buffer)),
            position: 0,
            tx,
            dropped,
        }
    }

    fn buffer_len(format: AudioFormat, frames_per_buffer: usize) -> usize {
        frames_per_buffer * format.channels.max(1) as usize
    }

    fn push<T>(&mut self, mut data: &[T])
    where
        T: Sample,
        i16: cpal::FromSample<T>,
    {
        let buffer_len = Self::buffer_len(self.format, self.frames_per_buffer);

        while !data.is_empty() {
            let take = (buffer_len - self.pending.len()).min(data.len());
            self.pending.extend(data[..take].iter().map(|&s| s.to_sample::<i16>()));
            data = &data[take..];

            if self.pending.len() < buffer_len {
                break;
            }

            let samples = std::mem::replace(&mut self.pending, Vec::with_capacity(buffer_len));
            self.send(samples);
        }
    }

    fn send(&mut self, samples: Vec<i16>) {
        let frames = (samples.len() / self.format.channels.max(1) as usize) as u64;
        let frame = AudioFrame {
            samples,
            sample_rate: self.format.sample_rate,
            channels: self.format.channels,
            timestamp_ms: self.position * 1000 / self.format.sample_rate.max(1) as u64,
        };
        self.position += frames;

        if let Err(mpsc::error::TrySendError::Full(_)) = self.tx.try_send(CaptureEvent::Frame(frame)) {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!("Frame buffer full, dropped frame ({} dropped so far)", total);
        }
    }
}

impl Drop for FrameAssembler {
    fn drop(&mut self) {
        let channels = self.format.channels.max(1) as usize;
        let whole = self.pending.len() - self.pending.len() % channels;
        if whole > 0 {
            let mut samples = std::mem::take(&mut self.pending);
            samples.truncate(whole);
            self.send(samples);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo_16k() -> AudioFormat {
        AudioFormat {
            sample_rate: 16000,
            channels: 2,
        }
    }

    fn drain(rx: &mut mpsc::Receiver<CaptureEvent>) -> Vec<AudioFrame> {
        let mut frames = Vec::new();
        while let Ok(event) = rx.try_recv() {
            match event {
                CaptureEvent::Frame(frame) => frames.push(frame),
                CaptureEvent::Failed(reason) => panic!("Unexpected failure: {}", reason),
            }
        }
        frames
    }

    #[test]
    fn test_assembler_emits_fixed_size_frames() {
        let (tx, mut rx) = mpsc::channel(16);
        let dropped = Arc::new(AtomicU64::new(0));
        let mut assembler = FrameAssembler::new(stereo_16k(), 160, tx, Arc::clone(&dropped));

        // Callback sizes that never line up with the frame size
        for _ in 0..7 {
            assembler.push(&[0.5f32; 94]);
        }

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.samples.len() == 320));
        assert_eq!(frames[0].timestamp_ms, 0);
        assert_eq!(frames[1].timestamp_ms, 10);
        assert_eq!(dropped.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_assembler_flushes_remainder_on_drop() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut assembler = FrameAssembler::new(stereo_16k(), 160, tx, Arc::new(AtomicU64::new(0)));

        assembler.push(&[1i16; 400]);
        drop(assembler);

        let frames = drain(&mut rx);
        let lengths: Vec<usize> = frames.iter().map(|f| f.samples.len()).collect();
        assert_eq!(lengths, vec![320, 80]);
        assert!(rx.try_recv().is_err(), "Stream closes once the assembler is gone");
    }

    #[test]
    fn test_assembler_counts_drops_when_buffer_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let dropped = Arc::new(AtomicU64::new(0));
        let mut assembler = FrameAssembler::new(stereo_16k(), 160, tx, Arc::clone(&dropped));

        assembler.push(&[0i16; 960]);

        assert_eq!(drain(&mut rx).len(), 1);
        assert_eq!(dropped.load(Ordering::Relaxed), 2);
    }
}
