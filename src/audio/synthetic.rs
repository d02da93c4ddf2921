// Synthetic audio backends: a generated tone and a WAV file replay.
//
// Both run their producer on a tokio task that behaves like a device
// callback: frames are offered with `try_send` and counted as dropped when
// the buffer is full, so a slow writer can never stall the producer.

use anyhow::{bail, Context, Result};
use std::f32::consts::PI;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFormat, AudioFrame, CaptureEvent, CaptureStream};
use super::file::AudioFile;

/// Running producer task plus the signal that ends it
struct Producer {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Producer {
    async fn shutdown(self) {
        let _ = self.stop_tx.send(());
        if let Err(e) = self.handle.await {
            warn!("Audio producer task panicked: {}", e);
        }
    }
}

/// Offer a frame without waiting. Returns false once the receiver is gone.
fn offer(tx: &mpsc::Sender<CaptureEvent>, frame: AudioFrame, dropped: &AtomicU64) -> bool {
    match tx.try_send(CaptureEvent::Frame(frame)) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            let total = dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!("Frame buffer full, dropped frame ({} dropped so far)", total);
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

/// Sine tone generated in real time
pub struct ToneBackend {
    config: AudioBackendConfig,
    frequency_hz: f32,
    producer: Option<Producer>,
    dropped: Arc<AtomicU64>,
}

impl ToneBackend {
    pub fn new(config: AudioBackendConfig, frequency_hz: f32) -> Self {
        Self {
            config,
            frequency_hz,
            producer: None,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for ToneBackend {
    async fn start(&mut self) -> Result<CaptureStream> {
        if self.producer.is_some() {
            bail!("Already capturing");
        }

        let format = self.config.format();
        if format.sample_rate == 0 || format.channels == 0 {
            bail!("Tone generator needs a non-zero sample rate and channel count");
        }

        let frames_per_buffer = self.config.frames_per_buffer();
        let period = Duration::from_millis(self.config.buffer_duration_ms.max(1));
        let frequency = self.frequency_hz;
        let dropped = Arc::clone(&self.dropped);

        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let (stop_tx, mut stop_rx) = oneshot::channel();

        info!(
            "Starting {}Hz tone ({}Hz, {} channels, {}ms buffers)",
            frequency, format.sample_rate, format.channels, period.as_millis()
        );

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            let mut position = 0u64;

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        let frame = tone_frame(format, frequency, position, frames_per_buffer);
                        position += frames_per_buffer as u64;
                        if !offer(&tx, frame, &dropped) {
                            break;
                        }
                    }
                }
            }

            debug!("Tone producer exited at frame {}", position);
        });

        self.producer = Some(Producer { stop_tx, handle });

        Ok(CaptureStream { format, frames: rx })
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(producer) = self.producer.take() {
            info!("Stopping tone generator");
            producer.shutdown().await;
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.producer.is_some()
    }

    fn name(&self) -> &str {
        "tone"
    }

    fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

fn tone_frame(format: AudioFormat, frequency: f32, position: u64, frames: usize) -> AudioFrame {
    let channels = format.channels as usize;
    let mut samples = Vec::with_capacity(frames * channels);

    for i in 0..frames as u64 {
        let t = (position + i) as f32 / format.sample_rate as f32;
        let value = ((2.0 * PI * frequency * t).sin() * 0.25 * i16::MAX as f32) as i16;
        samples.extend(std::iter::repeat(value).take(channels));
    }

    AudioFrame {
        samples,
        sample_rate: format.sample_rate,
        channels: format.channels,
        timestamp_ms: position * 1000 / format.sample_rate as u64,
    }
}

/// Replays a WAV file as if it were a live device.
///
/// When the file runs out the device goes quiet but stays open until
/// `stop()`, just like a microphone in a silent room.
pub struct FileBackend {
    config: AudioBackendConfig,
    path: PathBuf,
    paced: bool,
    producer: Option<Producer>,
    dropped: Arc<AtomicU64>,
}

impl FileBackend {
    /// `paced = false` delivers frames as fast as the writer accepts them
    pub fn new(config: AudioBackendConfig, path: impl Into<PathBuf>, paced: bool) -> Self {
        Self {
            config,
            path: path.into(),
            paced,
            producer: None,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for FileBackend {
    async fn start(&mut self) -> Result<CaptureStream> {
        if self.producer.is_some() {
            bail!("Already capturing");
        }

        let path = self.path.clone();
        let audio = tokio::task::spawn_blocking(move || AudioFile::open(path))
            .await
            .context("File loader panicked")??;

        let format = audio.format();
        let frames_per_buffer = (format.sample_rate as u64 * self.config.buffer_duration_ms / 1000).max(1) as usize;
        let frames = audio.to_frames(frames_per_buffer);
        let period = Duration::from_millis(self.config.buffer_duration_ms.max(1));
        let paced = self.paced;
        let dropped = Arc::clone(&self.dropped);

        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let (stop_tx, mut stop_rx) = oneshot::channel();

        info!(
            "Replaying {} ({} buffers, paced={})",
            self.path.display(),
            frames.len(),
            paced
        );

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            let mut frames = frames.into_iter();

            loop {
                let Some(frame) = frames.next() else {
                    debug!("File replay exhausted; holding device open");
                    let _ = stop_rx.await;
                    break;
                };

                if paced {
                    tokio::select! {
                        _ = &mut stop_rx => break,
                        _ = ticker.tick() => {
                            if !offer(&tx, frame, &dropped) {
                                break;
                            }
                        }
                    }
                } else {
                    tokio::select! {
                        _ = &mut stop_rx => break,
                        sent = tx.send(CaptureEvent::Frame(frame)) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        });

        self.producer = Some(Producer { stop_tx, handle });

        Ok(CaptureStream { format, frames: rx })
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(producer) = self.producer.take() {
            info!("Stopping file replay: {}", self.path.display());
            producer.shutdown().await;
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.producer.is_some()
    }

    fn name(&self) -> &str {
        "file"
    }

    fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
