// Manually driven audio backend
//
// The backend half is handed to the recorder; the `InjectedInput` half stays
// with the caller, which pushes frames, simulates a disconnect, or makes the
// next `start()` fail as if the device were busy.

use anyhow::{bail, Result};
use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFormat, AudioFrame, CaptureEvent, CaptureStream};

#[derive(Default)]
struct Shared {
    sender: Mutex<Option<mpsc::Sender<CaptureEvent>>>,
    /// Frames delivered in the current capture (drives timestamps)
    position: AtomicU64,
    refuse_open: AtomicBool,
}

impl Shared {
    fn sender(&self) -> Option<mpsc::Sender<CaptureEvent>> {
        self.sender.lock().ok().and_then(|guard| guard.clone())
    }

    fn take_sender(&self) -> Option<mpsc::Sender<CaptureEvent>> {
        self.sender.lock().ok().and_then(|mut guard| guard.take())
    }
}

/// Backend whose frames come from an [`InjectedInput`]
pub struct InjectedBackend {
    config: AudioBackendConfig,
    shared: Arc<Shared>,
    capturing: bool,
}

impl InjectedBackend {
    pub fn new(config: AudioBackendConfig) -> (Self, InjectedInput) {
        let shared = Arc::new(Shared::default());
        let input = InjectedInput {
            format: config.format(),
            frames_per_buffer: config.frames_per_buffer(),
            shared: Arc::clone(&shared),
        };

        (
            Self {
                config,
                shared,
                capturing: false,
            },
            input,
        )
    }
}

#[async_trait::async_trait]
impl AudioBackend for InjectedBackend {
    async fn start(&mut self) -> Result<CaptureStream> {
        if self.capturing {
            bail!("Already capturing");
        }
        if self.shared.refuse_open.load(Ordering::SeqCst) {
            bail!("Injected device refused to open");
        }

        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        if let Ok(mut guard) = self.shared.sender.lock() {
            *guard = Some(tx);
        }
        self.shared.position.store(0, Ordering::SeqCst);
        self.capturing = true;

        info!("Injected capture started");

        Ok(CaptureStream {
            format: self.config.format(),
            frames: rx,
        })
    }

    async fn stop(&mut self) -> Result<()> {
        if !self.capturing {
            return Ok(());
        }

        // Dropping the sender closes the frame stream
        drop(self.shared.take_sender());
        self.capturing = false;

        info!("Injected capture stopped");

        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "injected"
    }
}

/// Caller-side handle of an [`InjectedBackend`]
#[derive(Clone)]
pub struct InjectedInput {
    format: AudioFormat,
    frames_per_buffer: usize,
    shared: Arc<Shared>,
}

impl InjectedInput {
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Whether a capture is running and accepting frames
    pub fn is_open(&self) -> bool {
        self.shared.sender().is_some()
    }

    /// Make subsequent `start()` calls fail
    pub fn refuse_open(&self, refuse: bool) {
        self.shared.refuse_open.store(refuse, Ordering::SeqCst);
    }

    /// Push interleaved samples as one frame. Waits while the buffer is full.
    pub async fn push_samples(&self, samples: Vec<i16>) -> Result<()> {
        let Some(tx) = self.shared.sender() else {
            bail!("Injected device is not capturing");
        };

        let channels = self.format.channels.max(1) as u64;
        let frames = samples.len() as u64 / channels;
        let position = self.shared.position.fetch_add(frames, Ordering::SeqCst);

        let frame = AudioFrame {
            samples,
            sample_rate: self.format.sample_rate,
            channels: self.format.channels,
            timestamp_ms: position * 1000 / self.format.sample_rate.max(1) as u64,
        };

        debug!("Injecting {} frames at {}ms", frames, frame.timestamp_ms);

        if tx.send(CaptureEvent::Frame(frame)).await.is_err() {
            bail!("Recorder is no longer consuming frames");
        }

        Ok(())
    }

    /// Push `seconds` of a 440 Hz tone, one buffer at a time
    pub async fn push_seconds(&self, seconds: f64) -> Result<()> {
        let total = (seconds * self.format.sample_rate as f64).round() as u64;
        let channels = self.format.channels.max(1) as usize;
        let mut pushed = 0u64;

        while pushed < total {
            let frames = (total - pushed).min(self.frames_per_buffer as u64) as usize;
            let start = self.shared.position.load(Ordering::SeqCst);
            let mut samples = Vec::with_capacity(frames * channels);
            for i in 0..frames as u64 {
                let t = (start + i) as f32 / self.format.sample_rate as f32;
                let value = ((2.0 * PI * 440.0 * t).sin() * 0.25 * i16::MAX as f32) as i16;
                samples.extend(std::iter::repeat(value).take(channels));
            }
            self.push_samples(samples).await?;
            pushed += frames as u64;
        }

        Ok(())
    }

    /// Simulate the device vanishing mid-capture
    pub async fn disconnect(&self, reason: &str) -> Result<()> {
        let Some(tx) = self.shared.take_sender() else {
            bail!("Injected device is not capturing");
        };

        info!("Injected device disconnecting: {}", reason);

        // The receiver may already be gone; the disconnect still happened
        let _ = tx.send(CaptureEvent::Failed(reason.to_string())).await;

        Ok(())
    }
}
