use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::config::{RecorderOptions, SegmentSettings};
use super::events::{event_channel, EventSender, RecordingEvents};
use super::session::{RecorderSession, SessionCounters};
use super::state::RecorderState;
use super::writer::SegmentPipeline;
use crate::audio::{AudioBackend, SegmentRotator};
use crate::error::{RecorderError, RecorderResult};
use crate::permission::{Authorization, AuthorizationProvider};

/// Captures audio from a backend and materializes it as a sequence of
/// fixed-length segment files.
///
/// `start`, `stop` and `configure` are serialized; a `start` issued while a
/// session is active fails with `InvalidState` instead of queuing. Call
/// `stop()` before dropping the recorder, otherwise the device stays open.
pub struct SegmentedRecorder {
    backend: Arc<Mutex<Box<dyn AudioBackend>>>,
    authorization: Arc<dyn AuthorizationProvider>,
    options: RecorderOptions,
    state: Arc<watch::Sender<RecorderState>>,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    settings: Option<SegmentSettings>,
    /// Sender reserved for the next session, created when its stream was claimed early
    events_tx: Option<EventSender>,
    /// Stream nobody has claimed yet (next, current or just-finished session)
    events_rx: Option<RecordingEvents>,
    /// Current session, or the last one once it has ended
    session: Option<ActiveSession>,
}

struct ActiveSession {
    id: Uuid,
    settings: SegmentSettings,
    started_at: DateTime<Utc>,
    counters: Arc<SessionCounters>,
    dropped_baseline: u64,
    /// Writer supervisor; `None` once joined
    task: Option<JoinHandle<RecorderResult<()>>>,
}

impl SegmentedRecorder {
    pub fn new(backend: Box<dyn AudioBackend>, authorization: impl AuthorizationProvider + 'static) -> Self {
        let (state, _) = watch::channel(RecorderState::Idle);

        Self {
            backend: Arc::new(Mutex::new(backend)),
            authorization: Arc::new(authorization),
            options: RecorderOptions::default(),
            state: Arc::new(state),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn with_options(mut self, options: RecorderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &RecorderOptions {
        &self.options
    }

    pub fn state(&self) -> RecorderState {
        *self.state.borrow()
    }

    /// Observe state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<RecorderState> {
        self.state.subscribe()
    }

    /// Set the destination directory and segment length for the next session
    pub async fn configure(&self, directory: impl Into<PathBuf>, segment_interval: Duration) -> RecorderResult<()> {
        let mut inner = self.inner.lock().await;

        let state = self.state();
        if state.is_active() {
            return Err(RecorderError::invalid_state("configure", state));
        }

        let settings = SegmentSettings::validate(directory, segment_interval)?;

        info!(
            "Recorder configured: {} ({}s segments)",
            settings.directory.display(),
            settings.segment_interval.as_secs_f64()
        );

        inner.settings = Some(settings);

        Ok(())
    }

    /// Acquire the device and begin writing the first segment
    pub async fn start(&self) -> RecorderResult<()> {
        let mut inner = self.inner.lock().await;

        let previous = self.state();
        if previous.is_active() {
            warn!("Recording already in progress");
            return Err(RecorderError::invalid_state("start", previous));
        }

        if previous == RecorderState::Failed {
            self.release_failed(&mut inner).await;
        }

        let settings = inner.settings.clone().ok_or_else(|| {
            RecorderError::InvalidConfiguration("Recorder has not been configured".to_string())
        })?;

        let authorization = self.authorization.microphone_authorization();
        if authorization != Authorization::Granted {
            warn!("Microphone authorization is {:?}; refusing to start", authorization);
            return Err(RecorderError::PermissionDenied);
        }

        let id = Uuid::new_v4();
        info!("Starting recording session: {}", id);
        self.state.send_replace(RecorderState::Starting);

        let (capture, dropped_baseline) = {
            let mut backend = self.backend.lock().await;
            match backend.start().await {
                Ok(capture) => {
                    info!(
                        "Audio backend started: {} ({}Hz, {} channels)",
                        backend.name(),
                        capture.format.sample_rate,
                        capture.format.channels
                    );
                    (capture, backend.dropped_frames())
                }
                Err(e) => {
                    error!("Failed to start audio backend {}: {:#}", backend.name(), e);
                    self.state.send_replace(previous);
                    return Err(RecorderError::DeviceUnavailable(format!("{:#}", e)));
                }
            }
        };

        let started_at = Utc::now();
        let rotator = SegmentRotator::new(&settings.rotation(&self.options), capture.format, started_at)
            .and_then(|mut rotator| {
                rotator.open()?;
                Ok(rotator)
            });

        let rotator = match rotator {
            Ok(rotator) => rotator,
            Err(e) => {
                error!("Failed to open first segment: {}", e);
                self.stop_backend().await;
                self.state.send_replace(previous);
                return Err(e);
            }
        };

        let events = match inner.events_tx.take() {
            Some(tx) => tx,
            None => {
                // Replaces any unclaimed stream of an earlier session
                let (tx, rx) = event_channel();
                inner.events_rx = Some(rx);
                tx
            }
        };

        let counters = Arc::new(SessionCounters::default());
        let pipeline = SegmentPipeline {
            rotator,
            events,
            state: Arc::clone(&self.state),
            counters: Arc::clone(&counters),
        };

        // Must be visible before the writer can observe a closed stream
        self.state.send_replace(RecorderState::Recording);

        let frames = capture.frames;
        let backend = Arc::clone(&self.backend);
        let state = Arc::clone(&self.state);

        let task = tokio::spawn(async move {
            let result = match tokio::task::spawn_blocking(move || pipeline.run(frames)).await {
                Ok(result) => result,
                Err(e) => {
                    state.send_replace(RecorderState::Failed);
                    Err(RecorderError::CaptureError(format!("Segment writer panicked: {}", e)))
                }
            };

            if result.is_err() {
                let mut backend = backend.lock().await;
                match backend.stop().await {
                    Ok(()) => info!("Released {} after failure", backend.name()),
                    Err(e) => error!("Failed to release {} after failure: {:#}", backend.name(), e),
                }
            }

            result
        });

        inner.session = Some(ActiveSession {
            id,
            settings,
            started_at,
            counters,
            dropped_baseline,
            task: Some(task),
        });

        info!("Recording session {} started", id);

        Ok(())
    }

    /// Finalize the in-progress segment, emit it and release the device.
    ///
    /// Returns once the last segment is durably closed. A no-op when nothing
    /// is recording.
    pub async fn stop(&self) -> RecorderResult<()> {
        let mut inner = self.inner.lock().await;

        let began_stopping = self.state.send_if_modified(|state| {
            if *state == RecorderState::Recording {
                *state = RecorderState::Stopping;
                true
            } else {
                false
            }
        });

        if !began_stopping {
            let state = self.state();
            return match state {
                RecorderState::Idle | RecorderState::Stopped => {
                    debug!("Stop requested while {}; nothing to do", state);
                    Ok(())
                }
                RecorderState::Failed => {
                    self.release_failed(&mut inner).await;
                    Ok(())
                }
                _ => Err(RecorderError::invalid_state("stop", state)),
            };
        }

        let Some(session) = inner.session.as_mut() else {
            self.state.send_replace(RecorderState::Stopped);
            return Ok(());
        };

        info!("Stopping recording session: {}", session.id);

        // Closing the device closes the frame buffer; the writer drains it
        let dropped = self.stop_backend().await;
        session
            .counters
            .frames_dropped
            .store(dropped.saturating_sub(session.dropped_baseline), Ordering::SeqCst);

        let result = match session.task.take() {
            Some(task) => task
                .await
                .unwrap_or_else(|e| Err(RecorderError::CaptureError(format!("Writer supervisor panicked: {}", e)))),
            None => Ok(()),
        };

        match result {
            Ok(()) => {
                self.state.send_replace(RecorderState::Stopped);
                info!(
                    "Recording session {} stopped ({} segments)",
                    session.id,
                    session.counters.segments()
                );
                Ok(())
            }
            Err(e) => {
                self.state.send_replace(RecorderState::Failed);
                error!("Recording session {} failed while stopping: {}", session.id, e);
                Err(e)
            }
        }
    }

    /// Stream of completed segments for the current session, or for the
    /// next one when nothing is recording.
    ///
    /// A stream nobody claimed stays available until the next `start()`.
    pub async fn recording_events(&self) -> RecorderResult<RecordingEvents> {
        let mut inner = self.inner.lock().await;

        if let Some(events) = inner.events_rx.take() {
            return Ok(events);
        }

        let state = self.state();
        if state.is_active() || inner.events_tx.is_some() {
            return Err(RecorderError::invalid_state("claim recording events", state));
        }

        let (tx, rx) = event_channel();
        inner.events_tx = Some(tx);

        Ok(rx)
    }

    /// Snapshot of the current session, or of the last one
    pub async fn session(&self) -> Option<RecorderSession> {
        let inner = self.inner.lock().await;
        let session = inner.session.as_ref()?;
        let state = self.state();

        let frames_dropped = if state.is_active() {
            let backend = self.backend.lock().await;
            backend.dropped_frames().saturating_sub(session.dropped_baseline)
        } else {
            session.counters.dropped()
        };

        Some(RecorderSession {
            id: session.id,
            directory: session.settings.directory.clone(),
            segment_interval: session.settings.segment_interval,
            state,
            started_at: session.started_at,
            segments_emitted: session.counters.segments(),
            frames_written: session.counters.frames(),
            frames_dropped,
        })
    }

    /// Stop the backend, returning its cumulative dropped-frame count
    async fn stop_backend(&self) -> u64 {
        let mut backend = self.backend.lock().await;
        if let Err(e) = backend.stop().await {
            warn!("Failed to stop audio backend {}: {:#}", backend.name(), e);
        }
        backend.dropped_frames()
    }

    /// Join what is left of a failed session so the device is free again
    async fn release_failed(&self, inner: &mut Inner) {
        if let Some(session) = inner.session.as_mut() {
            if let Some(task) = session.task.take() {
                match task.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!("Failed session {} ended with: {}", session.id, e),
                    Err(e) => error!("Writer supervisor for session {} panicked: {}", session.id, e),
                }
            }
        }

        let dropped = self.stop_backend().await;
        if let Some(session) = inner.session.as_ref() {
            session
                .counters
                .frames_dropped
                .store(dropped.saturating_sub(session.dropped_baseline), Ordering::SeqCst);
        }
    }
}
