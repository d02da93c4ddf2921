// Consumer side of a session: drains the frame buffer on a blocking thread,
// rotates segment files and emits one event per finished file.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use super::events::EventSender;
use super::session::SessionCounters;
use super::state::RecorderState;
use crate::audio::{AudioSegment, CaptureEvent, SegmentRotator};
use crate::error::{RecorderError, RecorderResult};

pub(crate) struct SegmentPipeline {
    pub rotator: SegmentRotator,
    pub events: EventSender,
    pub state: Arc<watch::Sender<RecorderState>>,
    pub counters: Arc<SessionCounters>,
}

impl SegmentPipeline {
    /// Run until the frame buffer closes or capture fails.
    ///
    /// Must run on a blocking thread: every call into the rotator does disk I/O.
    pub fn run(mut self, mut frames: mpsc::Receiver<CaptureEvent>) -> RecorderResult<()> {
        debug!("Segment writer started");

        while let Some(event) = frames.blocking_recv() {
            let frame = match event {
                CaptureEvent::Frame(frame) => frame,
                CaptureEvent::Failed(reason) => {
                    return self.fail(RecorderError::CaptureError(reason));
                }
            };

            let events = &self.events;
            let counters = &self.counters;
            let written = self
                .rotator
                .write_frame(&frame, |segment| emit(events, counters, segment));

            if let Err(e) = written {
                return self.fail(e);
            }

            self.counters
                .frames_written
                .store(self.rotator.frames_written(), Ordering::SeqCst);
        }

        // The buffer closes when the backend stops. Anything but a stop in
        // progress means the producer vanished underneath us.
        if *self.state.borrow() != RecorderState::Stopping {
            return self.fail(RecorderError::CaptureError(
                "Capture stream ended unexpectedly".to_string(),
            ));
        }

        let SegmentPipeline {
            rotator,
            events,
            state,
            counters,
        } = self;

        match rotator.finish() {
            Ok(Some(segment)) => emit(&events, &counters, segment),
            Ok(None) => debug!("No audio after last rotation; nothing to finalize"),
            Err(e) => {
                error!("Failed to finalize last segment: {}", e);
                state.send_replace(RecorderState::Failed);
                let _ = events.send(Err(e.clone()));
                return Err(e);
            }
        }

        info!("Segment writer finished: {} segments", counters.segments());

        Ok(())
    }

    /// Abandon the in-progress segment and end the stream with `err`
    fn fail(self, err: RecorderError) -> RecorderResult<()> {
        error!("Recording failed: {}", err);

        self.rotator.discard();
        self.state.send_replace(RecorderState::Failed);

        if self.events.send(Err(err.clone())).is_err() {
            debug!("No listener for recording events");
        }

        Err(err)
    }
}

fn emit(events: &EventSender, counters: &SessionCounters, segment: AudioSegment) {
    counters.segments_emitted.fetch_add(1, Ordering::SeqCst);
    if events.send(Ok(segment)).is_err() {
        debug!("No listener for recording events");
    }
}
