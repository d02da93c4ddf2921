use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use crate::audio::AudioSegment;
use crate::error::RecorderError;

/// One item of the recording stream: a finished segment, or the error that
/// ended the session (always the last item)
pub type SegmentEvent = Result<AudioSegment, RecorderError>;

pub(crate) type EventSender = mpsc::UnboundedSender<SegmentEvent>;

pub(crate) fn event_channel() -> (EventSender, RecordingEvents) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, RecordingEvents { rx })
}

/// Completed segments of one session, in the order they were finalized.
///
/// Ends without an error after `stop()`, or after yielding the `Err` that
/// moved the engine to `Failed`.
#[derive(Debug)]
pub struct RecordingEvents {
    rx: mpsc::UnboundedReceiver<SegmentEvent>,
}

impl RecordingEvents {
    /// Wait for the next segment; `None` once the session has ended
    pub async fn next_segment(&mut self) -> Option<SegmentEvent> {
        self.rx.recv().await
    }
}

impl Stream for RecordingEvents {
    type Item = SegmentEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
