use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;

use super::state::RecorderState;

/// Snapshot of one start-to-stop recording run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderSession {
    /// Unique session identifier
    pub id: Uuid,

    /// Where this session's segments are written
    pub directory: PathBuf,

    /// Configured audio per segment
    pub segment_interval: Duration,

    /// Engine state when the snapshot was taken
    pub state: RecorderState,

    /// When the session started
    pub started_at: DateTime<Utc>,

    /// Segments delivered so far
    pub segments_emitted: usize,

    /// Sample frames written to disk (including the open segment)
    pub frames_written: u64,

    /// Frames the device produced while the buffer was full
    pub frames_dropped: u64,
}

/// Counters shared between the engine and the segment writer
#[derive(Debug, Default)]
pub(crate) struct SessionCounters {
    pub segments_emitted: AtomicUsize,
    pub frames_written: AtomicU64,
    pub frames_dropped: AtomicU64,
}

impl SessionCounters {
    pub fn segments(&self) -> usize {
        self.segments_emitted.load(Ordering::SeqCst)
    }

    pub fn frames(&self) -> u64 {
        self.frames_written.load(Ordering::SeqCst)
    }

    pub fn dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::SeqCst)
    }
}
