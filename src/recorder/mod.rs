//! Segmented recorder engine
//!
//! This module provides the `SegmentedRecorder` that manages:
//! - Exclusive ownership of the audio input device for one session
//! - Sample-accurate rotation of the capture into segment files
//! - Delivery of completed segments as an async stream
//! - Session state and counters

mod config;
mod engine;
mod events;
mod session;
mod state;
mod writer;

pub use config::{RecorderOptions, SegmentSettings};
pub use engine::SegmentedRecorder;
pub use events::{RecordingEvents, SegmentEvent};
pub use session::RecorderSession;
pub use state::RecorderState;
