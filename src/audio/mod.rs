pub mod backend;
pub mod file;
pub mod injected;
pub mod segment;
pub mod synthetic;

#[cfg(feature = "microphone")]
pub mod microphone;

pub use backend::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFormat, AudioFrame, AudioSource, CaptureEvent,
    CaptureStream,
};
pub use file::AudioFile;
pub use injected::{InjectedBackend, InjectedInput};
pub use segment::{AudioSegment, RotationConfig, SegmentNamer, SegmentRotator, SegmentWriter};
pub use synthetic::{FileBackend, ToneBackend};
