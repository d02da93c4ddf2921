pub mod audio;
pub mod config;
pub mod error;
pub mod permission;
pub mod recorder;

pub use audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFile, AudioFormat, AudioFrame, AudioSegment,
    AudioSource, CaptureEvent, CaptureStream, InjectedBackend, InjectedInput, SegmentNamer, SegmentRotator,
};
pub use config::Config;
pub use error::{RecorderError, RecorderResult};
pub use permission::{Authorization, AuthorizationProvider, SharedAuthorization};
pub use recorder::{
    RecorderOptions, RecorderSession, RecorderState, RecordingEvents, SegmentEvent, SegmentSettings,
    SegmentedRecorder,
};
