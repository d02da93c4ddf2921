use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::RotationConfig;
use crate::error::{RecorderError, RecorderResult};

/// What `configure` sets: where segments go and how long each one is
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentSettings {
    /// Existing, writable directory for segment files
    pub directory: PathBuf,

    /// Audio per segment file
    pub segment_interval: Duration,
}

impl SegmentSettings {
    /// Check the interval and prove the directory accepts new files
    pub fn validate(directory: impl Into<PathBuf>, segment_interval: Duration) -> RecorderResult<Self> {
        let directory = directory.into();

        if segment_interval.is_zero() {
            return Err(RecorderError::InvalidConfiguration(
                "Segment interval must be greater than zero".to_string(),
            ));
        }

        ensure_writable(&directory)?;

        Ok(Self {
            directory,
            segment_interval,
        })
    }

    pub(crate) fn rotation(&self, options: &RecorderOptions) -> RotationConfig {
        RotationConfig {
            directory: self.directory.clone(),
            segment_interval: self.segment_interval,
            file_prefix: options.file_prefix.clone(),
            max_name_attempts: options.max_name_attempts,
        }
    }
}

fn ensure_writable(directory: &Path) -> RecorderResult<()> {
    let metadata = fs::metadata(directory).map_err(|e| {
        RecorderError::InvalidConfiguration(format!("Directory {} is not accessible: {}", directory.display(), e))
    })?;

    if !metadata.is_dir() {
        return Err(RecorderError::InvalidConfiguration(format!(
            "{} is not a directory",
            directory.display()
        )));
    }

    // Probe with a real file
    let probe = directory.join(format!(".segrec-probe-{}", uuid::Uuid::new_v4()));
    match OpenOptions::new().write(true).create_new(true).open(&probe) {
        Ok(file) => {
            drop(file);
            let _ = fs::remove_file(&probe);
            Ok(())
        }
        Err(e) => Err(RecorderError::InvalidConfiguration(format!(
            "Directory {} is not writable: {}",
            directory.display(),
            e
        ))),
    }
}

/// Engine tuning that does not change between sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderOptions {
    /// File name prefix for segments
    /// Default: "recording"
    pub file_prefix: String,

    /// Names tried (base name plus numeric suffixes) before giving up
    /// Default: 16
    pub max_name_attempts: u32,
}

impl Default for RecorderOptions {
    fn default() -> Self {
        Self {
            file_prefix: "recording".to_string(),
            max_name_attempts: 16,
        }
    }
}
