use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::audio::AudioBackendConfig;
use crate::error::{RecorderError, RecorderResult};
use crate::recorder::RecorderOptions;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub recorder: RecorderSection,
    pub audio: AudioSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecorderSection {
    pub directory: Option<String>,
    pub segment_interval_secs: f64,
    pub file_prefix: String,
    pub max_name_attempts: u32,
}

impl Default for RecorderSection {
    fn default() -> Self {
        let options = RecorderOptions::default();
        Self {
            directory: None,
            segment_interval_secs: 10.0,
            file_prefix: options.file_prefix,
            max_name_attempts: options.max_name_attempts,
        }
    }
}

impl RecorderSection {
    pub fn segment_interval(&self) -> RecorderResult<Duration> {
        Duration::try_from_secs_f64(self.segment_interval_secs).map_err(|_| {
            RecorderError::InvalidConfiguration(format!(
                "segment_interval_secs must be a finite, non-negative number (got {})",
                self.segment_interval_secs
            ))
        })
    }

    /// Configured directory with `~` expanded
    pub fn directory(&self) -> Option<PathBuf> {
        self.directory
            .as_deref()
            .map(|dir| PathBuf::from(shellexpand::tilde(dir).as_ref()))
    }

    pub fn options(&self) -> RecorderOptions {
        RecorderOptions {
            file_prefix: self.file_prefix.clone(),
            max_name_attempts: self.max_name_attempts,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioSection {
    pub sample_rate: u32,
    pub channels: u16,
    pub buffer_duration_ms: u64,
    pub channel_capacity: usize,
    pub microphone_authorized: bool,
}

impl Default for AudioSection {
    fn default() -> Self {
        let backend = AudioBackendConfig::default();
        Self {
            sample_rate: backend.target_sample_rate,
            channels: backend.target_channels,
            buffer_duration_ms: backend.buffer_duration_ms,
            channel_capacity: backend.channel_capacity,
            microphone_authorized: true,
        }
    }
}

impl AudioSection {
    pub fn backend_config(&self) -> AudioBackendConfig {
        AudioBackendConfig {
            target_sample_rate: self.sample_rate,
            target_channels: self.channels,
            buffer_duration_ms: self.buffer_duration_ms,
            channel_capacity: self.channel_capacity,
        }
    }
}

impl Config {
    /// Load a config file (extension optional) with `SEGREC__*` environment overrides,
    /// e.g. `SEGREC__RECORDER__SEGMENT_INTERVAL_SECS=30`
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("SEGREC").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
