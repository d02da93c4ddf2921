use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::backend::{AudioFormat, AudioFrame};
use crate::error::{RecorderError, RecorderResult};

/// Extension of every segment file (16-bit integer PCM WAV)
pub const SEGMENT_EXTENSION: &str = "wav";

/// One completed, durable segment file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSegment {
    /// Segment number within the session (0-indexed)
    pub index: usize,
    /// Final path of the written file
    pub file_path: PathBuf,
    /// Wall-clock time of the first sample
    pub started_at: DateTime<Utc>,
    /// Wall-clock time just past the last sample
    pub ended_at: DateTime<Utc>,
    /// Audio actually contained in the file
    pub duration: Duration,
    /// Number of sample frames (one sample per channel)
    pub frame_count: u64,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Naming and collision policy for segment files.
///
/// Names are `{prefix}-{YYYYMMDDTHHMMSS.nnnnnnnnnZ}.wav`. Segment starts are
/// at least one sample apart, so stamps within a session never repeat. If
/// the name is taken anyway, `-1`, `-2`, ... are appended until
/// `max_attempts` names have been tried.
#[derive(Debug, Clone)]
pub struct SegmentNamer {
    directory: PathBuf,
    prefix: String,
    max_attempts: u32,
}

impl SegmentNamer {
    pub fn new(directory: impl Into<PathBuf>, prefix: impl Into<String>, max_attempts: u32) -> Self {
        Self {
            directory: directory.into(),
            prefix: prefix.into(),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// File name for a segment starting at `at`; attempt 0 has no suffix
    pub fn file_name(&self, at: DateTime<Utc>, attempt: u32) -> String {
        let stamp = at.format("%Y%m%dT%H%M%S%.9fZ");
        if attempt == 0 {
            format!("{}-{}.{}", self.prefix, stamp, SEGMENT_EXTENSION)
        } else {
            format!("{}-{}-{}.{}", self.prefix, stamp, attempt, SEGMENT_EXTENSION)
        }
    }

    /// Atomically create a fresh file for a segment starting at `at`
    pub fn claim(&self, at: DateTime<Utc>) -> RecorderResult<(PathBuf, File)> {
        for attempt in 0..self.max_attempts {
            let path = self.directory.join(self.file_name(at, attempt));

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!("Segment name taken: {}", path.display());
                }
                Err(e) => return Err(RecorderError::fs(format!("Failed to create {}", path.display()), e)),
            }
        }

        Err(RecorderError::FileSystemError(format!(
            "No free segment name for {} after {} attempts",
            self.file_name(at, 0),
            self.max_attempts
        )))
    }
}

/// Writes a single segment to disk as WAV file
pub struct SegmentWriter {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    path: PathBuf,
    index: usize,
    format: AudioFormat,
    started_at: DateTime<Utc>,
    frame_count: u64,
}

impl SegmentWriter {
    pub fn create(namer: &SegmentNamer, index: usize, started_at: DateTime<Utc>, format: AudioFormat) -> RecorderResult<Self> {
        let (path, file) = namer.claim(started_at)?;

        let spec = hound::WavSpec {
            channels: format.channels,
            sample_rate: format.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let writer = match hound::WavWriter::new(BufWriter::new(file), spec) {
            Ok(writer) => writer,
            Err(e) => {
                let _ = fs::remove_file(&path);
                return Err(RecorderError::fs(format!("Failed to start WAV file {}", path.display()), e));
            }
        };

        debug!("Opened segment {}: {}", index, path.display());

        Ok(Self {
            writer: Some(writer),
            path,
            index,
            format,
            started_at,
            frame_count: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Append whole interleaved frames
    pub fn write_samples(&mut self, samples: &[i16]) -> RecorderResult<()> {
        let Some(writer) = &mut self.writer else {
            return Err(RecorderError::FileSystemError(format!(
                "Segment {} is already closed",
                self.path.display()
            )));
        };

        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| RecorderError::fs(format!("Failed to write to {}", self.path.display()), e))?;
        }

        self.frame_count += (samples.len() / self.format.channels.max(1) as usize) as u64;

        Ok(())
    }

    /// Flush the WAV header, close the file and fsync it
    pub fn finish(mut self) -> RecorderResult<AudioSegment> {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                let _ = fs::remove_file(&self.path);
                return Err(RecorderError::fs(format!("Failed to finalize {}", self.path.display()), e));
            }
        }

        if let Err(e) = File::open(&self.path).and_then(|file| file.sync_all()) {
            let _ = fs::remove_file(&self.path);
            return Err(RecorderError::fs(format!("Failed to sync {}", self.path.display()), e));
        }

        let duration = frames_to_duration(self.frame_count, self.format.sample_rate);

        Ok(AudioSegment {
            index: self.index,
            file_path: self.path.clone(),
            started_at: self.started_at,
            ended_at: self.started_at + chrono_duration(duration),
            duration,
            frame_count: self.frame_count,
            sample_rate: self.format.sample_rate,
            channels: self.format.channels,
        })
    }

    /// Drop the partial file without emitting anything
    pub fn discard(mut self) {
        self.remove_unfinished();
    }

    fn remove_unfinished(&mut self) {
        if let Some(writer) = self.writer.take() {
            drop(writer);
            match fs::remove_file(&self.path) {
                Ok(()) => debug!("Discarded unfinished segment {}", self.path.display()),
                Err(e) => warn!("Failed to remove unfinished segment {}: {}", self.path.display(), e),
            }
        }
    }
}

impl Drop for SegmentWriter {
    fn drop(&mut self) {
        // Anything not explicitly finished is partial and must not survive
        self.remove_unfinished();
    }
}

/// Settings the rotator needs for one session
#[derive(Debug, Clone)]
pub struct RotationConfig {
    pub directory: PathBuf,
    pub segment_interval: Duration,
    pub file_prefix: String,
    pub max_name_attempts: u32,
}

/// Cuts a continuous frame stream into fixed-length segment files.
///
/// Rotation is driven by sample count, never by a timer: a segment closes
/// after exactly `frames_per_segment` frames, splitting an incoming frame at
/// the boundary sample if needed, and the next file opens immediately.
pub struct SegmentRotator {
    namer: SegmentNamer,
    format: AudioFormat,
    frames_per_segment: u64,
    session_start: DateTime<Utc>,
    current: Option<SegmentWriter>,
    next_index: usize,
    /// Frames in all finalized segments
    frames_finalized: u64,
}

impl SegmentRotator {
    pub fn new(config: &RotationConfig, format: AudioFormat, session_start: DateTime<Utc>) -> RecorderResult<Self> {
        if format.sample_rate == 0 || format.channels == 0 {
            return Err(RecorderError::InvalidConfiguration(format!(
                "Unusable capture format: {}Hz, {} channels",
                format.sample_rate, format.channels
            )));
        }

        let frames_per_segment = (config.segment_interval.as_secs_f64() * format.sample_rate as f64).round() as u64;
        if frames_per_segment == 0 {
            return Err(RecorderError::InvalidConfiguration(format!(
                "Segment interval {:?} is shorter than one sample at {}Hz",
                config.segment_interval, format.sample_rate
            )));
        }

        info!(
            "Segment rotator ready: {} ({}s segments, {} frames each)",
            config.directory.display(),
            config.segment_interval.as_secs_f64(),
            frames_per_segment
        );

        Ok(Self {
            namer: SegmentNamer::new(&config.directory, &config.file_prefix, config.max_name_attempts),
            format,
            frames_per_segment,
            session_start,
            current: None,
            next_index: 0,
            frames_finalized: 0,
        })
    }

    pub fn frames_per_segment(&self) -> u64 {
        self.frames_per_segment
    }

    /// Frames written so far, finalized or not
    pub fn frames_written(&self) -> u64 {
        self.frames_finalized + self.current.as_ref().map_or(0, |c| c.frame_count())
    }

    /// Path of the segment currently being written
    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|c| c.path())
    }

    /// Open the segment that will receive the next frame
    pub fn open(&mut self) -> RecorderResult<()> {
        if self.current.is_some() {
            return Ok(());
        }

        let started_at = self.offset_time(self.frames_finalized);
        let writer = SegmentWriter::create(&self.namer, self.next_index, started_at, self.format)?;
        self.next_index += 1;
        self.current = Some(writer);

        Ok(())
    }

    /// Write one captured frame, calling `on_segment` for every segment the
    /// frame completes. Segments completed before an error are still reported.
    pub fn write_frame(
        &mut self,
        frame: &AudioFrame,
        mut on_segment: impl FnMut(AudioSegment),
    ) -> RecorderResult<()> {
        if frame.format() != self.format {
            return Err(RecorderError::CaptureError(format!(
                "Frame format changed mid-session: expected {}Hz/{}ch, got {}Hz/{}ch",
                self.format.sample_rate, self.format.channels, frame.sample_rate, frame.channels
            )));
        }

        let channels = self.format.channels as usize;
        if frame.samples.len() % channels != 0 {
            return Err(RecorderError::CaptureError(format!(
                "Frame of {} samples is not a whole number of {}-channel frames",
                frame.samples.len(),
                channels
            )));
        }

        let mut remaining = frame.samples.as_slice();

        while !remaining.is_empty() {
            self.open()?;

            let Some(current) = self.current.as_mut() else {
                break;
            };

            let room = (self.frames_per_segment - current.frame_count()) as usize;
            let take = room.min(remaining.len() / channels);
            let (head, tail) = remaining.split_at(take * channels);
            current.write_samples(head)?;
            remaining = tail;

            if current.frame_count() >= self.frames_per_segment {
                let segment = self.rotate()?;
                on_segment(segment);
                // Next file opens at the boundary, before any further audio arrives
                self.open()?;
            }
        }

        Ok(())
    }

    /// Close the full segment; the caller opens the next one
    fn rotate(&mut self) -> RecorderResult<AudioSegment> {
        let segment = self.finalize_current()?;

        info!(
            "Segment {} complete: {} ({:.1}s, {} frames)",
            segment.index,
            segment.file_path.display(),
            segment.duration.as_secs_f64(),
            segment.frame_count
        );

        Ok(segment)
    }

    fn finalize_current(&mut self) -> RecorderResult<AudioSegment> {
        let Some(writer) = self.current.take() else {
            return Err(RecorderError::FileSystemError("No open segment to finalize".to_string()));
        };
        let mut segment = writer.finish()?;
        self.frames_finalized += segment.frame_count;
        // Same offset the next segment starts at
        segment.ended_at = self.offset_time(self.frames_finalized);
        Ok(segment)
    }

    /// Close the in-progress segment as the session's last one.
    ///
    /// An empty trailing segment is deleted and yields `None`.
    pub fn finish(mut self) -> RecorderResult<Option<AudioSegment>> {
        let frames = match self.current.as_ref() {
            None => return Ok(None),
            Some(current) => current.frame_count(),
        };

        if frames == 0 {
            if let Some(writer) = self.current.take() {
                writer.discard();
            }
            return Ok(None);
        }

        let segment = self.finalize_current()?;
        info!(
            "Final segment {} complete: {} ({:.1}s, {} frames)",
            segment.index,
            segment.file_path.display(),
            segment.duration.as_secs_f64(),
            segment.frame_count
        );

        Ok(Some(segment))
    }

    fn offset_time(&self, frames: u64) -> DateTime<Utc> {
        self.session_start + chrono_duration(frames_to_duration(frames, self.format.sample_rate))
    }

    /// Abandon the session, deleting the in-progress segment
    pub fn discard(mut self) {
        if let Some(writer) = self.current.take() {
            warn!("Discarding partial segment {}", writer.path().display());
            writer.discard();
        }
    }
}

pub(crate) fn frames_to_duration(frames: u64, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let rate = sample_rate as u64;
    let secs = frames / rate;
    let nanos = (frames % rate) * 1_000_000_000 / rate;
    Duration::new(secs, nanos as u32)
}

fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero())
}
