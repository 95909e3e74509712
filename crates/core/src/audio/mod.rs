//! Capture boundary: sample sources and the manager that feeds the ring buffer.

mod inputs;
mod ring_buffer;

use std::{fmt, str::FromStr};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

pub use inputs::{decode_wav, DummySineInput, FileInput, SilentInput};
pub use ring_buffer::RingBuffer;

use crate::{config::AudioConfig, Result, VizError};

/// A source of mono PCM frames.
///
/// Methods take `&self` so one input can be shared between the scheduler
/// thread and external transport control.
pub trait AudioInput: Send + Sync + fmt::Debug {
    fn start(&self) -> Result<()>;
    fn stop(&self);
    fn is_running(&self) -> bool;
    /// Reads up to `count` samples. Implementations may return fewer.
    fn read(&self, count: usize) -> Result<Vec<f32>>;
    fn sample_rate(&self) -> u32;

    /// Follows an external player. Ignored by live sources.
    fn sync_transport(&self, _playing: bool, _position_seconds: f64) {}

    fn is_file_backed(&self) -> bool {
        false
    }
}

/// Which [`AudioInput`] to build from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioSourceKind {
    #[default]
    Dummy,
    File,
    Silence,
}

impl AudioSourceKind {
    pub fn build(config: &AudioConfig) -> Result<Box<dyn AudioInput>> {
        let input: Box<dyn AudioInput> = match config.source {
            Self::Dummy => Box::new(DummySineInput::new(config.sample_rate)),
            Self::Silence => Box::new(SilentInput::new(config.sample_rate)),
            Self::File => {
                let path = config
                    .file
                    .as_ref()
                    .ok_or_else(|| VizError::config("audio source `file` requires audio.file"))?;
                Box::new(FileInput::open(path, config.sample_rate))
            }
        };
        Ok(input)
    }
}

impl FromStr for AudioSourceKind {
    type Err = VizError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "dummy" => Ok(Self::Dummy),
            "file" => Ok(Self::File),
            "silence" | "silent" => Ok(Self::Silence),
            other => Err(VizError::config(format!("unsupported audio source: {other}"))),
        }
    }
}

/// One captured frame. `error` is only set when the failure differs from the
/// previous capture, so a persistent fault is reported once.
#[derive(Debug, Clone, PartialEq)]
pub struct Capture {
    pub samples: Vec<f32>,
    pub error: Option<String>,
}

/// Owns the active input and the ring buffer it feeds.
#[derive(Debug)]
pub struct InputManager {
    input: Box<dyn AudioInput>,
    ring: RingBuffer,
    frame_size: usize,
    last_error: Mutex<Option<String>>,
}

impl InputManager {
    pub fn new(
        input: Box<dyn AudioInput>,
        frame_size: usize,
        ring_buffer_size: usize,
    ) -> Result<Self> {
        if frame_size == 0 {
            return Err(VizError::config("frame size must be positive"));
        }
        Ok(Self {
            input,
            ring: RingBuffer::new(ring_buffer_size)?,
            frame_size,
            last_error: Mutex::new(None),
        })
    }

    pub fn from_config(config: &AudioConfig) -> Result<Self> {
        Self::new(
            AudioSourceKind::build(config)?,
            config.frame_size,
            config.ring_buffer_size,
        )
    }

    pub fn start(&self) -> Result<()> {
        self.input.start()
    }

    pub fn stop(&self) {
        self.input.stop();
    }

    pub fn is_running(&self) -> bool {
        self.input.is_running()
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn sample_rate(&self) -> u32 {
        self.input.sample_rate()
    }

    pub fn is_file_backed(&self) -> bool {
        self.input.is_file_backed()
    }

    /// Reads exactly `count` samples. Failures become silence of the same
    /// length and are handed back in [`Capture::error`].
    pub fn capture_frame(&self, count: usize) -> Capture {
        let (mut samples, failure) = match self.input.read(count) {
            Ok(samples) => (samples, None),
            Err(VizError::AudioSource(message)) => (vec![0.0; count], Some(message)),
            Err(err) => (vec![0.0; count], Some(err.to_string())),
        };
        samples.resize(count, 0.0);
        self.ring.write(&samples);

        let mut last = self.last_error.lock();
        let error = if failure != *last { failure.clone() } else { None };
        *last = failure;
        Capture { samples, error }
    }

    pub fn latest_samples(&self, count: usize) -> Vec<f32> {
        self.ring.latest(count)
    }

    /// Samples that elapse in one tick at `frame_rate`.
    pub fn realtime_capture_size(&self, frame_rate: f64) -> usize {
        if !(frame_rate.is_finite() && frame_rate > 0.0) {
            return self.frame_size;
        }
        ((self.sample_rate() as f64 / frame_rate).round() as usize).max(1)
    }

    pub fn sync_transport(&self, playing: bool, position_seconds: f64) {
        self.input.sync_transport(playing, position_seconds);
    }
}
