use std::{
    f32::consts::TAU,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};

use hound::{SampleFormat, WavReader};
use parking_lot::Mutex;

use super::AudioInput;
use crate::{Result, VizError};

/// Input that only ever produces silence.
#[derive(Debug)]
pub struct SilentInput {
    sample_rate: u32,
    running: AtomicBool,
}

impl SilentInput {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            running: AtomicBool::new(false),
        }
    }
}

impl AudioInput for SilentInput {
    fn start(&self) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn read(&self, count: usize) -> Result<Vec<f32>> {
        Ok(vec![0.0; count])
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Deterministic sine oscillator. Phase carries over between reads.
#[derive(Debug)]
pub struct DummySineInput {
    sample_rate: u32,
    frequency: f32,
    amplitude: f32,
    running: AtomicBool,
    phase: Mutex<f32>,
}

impl DummySineInput {
    pub const DEFAULT_FREQUENCY: f32 = 220.0;
    pub const DEFAULT_AMPLITUDE: f32 = 0.45;

    pub fn new(sample_rate: u32) -> Self {
        Self::with_tone(sample_rate, Self::DEFAULT_FREQUENCY, Self::DEFAULT_AMPLITUDE)
    }

    pub fn with_tone(sample_rate: u32, frequency: f32, amplitude: f32) -> Self {
        Self {
            sample_rate,
            frequency,
            amplitude: amplitude.clamp(0.0, 1.0),
            running: AtomicBool::new(false),
            phase: Mutex::new(0.0),
        }
    }
}

impl AudioInput for DummySineInput {
    fn start(&self) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn read(&self, count: usize) -> Result<Vec<f32>> {
        if !self.is_running() {
            return Ok(vec![0.0; count]);
        }

        let step = TAU * self.frequency / self.sample_rate.max(1) as f32;
        let mut phase = self.phase.lock();
        let samples = (0..count)
            .map(|_| {
                let value = phase.sin() * self.amplitude;
                *phase = (*phase + step) % TAU;
                value
            })
            .collect();
        Ok(samples)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Looping WAV playback that can follow an external transport.
///
/// A file that cannot be decoded does not fail construction. The error is
/// kept and reported from every [`AudioInput::read`] so the broadcaster can
/// fall back to silence while still surfacing the problem.
#[derive(Debug)]
pub struct FileInput {
    path: PathBuf,
    samples: Vec<f32>,
    sample_rate: u32,
    error: Option<String>,
    running: AtomicBool,
    transport: Mutex<Transport>,
}

#[derive(Debug, Default)]
struct Transport {
    cursor: usize,
    paused: bool,
}

impl FileInput {
    /// `fallback_rate` is reported when the file cannot be opened.
    pub fn open(path: impl AsRef<Path>, fallback_rate: u32) -> Self {
        let path = path.as_ref().to_path_buf();
        let (samples, sample_rate, error) = match decode_wav(&path) {
            Ok((samples, rate)) => {
                tracing::debug!(
                    path = %path.display(),
                    samples = samples.len(),
                    rate,
                    "audio file decoded"
                );
                (samples, rate, None)
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "audio file unavailable");
                (Vec::new(), fallback_rate, Some(err.to_string()))
            }
        };

        Self {
            path,
            samples,
            sample_rate,
            error,
            running: AtomicBool::new(false),
            transport: Mutex::new(Transport::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    fn cursor_for(&self, position_seconds: f64) -> usize {
        let len = self.samples.len() as i64;
        if len == 0 || !position_seconds.is_finite() {
            return 0;
        }
        let index = (position_seconds * self.sample_rate as f64).floor() as i64;
        index.rem_euclid(len) as usize
    }
}

impl AudioInput for FileInput {
    fn start(&self) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn read(&self, count: usize) -> Result<Vec<f32>> {
        if let Some(error) = &self.error {
            return Err(VizError::audio_source(error.clone()));
        }
        if !self.is_running() || self.samples.is_empty() {
            return Ok(vec![0.0; count]);
        }

        let mut transport = self.transport.lock();
        if transport.paused {
            return Ok(vec![0.0; count]);
        }

        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.samples[transport.cursor]);
            transport.cursor = (transport.cursor + 1) % self.samples.len();
        }
        Ok(out)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn sync_transport(&self, playing: bool, position_seconds: f64) {
        if self.samples.is_empty() {
            return;
        }
        let cursor = self.cursor_for(position_seconds);
        let mut transport = self.transport.lock();
        transport.paused = !playing;
        transport.cursor = cursor;
    }

    fn is_file_backed(&self) -> bool {
        true
    }
}

/// Decodes a WAV file into mono `f32` samples in `[-1, 1]`.
pub fn decode_wav(path: &Path) -> Result<(Vec<f32>, u32)> {
    if !path.is_file() {
        return Err(VizError::audio_source(format!(
            "audio file not found: {}",
            path.display()
        )));
    }

    let reader = WavReader::open(path).map_err(|err| {
        VizError::audio_source(format!("cannot decode {}: {err}", path.display()))
    })?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>(),
        SampleFormat::Int => {
            let scale = 2f32.powi(i32::from(spec.bits_per_sample.max(1)) - 1);
            reader
                .into_samples::<i32>()
                .map(|sample| sample.map(|value| value as f32 / scale))
                .collect::<std::result::Result<_, _>>()
        }
    }
    .map_err(|err| VizError::audio_source(format!("corrupt audio in {}: {err}", path.display())))?;

    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();
    Ok((mono, spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use hound::{WavSpec, WavWriter};

    use super::*;

    fn write_ramp(path: &Path, channels: u16, frames: usize) {
        let spec = WavSpec {
            channels,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for frame in 0..frames {
            for channel in 0..channels {
                let value = if channel == 0 { frame as i16 * 100 } else { 0 };
                writer.write_sample(value).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn sine_is_silent_until_started_and_phase_continuous() {
        let input = DummySineInput::new(44_100);
        assert!(input.read(16).unwrap().iter().all(|s| *s == 0.0));

        input.start().unwrap();
        let whole = DummySineInput::new(44_100);
        whole.start().unwrap();

        let mut split = input.read(100).unwrap();
        split.extend(input.read(100).unwrap());
        let joined = whole.read(200).unwrap();
        for (a, b) in split.iter().zip(&joined) {
            assert!((a - b).abs() < 1e-5);
        }
        assert!(joined.iter().all(|s| s.abs() <= 0.45 + 1e-6));
    }

    #[test]
    fn missing_file_reports_an_audio_source_error() {
        let input = FileInput::open("/no/such/file.wav", 44_100);
        input.start().unwrap();
        assert!(input.last_error().is_some());
        assert!(matches!(input.read(8), Err(VizError::AudioSource(_))));
        assert_eq!(input.sample_rate(), 44_100);
    }

    #[test]
    fn file_input_loops_and_follows_the_transport() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramp.wav");
        write_ramp(&path, 2, 7);

        let input = FileInput::open(&path, 44_100);
        assert_eq!(input.sample_rate(), 8_000);
        assert_eq!(input.len(), 7);
        input.start().unwrap();

        let first = input.read(12).unwrap();
        // stereo frames are averaged with a silent right channel
        assert!((first[1] - 50.0 / 32_768.0).abs() < 1e-6);
        assert_eq!(first[7], first[0]);

        input.sync_transport(false, 0.0);
        assert!(input.read(4).unwrap().iter().all(|s| *s == 0.0));

        // 1000 samples in at 8 kHz wraps to frame 6 of 7
        input.sync_transport(true, 0.125);
        let resumed = input.read(1).unwrap();
        assert!((resumed[0] - 300.0 / 32_768.0).abs() < 1e-6);
    }
}
