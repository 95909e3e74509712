use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    analysis::{BeatDetectorConfig, BpmConfig, FftBackendKind, Window},
    audio::AudioSourceKind,
    Result, VizError,
};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub analysis: AnalysisConfig,
    pub broadcast: BroadcastConfig,
    pub watch: WatchConfig,
    pub midi: MidiConfig,
}

impl AppConfig {
    /// Reads a TOML configuration file. Missing tables and keys fall back to
    /// their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|err| {
            VizError::config(format!("cannot read config {}: {err}", path.display()))
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|err| VizError::config(format!("invalid config: {err}")))
    }

    /// Fail-fast checks run before anything is started.
    pub fn validate(&self) -> Result<()> {
        self.audio.validate()?;
        self.analysis.validate()?;
        self.broadcast.validate()
    }
}

/// Configuration specific to the audio subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub source: AudioSourceKind,
    pub file: Option<PathBuf>,
    pub sample_rate: u32,
    pub frame_size: usize,
    pub ring_buffer_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            source: AudioSourceKind::Dummy,
            file: None,
            sample_rate: 44_100,
            frame_size: 1024,
            ring_buffer_size: 4096,
        }
    }
}

impl AudioConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(VizError::config("audio.sample_rate must be positive"));
        }
        if self.frame_size == 0 {
            return Err(VizError::config("audio.frame_size must be positive"));
        }
        if self.ring_buffer_size == 0 {
            return Err(VizError::config("audio.ring_buffer_size must be positive"));
        }
        if self.source == AudioSourceKind::File {
            match &self.file {
                Some(file) if file.is_file() => {}
                Some(file) => {
                    return Err(VizError::config(format!(
                        "audio file not found: {}",
                        file.display()
                    )))
                }
                None => return Err(VizError::config("audio source `file` requires audio.file")),
            }
        }
        Ok(())
    }
}

/// Settings for the analysis pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub fft_size: usize,
    pub window: Window,
    pub backend: FftBackendKind,
    /// EMA factor for amplitude, bands and the spectrum preview.
    pub smoothing: f32,
    pub bpm_smoothing: f32,
    pub beat: BeatDetectorConfig,
    pub bpm: BpmConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            fft_size: 1024,
            window: Window::Hamming,
            backend: FftBackendKind::Auto,
            smoothing: 0.35,
            bpm_smoothing: 0.2,
            beat: BeatDetectorConfig::default(),
            bpm: BpmConfig::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.fft_size.is_power_of_two() {
            return Err(VizError::config(format!(
                "analysis.fft_size must be a power of two, got {}",
                self.fft_size
            )));
        }
        if self.bpm.min_bpm <= 0.0 || self.bpm.min_bpm > self.bpm.max_bpm {
            return Err(VizError::config("analysis.bpm range is invalid"));
        }
        Ok(())
    }
}

/// Settings for the broadcast loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    pub frame_rate: f64,
    pub stop_timeout_ms: u64,
    /// Keep ticking after a frame fails to build instead of stopping the loop.
    pub survive_tick_errors: bool,
    pub reset_smoothing_on_scene_change: bool,
    /// Transport positions at or below this count as a rewind to the start.
    pub transport_rewind_seconds: f64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            frame_rate: 60.0,
            stop_timeout_ms: 1_000,
            survive_tick_errors: true,
            reset_smoothing_on_scene_change: false,
            transport_rewind_seconds: 0.1,
        }
    }
}

impl BroadcastConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.frame_rate.is_finite() && self.frame_rate > 0.0) {
            return Err(VizError::config("broadcast.frame_rate must be positive"));
        }
        Ok(())
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

/// Hot reload of the show definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub enabled: bool,
    pub poll_interval_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: 250,
        }
    }
}

impl WatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiConfig {
    pub poll_interval_ms: u64,
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
        }
    }
}

impl MidiConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [analysis]
            fft_size = 2048
            window = "hann"

            [analysis.beat]
            sensitivity = 1.5

            [broadcast]
            frame_rate = 30.0
            "#,
        )
        .unwrap();

        assert_eq!(config.analysis.fft_size, 2048);
        assert_eq!(config.analysis.window, Window::Hann);
        assert_eq!(config.analysis.beat.sensitivity, 1.5);
        assert_eq!(config.analysis.beat.history_size, 43);
        assert_eq!(config.broadcast.frame_rate, 30.0);
        assert_eq!(config.audio.sample_rate, 44_100);
    }

    #[test]
    fn rejects_bad_fft_size_and_capacity() {
        let mut config = AppConfig::default();
        config.analysis.fft_size = 1000;
        assert!(matches!(config.validate(), Err(VizError::Configuration(_))));
        config.analysis.fft_size = 0;
        assert!(config.validate().is_err());
        config.analysis.fft_size = 1;
        assert!(config.validate().is_ok());

        let mut config = AppConfig::default();
        config.audio.ring_buffer_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn file_source_requires_an_existing_file() {
        let mut config = AppConfig::default();
        config.audio.source = AudioSourceKind::File;
        assert!(config.validate().is_err());

        config.audio.file = Some(PathBuf::from("/definitely/not/here.wav"));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn unknown_window_is_a_configuration_error() {
        let err = AppConfig::from_toml("[analysis]\nwindow = \"kaiser\"").unwrap_err();
        assert!(matches!(err, VizError::Configuration(_)));
    }
}
