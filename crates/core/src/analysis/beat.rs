use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Tuning for [`BeatDetector`]. The defaults suit ~1024-sample frames at
/// 44.1 kHz, where 43 frames cover roughly one second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeatDetectorConfig {
    pub history_size: usize,
    pub sensitivity: f32,
    pub refractory_frames: u64,
    pub min_history: usize,
}

impl Default for BeatDetectorConfig {
    fn default() -> Self {
        Self {
            history_size: 43,
            sensitivity: 1.35,
            refractory_frames: 4,
            min_history: 8,
        }
    }
}

/// Outcome of one detection step.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BeatReport {
    pub beat: bool,
    pub beat_count: u64,
    pub instant_energy: f32,
    pub average_energy: f32,
    pub threshold: f32,
}

/// Causal onset detector comparing each frame's energy against a moving
/// average of the previous frames.
#[derive(Debug, Clone)]
pub struct BeatDetector {
    config: BeatDetectorConfig,
    history: VecDeque<f32>,
    frame_index: u64,
    last_beat_frame: Option<u64>,
    beat_count: u64,
}

impl BeatDetector {
    pub fn new(config: BeatDetectorConfig) -> Self {
        Self {
            history: VecDeque::with_capacity(config.history_size.max(1) + 1),
            config,
            frame_index: 0,
            last_beat_frame: None,
            beat_count: 0,
        }
    }

    pub fn config(&self) -> &BeatDetectorConfig {
        &self.config
    }

    pub fn beat_count(&self) -> u64 {
        self.beat_count
    }

    pub fn detect(&mut self, samples: &[f32]) -> BeatReport {
        let instant_energy = frame_energy(samples);
        let average_energy = if self.history.is_empty() {
            0.0
        } else {
            self.history.iter().sum::<f32>() / self.history.len() as f32
        };
        let threshold = average_energy * self.config.sensitivity;

        let enough_history = self.history.len() >= self.config.min_history;
        let refractory_ok = self
            .last_beat_frame
            .map(|last| self.frame_index - last > self.config.refractory_frames)
            .unwrap_or(true);
        let beat =
            enough_history && refractory_ok && instant_energy > threshold && instant_energy > 0.0;

        // Count before pushing so the triggering frame does not raise its own
        // threshold.
        if beat {
            self.beat_count += 1;
            self.last_beat_frame = Some(self.frame_index);
        }

        self.history.push_back(instant_energy);
        while self.history.len() > self.config.history_size {
            self.history.pop_front();
        }
        self.frame_index += 1;

        BeatReport {
            beat,
            beat_count: self.beat_count,
            instant_energy,
            average_energy,
            threshold,
        }
    }
}

impl Default for BeatDetector {
    fn default() -> Self {
        Self::new(BeatDetectorConfig::default())
    }
}

/// Mean square of the frame.
fn frame_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_on_a_loud_frame_after_quiet_history() {
        let mut detector = BeatDetector::default();
        let quiet = vec![0.05; 1024];
        let loud = vec![0.9; 1024];

        for _ in 0..detector.config().min_history {
            assert!(!detector.detect(&quiet).beat);
        }

        let report = detector.detect(&loud);
        assert!(report.beat);
        assert_eq!(report.beat_count, 1);
        assert!(report.instant_energy > report.threshold);

        let again = detector.detect(&loud);
        assert!(!again.beat, "second hit inside the refractory window");
        assert_eq!(again.beat_count, 1);
    }

    #[test]
    fn needs_minimum_history_before_firing() {
        let mut detector = BeatDetector::default();
        detector.detect(&[0.01; 64]);
        let report = detector.detect(&[1.0; 64]);
        assert!(!report.beat);
    }

    #[test]
    fn silence_never_fires() {
        let mut detector = BeatDetector::default();
        for _ in 0..100 {
            assert!(!detector.detect(&[0.0; 256]).beat);
        }
        assert_eq!(detector.beat_count(), 0);
    }

    #[test]
    fn fires_again_once_the_refractory_window_has_passed() {
        let config = BeatDetectorConfig {
            refractory_frames: 2,
            min_history: 2,
            ..BeatDetectorConfig::default()
        };
        let mut detector = BeatDetector::new(config);
        let quiet = [0.01; 128];
        let loud = [1.0; 128];

        detector.detect(&quiet);
        detector.detect(&quiet);
        assert!(detector.detect(&loud).beat);
        for _ in 0..2 {
            detector.detect(&quiet);
        }
        let report = detector.detect(&loud);
        assert!(report.beat);
        assert_eq!(report.beat_count, 2);
    }
}
