use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Tuning for [`BpmEstimator`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BpmConfig {
    pub min_bpm: f32,
    pub max_bpm: f32,
    pub history_seconds: f32,
    /// EMA factor used to blend new candidates into the running estimate.
    pub smoothing: f32,
    pub min_onsets: usize,
}

impl Default for BpmConfig {
    fn default() -> Self {
        Self {
            min_bpm: 60.0,
            max_bpm: 200.0,
            history_seconds: 10.0,
            smoothing: 0.25,
            min_onsets: 4,
        }
    }
}

const MIN_HISTORY_FRAMES: usize = 8;

/// Autocorrelation tempo estimate over a rolling history of beat impulses.
#[derive(Debug, Clone)]
pub struct BpmEstimator {
    config: BpmConfig,
    frame_rate: f32,
    history_size: usize,
    history: VecDeque<f32>,
    onsets: usize,
    current_bpm: f32,
}

impl BpmEstimator {
    /// `frame_rate` is the number of `estimate` calls per second.
    pub fn new(frame_rate: f32, config: BpmConfig) -> Self {
        let history_size =
            ((frame_rate * config.history_seconds).max(0.0) as usize).max(MIN_HISTORY_FRAMES);
        Self {
            config,
            frame_rate,
            history_size,
            history: VecDeque::with_capacity(history_size + 1),
            onsets: 0,
            current_bpm: 0.0,
        }
    }

    pub fn frame_rate(&self) -> f32 {
        self.frame_rate
    }

    pub fn current_bpm(&self) -> f32 {
        self.current_bpm
    }

    pub fn estimate(&mut self, beat: bool) -> f32 {
        let impulse = if beat { 1.0 } else { 0.0 };
        self.history.push_back(impulse);
        if beat {
            self.onsets += 1;
        }
        while self.history.len() > self.history_size {
            if let Some(dropped) = self.history.pop_front() {
                if dropped > 0.0 {
                    self.onsets -= 1;
                }
            }
        }

        if self.onsets < self.config.min_onsets {
            return self.current_bpm;
        }

        let Some(candidate) = self.candidate_bpm() else {
            return self.current_bpm;
        };

        self.current_bpm = if self.current_bpm <= 0.0 {
            candidate
        } else {
            self.current_bpm + (candidate - self.current_bpm) * self.config.smoothing
        };
        self.current_bpm
    }

    fn candidate_bpm(&mut self) -> Option<f32> {
        let n = self.history.len();
        if n < 2 {
            return None;
        }

        let min_lag = ((60.0 * self.frame_rate / self.config.max_bpm).round() as usize).max(1);
        let max_lag = ((60.0 * self.frame_rate / self.config.min_bpm).round() as usize).min(n - 1);
        if min_lag > max_lag {
            return None;
        }

        let frame_rate = self.frame_rate;
        let (min_bpm, max_bpm) = (self.config.min_bpm, self.config.max_bpm);
        let series: &[f32] = self.history.make_contiguous();

        let mut best: Option<(usize, f32)> = None;
        for lag in min_lag..=max_lag {
            let score: f32 = series[lag..]
                .iter()
                .zip(series)
                .map(|(current, earlier)| current * earlier)
                .sum();
            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((lag, score));
            }
        }

        let (lag, score) = best?;
        (score > 0.0).then(|| (60.0 * frame_rate / lag as f32).clamp(min_bpm, max_bpm))
    }
}
