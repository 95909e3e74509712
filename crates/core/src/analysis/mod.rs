//! Signal processing chain turning raw PCM frames into perceptual features.

mod bands;
mod beat;
mod bpm;
mod fft;
mod pipeline;
mod smoother;

use serde::{Deserialize, Serialize};

pub use bands::{BandSplitter, Bands};
pub use beat::{BeatDetector, BeatDetectorConfig, BeatReport};
pub use bpm::{BpmConfig, BpmEstimator};
pub use fft::{FftBackendKind, FftOutput, FftProcessor, Window};
pub use pipeline::AnalysisPipeline;
pub use smoother::Smoother;

use crate::Result;

/// Number of buckets in the downsampled spectrum preview.
pub const SPECTRUM_PREVIEW_BINS: usize = 32;

/// Feature set produced once per tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Smoothed RMS loudness in `[0, 1]`.
    pub amplitude: f32,
    pub bands: Bands,
    /// Smoothed spectrum preview, each bucket in `[0, 1]`.
    pub fft: [f32; SPECTRUM_PREVIEW_BINS],
    pub beat: bool,
    /// Total beats detected since the analyzer was created.
    pub beat_count: u64,
    pub bpm: f32,
    pub peak_frequency: f32,
}

/// Anything that can turn one frame of samples into an [`AnalysisResult`].
///
/// [`AnalysisPipeline`] is the production implementation; the broadcaster
/// only depends on this trait so tests can script analysis directly.
pub trait Analyzer: Send {
    fn analyze(&mut self, samples: &[f32]) -> Result<AnalysisResult>;

    /// Drops any smoothing state so the next result starts fresh.
    fn reset_smoothing(&mut self) {}
}
