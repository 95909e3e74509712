use std::fmt;

use super::{
    AnalysisResult, Analyzer, BandSplitter, Bands, BeatDetector, BpmEstimator, FftProcessor,
    Smoother, SPECTRUM_PREVIEW_BINS,
};
use crate::{config::AnalysisConfig, Result};

/// Composes FFT, band splitting, beat and tempo tracking and smoothing into
/// a single `samples -> AnalysisResult` call.
pub struct AnalysisPipeline {
    fft: FftProcessor,
    bands: BandSplitter,
    beat: BeatDetector,
    bpm: BpmEstimator,
    smoother: Smoother,
    bpm_smoothing: f32,
}

impl AnalysisPipeline {
    /// Builds the pipeline from configuration. `frame_rate` is how often
    /// [`Analyzer::analyze`] will be called per second; when `None` one call
    /// per FFT window (`sample_rate / fft_size`) is assumed.
    pub fn new(config: &AnalysisConfig, sample_rate: u32, frame_rate: Option<f32>) -> Result<Self> {
        let fft = FftProcessor::new(sample_rate, config.fft_size, config.window, config.backend)?;
        let frame_rate = frame_rate
            .filter(|rate| rate.is_finite() && *rate > 0.0)
            .unwrap_or(sample_rate as f32 / config.fft_size as f32);

        tracing::debug!(
            sample_rate,
            fft_size = config.fft_size,
            frame_rate,
            "analysis pipeline created"
        );

        Ok(Self::from_parts(
            fft,
            BeatDetector::new(config.beat),
            BpmEstimator::new(frame_rate, config.bpm),
            Smoother::new(config.smoothing),
        )
        .with_bpm_smoothing(config.bpm_smoothing))
    }

    /// Assembles a pipeline from prebuilt stages. The band splitter follows
    /// the FFT's sample rate and size.
    pub fn from_parts(
        fft: FftProcessor,
        beat: BeatDetector,
        bpm: BpmEstimator,
        smoother: Smoother,
    ) -> Self {
        Self {
            bands: BandSplitter::new(fft.sample_rate(), fft.fft_size()),
            fft,
            beat,
            bpm,
            smoother,
            bpm_smoothing: 0.2,
        }
    }

    pub fn with_bpm_smoothing(mut self, alpha: f32) -> Self {
        self.bpm_smoothing = alpha;
        self
    }

    pub fn fft(&self) -> &FftProcessor {
        &self.fft
    }

    pub fn smoother_mut(&mut self) -> &mut Smoother {
        &mut self.smoother
    }

    pub fn process(&mut self, samples: &[f32]) -> Result<AnalysisResult> {
        if samples.is_empty() {
            return Ok(AnalysisResult {
                beat_count: self.beat.beat_count(),
                ..AnalysisResult::default()
            });
        }

        let spectrum = self.fft.transform(samples)?;
        let bands = self.bands.split(&spectrum.magnitudes);
        let beat = self.beat.detect(samples);
        let bpm = self.bpm.estimate(beat.beat);
        let amplitude = compute_rms(samples).clamp(0.0, 1.0);
        let preview = preview_spectrum(&spectrum.magnitudes, self.fft.fft_size());

        let amplitude = self.smoother.smooth("amplitude", amplitude);
        let bands = Bands {
            sub: self.smoother.smooth_entry("bands", "sub", bands.sub),
            low: self.smoother.smooth_entry("bands", "low", bands.low),
            mid: self.smoother.smooth_entry("bands", "mid", bands.mid),
            high: self.smoother.smooth_entry("bands", "high", bands.high),
        };
        let mut fft = [0.0; SPECTRUM_PREVIEW_BINS];
        fft.copy_from_slice(&self.smoother.smooth_array("fft", &preview));
        let bpm = self.smoother.smooth_with("bpm", bpm, self.bpm_smoothing);

        Ok(AnalysisResult {
            amplitude,
            bands,
            fft,
            beat: beat.beat,
            beat_count: beat.beat_count,
            bpm: bpm.max(0.0),
            peak_frequency: spectrum.peak_frequency,
        })
    }
}

impl Analyzer for AnalysisPipeline {
    fn analyze(&mut self, samples: &[f32]) -> Result<AnalysisResult> {
        self.process(samples)
    }

    fn reset_smoothing(&mut self) {
        self.smoother.reset(None);
    }
}

impl fmt::Debug for AnalysisPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisPipeline")
            .field("fft", &self.fft)
            .field("beat_count", &self.beat.beat_count())
            .field("bpm", &self.bpm.current_bpm())
            .finish()
    }
}

fn compute_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|sample| sample * sample).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Average-pools amplitude-normalised magnitudes into the fixed preview.
fn preview_spectrum(magnitudes: &[f32], fft_size: usize) -> [f32; SPECTRUM_PREVIEW_BINS] {
    let mut preview = [0.0; SPECTRUM_PREVIEW_BINS];
    if magnitudes.is_empty() {
        return preview;
    }

    let norm = (fft_size as f32 / 2.0).max(1.0);
    let step = (magnitudes.len() / SPECTRUM_PREVIEW_BINS).max(1);
    for (index, slot) in preview.iter_mut().enumerate() {
        let start = index * step;
        if start >= magnitudes.len() {
            break;
        }
        let window = &magnitudes[start..(start + step).min(magnitudes.len())];
        let average = window.iter().sum::<f32>() / window.len() as f32;
        *slot = (average / norm).clamp(0.0, 1.0);
    }
    preview
}

#[cfg(test)]
mod tests {
    use std::f32::consts::PI;

    use super::*;

    fn pipeline() -> AnalysisPipeline {
        AnalysisPipeline::new(&AnalysisConfig::default(), 44_100, None).unwrap()
    }

    fn sine(frequency: f32, amplitude: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * frequency * i as f32 / 44_100.0).sin() * amplitude)
            .collect()
    }

    #[test]
    fn empty_input_yields_a_silent_result() {
        let result = pipeline().process(&[]).unwrap();
        assert_eq!(result, AnalysisResult::default());
    }

    #[test]
    fn results_stay_in_range() {
        let mut pipeline = pipeline();
        for _ in 0..20 {
            let result = pipeline.process(&sine(100.0, 0.8, 1024)).unwrap();
            assert!((0.0..=1.0).contains(&result.amplitude));
            for (_, value) in result.bands.iter() {
                assert!((0.0..=1.0).contains(&value));
            }
            assert!(result.fft.iter().all(|v| (0.0..=1.0).contains(v)));
            assert!(result.bpm >= 0.0);
        }
    }

    #[test]
    fn amplitude_tracks_rms_of_the_first_frame() {
        let mut pipeline = pipeline();
        let result = pipeline.process(&[0.5; 1024]).unwrap();
        assert!((result.amplitude - 0.5).abs() < 1e-6);
    }

    #[test]
    fn low_sine_lights_the_low_band() {
        let mut pipeline = pipeline();
        let result = pipeline.process(&sine(120.0, 0.7, 1024)).unwrap();
        assert!(result.bands.low > result.bands.high);
        assert!((result.peak_frequency - 120.0).abs() <= 44_100.0 / 1024.0);
    }

    #[test]
    fn beat_flag_is_not_smoothed() {
        let mut pipeline = pipeline();
        for _ in 0..10 {
            pipeline.process(&[0.01; 1024]).unwrap();
        }
        let result = pipeline.process(&[0.9; 1024]).unwrap();
        assert!(result.beat);
        assert_eq!(result.beat_count, 1);
    }

    #[test]
    fn preview_pools_into_32_buckets() {
        let magnitudes = vec![256.0; 512];
        let preview = preview_spectrum(&magnitudes, 1024);
        assert!(preview.iter().all(|v| (*v - 0.5).abs() < 1e-6));
    }
}
