use std::{f64::consts::PI, fmt, str::FromStr};

use num_complex::Complex32;
use serde::{Deserialize, Serialize};

use crate::{Result, VizError};

/// Window applied sample-wise before the transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Window {
    #[default]
    Hamming,
    Hann,
    Blackman,
    None,
}

impl Window {
    /// Coefficient for sample `index` of a window spanning `len` samples.
    pub fn coefficient(self, index: usize, len: usize) -> f32 {
        if len <= 1 {
            return 1.0;
        }

        let angle = 2.0 * PI * index as f64 / (len as f64 - 1.0);
        let value = match self {
            Window::Hamming => 0.54 - 0.46 * angle.cos(),
            Window::Hann => 0.5 * (1.0 - angle.cos()),
            Window::Blackman => 0.42 - 0.5 * angle.cos() + 0.08 * (2.0 * angle).cos(),
            Window::None => 1.0,
        };
        value as f32
    }
}

impl FromStr for Window {
    type Err = VizError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "hamming" => Ok(Window::Hamming),
            "hann" => Ok(Window::Hann),
            "blackman" => Ok(Window::Blackman),
            "none" => Ok(Window::None),
            other => Err(VizError::config(format!("unsupported window: {other}"))),
        }
    }
}

/// Which transform implementation an [`FftProcessor`] should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FftBackendKind {
    /// Iterative radix-2 transform, always available.
    Reference,
    /// Native real-to-complex transform. Construction fails when it was not
    /// compiled in.
    Accelerated,
    /// Accelerated when possible; the first failure falls back to the
    /// reference transform for good.
    #[default]
    Auto,
}

impl FromStr for FftBackendKind {
    type Err = VizError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "reference" => Ok(FftBackendKind::Reference),
            "accelerated" => Ok(FftBackendKind::Accelerated),
            "auto" => Ok(FftBackendKind::Auto),
            other => Err(VizError::config(format!("unsupported fft backend: {other}"))),
        }
    }
}

/// Output of one transform.
#[derive(Debug, Clone, Default)]
pub struct FftOutput {
    /// `fft_size / 2` magnitudes.
    pub magnitudes: Vec<f32>,
    /// The first `fft_size / 2` complex bins.
    pub spectrum: Vec<Complex32>,
    pub peak_bin: usize,
    pub peak_frequency: f32,
}

/// A transform implementation. `input` is already windowed and exactly
/// `fft_size` long; the returned vector holds the first `fft_size / 2` bins.
trait FftBackend: Send {
    fn name(&self) -> &'static str;
    fn forward(&mut self, input: &[f32]) -> Result<Vec<Complex32>>;
}

/// Windowed power-of-two FFT producing a magnitude spectrum and peak bin.
pub struct FftProcessor {
    sample_rate: u32,
    fft_size: usize,
    window: Window,
    backend_kind: FftBackendKind,
    coefficients: Vec<f32>,
    frame: Vec<f32>,
    backend: Box<dyn FftBackend>,
}

impl FftProcessor {
    pub fn new(
        sample_rate: u32,
        fft_size: usize,
        window: Window,
        backend_kind: FftBackendKind,
    ) -> Result<Self> {
        if !fft_size.is_power_of_two() {
            return Err(VizError::config(format!(
                "fft_size must be a power of two, got {fft_size}"
            )));
        }
        if sample_rate == 0 {
            return Err(VizError::config("sample_rate must be positive"));
        }

        let backend = build_backend(backend_kind, fft_size)?;
        let coefficients = (0..fft_size)
            .map(|index| window.coefficient(index, fft_size))
            .collect();

        tracing::debug!(
            sample_rate,
            fft_size,
            ?window,
            backend = backend.name(),
            "fft processor created"
        );

        Ok(Self {
            sample_rate,
            fft_size,
            window,
            backend_kind,
            coefficients,
            frame: vec![0.0; fft_size],
            backend,
        })
    }

    /// Reference backend with a Hamming window.
    pub fn reference(sample_rate: u32, fft_size: usize) -> Result<Self> {
        Self::new(sample_rate, fft_size, Window::Hamming, FftBackendKind::Reference)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn window(&self) -> Window {
        self.window
    }

    pub fn backend_kind(&self) -> FftBackendKind {
        self.backend_kind
    }

    /// Name of the backend currently doing the work.
    pub fn active_backend(&self) -> &'static str {
        self.backend.name()
    }

    pub fn bin_frequency(&self, bin: usize) -> f32 {
        bin as f32 * self.sample_rate as f32 / self.fft_size as f32
    }

    /// Transforms `samples`, zero-padding short input and truncating long
    /// input to `fft_size`.
    pub fn transform(&mut self, samples: &[f32]) -> Result<FftOutput> {
        let used = samples.len().min(self.fft_size);
        for (slot, (sample, coefficient)) in self
            .frame
            .iter_mut()
            .zip(samples[..used].iter().zip(&self.coefficients))
        {
            *slot = sample * coefficient;
        }
        self.frame[used..].fill(0.0);

        let spectrum = self.backend.forward(&self.frame)?;
        let magnitudes: Vec<f32> = spectrum.iter().map(|bin| bin.norm()).collect();
        let peak_bin = peak_index(&magnitudes);

        Ok(FftOutput {
            peak_frequency: self.bin_frequency(peak_bin),
            magnitudes,
            spectrum,
            peak_bin,
        })
    }
}

impl fmt::Debug for FftProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftProcessor")
            .field("sample_rate", &self.sample_rate)
            .field("fft_size", &self.fft_size)
            .field("window", &self.window)
            .field("backend", &self.backend.name())
            .finish()
    }
}

/// Index of the largest magnitude, first occurrence on ties.
fn peak_index(magnitudes: &[f32]) -> usize {
    let mut best = 0;
    for (index, value) in magnitudes.iter().enumerate() {
        if *value > magnitudes[best] {
            best = index;
        }
    }
    best
}

fn build_backend(kind: FftBackendKind, fft_size: usize) -> Result<Box<dyn FftBackend>> {
    match kind {
        FftBackendKind::Reference => Ok(Box::new(ReferenceFft::new(fft_size))),
        FftBackendKind::Accelerated => accelerated_backend(fft_size),
        FftBackendKind::Auto => {
            let fallback = ReferenceFft::new(fft_size);
            match accelerated_backend(fft_size) {
                Ok(primary) => Ok(Box::new(AutoFft {
                    primary: Some(primary),
                    fallback,
                })),
                Err(err) => {
                    tracing::debug!(%err, "accelerated fft unavailable, using reference");
                    Ok(Box::new(fallback))
                }
            }
        }
    }
}

#[cfg(feature = "accelerated-fft")]
fn accelerated_backend(fft_size: usize) -> Result<Box<dyn FftBackend>> {
    Ok(Box::new(accelerated::NativeFft::new(fft_size)))
}

#[cfg(not(feature = "accelerated-fft"))]
fn accelerated_backend(_fft_size: usize) -> Result<Box<dyn FftBackend>> {
    Err(VizError::config(
        "accelerated fft backend requested but not compiled in (enable `accelerated-fft`)",
    ))
}

/// Iterative radix-2 Cooley-Tukey transform with precomputed twiddles.
struct ReferenceFft {
    size: usize,
    reversed: Vec<usize>,
    twiddles: Vec<Complex32>,
    buffer: Vec<Complex32>,
}

impl ReferenceFft {
    fn new(size: usize) -> Self {
        let bits = size.trailing_zeros();
        let reversed = (0..size)
            .map(|index| {
                if bits == 0 {
                    index
                } else {
                    index.reverse_bits() >> (usize::BITS - bits)
                }
            })
            .collect();
        let twiddles = (0..size / 2)
            .map(|k| {
                let angle = -2.0 * PI * k as f64 / size as f64;
                Complex32::new(angle.cos() as f32, angle.sin() as f32)
            })
            .collect();

        Self {
            size,
            reversed,
            twiddles,
            buffer: vec![Complex32::new(0.0, 0.0); size],
        }
    }
}

impl FftBackend for ReferenceFft {
    fn name(&self) -> &'static str {
        "reference"
    }

    fn forward(&mut self, input: &[f32]) -> Result<Vec<Complex32>> {
        let n = self.size;
        for (index, target) in self.reversed.iter().enumerate() {
            self.buffer[*target] = Complex32::new(input[index], 0.0);
        }

        let mut len = 2;
        while len <= n {
            let half = len / 2;
            let stride = n / len;
            for offset in (0..n).step_by(len) {
                for index in 0..half {
                    let twiddle = self.twiddles[index * stride];
                    let even = self.buffer[offset + index];
                    let odd = self.buffer[offset + index + half] * twiddle;
                    self.buffer[offset + index] = even + odd;
                    self.buffer[offset + index + half] = even - odd;
                }
            }
            len <<= 1;
        }

        Ok(self.buffer[..n / 2].to_vec())
    }
}

/// Accelerated transform that permanently switches to the reference
/// implementation after its first failure.
struct AutoFft {
    primary: Option<Box<dyn FftBackend>>,
    fallback: ReferenceFft,
}

impl FftBackend for AutoFft {
    fn name(&self) -> &'static str {
        match &self.primary {
            Some(primary) => primary.name(),
            None => self.fallback.name(),
        }
    }

    fn forward(&mut self, input: &[f32]) -> Result<Vec<Complex32>> {
        if let Some(primary) = self.primary.as_mut() {
            match primary.forward(input) {
                Ok(spectrum) => return Ok(spectrum),
                Err(err) => {
                    tracing::warn!(%err, "accelerated fft failed, falling back to reference");
                    self.primary = None;
                }
            }
        }
        self.fallback.forward(input)
    }
}

#[cfg(feature = "accelerated-fft")]
mod accelerated {
    use std::sync::Arc;

    use num_complex::Complex32;
    use realfft::{RealFftPlanner, RealToComplex};

    use super::FftBackend;
    use crate::{Result, VizError};

    pub(super) struct NativeFft {
        plan: Arc<dyn RealToComplex<f32>>,
        input: Vec<f32>,
        output: Vec<realfft::num_complex::Complex32>,
        scratch: Vec<realfft::num_complex::Complex32>,
    }

    impl NativeFft {
        pub(super) fn new(size: usize) -> Self {
            let plan = RealFftPlanner::<f32>::new().plan_fft_forward(size);
            Self {
                input: plan.make_input_vec(),
                output: plan.make_output_vec(),
                scratch: plan.make_scratch_vec(),
                plan,
            }
        }
    }

    impl FftBackend for NativeFft {
        fn name(&self) -> &'static str {
            "accelerated"
        }

        fn forward(&mut self, input: &[f32]) -> Result<Vec<Complex32>> {
            // The plan uses `input` as scratch space, so refill it each call.
            self.input.copy_from_slice(input);
            self.plan
                .process_with_scratch(&mut self.input, &mut self.output, &mut self.scratch)
                .map_err(|err| VizError::msg(format!("native fft failed: {err}")))?;

            let half = input.len() / 2;
            Ok(self.output[..half]
                .iter()
                .map(|bin| Complex32::new(bin.re, bin.im))
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        f32::consts::PI as PI32,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    use super::*;

    fn sine(frequency: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI32 * frequency * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    /// Stands in for a native backend that stops working at runtime.
    struct BrokenBackend {
        calls: Arc<AtomicUsize>,
    }

    impl FftBackend for BrokenBackend {
        fn name(&self) -> &'static str {
            "accelerated"
        }

        fn forward(&mut self, _input: &[f32]) -> Result<Vec<Complex32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(VizError::msg("device lost"))
        }
    }

    #[test]
    fn rejects_non_power_of_two_sizes() {
        let err = FftProcessor::reference(44_100, 1000).unwrap_err();
        assert!(matches!(err, VizError::Configuration(_)));
        assert!(FftProcessor::reference(44_100, 0).is_err());
    }

    #[test]
    fn single_sample_transform_has_no_bins() {
        let mut fft = FftProcessor::reference(44_100, 1).unwrap();
        let output = fft.transform(&[0.7, 0.1]).unwrap();
        assert!(output.magnitudes.is_empty());
        assert_eq!(output.peak_bin, 0);
        assert_eq!(output.peak_frequency, 0.0);
    }

    #[test]
    fn auto_switches_to_reference_after_the_first_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut auto = AutoFft {
            primary: Some(Box::new(BrokenBackend {
                calls: calls.clone(),
            })),
            fallback: ReferenceFft::new(64),
        };
        assert_eq!(auto.name(), "accelerated");

        let signal = sine(1_000.0, 8_000, 64);
        let expected = ReferenceFft::new(64).forward(&signal).unwrap();

        assert_eq!(auto.forward(&signal).unwrap(), expected);
        assert_eq!(auto.name(), "reference");
        assert_eq!(auto.forward(&signal).unwrap(), expected);
        assert_eq!(auto.forward(&signal).unwrap(), expected);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn output_is_half_the_fft_size_for_every_window() {
        for size in [2, 64, 256, 1024] {
            for window in [Window::Hamming, Window::Hann, Window::Blackman, Window::None] {
                let mut fft =
                    FftProcessor::new(44_100, size, window, FftBackendKind::Reference).unwrap();
                let output = fft.transform(&sine(440.0, 44_100, size)).unwrap();
                assert_eq!(output.magnitudes.len(), size / 2);
                assert_eq!(output.spectrum.len(), size / 2);
            }
        }
    }

    #[test]
    fn finds_the_peak_of_a_440hz_sine() {
        let mut fft = FftProcessor::reference(44_100, 1024).unwrap();
        let output = fft.transform(&sine(440.0, 44_100, 1024)).unwrap();

        let bin_hz = 44_100.0 / 1024.0;
        let expected = (440.0_f32 / bin_hz).round() as i64;
        assert!((output.peak_bin as i64 - expected).abs() <= 1);
        assert!((output.peak_frequency - 440.0).abs() <= bin_hz);
    }

    #[test]
    fn pads_short_input_and_truncates_long_input() {
        let mut fft =
            FftProcessor::new(8_000, 16, Window::None, FftBackendKind::Reference).unwrap();

        let short = fft.transform(&[1.0]).unwrap();
        // A single impulse has a flat spectrum.
        assert!(short.magnitudes.iter().all(|m| (m - 1.0).abs() < 1e-6));

        let mut long = vec![0.0; 16];
        long[0] = 1.0;
        long.extend(std::iter::repeat(5.0).take(16));
        let truncated = fft.transform(&long).unwrap();
        assert!(truncated.magnitudes.iter().all(|m| (m - 1.0).abs() < 1e-6));
    }

    #[test]
    fn silence_peaks_at_bin_zero() {
        let mut fft = FftProcessor::reference(44_100, 256).unwrap();
        let output = fft.transform(&[]).unwrap();
        assert_eq!(output.peak_bin, 0);
        assert_eq!(output.peak_frequency, 0.0);
    }

    #[test]
    fn window_coefficients_follow_closed_forms() {
        assert!((Window::Hamming.coefficient(0, 8) - 0.08).abs() < 1e-6);
        assert!((Window::Hann.coefficient(0, 8)).abs() < 1e-6);
        assert!((Window::Blackman.coefficient(0, 8)).abs() < 1e-6);
        assert_eq!(Window::None.coefficient(3, 8), 1.0);
        assert_eq!(Window::Hann.coefficient(0, 1), 1.0);
    }

    #[test]
    fn parses_window_and_backend_names() {
        assert_eq!("Hann".parse::<Window>().unwrap(), Window::Hann);
        assert_eq!("auto".parse::<FftBackendKind>().unwrap(), FftBackendKind::Auto);
        assert!("kaiser".parse::<Window>().is_err());
    }

    #[cfg(feature = "accelerated-fft")]
    #[test]
    fn accelerated_backend_matches_reference() {
        for size in [64, 512, 2048] {
            let signal: Vec<f32> = sine(1_000.0, 44_100, size)
                .iter()
                .zip(sine(3_300.0, 44_100, size))
                .map(|(a, b)| a * 0.6 + b * 0.3)
                .collect();

            let mut reference =
                FftProcessor::new(44_100, size, Window::Hann, FftBackendKind::Reference).unwrap();
            let mut native =
                FftProcessor::new(44_100, size, Window::Hann, FftBackendKind::Accelerated).unwrap();
            assert_eq!(native.active_backend(), "accelerated");

            let expected = reference.transform(&signal).unwrap();
            let actual = native.transform(&signal).unwrap();
            let scale = expected.magnitudes.iter().cloned().fold(0.0_f32, f32::max);
            for (a, b) in expected.magnitudes.iter().zip(&actual.magnitudes) {
                assert!((a - b).abs() <= 1e-4 * scale, "{a} vs {b}");
            }
            assert_eq!(expected.peak_bin, actual.peak_bin);
        }
    }

    #[cfg(not(feature = "accelerated-fft"))]
    #[test]
    fn accelerated_backend_fails_explicitly_when_missing() {
        assert!(
            FftProcessor::new(44_100, 1024, Window::Hann, FftBackendKind::Accelerated).is_err()
        );
        let auto = FftProcessor::new(44_100, 1024, Window::Hann, FftBackendKind::Auto).unwrap();
        assert_eq!(auto.active_backend(), "reference");
    }
}
