use serde::{Deserialize, Serialize};

/// Normalised energy per named frequency band, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bands {
    pub sub: f32,
    pub low: f32,
    pub mid: f32,
    pub high: f32,
}

impl Bands {
    pub const NAMES: [&'static str; 4] = ["sub", "low", "mid", "high"];

    /// Looks a band up by name.
    pub fn get(&self, name: &str) -> Option<f32> {
        match name {
            "sub" => Some(self.sub),
            "low" => Some(self.low),
            "mid" => Some(self.mid),
            "high" => Some(self.high),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f32)> {
        Self::NAMES.into_iter().zip([self.sub, self.low, self.mid, self.high])
    }
}

/// Hz ranges for sub, low, mid and high, in that order.
const BAND_RANGES: [(f32, f32); 4] = [
    (20.0, 60.0),
    (60.0, 250.0),
    (250.0, 4_000.0),
    (4_000.0, 20_000.0),
];

const MIN_SCALE: f32 = 1.0e-9;

/// Converts FFT magnitudes into normalised sub/low/mid/high energies.
#[derive(Debug, Clone)]
pub struct BandSplitter {
    sample_rate: u32,
    fft_size: usize,
    bin_hz: f32,
}

impl BandSplitter {
    pub fn new(sample_rate: u32, fft_size: usize) -> Self {
        Self {
            sample_rate,
            fft_size,
            bin_hz: sample_rate as f32 / fft_size.max(1) as f32,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn split(&self, magnitudes: &[f32]) -> Bands {
        if magnitudes.is_empty() {
            return Bands::default();
        }

        let scale = magnitudes
            .iter()
            .map(|m| m.abs())
            .fold(0.0_f32, f32::max)
            .max(MIN_SCALE);

        let [sub, low, mid, high] = BAND_RANGES.map(|(low_hz, high_hz)| {
            let Some((first, last)) = self.band_indices(low_hz, high_hz, magnitudes.len()) else {
                return 0.0;
            };

            let bins = &magnitudes[first..=last];
            let average = bins.iter().map(|m| m.abs()).sum::<f32>() / bins.len() as f32;
            (average / scale).clamp(0.0, 1.0)
        });

        Bands {
            sub,
            low,
            mid,
            high,
        }
    }

    fn band_indices(&self, low_hz: f32, high_hz: f32, len: usize) -> Option<(usize, usize)> {
        if len == 0 {
            return None;
        }
        let max = (len - 1) as f32;
        let first = (low_hz / self.bin_hz).floor().clamp(0.0, max) as usize;
        let last = (high_hz / self.bin_hz).ceil().clamp(0.0, max) as usize;
        (first <= last).then_some((first, last))
    }
}
