use serde::{Deserialize, Serialize};

use super::{TriggerContext, TriggerError};

/// Named value a condition can read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Amplitude,
    Band(String),
    FftBin(usize),
    Beat,
    /// Scene-local.
    BeatCount,
    TotalBeatCount,
    Bpm,
    /// Scene-local.
    FrameCount,
}

impl Signal {
    fn name(&self) -> &'static str {
        match self {
            Self::Amplitude => "amplitude",
            Self::Band(_) => "band",
            Self::FftBin(_) => "fft_bin",
            Self::Beat => "beat",
            Self::BeatCount => "beat_count",
            Self::TotalBeatCount => "total_beat_count",
            Self::Bpm => "bpm",
            Self::FrameCount => "frame_count",
        }
    }

    pub fn read(&self, context: &TriggerContext<'_>) -> Result<f64, TriggerError> {
        let value = match self {
            Self::Amplitude => f64::from(context.amplitude()),
            Self::Band(name) => f64::from(context.band(name)?),
            Self::FftBin(index) => f64::from(context.fft_bin(*index)?),
            Self::Beat => f64::from(u8::from(context.beat())),
            Self::BeatCount => context.beat_count() as f64,
            Self::TotalBeatCount => context.total_beat_count() as f64,
            Self::Bpm => f64::from(context.bpm()),
            Self::FrameCount => context.frame_count() as f64,
        };
        if value.is_finite() {
            Ok(value)
        } else {
            Err(TriggerError::NonFinite(self.name()))
        }
    }
}

/// Either side of a comparison: a literal or a signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    Number(f64),
    Signal(Signal),
}

impl Operand {
    fn value(&self, context: &TriggerContext<'_>) -> Result<f64, TriggerError> {
        match self {
            Self::Number(value) if value.is_finite() => Ok(*value),
            Self::Number(_) => Err(TriggerError::NonFinite("literal")),
            Self::Signal(signal) => signal.read(context),
        }
    }
}

impl From<Signal> for Operand {
    fn from(signal: Signal) -> Self {
        Self::Signal(signal)
    }
}

impl From<f64> for Operand {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cmp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl Cmp {
    pub fn apply(self, left: f64, right: f64) -> bool {
        match self {
            Self::Gt => left > right,
            Self::Ge => left >= right,
            Self::Lt => left < right,
            Self::Le => left <= right,
            Self::Eq => left == right,
            Self::Ne => left != right,
        }
    }
}

/// Declarative trigger expression.
///
/// ```json
/// {"op": "all", "conditions": [
///     {"op": "compare", "left": "beat_count", "cmp": "ge", "right": 16},
///     {"op": "compare", "left": {"band": "low"}, "cmp": "gt", "right": 0.6}
/// ]}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    Always,
    Never,
    All { conditions: Vec<Condition> },
    Any { conditions: Vec<Condition> },
    Not { condition: Box<Condition> },
    Compare {
        left: Operand,
        cmp: Cmp,
        right: Operand,
    },
}

impl Condition {
    pub fn compare(left: impl Into<Operand>, cmp: Cmp, right: impl Into<Operand>) -> Self {
        Self::Compare {
            left: left.into(),
            cmp,
            right: right.into(),
        }
    }

    pub fn evaluate(&self, context: &TriggerContext<'_>) -> Result<bool, TriggerError> {
        match self {
            Self::Always => Ok(true),
            Self::Never => Ok(false),
            Self::All { conditions } => {
                for condition in conditions {
                    if !condition.evaluate(context)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Any { conditions } => {
                for condition in conditions {
                    if condition.evaluate(context)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::Not { condition } => Ok(!condition.evaluate(context)?),
            Self::Compare { left, cmp, right } => {
                Ok(cmp.apply(left.value(context)?, right.value(context)?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::analysis::{AnalysisResult, Bands};

    fn analysis() -> AnalysisResult {
        let mut fft = [0.0; 32];
        fft[3] = 0.9;
        AnalysisResult {
            amplitude: 0.4,
            bands: Bands {
                low: 0.7,
                ..Bands::default()
            },
            fft,
            beat: true,
            beat_count: 120,
            bpm: 128.0,
            ..AnalysisResult::default()
        }
    }

    #[test]
    fn combinators_short_circuit_in_order() {
        let analysis = analysis();
        let context = TriggerContext::new(&analysis, 30, 6);
        let condition: Condition = serde_json::from_value(json!({
            "op": "all",
            "conditions": [
                {"op": "compare", "left": "beat_count", "cmp": "ge", "right": 4},
                {"op": "compare", "left": {"band": "low"}, "cmp": "gt", "right": 0.6},
                {
                    "op": "not",
                    "condition": {"op": "compare", "left": "frame_count", "cmp": "lt", "right": 30}
                }
            ]
        }))
        .unwrap();
        assert_eq!(condition.evaluate(&context), Ok(true));

        let any = Condition::Any {
            conditions: vec![Condition::Never, Condition::compare(Signal::Beat, Cmp::Eq, 1.0)],
        };
        assert_eq!(any.evaluate(&context), Ok(true));
    }

    #[test]
    fn scene_local_and_total_counts_differ() {
        let analysis = analysis();
        let context = TriggerContext::new(&analysis, 0, 2);
        let local = Condition::compare(Signal::BeatCount, Cmp::Ge, 100.0);
        let total = Condition::compare(Signal::TotalBeatCount, Cmp::Ge, 100.0);
        assert_eq!(local.evaluate(&context), Ok(false));
        assert_eq!(total.evaluate(&context), Ok(true));
    }

    #[test]
    fn bad_signals_are_errors() {
        let analysis = analysis();
        let context = TriggerContext::new(&analysis, 0, 0);

        let band = Condition::compare(Signal::Band("ultra".into()), Cmp::Gt, 0.0);
        assert_eq!(band.evaluate(&context), Err(TriggerError::UnknownBand("ultra".into())));

        let bin = Condition::compare(Signal::FftBin(32), Cmp::Gt, 0.0);
        assert_eq!(bin.evaluate(&context), Err(TriggerError::BinOutOfRange(32)));

        let bin = Condition::compare(Signal::FftBin(3), Cmp::Gt, 0.5);
        assert_eq!(bin.evaluate(&context), Ok(true));
    }

    #[test]
    fn non_finite_signals_do_not_compare() {
        let analysis = AnalysisResult {
            bpm: f32::NAN,
            ..AnalysisResult::default()
        };
        let context = TriggerContext::new(&analysis, 0, 0);
        let condition = Condition::compare(Signal::Bpm, Cmp::Ne, 0.0);
        assert_eq!(condition.evaluate(&context), Err(TriggerError::NonFinite("bpm")));
    }
}
