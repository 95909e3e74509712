//! Wire shape of one broadcast frame.

use std::{
    collections::BTreeMap,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use crate::{
    analysis::AnalysisResult,
    mapping::ResolvedLayer,
    scene::{round_to, Value},
};

/// Decimal places kept for every float sent to the renderer.
pub const FRAME_PRECISION: i32 = 4;

/// Announced in the first frame after a scene change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionDescriptor {
    pub from: String,
    pub to: String,
    pub effect: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioPayload {
    pub amplitude: f64,
    pub bands: BTreeMap<String, f64>,
    pub fft: Vec<f64>,
    pub beat: bool,
    pub beat_count: u64,
    pub bpm: f64,
}

impl AudioPayload {
    pub fn from_analysis(analysis: &AnalysisResult) -> Self {
        let round = |value: f32| round_to(f64::from(value), FRAME_PRECISION);
        Self {
            amplitude: round(analysis.amplitude),
            bands: analysis
                .bands
                .iter()
                .map(|(name, value)| (name.to_string(), round(value)))
                .collect(),
            fft: analysis.fft.iter().map(|bin| round(*bin)).collect(),
            beat: analysis.beat,
            beat_count: analysis.beat_count,
            bpm: round(analysis.bpm),
        }
    }

    pub fn band(&self, name: &str) -> Option<f64> {
        self.bands.get(name).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenePayload {
    pub name: String,
    pub layers: Vec<ResolvedLayer>,
}

/// `{timestamp, audio, scene, transition}` as sent with every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub timestamp: f64,
    pub audio: AudioPayload,
    pub scene: ScenePayload,
    pub transition: Option<TransitionDescriptor>,
}

impl Frame {
    /// Assembles a frame stamped with the current wall-clock time. Layer
    /// params are rounded like the audio block.
    pub fn build(
        analysis: &AnalysisResult,
        scene_name: &str,
        layers: Vec<ResolvedLayer>,
        transition: Option<TransitionDescriptor>,
    ) -> Self {
        let layers = layers
            .into_iter()
            .map(|mut layer| {
                layer.params = round_params(&layer.params);
                layer
            })
            .collect();

        Self {
            timestamp: unix_timestamp(),
            audio: AudioPayload::from_analysis(analysis),
            scene: ScenePayload {
                name: scene_name.to_string(),
                layers,
            },
            transition,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

fn round_params(params: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    params
        .iter()
        .map(|(key, value)| (key.clone(), value.rounded(FRAME_PRECISION)))
        .collect()
}

/// Seconds since the epoch. A clock before 1970 reads as zero.
pub fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{mapping::MappingResolver, scene::Layer};

    #[test]
    fn frames_round_to_four_places() {
        let analysis = AnalysisResult {
            amplitude: 0.123_456,
            bpm: 127.999_99,
            beat_count: 3,
            ..AnalysisResult::default()
        };
        let layers = MappingResolver::new().resolve(
            &[Layer::new("wash").with_param("speed", 0.333_333_3)],
            &analysis,
        );
        let frame = Frame::build(&analysis, "intro", layers, None);

        assert_eq!(frame.audio.amplitude, 0.1235);
        assert_eq!(frame.audio.bpm, 128.0);
        assert_eq!(frame.audio.fft.len(), 32);
        assert_eq!(frame.scene.layers[0].params["speed"], Value::Number(0.3333));
        assert!(frame.timestamp > 1.0e9);
    }

    #[test]
    fn serialises_to_the_wire_shape() {
        let frame = Frame::build(
            &AnalysisResult::default(),
            "drop",
            MappingResolver::new().resolve(&[Layer::new("grid")], &AnalysisResult::default()),
            Some(TransitionDescriptor {
                from: "intro".into(),
                to: "drop".into(),
                effect: Some(json!({"type": "fade"})),
            }),
        );
        let value = frame.to_json().unwrap();

        assert_eq!(value["scene"]["name"], "drop");
        assert_eq!(value["scene"]["layers"][0]["type"], "geometry");
        assert!(value["scene"]["layers"][0].get("shader").is_none());
        assert_eq!(value["audio"]["bands"]["low"], 0.0);
        assert_eq!(value["audio"]["beat"], false);
        assert_eq!(value["transition"]["effect"]["type"], "fade");
    }
}
