use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Static layer parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Number(f64),
    Text(String),
    Array(Vec<Value>),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Copy with every number rounded to `digits` decimal places.
    pub fn rounded(&self, digits: i32) -> Self {
        match self {
            Self::Number(value) => Self::Number(round_to(*value, digits)),
            Self::Array(items) => {
                Self::Array(items.iter().map(|item| item.rounded(digits)).collect())
            }
            other => other.clone(),
        }
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

pub(crate) fn round_to(value: f64, digits: i32) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor
}

/// Analysis signal a mapping reads from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MappingSource {
    Amplitude,
    FrequencyBand { band: String },
    FftSpectrum,
    Beat,
    BeatCount,
    Bpm,
    /// Anything this build does not understand. Resolves to no value.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mapping {
    pub source: MappingSource,
    pub target: String,
}

/// One render layer as defined by the show.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Layer {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shader: Option<String>,
    /// Path to a custom fragment shader, relative to the definition file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glsl: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glsl_source: Option<String>,
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mappings: Vec<Mapping>,
}

impl Layer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Explicit type, else `shader` when a shader is attached, else `geometry`.
    pub fn resolved_kind(&self) -> &str {
        match (&self.kind, &self.shader, &self.glsl) {
            (Some(kind), _, _) => kind,
            (None, Some(_), _) | (None, _, Some(_)) => "shader",
            (None, None, None) => "geometry",
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_mapping(mut self, source: MappingSource, target: impl Into<String>) -> Self {
        self.mappings.push(Mapping {
            source,
            target: target.into(),
        });
        self
    }
}

/// A named, ordered stack of layers. Replaced wholesale, never edited in place.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Scene {
    pub name: String,
    #[serde(default)]
    pub layers: Vec<Layer>,
}

impl Scene {
    pub fn new(name: impl Into<String>, layers: Vec<Layer>) -> Self {
        Self {
            name: name.into(),
            layers,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn layers_deserialize_with_defaults() {
        let layer: Layer = serde_json::from_value(json!({
            "name": "wash",
            "glsl": "shaders/wash.frag",
            "params": {"speed": 0.5, "label": "hi", "enabled": true, "tint": [1, 0.5, 0]},
            "mappings": [
                {"source": {"kind": "frequency_band", "band": "low"}, "target": "speed"},
                {"source": {"kind": "spectral_flux"}, "target": "flux"}
            ]
        }))
        .unwrap();

        assert_eq!(layer.resolved_kind(), "shader");
        assert_eq!(layer.params["speed"], Value::Number(0.5));
        assert_eq!(layer.params["enabled"], Value::Bool(true));
        assert!(matches!(layer.params["tint"], Value::Array(ref items) if items.len() == 3));
        assert_eq!(
            layer.mappings[0].source,
            MappingSource::FrequencyBand { band: "low".into() }
        );
        assert_eq!(layer.mappings[1].source, MappingSource::Unknown);
    }

    #[test]
    fn plain_layers_are_geometry() {
        assert_eq!(Layer::new("grid").resolved_kind(), "geometry");
        let typed = Layer {
            kind: Some("particle_field".into()),
            ..Layer::new("dots")
        };
        assert_eq!(typed.resolved_kind(), "particle_field");
    }

    #[test]
    fn rounding_reaches_nested_numbers() {
        let value = Value::Array(vec![Value::Number(0.123_456), Value::Text("x".into())]);
        assert_eq!(
            value.rounded(4),
            Value::Array(vec![Value::Number(0.1235), Value::Text("x".into())])
        );
    }
}
