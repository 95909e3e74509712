use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    analysis::AnalysisResult,
    scene::{Layer, MappingSource, Value},
};

/// A layer with its mappings applied for one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedLayer {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shader: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub glsl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub glsl_source: Option<String>,
    pub params: BTreeMap<String, Value>,
}

/// Routes analysis signals into layer parameters.
#[derive(Debug, Default, Clone, Copy)]
pub struct MappingResolver;

impl MappingResolver {
    pub fn new() -> Self {
        Self
    }

    /// Static params overridden by every mapping that yields a value.
    /// Mappings with unknown sources leave the static value in place.
    pub fn resolve(&self, layers: &[Layer], analysis: &AnalysisResult) -> Vec<ResolvedLayer> {
        layers
            .iter()
            .map(|layer| {
                let mut params = layer.params.clone();
                for mapping in &layer.mappings {
                    if let Some(value) = source_value(&mapping.source, analysis) {
                        params.insert(mapping.target.clone(), value);
                    }
                }

                ResolvedLayer {
                    name: layer.name.clone(),
                    kind: layer.resolved_kind().to_string(),
                    shader: layer.shader.clone(),
                    glsl: layer.glsl.clone(),
                    glsl_source: layer.glsl_source.clone(),
                    params,
                }
            })
            .collect()
    }
}

fn source_value(source: &MappingSource, analysis: &AnalysisResult) -> Option<Value> {
    match source {
        MappingSource::Amplitude => Some(analysis.amplitude.into()),
        MappingSource::FrequencyBand { band } => analysis.bands.get(band).map(Value::from),
        MappingSource::FftSpectrum => Some(Value::Array(
            analysis.fft.iter().map(|bin| Value::from(*bin)).collect(),
        )),
        MappingSource::Beat => Some(analysis.beat.into()),
        MappingSource::BeatCount => Some(analysis.beat_count.into()),
        MappingSource::Bpm => Some(analysis.bpm.into()),
        MappingSource::Unknown => None,
    }
}
