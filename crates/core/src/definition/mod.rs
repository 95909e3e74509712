//! Show definitions: scenes, transitions, MIDI maps and globals loaded from
//! an already-parsed JSON document.

mod watcher;

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

pub use watcher::{DefinitionWatcher, ReloadCallback, WatchMode};

use crate::{midi::MidiMap, scene::Scene, transition::TransitionRule, Result, VizError};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ShowDefinition {
    pub scenes: Vec<Scene>,
    pub transitions: Vec<TransitionRule>,
    pub midi_maps: Vec<MidiMap>,
    pub globals: BTreeMap<String, serde_json::Value>,
}

impl ShowDefinition {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|err| VizError::scene_load(format!("invalid definition: {err}")))
    }

    /// Reads and parses `path`, then inlines every `glsl` shader file it
    /// references. Shader paths are relative to the definition's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|err| VizError::scene_load(format!("cannot read {}: {err}", path.display())))?;
        let mut definition: Self = serde_json::from_str(&text).map_err(|err| {
            VizError::scene_load(format!("{}: invalid definition: {err}", path.display()))
        })?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        definition.resolve_shaders(base)?;

        tracing::debug!(
            path = %path.display(),
            scenes = definition.scenes.len(),
            transitions = definition.transitions.len(),
            midi_maps = definition.midi_maps.len(),
            "definition loaded"
        );
        Ok(definition)
    }

    fn resolve_shaders(&mut self, base: &Path) -> Result<()> {
        for scene in &mut self.scenes {
            for layer in &mut scene.layers {
                let Some(glsl) = layer.glsl.as_deref() else { continue };
                if layer.glsl_source.is_some() {
                    continue;
                }
                let shader_path = resolve_relative(base, glsl);
                let source = fs::read_to_string(&shader_path).map_err(|err| {
                    VizError::scene_load(format!(
                        "layer `{}` in scene `{}`: cannot read shader {}: {err}",
                        layer.name,
                        scene.name,
                        shader_path.display()
                    ))
                })?;
                layer.glsl_source = Some(source);
            }
        }
        Ok(())
    }

    pub fn first_scene(&self) -> Option<&Scene> {
        self.scenes.first()
    }

    /// Empty scene named after the definition file, used when it declares none.
    pub fn fallback_scene(path: impl AsRef<Path>) -> Scene {
        let name = path
            .as_ref()
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "main".to_string());
        Scene::new(name, Vec::new())
    }

    /// The first scene, or the fallback for `path`.
    pub fn initial_scene(&self, path: impl AsRef<Path>) -> Scene {
        self.first_scene()
            .cloned()
            .unwrap_or_else(|| Self::fallback_scene(path))
    }
}

fn resolve_relative(base: &Path, target: &str) -> PathBuf {
    let target = Path::new(target);
    if target.is_absolute() {
        target.to_path_buf()
    } else {
        base.join(target)
    }
}
