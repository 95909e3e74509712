//! MIDI mapping: parsed controller events to scene switches and globals.

mod runtime;

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

pub use runtime::{ActionSink, MidiRuntime};

use crate::scene::Scene;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MidiEventKind {
    NoteOn,
    NoteOff,
    ControlChange,
    ProgramChange,
    PitchBend,
}

/// One channel voice message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiEvent {
    #[serde(rename = "type")]
    pub kind: MidiEventKind,
    #[serde(default)]
    pub channel: u8,
    pub data1: u8,
    #[serde(default)]
    pub data2: u8,
}

impl MidiEvent {
    pub fn new(kind: MidiEventKind, channel: u8, data1: u8, data2: u8) -> Self {
        Self {
            kind,
            channel,
            data1,
            data2,
        }
    }

    /// Parses a raw channel message. System and unsupported messages yield
    /// `None`. A note-on with zero velocity is reported as note-off.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let (&status, data) = bytes.split_first()?;
        let channel = status & 0x0F;
        let data1 = data.first().copied().unwrap_or(0) & 0x7F;
        let data2 = data.get(1).copied().unwrap_or(0) & 0x7F;

        let kind = match status & 0xF0 {
            0x80 => MidiEventKind::NoteOff,
            0x90 if data2 == 0 => MidiEventKind::NoteOff,
            0x90 => MidiEventKind::NoteOn,
            0xB0 => MidiEventKind::ControlChange,
            0xC0 => return Some(Self::new(MidiEventKind::ProgramChange, channel, data1, 0)),
            0xE0 => MidiEventKind::PitchBend,
            _ => return None,
        };
        Some(Self::new(kind, channel, data1, data2))
    }
}

/// Which events a map reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MidiTrigger {
    Note(u8),
    Cc(u8),
    Pc(u8),
}

impl MidiTrigger {
    fn matches(self, event: &MidiEvent) -> bool {
        match self {
            Self::Note(note) => event.kind == MidiEventKind::NoteOn && event.data1 == note,
            Self::Cc(cc) => event.kind == MidiEventKind::ControlChange && event.data1 == cc,
            Self::Pc(program) => {
                event.kind == MidiEventKind::ProgramChange && event.data1 == program
            }
        }
    }

    /// Velocity or controller value for notes and CCs, program number for PCs.
    fn event_value(self, event: &MidiEvent) -> u8 {
        match self {
            Self::Note(_) | Self::Cc(_) => event.data2.min(127),
            Self::Pc(_) => event.data1.min(127),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MidiAction {
    SwitchScene {
        scene: String,
        #[serde(default)]
        effect: Option<serde_json::Value>,
    },
    /// Sets `key` to `value`, or to the event value times `scale`.
    SetGlobal {
        key: String,
        #[serde(default)]
        value: Option<serde_json::Value>,
        #[serde(default)]
        scale: Option<f64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MidiMap {
    pub trigger: MidiTrigger,
    pub actions: Vec<MidiAction>,
}

/// What the broadcaster should do in response to an event.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeAction {
    SwitchScene {
        scene: Scene,
        effect: Option<serde_json::Value>,
    },
    SetGlobal {
        key: String,
        value: serde_json::Value,
    },
}

/// Evaluates MIDI maps against incoming events.
#[derive(Debug, Clone, Default)]
pub struct MidiMapExecutor {
    maps: Vec<MidiMap>,
    scenes: HashMap<String, Scene>,
    globals: BTreeMap<String, serde_json::Value>,
}

impl MidiMapExecutor {
    pub fn new(
        maps: Vec<MidiMap>,
        scenes: Vec<Scene>,
        globals: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        let mut executor = Self::default();
        executor.update(maps, scenes, Some(globals));
        executor
    }

    /// Globals are kept unless a new set is supplied.
    pub fn update(
        &mut self,
        maps: Vec<MidiMap>,
        scenes: Vec<Scene>,
        globals: Option<BTreeMap<String, serde_json::Value>>,
    ) {
        self.maps = maps;
        self.scenes = scenes
            .into_iter()
            .map(|scene| (scene.name.clone(), scene))
            .collect();
        if let Some(globals) = globals {
            self.globals = globals;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    pub fn globals(&self) -> BTreeMap<String, serde_json::Value> {
        self.globals.clone()
    }

    /// Actions of every matching map, in declaration order. Switches to
    /// unknown scenes are dropped.
    pub fn handle_event(&mut self, event: &MidiEvent) -> Vec<RuntimeAction> {
        let mut actions = Vec::new();
        for map in self.maps.iter().filter(|map| map.trigger.matches(event)) {
            let event_value = map.trigger.event_value(event);
            for action in &map.actions {
                match action {
                    MidiAction::SwitchScene { scene, effect } => match self.scenes.get(scene) {
                        Some(target) => actions.push(RuntimeAction::SwitchScene {
                            scene: target.clone(),
                            effect: effect.clone(),
                        }),
                        None => {
                            tracing::debug!(scene = %scene, "midi switch to unknown scene ignored")
                        }
                    },
                    MidiAction::SetGlobal { key, value, scale } => {
                        let value = value.clone().unwrap_or_else(|| {
                            let scaled = f64::from(event_value) * scale.unwrap_or(1.0);
                            serde_json::json!(scaled)
                        });
                        self.globals.insert(key.clone(), value.clone());
                        actions.push(RuntimeAction::SetGlobal {
                            key: key.clone(),
                            value,
                        });
                    }
                }
            }
        }
        actions
    }
}
