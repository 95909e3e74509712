//! Scene graph state machine: which scene follows which, and when.

mod condition;

use std::{
    collections::HashMap,
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};

use serde::{Deserialize, Deserializer};

pub use condition::{Cmp, Condition, Operand, Signal};

use crate::{analysis::AnalysisResult, scene::Scene};

/// Why a trigger could not be evaluated. Always treated as "did not fire".
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TriggerError {
    #[error("unknown band `{0}`")]
    UnknownBand(String),
    #[error("spectrum bin {0} is out of range")]
    BinOutOfRange(usize),
    #[error("signal `{0}` is not a finite number")]
    NonFinite(&'static str),
    #[error("{0}")]
    Message(String),
}

/// Read-only view handed to triggers. Counters are scene-local.
#[derive(Debug, Clone, Copy)]
pub struct TriggerContext<'a> {
    analysis: &'a AnalysisResult,
    frame_count: u64,
    beat_count: u64,
}

impl<'a> TriggerContext<'a> {
    pub fn new(analysis: &'a AnalysisResult, frame_count: u64, beat_count: u64) -> Self {
        Self {
            analysis,
            frame_count,
            beat_count,
        }
    }

    pub fn amplitude(&self) -> f32 {
        self.analysis.amplitude
    }

    pub fn band(&self, name: &str) -> Result<f32, TriggerError> {
        self.analysis
            .bands
            .get(name)
            .ok_or_else(|| TriggerError::UnknownBand(name.to_string()))
    }

    pub fn fft_bin(&self, index: usize) -> Result<f32, TriggerError> {
        self.analysis
            .fft
            .get(index)
            .copied()
            .ok_or(TriggerError::BinOutOfRange(index))
    }

    pub fn beat(&self) -> bool {
        self.analysis.beat
    }

    /// Beats since entering the current scene.
    pub fn beat_count(&self) -> u64 {
        self.beat_count
    }

    pub fn total_beat_count(&self) -> u64 {
        self.analysis.beat_count
    }

    pub fn bpm(&self) -> f32 {
        self.analysis.bpm
    }

    /// Ticks since entering the current scene.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

pub type TriggerFn = dyn Fn(&TriggerContext<'_>) -> Result<bool, TriggerError> + Send + Sync;

/// Predicate deciding whether a transition fires.
#[derive(Clone)]
pub enum Trigger {
    Condition(Condition),
    Callback(Arc<TriggerFn>),
}

impl Trigger {
    pub fn callback<F>(callback: F) -> Self
    where
        F: Fn(&TriggerContext<'_>) -> Result<bool, TriggerError> + Send + Sync + 'static,
    {
        Self::Callback(Arc::new(callback))
    }

    /// Errors and panics both count as "did not fire".
    pub fn fires(&self, context: &TriggerContext<'_>) -> bool {
        let outcome = catch_unwind(AssertUnwindSafe(|| match self {
            Self::Condition(condition) => condition.evaluate(context),
            Self::Callback(callback) => callback(context),
        }));

        match outcome {
            Ok(Ok(fired)) => fired,
            Ok(Err(err)) => {
                tracing::trace!(error = %err, "trigger evaluation failed");
                false
            }
            Err(_) => {
                tracing::warn!("trigger panicked during evaluation");
                false
            }
        }
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Condition(condition) => f.debug_tuple("Condition").field(condition).finish(),
            Self::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

impl From<Condition> for Trigger {
    fn from(condition: Condition) -> Self {
        Self::Condition(condition)
    }
}

impl<'de> Deserialize<'de> for Trigger {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Condition::deserialize(deserializer).map(Self::Condition)
    }
}

/// Directed edge between two scenes.
#[derive(Debug, Clone, Deserialize)]
pub struct TransitionRule {
    pub from: String,
    pub to: String,
    pub trigger: Trigger,
    /// Passed through to the renderer untouched.
    #[serde(default)]
    pub effect: Option<serde_json::Value>,
}

impl TransitionRule {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        trigger: impl Into<Trigger>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            trigger: trigger.into(),
            effect: None,
        }
    }

    pub fn with_effect(mut self, effect: serde_json::Value) -> Self {
        self.effect = Some(effect);
        self
    }
}

/// A rule that fired, with a copy of the scene to switch to.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: String,
    pub to: String,
    pub effect: Option<serde_json::Value>,
    pub scene: Scene,
}

#[derive(Debug, Default, Clone)]
pub struct TransitionController {
    scenes: HashMap<String, Scene>,
    rules: Vec<TransitionRule>,
}

impl TransitionController {
    pub fn new(scenes: Vec<Scene>, rules: Vec<TransitionRule>) -> Self {
        let mut controller = Self::default();
        controller.update(scenes, rules);
        controller
    }

    /// Replaces the scene catalog and rule list together.
    pub fn update(&mut self, scenes: Vec<Scene>, rules: Vec<TransitionRule>) {
        self.scenes = scenes
            .into_iter()
            .map(|scene| (scene.name.clone(), scene))
            .collect();
        self.rules = rules;
    }

    pub fn scene(&self, name: &str) -> Option<&Scene> {
        self.scenes.get(name)
    }

    pub fn rules(&self) -> &[TransitionRule] {
        &self.rules
    }

    /// First rule leaving `current` whose trigger fires, in declaration order.
    /// A rule pointing at an unknown scene is suppressed.
    pub fn next_transition(
        &self,
        current: &str,
        analysis: &AnalysisResult,
        frame_count: u64,
        beat_count: u64,
    ) -> Option<Transition> {
        let context = TriggerContext::new(analysis, frame_count, beat_count);
        let rule = self
            .rules
            .iter()
            .filter(|rule| rule.from == current)
            .find(|rule| rule.trigger.fires(&context))?;

        let Some(scene) = self.scenes.get(&rule.to) else {
            tracing::debug!(
                from = %rule.from,
                to = %rule.to,
                "transition target missing, suppressed"
            );
            return None;
        };

        Some(Transition {
            from: rule.from.clone(),
            to: rule.to.clone(),
            effect: rule.effect.clone(),
            scene: scene.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn scenes() -> Vec<Scene> {
        ["intro", "drop", "outro"]
            .into_iter()
            .map(|name| Scene::new(name, Vec::new()))
            .collect()
    }

    fn beats_at_least(count: f64) -> Condition {
        Condition::compare(Operand::Signal(Signal::BeatCount), Cmp::Ge, Operand::Number(count))
    }

    #[test]
    fn returns_none_when_nothing_fires() {
        let controller = TransitionController::new(
            scenes(),
            vec![TransitionRule::new("intro", "drop", beats_at_least(8.0))],
        );
        let analysis = AnalysisResult::default();
        assert!(controller.next_transition("intro", &analysis, 100, 7).is_none());
        assert!(controller.next_transition("drop", &analysis, 100, 80).is_none());
    }

    #[test]
    fn first_matching_rule_wins() {
        let controller = TransitionController::new(
            scenes(),
            vec![
                TransitionRule::new("intro", "drop", Condition::Always)
                    .with_effect(json!({"type": "fade"})),
                TransitionRule::new("intro", "outro", Condition::Always),
            ],
        );

        let transition = controller
            .next_transition("intro", &AnalysisResult::default(), 0, 0)
            .unwrap();
        assert_eq!(transition.to, "drop");
        assert_eq!(transition.scene.name, "drop");
        assert_eq!(transition.effect, Some(json!({"type": "fade"})));
    }

    #[test]
    fn missing_target_is_suppressed() {
        let controller = TransitionController::new(
            scenes(),
            vec![TransitionRule::new("intro", "nowhere", Condition::Always)],
        );
        assert!(controller
            .next_transition("intro", &AnalysisResult::default(), 0, 0)
            .is_none());
    }

    #[test]
    fn failing_and_panicking_callbacks_do_not_fire() {
        let controller = TransitionController::new(
            scenes(),
            vec![
                TransitionRule::new(
                    "intro",
                    "drop",
                    Trigger::callback(|_| Err(TriggerError::Message("broken".into()))),
                ),
                TransitionRule::new("intro", "drop", Trigger::callback(|_| panic!("user code"))),
                TransitionRule::new(
                    "intro",
                    "outro",
                    Trigger::callback(|ctx| Ok(ctx.frame_count() >= 10)),
                ),
            ],
        );

        let analysis = AnalysisResult::default();
        assert!(controller.next_transition("intro", &analysis, 9, 0).is_none());
        let transition = controller.next_transition("intro", &analysis, 10, 0).unwrap();
        assert_eq!(transition.to, "outro");
    }

    #[test]
    fn update_swaps_the_catalog() {
        let mut controller = TransitionController::new(
            scenes(),
            vec![TransitionRule::new("intro", "drop", Condition::Always)],
        );
        controller.update(vec![Scene::new("intro", Vec::new())], Vec::new());
        assert!(controller.scene("drop").is_none());
        assert!(controller
            .next_transition("intro", &AnalysisResult::default(), 0, 0)
            .is_none());
    }

    #[test]
    fn rules_deserialize_from_json() {
        let rule: TransitionRule = serde_json::from_value(json!({
            "from": "intro",
            "to": "drop",
            "trigger": {"op": "compare", "left": "beat_count", "cmp": "ge", "right": 4},
            "effect": {"type": "crossfade", "duration": 2.0}
        }))
        .unwrap();
        let controller = TransitionController::new(scenes(), vec![rule]);

        let analysis = AnalysisResult::default();
        assert!(controller.next_transition("intro", &analysis, 0, 3).is_none());
        assert!(controller.next_transition("intro", &analysis, 0, 4).is_some());
    }
}
