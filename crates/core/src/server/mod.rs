//! The broadcast loop: capture, analyse, resolve, emit, transition.

mod control;
mod sink;

use std::{
    collections::BTreeMap,
    ops::ControlFlow,
    sync::{Arc, Weak},
    time::Duration,
};

use parking_lot::{Mutex, RwLock};
use serde_json::json;

pub use control::ControlMessage;
pub use sink::{FrameSink, MessageKind, OutboundMessage, SubscriberHub};

use crate::{
    analysis::{AnalysisResult, Analyzer},
    audio::InputManager,
    config::BroadcastConfig,
    error::{log_reporter, ErrorReporter},
    mapping::MappingResolver,
    render::{Frame, TransitionDescriptor},
    scene::{Layer, Scene},
    timeline::FrameScheduler,
    transition::{TransitionController, TransitionRule},
    Result, VizError,
};

/// Runtime knobs for [`FrameBroadcaster`].
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastOptions {
    pub frame_rate: f64,
    pub stop_timeout: Duration,
    pub survive_tick_errors: bool,
    pub reset_smoothing_on_scene_change: bool,
    pub transport_rewind_seconds: f64,
}

impl Default for BroadcastOptions {
    fn default() -> Self {
        Self::from_config(&BroadcastConfig::default())
    }
}

impl BroadcastOptions {
    pub fn from_config(config: &BroadcastConfig) -> Self {
        Self {
            frame_rate: config.frame_rate,
            stop_timeout: config.stop_timeout(),
            survive_tick_errors: config.survive_tick_errors,
            reset_smoothing_on_scene_change: config.reset_smoothing_on_scene_change,
            transport_rewind_seconds: config.transport_rewind_seconds,
        }
    }
}

/// Everything a broadcaster is assembled from.
pub struct BroadcastParts {
    pub input: InputManager,
    pub analyzer: Box<dyn Analyzer>,
    pub controller: TransitionController,
    pub scene: Scene,
    pub globals: BTreeMap<String, serde_json::Value>,
    pub sink: Arc<dyn FrameSink>,
    pub reporter: ErrorReporter,
    pub options: BroadcastOptions,
}

impl BroadcastParts {
    /// Parts with no transitions, no globals and the logging reporter.
    pub fn new(
        input: InputManager,
        analyzer: Box<dyn Analyzer>,
        scene: Scene,
        sink: Arc<dyn FrameSink>,
    ) -> Self {
        Self {
            input,
            analyzer,
            controller: TransitionController::default(),
            scene,
            globals: BTreeMap::new(),
            sink,
            reporter: log_reporter(),
            options: BroadcastOptions::default(),
        }
    }
}

/// Scene-local counters as seen by transition triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SceneCounters {
    pub frame_count: u64,
    pub beat_count: u64,
}

/// Everything guarded by the scene mutex. Held only to copy in or out.
#[derive(Debug)]
struct SceneState {
    name: String,
    layers: Arc<Vec<Layer>>,
    /// Bumped on every scene replacement or counter rebase.
    generation: u64,
    frame_count: u64,
    /// Total beat count at which the current scene's count starts.
    beat_base: u64,
    last_beat_count: u64,
    paused: bool,
    pending_transition: Option<TransitionDescriptor>,
}

impl SceneState {
    fn counters(&self) -> SceneCounters {
        SceneCounters {
            frame_count: self.frame_count,
            beat_count: self.last_beat_count.saturating_sub(self.beat_base),
        }
    }

    fn replace(&mut self, scene: Scene) {
        self.name = scene.name;
        self.layers = Arc::new(scene.layers);
        self.rebase();
        self.pending_transition = None;
    }

    /// Restarts the scene-local counters, crediting every beat seen so far
    /// to what came before.
    fn rebase(&mut self) {
        self.generation += 1;
        self.frame_count = 0;
        self.beat_base = self.last_beat_count;
    }
}

struct Shared {
    input: InputManager,
    analyzer: Mutex<Box<dyn Analyzer>>,
    controller: RwLock<TransitionController>,
    resolver: MappingResolver,
    state: Mutex<SceneState>,
    globals: Mutex<BTreeMap<String, serde_json::Value>>,
    sink: Arc<dyn FrameSink>,
    reporter: ErrorReporter,
    options: BroadcastOptions,
    capture_size: usize,
}

/// Top-level orchestrator.
///
/// One tick captures samples, runs the analyzer, resolves the current
/// scene's layers, emits an `audio_frame` and then evaluates transitions.
/// Scene state is read and replaced under one mutex that is never held
/// during capture, analysis or emission, so hot reload, MIDI and transport
/// control can all call in from their own threads.
pub struct FrameBroadcaster {
    shared: Arc<Shared>,
    scheduler: FrameScheduler,
}

impl FrameBroadcaster {
    pub fn new(parts: BroadcastParts) -> Result<Self> {
        let BroadcastParts {
            input,
            analyzer,
            controller,
            scene,
            globals,
            sink,
            reporter,
            options,
        } = parts;

        let survive = options.survive_tick_errors;
        let hook_reporter = reporter.clone();
        let scheduler = FrameScheduler::new(options.frame_rate)?.with_error_handler(Arc::new(
            move |err: &VizError| {
                hook_reporter(err);
                if survive {
                    ControlFlow::Continue(())
                } else {
                    tracing::error!(error = %err, "tick failed, stopping broadcast");
                    ControlFlow::Break(())
                }
            },
        ));

        let capture_size = input.realtime_capture_size(options.frame_rate);
        tracing::debug!(
            scene = %scene.name,
            frame_rate = options.frame_rate,
            capture_size,
            "broadcaster created"
        );

        let shared = Shared {
            input,
            analyzer: Mutex::new(analyzer),
            controller: RwLock::new(controller),
            resolver: MappingResolver::new(),
            state: Mutex::new(SceneState {
                name: scene.name,
                layers: Arc::new(scene.layers),
                generation: 0,
                frame_count: 0,
                beat_base: 0,
                last_beat_count: 0,
                paused: false,
                pending_transition: None,
            }),
            globals: Mutex::new(globals),
            sink,
            reporter,
            options,
            capture_size,
        };

        Ok(Self {
            shared: Arc::new(shared),
            scheduler,
        })
    }

    /// Starts the input, then the tick loop.
    pub fn start(&self) -> Result<()> {
        if self.scheduler.is_running() {
            return Ok(());
        }
        self.shared.input.start()?;

        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        let handle = self.scheduler.handle();
        self.scheduler.start(move |elapsed| {
            let Some(shared) = shared.upgrade() else {
                handle.stop();
                return Ok(());
            };
            shared.tick(elapsed).map(|_| ())
        })?;

        tracing::info!(frame_rate = self.shared.options.frame_rate, "broadcast started");
        Ok(())
    }

    /// Stops the tick loop first so no tick reads from a closing input.
    pub fn stop(&self) {
        if !self.scheduler.stop(self.shared.options.stop_timeout) {
            tracing::warn!("broadcast loop still busy after stop timeout");
        }
        self.shared.input.stop();
        tracing::info!("broadcast stopped");
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Runs one tick on the calling thread and returns the emitted frame.
    pub fn tick(&self, elapsed: Duration) -> Result<Frame> {
        self.shared.tick(elapsed)
    }

    pub fn current_scene(&self) -> Scene {
        let state = self.shared.state.lock();
        Scene::new(state.name.clone(), state.layers.as_ref().clone())
    }

    pub fn scene_counters(&self) -> SceneCounters {
        self.shared.state.lock().counters()
    }

    /// Replaces the active scene and restarts its counters.
    pub fn update_scene(&self, scene: Scene) {
        self.shared.update_scene(scene);
    }

    /// [`Self::update_scene`] plus a `scene_change` announcement.
    pub fn switch_scene(&self, scene: Scene, effect: Option<serde_json::Value>, source: &str) {
        let to = scene.name.clone();
        let from = self.shared.update_scene(scene);
        tracing::info!(%from, %to, source, "scene switched");
        self.shared.emit(
            MessageKind::SceneChange,
            json!({"from": from, "to": to, "effect": effect, "source": source}),
        );
    }

    /// Looks the scene up in the transition catalog.
    pub fn switch_to(
        &self,
        name: &str,
        effect: Option<serde_json::Value>,
        source: &str,
    ) -> Result<()> {
        let scene = self
            .shared
            .controller
            .read()
            .scene(name)
            .cloned()
            .ok_or_else(|| VizError::msg(format!("unknown scene `{name}`")))?;
        self.switch_scene(scene, effect, source);
        Ok(())
    }

    pub fn update_transitions(&self, scenes: Vec<Scene>, rules: Vec<TransitionRule>) {
        self.shared.controller.write().update(scenes, rules);
    }

    /// Swaps in a reloaded catalog and scene, then announces the new scene.
    pub fn apply_reload(&self, scenes: Vec<Scene>, rules: Vec<TransitionRule>, scene: Scene) {
        self.update_transitions(scenes, rules);
        let payload = json!({"scene": {"name": scene.name, "layers": scene.layers}});
        let name = scene.name.clone();
        self.update_scene(scene);
        tracing::info!(scene = %name, "definition reloaded");
        self.shared.emit(MessageKind::ConfigUpdate, payload);
    }

    /// Follows an external player. For file-backed inputs a pause freezes
    /// transitions and a seek near zero restarts the scene counters.
    pub fn sync_transport(&self, playing: bool, position_seconds: f64) {
        self.shared.input.sync_transport(playing, position_seconds);
        if !self.shared.input.is_file_backed() {
            return;
        }

        let mut state = self.shared.state.lock();
        state.paused = !playing;
        if position_seconds <= self.shared.options.transport_rewind_seconds {
            state.rebase();
        }
        tracing::debug!(playing, position_seconds, "transport synced");
    }

    pub fn globals(&self) -> BTreeMap<String, serde_json::Value> {
        self.shared.globals.lock().clone()
    }

    pub fn set_global(&self, key: impl Into<String>, value: serde_json::Value) {
        let globals = {
            let mut globals = self.shared.globals.lock();
            globals.insert(key.into(), value);
            globals.clone()
        };
        self.shared.emit(MessageKind::ConfigUpdate, json!({ "globals": globals }));
    }

    /// Replaces every global and publishes the result.
    pub fn publish_globals(&self, globals: BTreeMap<String, serde_json::Value>) {
        *self.shared.globals.lock() = globals.clone();
        self.shared.emit(MessageKind::ConfigUpdate, json!({ "globals": globals }));
    }

    pub fn handle_control(&self, message: ControlMessage) -> Result<()> {
        match message {
            ControlMessage::TransportSync {
                playing,
                position_seconds,
            } => self.sync_transport(playing, position_seconds),
            ControlMessage::SwitchScene { scene, effect } => {
                self.switch_to(&scene, effect, "manual")?
            }
            ControlMessage::SetGlobal { key, value } => self.set_global(key, value),
        }
        Ok(())
    }
}

impl Shared {
    fn tick(&self, elapsed: Duration) -> Result<Frame> {
        // The descriptor stays pending until a frame carrying it is emitted.
        let (name, layers, generation, transition) = {
            let state = self.state.lock();
            (
                state.name.clone(),
                state.layers.clone(),
                state.generation,
                state.pending_transition.clone(),
            )
        };

        let capture = self.input.capture_frame(self.capture_size);
        if let Some(error) = capture.error {
            (self.reporter)(&VizError::audio_source(error));
        }
        let samples = self.input.latest_samples(self.input.frame_size());

        let analysis = self
            .analyzer
            .lock()
            .analyze(&samples)
            .map_err(|err| VizError::frame_build("analyze", err))?;
        let resolved = self.resolver.resolve(&layers, &analysis);
        let frame = Frame::build(&analysis, &name, resolved, transition);
        let payload = frame
            .to_json()
            .map_err(|err| VizError::frame_build("serialize", err))?;
        tracing::trace!(?elapsed, scene = %name, beat = analysis.beat, "frame built");
        self.emit(MessageKind::AudioFrame, payload);

        self.advance(&name, generation, &analysis);
        Ok(frame)
    }

    /// Moves the scene counters forward and applies a fired transition.
    /// While the transport is paused only the beat total is recorded.
    fn advance(&self, name: &str, generation: u64, analysis: &AnalysisResult) {
        let counters = {
            let mut state = self.state.lock();
            if state.generation != generation {
                // The scene was replaced mid-tick. Every beat this tick saw
                // belongs to the scene it started on.
                state.last_beat_count = state.last_beat_count.max(analysis.beat_count);
                state.beat_base = state.beat_base.max(analysis.beat_count);
                return;
            }
            state.pending_transition = None;
            state.last_beat_count = analysis.beat_count;
            if state.paused {
                return;
            }
            state.frame_count += 1;
            state.counters()
        };

        let Some(transition) = self.controller.read().next_transition(
            name,
            analysis,
            counters.frame_count,
            counters.beat_count,
        ) else {
            return;
        };

        {
            let mut state = self.state.lock();
            if state.generation != generation {
                return;
            }
            state.replace(transition.scene);
            // The beat on the switching tick belongs to the new scene.
            state.beat_base = analysis.beat_count.saturating_sub(u64::from(analysis.beat));
            state.pending_transition = Some(TransitionDescriptor {
                from: transition.from.clone(),
                to: transition.to.clone(),
                effect: transition.effect.clone(),
            });
        }

        tracing::info!(from = %transition.from, to = %transition.to, "scene transition");
        self.emit(
            MessageKind::SceneChange,
            json!({
                "from": transition.from,
                "to": transition.to,
                "effect": transition.effect,
                "source": "transition",
            }),
        );
        self.reset_smoothing_if_configured();
    }

    /// Returns the name of the scene that was replaced.
    fn update_scene(&self, scene: Scene) -> String {
        let previous = {
            let mut state = self.state.lock();
            let previous = state.name.clone();
            state.replace(scene);
            previous
        };
        self.reset_smoothing_if_configured();
        previous
    }

    fn reset_smoothing_if_configured(&self) {
        if self.options.reset_smoothing_on_scene_change {
            self.analyzer.lock().reset_smoothing();
        }
    }

    fn emit(&self, kind: MessageKind, payload: serde_json::Value) {
        self.sink.emit(&OutboundMessage::new(kind, payload));
    }
}
