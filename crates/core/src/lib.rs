//! Core library for the Vizcore frame broadcaster.
//!
//! Audio is captured into a ring buffer, analysed into loudness, bands,
//! beats and tempo, mapped onto the active scene's layers and emitted at a
//! fixed rate as JSON frames. Transitions between scenes are driven by the
//! same analysis, by MIDI maps, by manual control and by hot reload of the
//! show definition.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod definition;
pub mod error;
pub mod mapping;
pub mod midi;
pub mod render;
pub mod scene;
pub mod server;
pub mod timeline;
pub mod transition;

pub use analysis::{AnalysisPipeline, AnalysisResult, Analyzer};
pub use audio::{AudioInput, AudioSourceKind, InputManager, RingBuffer};
pub use config::{AnalysisConfig, AppConfig, AudioConfig, BroadcastConfig};
pub use definition::{DefinitionWatcher, ShowDefinition};
pub use error::{log_reporter, ErrorReporter, Result, VizError};
pub use mapping::{MappingResolver, ResolvedLayer};
pub use midi::{MidiEvent, MidiMap, MidiMapExecutor, MidiRuntime};
pub use render::Frame;
pub use scene::{Layer, Scene, Value};
pub use server::{
    BroadcastParts, ControlMessage, FrameBroadcaster, FrameSink, MessageKind, OutboundMessage,
    SubscriberHub,
};
pub use timeline::FrameScheduler;
pub use transition::{Condition, TransitionController, TransitionRule, Trigger};
