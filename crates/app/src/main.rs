use std::{
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
    sync::Arc,
    thread,
};

use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;
use vizcore_core::{
    analysis::FftBackendKind,
    audio::decode_wav,
    log_reporter,
    midi::{MidiEvent, MidiMapExecutor, MidiRuntime},
    server::BroadcastOptions,
    AnalysisPipeline, AppConfig, AudioSourceKind, BroadcastParts, ControlMessage, DefinitionWatcher,
    FrameBroadcaster, InputManager, ShowDefinition, SubscriberHub, TransitionController, VizError,
};

fn main() -> vizcore_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run(args),
        Commands::Check { definition } => check(&definition),
        Commands::Analyze { input, config } => analyze(&input, config.as_deref()),
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .try_init();
}

fn load_config(path: Option<&Path>) -> vizcore_core::Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load(path),
        None => Ok(AppConfig::default()),
    }
}

fn run(args: RunArgs) -> vizcore_core::Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(source) = &args.audio_source {
        config.audio.source = source.parse::<AudioSourceKind>()?;
    }
    if let Some(file) = args.audio_file {
        config.audio.file = Some(file);
    }
    if let Some(frame_rate) = args.frame_rate {
        config.broadcast.frame_rate = frame_rate;
    }
    if let Some(backend) = &args.fft_backend {
        config.analysis.backend = backend.parse::<FftBackendKind>()?;
    }
    if args.no_watch {
        config.watch.enabled = false;
    }
    config.validate()?;

    let show = ShowDefinition::load(&args.definition)?;
    let input = InputManager::from_config(&config.audio)?;
    let analyzer = AnalysisPipeline::new(
        &config.analysis,
        input.sample_rate(),
        Some(config.broadcast.frame_rate as f32),
    )?;

    let hub = Arc::new(SubscriberHub::new());
    let printer = if args.quiet {
        None
    } else {
        let frames = hub.subscribe(256);
        Some(thread::spawn(move || {
            let stdout = io::stdout();
            for message in frames.iter() {
                let Ok(line) = serde_json::to_string(&message) else { continue };
                let mut out = stdout.lock();
                if writeln!(out, "{line}").and_then(|_| out.flush()).is_err() {
                    break;
                }
            }
        }))
    };

    let mut parts = BroadcastParts::new(
        input,
        Box::new(analyzer),
        show.initial_scene(&args.definition),
        hub,
    );
    parts.controller = TransitionController::new(show.scenes.clone(), show.transitions.clone());
    parts.globals = show.globals.clone();
    parts.reporter = log_reporter();
    parts.options = BroadcastOptions::from_config(&config.broadcast);
    let broadcaster = Arc::new(FrameBroadcaster::new(parts)?);

    let (midi_tx, midi_rx) = crossbeam_channel::unbounded();
    let midi = MidiRuntime::for_broadcaster(
        midi_rx,
        MidiMapExecutor::new(show.midi_maps.clone(), show.scenes.clone(), show.globals.clone()),
        broadcaster.clone(),
        config.midi.poll_interval(),
    )?;

    let watcher = if config.watch.enabled {
        let target = broadcaster.clone();
        let executor = midi.executor();
        let watcher = DefinitionWatcher::new(
            &args.definition,
            config.watch.poll_interval(),
            Arc::new(move |path: &Path| match ShowDefinition::load(path) {
                Ok(show) => {
                    let scene = show.initial_scene(path);
                    executor
                        .lock()
                        .update(show.midi_maps, show.scenes.clone(), Some(show.globals.clone()));
                    target.apply_reload(show.scenes, show.transitions, scene);
                    target.publish_globals(show.globals);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "definition reload failed, keeping current show")
                }
            }),
        );
        watcher.start()?;
        Some(watcher)
    } else {
        None
    };

    broadcaster.start()?;
    tracing::info!(
        definition = %args.definition.display(),
        "vizcore running, reading control messages from stdin"
    );

    for line in io::stdin().lock().lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match Inbound::parse(line) {
            Ok(Inbound::Shutdown) => break,
            Ok(Inbound::Midi(event)) => {
                forward_midi(&midi_tx, event);
            }
            Ok(Inbound::Control(message)) => {
                if let Err(err) = broadcaster.handle_control(message) {
                    tracing::warn!(error = %err, "control message rejected");
                }
            }
            Err(err) => tracing::warn!(error = %err, line, "unreadable control message"),
        }
    }

    broadcaster.stop();
    let timeout = config.broadcast.stop_timeout();
    let mut clean = true;
    if let Some(watcher) = &watcher {
        clean &= watcher.stop(timeout);
    }
    clean &= midi.stop(timeout);
    drop(midi_tx);
    drop(watcher);
    drop(midi);
    drop(broadcaster);

    // The printer ends once the hub, and every handle to it, is gone.
    if let Some(printer) = printer {
        if clean {
            let _ = printer.join();
        }
    }
    tracing::info!("vizcore stopped");
    Ok(())
}

/// Hands an event to the MIDI runtime. Returns false, after logging, when
/// the runtime has already gone away.
fn forward_midi(tx: &crossbeam_channel::Sender<MidiEvent>, event: MidiEvent) -> bool {
    match tx.send(event) {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(error = %err, "midi runtime gone, event dropped");
            false
        }
    }
}

fn check(definition: &Path) -> vizcore_core::Result<()> {
    let show = ShowDefinition::load(definition)?;
    let mut out = io::stdout().lock();

    writeln!(out, "{}", definition.display())?;
    writeln!(out, "scenes: {}", show.scenes.len())?;
    for scene in &show.scenes {
        writeln!(out, "  {} ({} layers)", scene.name, scene.layers.len())?;
    }
    writeln!(out, "transitions: {}", show.transitions.len())?;
    for rule in &show.transitions {
        let known = show.scenes.iter().any(|scene| scene.name == rule.to);
        let note = if known { "" } else { " [unknown target, suppressed]" };
        writeln!(out, "  {} -> {}{note}", rule.from, rule.to)?;
    }
    writeln!(out, "midi maps: {}", show.midi_maps.len())?;
    if !show.globals.is_empty() {
        let keys: Vec<&str> = show.globals.keys().map(String::as_str).collect();
        writeln!(out, "globals: {}", keys.join(", "))?;
    }
    Ok(())
}

fn analyze(input: &Path, config: Option<&Path>) -> vizcore_core::Result<()> {
    let config = load_config(config)?;
    config.analysis.validate()?;

    let (samples, sample_rate) = decode_wav(input)?;
    let frame_size = config.audio.frame_size.max(1);
    let frame_rate = sample_rate as f32 / frame_size as f32;
    let mut pipeline = AnalysisPipeline::new(&config.analysis, sample_rate, Some(frame_rate))?;
    tracing::info!(
        input = %input.display(),
        sample_rate,
        frames = samples.len() / frame_size,
        "analysing"
    );

    let mut out = io::stdout().lock();
    for (index, chunk) in samples.chunks(frame_size).enumerate() {
        let result = pipeline.process(chunk)?;
        let mut line = serde_json::to_value(result)?;
        line["time"] = serde_json::json!((index * frame_size) as f64 / sample_rate as f64);
        writeln!(out, "{line}")?;
    }
    Ok(())
}

/// One stdin line: a control message, a MIDI event or a shutdown request.
enum Inbound {
    Control(ControlMessage),
    Midi(MidiEvent),
    Shutdown,
}

/// `{"type": "midi", "bytes": [144, 36, 100]}` or `{"type": "midi", "event": {...}}`.
#[derive(Deserialize)]
struct MidiEnvelope {
    #[serde(default)]
    bytes: Option<Vec<u8>>,
    #[serde(default)]
    event: Option<MidiEvent>,
}

impl Inbound {
    fn parse(line: &str) -> vizcore_core::Result<Self> {
        let value: serde_json::Value = serde_json::from_str(line)?;
        match value.get("type").and_then(|kind| kind.as_str()) {
            Some("shutdown") => Ok(Self::Shutdown),
            Some("midi") => {
                let envelope: MidiEnvelope = serde_json::from_value(value)?;
                envelope
                    .event
                    .or_else(|| envelope.bytes.as_deref().and_then(MidiEvent::from_bytes))
                    .map(Self::Midi)
                    .ok_or_else(|| VizError::msg("midi message carries no usable event"))
            }
            _ => Ok(Self::Control(serde_json::from_value(value)?)),
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Audio-reactive scene broadcaster", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Broadcast frames for a show definition on stdout.
    Run(RunArgs),
    /// Load a show definition and print what it contains.
    Check {
        /// Path to the JSON show definition.
        definition: PathBuf,
    },
    /// Analyse a WAV file offline, one JSON result per frame.
    Analyze {
        /// Path to the WAV file that should be analysed.
        input: PathBuf,
        /// Optional TOML configuration for the analysis settings.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Path to the JSON show definition.
    definition: PathBuf,
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Audio source: dummy, file or silence.
    #[arg(long)]
    audio_source: Option<String>,
    /// WAV file used with `--audio-source file`.
    #[arg(long)]
    audio_file: Option<PathBuf>,
    /// Frames per second.
    #[arg(long)]
    frame_rate: Option<f64>,
    /// FFT backend: reference, accelerated or auto.
    #[arg(long)]
    fft_backend: Option<String>,
    /// Do not reload the definition when it changes.
    #[arg(long)]
    no_watch: bool,
    /// Do not print frames.
    #[arg(short, long)]
    quiet: bool,
}
