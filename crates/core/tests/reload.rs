use std::{
    fs::{self, File},
    path::Path,
    sync::Arc,
    time::{Duration, SystemTime},
};

use vizcore_core::{
    audio::{InputManager, SilentInput},
    AnalysisConfig, AnalysisPipeline, BroadcastParts, DefinitionWatcher, FrameBroadcaster,
    MessageKind, ShowDefinition, SubscriberHub, TransitionController,
};

const FIRST: &str = r#"{"scenes": [{"name": "intro", "layers": [{"name": "bg"}]}]}"#;
const SECOND: &str = r#"{
    "scenes": [
        {"name": "verse", "layers": [{"name": "wave", "glsl": "wave.frag"}]},
        {"name": "chorus"}
    ],
    "transitions": [{"from": "verse", "to": "chorus", "trigger": {"op": "never"}}],
    "globals": {"palette": "sunset"}
}"#;

fn bump_mtime(path: &Path) {
    let file = File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(30)).unwrap();
}

#[test]
fn edited_definition_is_reloaded_into_the_broadcaster() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("show.json");
    fs::write(&path, FIRST).unwrap();
    fs::write(dir.path().join("wave.frag"), "void main() {}").unwrap();

    let show = ShowDefinition::load(&path).unwrap();
    let hub = Arc::new(SubscriberHub::new());
    let rx = hub.subscribe(256);
    let mut parts = BroadcastParts::new(
        InputManager::new(Box::new(SilentInput::new(44_100)), 1024, 4096).unwrap(),
        Box::new(AnalysisPipeline::new(&AnalysisConfig::default(), 44_100, Some(60.0)).unwrap()),
        show.initial_scene(&path),
        hub,
    );
    parts.controller = TransitionController::new(show.scenes.clone(), show.transitions.clone());
    let broadcaster = Arc::new(FrameBroadcaster::new(parts).unwrap());

    let target = broadcaster.clone();
    let watcher = DefinitionWatcher::new(
        &path,
        Duration::from_millis(10),
        // A half-written file fails to parse; the next mtime change retries.
        Arc::new(move |changed: &Path| {
            if let Ok(show) = ShowDefinition::load(changed) {
                let scene = show.initial_scene(changed);
                target.apply_reload(show.scenes, show.transitions, scene);
                target.publish_globals(show.globals);
            }
        }),
    )
    .polling_only();
    watcher.start().unwrap();

    fs::write(&path, SECOND).unwrap();
    bump_mtime(&path);

    let update = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(update.kind, MessageKind::ConfigUpdate);
    assert_eq!(update.payload["scene"]["name"], "verse");
    assert_eq!(update.payload["scene"]["layers"][0]["glsl_source"], "void main() {}");

    let globals = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(globals.payload["globals"]["palette"], "sunset");
    assert!(watcher.stop(Duration::from_secs(5)));

    assert_eq!(broadcaster.current_scene().name, "verse");
    assert!(broadcaster.switch_to("chorus", None, "manual").is_ok());
    assert!(broadcaster.switch_to("intro", None, "manual").is_err());
}
