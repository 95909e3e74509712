use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;

use super::{MidiEvent, MidiMapExecutor, RuntimeAction};
use crate::{server::FrameBroadcaster, Result, VizError};

/// Where [`RuntimeAction`]s end up.
pub type ActionSink = Arc<dyn Fn(RuntimeAction) + Send + Sync>;

struct Worker {
    handle: JoinHandle<()>,
    done: Receiver<()>,
}

/// Background thread turning MIDI events into broadcaster calls.
///
/// Events arrive on a channel. The loop wakes at least every
/// `poll_interval` to notice a stop request.
pub struct MidiRuntime {
    executor: Arc<Mutex<MidiMapExecutor>>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<Worker>>,
}

impl MidiRuntime {
    pub fn spawn(
        events: Receiver<MidiEvent>,
        executor: MidiMapExecutor,
        sink: ActionSink,
        poll_interval: Duration,
    ) -> Result<Self> {
        let executor = Arc::new(Mutex::new(executor));
        let running = Arc::new(AtomicBool::new(true));
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);

        let loop_executor = executor.clone();
        let loop_running = running.clone();
        let handle = thread::Builder::new()
            .name("vizcore-midi".into())
            .spawn(move || {
                let _done = done_tx;
                while loop_running.load(Ordering::SeqCst) {
                    match events.recv_timeout(poll_interval) {
                        Ok(event) => {
                            let actions = loop_executor.lock().handle_event(&event);
                            tracing::debug!(?event, actions = actions.len(), "midi event");
                            for action in actions {
                                sink(action);
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::debug!("midi loop exited");
            })
            .map_err(VizError::Io)?;

        Ok(Self {
            executor,
            running,
            worker: Mutex::new(Some(Worker {
                handle,
                done: done_rx,
            })),
        })
    }

    /// Applies scene switches with source `midi` and publishes globals.
    pub fn for_broadcaster(
        events: Receiver<MidiEvent>,
        executor: MidiMapExecutor,
        broadcaster: Arc<FrameBroadcaster>,
        poll_interval: Duration,
    ) -> Result<Self> {
        let sink: ActionSink = Arc::new(move |action: RuntimeAction| match action {
            RuntimeAction::SwitchScene { scene, effect } => {
                broadcaster.switch_scene(scene, effect, "midi")
            }
            RuntimeAction::SetGlobal { key, value } => broadcaster.set_global(key, value),
        });
        Self::spawn(events, executor, sink, poll_interval)
    }

    /// Shared with the reload path so new maps take effect immediately.
    pub fn executor(&self) -> Arc<Mutex<MidiMapExecutor>> {
        self.executor.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && self.worker.lock().is_some()
    }

    /// Returns `false` if the loop had not exited within `timeout`.
    pub fn stop(&self, timeout: Duration) -> bool {
        self.running.store(false, Ordering::SeqCst);
        let Some(worker) = self.worker.lock().take() else {
            return true;
        };
        match worker.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = worker.handle.join();
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(?timeout, "midi loop did not stop in time, detaching");
                false
            }
        }
    }
}

impl fmt::Debug for MidiRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MidiRuntime")
            .field("running", &self.running.load(Ordering::SeqCst))
            .finish()
    }
}

impl Drop for MidiRuntime {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;
    use crate::{
        midi::{MidiAction, MidiEventKind, MidiMap, MidiTrigger},
        scene::Scene,
    };

    #[test]
    fn events_flow_to_the_sink_until_stopped() {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let (actions_tx, actions_rx) = crossbeam_channel::unbounded();
        let executor = MidiMapExecutor::new(
            vec![MidiMap {
                trigger: MidiTrigger::Cc(7),
                actions: vec![MidiAction::SetGlobal {
                    key: "level".into(),
                    value: None,
                    scale: Some(2.0),
                }],
            }],
            vec![Scene::new("a", Vec::new())],
            BTreeMap::new(),
        );
        let runtime = MidiRuntime::spawn(
            events_rx,
            executor,
            Arc::new(move |action: RuntimeAction| {
                let _ = actions_tx.send(action);
            }),
            Duration::from_millis(10),
        )
        .unwrap();

        events_tx
            .send(MidiEvent::new(MidiEventKind::ControlChange, 0, 7, 64))
            .unwrap();
        let action = actions_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(
            action,
            RuntimeAction::SetGlobal {
                key: "level".into(),
                value: json!(128.0)
            }
        );
        assert_eq!(runtime.executor().lock().globals()["level"], json!(128.0));

        assert!(runtime.is_running());
        assert!(runtime.stop(Duration::from_secs(5)));
        assert!(!runtime.is_running());
    }

    #[test]
    fn a_closed_channel_ends_the_loop() {
        let (events_tx, events_rx) = crossbeam_channel::unbounded::<MidiEvent>();
        let runtime = MidiRuntime::spawn(
            events_rx,
            MidiMapExecutor::default(),
            Arc::new(|_: RuntimeAction| {}),
            Duration::from_secs(60),
        )
        .unwrap();
        drop(events_tx);
        assert!(runtime.stop(Duration::from_secs(5)));
    }
}
