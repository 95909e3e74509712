use std::{
    fmt, fs,
    panic::{catch_unwind, AssertUnwindSafe},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle, ThreadId},
    time::{Duration, SystemTime},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;

use crate::{Result, VizError};

/// Invoked on the watcher's worker thread with the watched path.
pub type ReloadCallback = Arc<dyn Fn(&Path) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchMode {
    /// Filesystem notifications on the parent directory.
    Native,
    /// Modification-time checks every poll interval.
    Polling,
}

struct Active {
    mode: WatchMode,
    /// Dropping it closes the event channel.
    _native: Option<RecommendedWatcher>,
    handle: JoinHandle<()>,
    thread: ThreadId,
    done: Receiver<()>,
}

/// Calls back whenever the show definition file is modified or recreated.
pub struct DefinitionWatcher {
    path: PathBuf,
    poll_interval: Duration,
    force_polling: bool,
    callback: ReloadCallback,
    running: Arc<AtomicBool>,
    active: Mutex<Option<Active>>,
}

impl DefinitionWatcher {
    pub fn new(
        path: impl Into<PathBuf>,
        poll_interval: Duration,
        callback: ReloadCallback,
    ) -> Self {
        let path = path.into();
        let path = fs::canonicalize(&path).unwrap_or(path);
        Self {
            path,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            force_polling: false,
            callback,
            running: Arc::new(AtomicBool::new(false)),
            active: Mutex::new(None),
        }
    }

    /// Skips the native watcher and always polls.
    pub fn polling_only(mut self) -> Self {
        self.force_polling = true;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn mode(&self) -> Option<WatchMode> {
        self.active.lock().as_ref().map(|active| active.mode)
    }

    pub fn start(&self) -> Result<()> {
        let mut active = self.active.lock();
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let native = if self.force_polling {
            None
        } else {
            match self.native_watcher() {
                Ok(pair) => Some(pair),
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        path = %self.path.display(),
                        "native file watcher unavailable, polling instead"
                    );
                    None
                }
            }
        };

        let running = self.running.clone();
        let callback = self.callback.clone();
        let path = self.path.clone();
        let poll_interval = self.poll_interval;
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);

        let (mode, watcher, spawned) = match native {
            Some((watcher, events)) => {
                let spawned = thread::Builder::new()
                    .name("vizcore-watch".into())
                    .spawn(move || {
                        let _done = done_tx;
                        event_loop(&path, &events, poll_interval, &running, &callback);
                    });
                (WatchMode::Native, Some(watcher), spawned)
            }
            None => {
                let spawned = thread::Builder::new()
                    .name("vizcore-watch".into())
                    .spawn(move || {
                        let _done = done_tx;
                        poll_loop(&path, poll_interval, &running, &callback);
                    });
                (WatchMode::Polling, None, spawned)
            }
        };

        let handle = spawned.map_err(|err| {
            self.running.store(false, Ordering::SeqCst);
            VizError::Io(err)
        })?;

        tracing::info!(path = %self.path.display(), ?mode, "watching definition");
        *active = Some(Active {
            mode,
            _native: watcher,
            thread: handle.thread().id(),
            handle,
            done: done_rx,
        });
        Ok(())
    }

    /// Returns `false` if the worker was still busy after `timeout`. From
    /// inside the callback it only raises the stop flag.
    pub fn stop(&self, timeout: Duration) -> bool {
        self.running.store(false, Ordering::SeqCst);
        let Some(active) = self.active.lock().take() else {
            return true;
        };
        let Active {
            _native,
            handle,
            thread: worker_thread,
            done,
            ..
        } = active;
        drop(_native);

        if worker_thread == thread::current().id() {
            return true;
        }
        match done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = handle.join();
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(?timeout, "definition watcher did not stop in time, detaching");
                false
            }
        }
    }

    fn native_watcher(&self) -> notify::Result<(RecommendedWatcher, Receiver<()>)> {
        let directory = self
            .path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        let file_name = self.path.file_name().map(|name| name.to_os_string());
        let (tx, rx): (Sender<()>, Receiver<()>) = crossbeam_channel::unbounded();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let Ok(event) = res else { return };
            if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                return;
            }
            let relevant = event
                .paths
                .iter()
                .any(|changed| changed.file_name().map(|name| name.to_os_string()) == file_name);
            if relevant {
                let _ = tx.send(());
            }
        })?;
        watcher.watch(&directory, RecursiveMode::NonRecursive)?;
        Ok((watcher, rx))
    }
}

/// Coalesces bursts of notifications into one callback.
fn event_loop(
    path: &Path,
    events: &Receiver<()>,
    poll_interval: Duration,
    running: &AtomicBool,
    callback: &ReloadCallback,
) {
    while running.load(Ordering::SeqCst) {
        match events.recv_timeout(poll_interval) {
            Ok(()) => {
                while events.try_recv().is_ok() {}
                if running.load(Ordering::SeqCst) {
                    notify_change(path, callback);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn poll_loop(
    path: &Path,
    poll_interval: Duration,
    running: &AtomicBool,
    callback: &ReloadCallback,
) {
    let mut last = modified(path);
    while running.load(Ordering::SeqCst) {
        thread::sleep(poll_interval);
        let current = modified(path);
        let changed = match (current, last) {
            (Some(current), Some(last)) => current > last,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if changed && running.load(Ordering::SeqCst) {
            notify_change(path, callback);
            last = current;
        }
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path)
        .ok()
        .filter(|meta| meta.is_file())
        .and_then(|meta| meta.modified().ok())
}

fn notify_change(path: &Path, callback: &ReloadCallback) {
    tracing::debug!(path = %path.display(), "definition changed");
    if catch_unwind(AssertUnwindSafe(|| callback(path))).is_err() {
        tracing::error!(path = %path.display(), "reload callback panicked");
    }
}

impl fmt::Debug for DefinitionWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefinitionWatcher")
            .field("path", &self.path)
            .field("poll_interval", &self.poll_interval)
            .field("running", &self.is_running())
            .finish()
    }
}

impl Drop for DefinitionWatcher {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
