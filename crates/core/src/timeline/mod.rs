//! Fixed-rate loop driving the broadcast tick.

use std::{
    fmt,
    ops::ControlFlow,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle, ThreadId},
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;

use crate::{Result, VizError};

/// Monotonic time since an arbitrary origin.
pub type Clock = Arc<dyn Fn() -> Duration + Send + Sync>;
pub type Sleeper = Arc<dyn Fn(Duration) + Send + Sync>;
/// Decides whether the loop survives a failed tick.
pub type ErrorHandler = Arc<dyn Fn(&VizError) -> ControlFlow<()> + Send + Sync>;

/// Stops the loop from anywhere, including from inside a tick.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    running: Arc<AtomicBool>,
}

impl SchedulerHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

struct Worker {
    handle: JoinHandle<()>,
    thread: ThreadId,
    done: Receiver<()>,
}

/// Calls a tick closure every `1 / frame_rate` seconds on a dedicated thread.
///
/// Each iteration sleeps `max(0, interval - elapsed)`. An overrunning tick
/// delays the next one; nothing is skipped.
pub struct FrameScheduler {
    interval: Duration,
    running: Arc<AtomicBool>,
    clock: Clock,
    sleeper: Sleeper,
    on_error: ErrorHandler,
    worker: Mutex<Option<Worker>>,
}

impl FrameScheduler {
    pub fn new(frame_rate: f64) -> Result<Self> {
        if !(frame_rate.is_finite() && frame_rate > 0.0) {
            return Err(VizError::config(format!(
                "frame rate must be positive, got {frame_rate}"
            )));
        }

        let origin = Instant::now();
        Ok(Self {
            interval: Duration::from_secs_f64(1.0 / frame_rate),
            running: Arc::new(AtomicBool::new(false)),
            clock: Arc::new(move || origin.elapsed()),
            sleeper: Arc::new(thread::sleep),
            on_error: Arc::new(|err: &VizError| {
                tracing::error!(error = %err, "tick failed, stopping scheduler");
                ControlFlow::Break(())
            }),
            worker: Mutex::new(None),
        })
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Sleeper) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Replaces the default policy, which logs the error and stops the loop.
    pub fn with_error_handler(mut self, handler: ErrorHandler) -> Self {
        self.on_error = handler;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            running: self.running.clone(),
        }
    }

    /// Starts the loop. `tick` receives the time since the loop started.
    pub fn start<F>(&self, mut tick: F) -> Result<()>
    where
        F: FnMut(Duration) -> Result<()> + Send + 'static,
    {
        let mut worker = self.worker.lock();
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(VizError::msg("scheduler is already running"));
        }
        // Reap a loop that stopped by itself.
        if let Some(previous) = worker.take() {
            let _ = previous.handle.join();
        }

        let running = self.running.clone();
        let clock = self.clock.clone();
        let sleeper = self.sleeper.clone();
        let on_error = self.on_error.clone();
        let interval = self.interval;
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);

        let handle = thread::Builder::new()
            .name("vizcore-scheduler".into())
            .spawn(move || {
                let _done = done_tx;
                let origin = clock();
                tracing::debug!(?interval, "scheduler loop started");

                while running.load(Ordering::SeqCst) {
                    let started = clock();
                    let outcome =
                        catch_unwind(AssertUnwindSafe(|| tick(started.saturating_sub(origin))))
                            .unwrap_or_else(|_| Err(VizError::msg("tick panicked")));

                    if let Err(err) = outcome {
                        if on_error(&err).is_break() {
                            running.store(false, Ordering::SeqCst);
                            break;
                        }
                    }
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }

                    let elapsed = clock().saturating_sub(started);
                    if let Some(rest) =
                        interval.checked_sub(elapsed).filter(|rest| !rest.is_zero())
                    {
                        sleeper(rest);
                    }
                }
                tracing::debug!("scheduler loop exited");
            })
            .map_err(|err| {
                self.running.store(false, Ordering::SeqCst);
                VizError::Io(err)
            })?;

        *worker = Some(Worker {
            thread: handle.thread().id(),
            handle,
            done: done_rx,
        });
        Ok(())
    }

    /// Asks the loop to stop and waits up to `timeout` for it to exit.
    ///
    /// Returns `false` if the loop was still busy when the timeout expired.
    /// Called from inside a tick it only raises the flag, since the loop
    /// cannot join itself.
    pub fn stop(&self, timeout: Duration) -> bool {
        self.running.store(false, Ordering::SeqCst);
        let Some(worker) = self.worker.lock().take() else {
            return true;
        };

        if worker.thread == thread::current().id() {
            return true;
        }

        match worker.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = worker.handle.join();
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(?timeout, "scheduler did not stop in time, detaching");
                false
            }
        }
    }
}

impl fmt::Debug for FrameScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameScheduler")
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish()
    }
}

impl Drop for FrameScheduler {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
