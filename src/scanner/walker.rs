//! Background directory walker: breadth-first traversal of a source that
//! emits one authoritative directory hint per listed directory.
//!
//! Failure handling is per directory. A listing failure skips that directory
//! and emits nothing for it (an empty listing would prune its subtree). A sink
//! failure, error or panic, is logged and the walk goes on.

#![allow(missing_docs)]

use std::collections::{HashSet, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{self as channel, RecvTimeoutError};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;

use crate::core::config::WalkerSettings;
use crate::core::errors::{Result, TrackerError};
use crate::core::paths;
use crate::scanner::source::DirectorySource;
use crate::tracker::hint::Hint;

/// Receives hints produced by the walker, normally by queueing them.
pub type HintSink = Arc<dyn Fn(Hint) -> Result<()> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkerConfig {
    /// Index path the traversal starts from.
    pub root: String,
    /// Walk again this long after the previous walk ended.
    pub rescan_interval: Option<Duration>,
    /// Start a walk as soon as the thread is up.
    pub walk_on_start: bool,
}

impl WalkerConfig {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            rescan_interval: None,
            walk_on_start: true,
        }
    }

    pub fn from_settings(root: impl Into<String>, settings: &WalkerSettings) -> Self {
        Self {
            rescan_interval: settings.rescan_interval(),
            ..Self::new(root)
        }
    }
}

/// Counters for one walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WalkStats {
    pub directories_listed: u64,
    pub hints_emitted: u64,
    pub listing_failures: u64,
    pub sink_failures: u64,
    pub duration_ms: u64,
    /// Directories already listed earlier in the same walk under another path.
    pub cycles_skipped: u64,
    /// The walk was cut short by `stop`.
    pub stopped: bool,
}

pub struct DirectoryWalker {
    source: Arc<dyn DirectorySource>,
    config: WalkerConfig,
    sink: HintSink,
}

impl DirectoryWalker {
    pub fn new(source: Arc<dyn DirectorySource>, config: WalkerConfig, sink: HintSink) -> Self {
        Self {
            source,
            config,
            sink,
        }
    }

    /// One full traversal on the calling thread.
    pub fn walk_once(&self) -> Result<WalkStats> {
        paths::validate_path(&self.config.root)?;
        Ok(self.walk_until(&AtomicBool::new(false)))
    }

    fn walk_until(&self, stop: &AtomicBool) -> WalkStats {
        let started = Instant::now();
        let mut stats = WalkStats::default();
        let mut frontier: VecDeque<String> = VecDeque::from([self.config.root.clone()]);
        let mut visited: HashSet<(u64, u64)> = HashSet::new();

        while let Some(dir) = frontier.pop_front() {
            if stop.load(Ordering::Acquire) {
                stats.stopped = true;
                break;
            }

            if let Some(key) = self.source.directory_key(&dir)
                && !visited.insert(key)
            {
                stats.cycles_skipped += 1;
                tracing::debug!(dir = %dir, "directory already listed in this walk; skipped");
                continue;
            }

            let children = match self.source.list(&dir) {
                Ok(children) => children,
                Err(e) => {
                    stats.listing_failures += 1;
                    tracing::warn!(
                        dir = %dir,
                        code = e.code(),
                        error = %e,
                        "listing failed; directory skipped"
                    );
                    continue;
                }
            };
            stats.directories_listed += 1;

            let subdirs: Vec<String> = children
                .iter()
                .filter(|child| child.identity.is_directory)
                .map(|child| paths::join(&dir, &child.name))
                .collect();

            let hint = Hint::directory(dir.clone(), children);
            match catch_unwind(AssertUnwindSafe(|| (self.sink)(hint))) {
                Ok(Ok(())) => stats.hints_emitted += 1,
                Ok(Err(e)) => {
                    stats.sink_failures += 1;
                    tracing::warn!(
                        dir = %dir,
                        code = e.code(),
                        error = %e,
                        "hint sink failed; continuing walk"
                    );
                }
                Err(_) => {
                    stats.sink_failures += 1;
                    tracing::error!(dir = %dir, "hint sink panicked; continuing walk");
                }
            }

            frontier.extend(subdirs);
        }

        stats.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        stats
    }

    /// Run on a background thread, walking on start, on request, and periodically.
    pub fn spawn(self) -> Result<WalkerHandle> {
        paths::validate_path(&self.config.root)?;
        let control = Arc::new(Control::default());
        let (request_tx, request_rx) = channel::bounded::<()>(1);

        let thread_control = Arc::clone(&control);
        let join = thread::Builder::new()
            .name("htrk-walker".to_string())
            .spawn(move || walker_thread_main(&self, &request_rx, &thread_control))
            .map_err(|e| TrackerError::Runtime {
                details: format!("failed to spawn walker thread: {e}"),
            })?;

        Ok(WalkerHandle {
            control,
            request_tx: Some(request_tx),
            join: Some(join),
        })
    }
}

// ──────────────────── background thread ────────────────────

#[derive(Default)]
struct WalkState {
    completed: u64,
    running: bool,
    exited: bool,
    last: Option<WalkStats>,
}

#[derive(Default)]
struct Control {
    state: Mutex<WalkState>,
    changed: Condvar,
    stop: AtomicBool,
}

fn walker_thread_main(
    walker: &DirectoryWalker,
    requests: &channel::Receiver<()>,
    control: &Control,
) {
    let mut walk_now = walker.config.walk_on_start;
    loop {
        if !walk_now {
            let woke = match walker.config.rescan_interval {
                Some(interval) => requests.recv_timeout(interval),
                None => requests.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            if matches!(woke, Err(RecvTimeoutError::Disconnected)) {
                break;
            }
        }
        walk_now = false;
        if control.stop.load(Ordering::Acquire) {
            break;
        }

        // Requests queued so far are satisfied by the walk about to start.
        while requests.try_recv().is_ok() {}
        control.state.lock().running = true;

        let stats = walker.walk_until(&control.stop);
        tracing::info!(
            root = %walker.config.root,
            directories = stats.directories_listed,
            listing_failures = stats.listing_failures,
            sink_failures = stats.sink_failures,
            duration_ms = stats.duration_ms,
            stopped = stats.stopped,
            "walk finished"
        );

        let mut state = control.state.lock();
        state.running = false;
        if !stats.stopped {
            state.completed += 1;
        }
        state.last = Some(stats);
        control.changed.notify_all();
        if stats.stopped {
            break;
        }
    }

    control.state.lock().exited = true;
    control.changed.notify_all();
}

/// Control handle for a spawned walker. Dropping it stops the walker.
pub struct WalkerHandle {
    control: Arc<Control>,
    request_tx: Option<channel::Sender<()>>,
    join: Option<thread::JoinHandle<()>>,
}

impl WalkerHandle {
    /// Ask for a walk. Coalesces with a request that has not started yet.
    pub fn request_walk(&self) {
        if let Some(tx) = &self.request_tx {
            let _ = tx.try_send(());
        }
    }

    /// Number of walks that ran to completion.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.control.state.lock().completed
    }

    #[must_use]
    pub fn last_stats(&self) -> Option<WalkStats> {
        self.control.state.lock().last
    }

    /// Request a walk and block until one that started after this call has
    /// completed. Returns `false` if the walker exited first.
    pub fn wait_full_walk(&self) -> bool {
        let target = self.begin_wait();
        let mut state = self.control.state.lock();
        while state.completed < target && !state.exited {
            self.control.changed.wait(&mut state);
        }
        state.completed >= target
    }

    /// As [`wait_full_walk`](Self::wait_full_walk), giving up at the timeout.
    pub fn wait_full_walk_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let target = self.begin_wait();
        let mut state = self.control.state.lock();
        while state.completed < target && !state.exited {
            if self
                .control
                .changed
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                break;
            }
        }
        state.completed >= target
    }

    fn begin_wait(&self) -> u64 {
        let target = {
            let state = self.control.state.lock();
            // A walk already running may have passed paths changed before this call.
            state.completed + if state.running { 2 } else { 1 }
        };
        self.request_walk();
        target
    }

    /// Stop between directories and join the thread. Idempotent.
    pub fn stop(&mut self) {
        self.control.stop.store(true, Ordering::Release);
        self.request_tx.take();
        if let Some(join) = self.join.take()
            && join.join().is_err()
        {
            tracing::error!("walker thread panicked");
        }
    }
}

impl Drop for WalkerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
