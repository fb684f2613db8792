//! `HintedTracker`: the facade that owns both pipelines.
//!
//! ```text
//! producers ──submit/apply──▶ [hint queue] ──▶ ingest thread (write tx)
//!                                                   │ committed events
//!                                                   ▼
//!                      subscribers ◀── delivery thread ◀── [event queue]
//! ```

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};

use crate::core::config::Config;
use crate::core::errors::{Result, TrackerError};
use crate::scanner::source::DirectorySource;
use crate::scanner::walker::{DirectoryWalker, HintSink, WalkerConfig, WalkerHandle};
use crate::store::attached::{AttachedDataRecord, DeletionPolicy};
use crate::store::database::IndexDatabase;
use crate::tracker::delivery::{Subscribers, SubscriptionId, spawn_delivery};
use crate::tracker::event::ChangeEvent;
use crate::tracker::hint::{ChildHint, Hint, Identity};
use crate::tracker::ingest::{Job, spawn_ingest};
use crate::tracker::progress::InFlight;
use crate::tracker::reader::TrackerReader;
use crate::tracker::reconcile::{HintOutcome, Reconciliation};
use crate::tracker::stats::{PipelineCounters, TrackerStats};

/// Settings needed to open a tracker.
#[derive(Debug, Clone)]
pub struct TrackerOptions {
    pub database_path: PathBuf,
    pub busy_timeout: Duration,
    pub hint_capacity: usize,
    pub event_capacity: usize,
}

impl TrackerOptions {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        let defaults = Config::default();
        Self {
            database_path: database_path.into(),
            busy_timeout: defaults.store.busy_timeout(),
            hint_capacity: defaults.queues.hint_capacity,
            event_capacity: defaults.queues.event_capacity,
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            database_path: config.store.database_path.clone(),
            busy_timeout: config.store.busy_timeout(),
            hint_capacity: config.queues.hint_capacity,
            event_capacity: config.queues.event_capacity,
        }
    }
}

/// State shared with walker sinks, which hold it weakly.
struct Shared {
    hint_tx: RwLock<Option<Sender<Job>>>,
    progress: Arc<InFlight>,
    subscribers: Arc<Subscribers>,
    counters: Arc<PipelineCounters>,
    joins: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl Shared {
    fn enqueue(&self, job: Job) -> Result<()> {
        let tx = self.hint_tx.read().clone().ok_or(TrackerError::ChannelClosed {
            component: "hint ingestion",
        })?;
        self.progress.begin();
        if tx.send(job).is_err() {
            self.progress.finish(1);
            return Err(TrackerError::ChannelClosed {
                component: "hint ingestion",
            });
        }
        Ok(())
    }

    fn submit(&self, hint: Hint) -> Result<()> {
        hint.validate()?;
        self.enqueue(Job::fire_and_forget(hint))
    }

    fn shutdown(&self) {
        let Some(tx) = self.hint_tx.write().take() else {
            return;
        };
        drop(tx);

        let joins: Vec<_> = self.joins.lock().drain(..).collect();
        let current = thread::current().id();
        for join in joins {
            let name = join.thread().name().unwrap_or("worker").to_string();
            if join.thread().id() == current {
                tracing::warn!(
                    thread = %name,
                    "shutdown called from a pipeline thread; not joining it"
                );
                continue;
            }
            if join.join().is_err() {
                tracing::error!(thread = %name, "pipeline thread panicked");
            }
        }
        tracing::debug!("tracker shut down");
    }
}

/// Persistent hinted file tracker.
pub struct HintedTracker {
    shared: Arc<Shared>,
    options: TrackerOptions,
}

impl HintedTracker {
    /// Open the database and start the ingestion and delivery threads.
    pub fn open(options: TrackerOptions) -> Result<Self> {
        let db = IndexDatabase::open(&options.database_path, options.busy_timeout)?;

        let progress = Arc::new(InFlight::new());
        let subscribers = Arc::new(Subscribers::new());
        let counters = Arc::new(PipelineCounters::default());

        let (delivery, delivery_join) = spawn_delivery(
            options.event_capacity,
            Arc::clone(&subscribers),
            Arc::clone(&progress),
            Arc::clone(&counters),
        )?;
        let (hint_tx, ingest_join) = spawn_ingest(
            options.hint_capacity,
            db,
            delivery,
            Arc::clone(&progress),
            Arc::clone(&counters),
        )?;

        tracing::info!(
            database = %options.database_path.display(),
            hint_capacity = options.hint_capacity,
            event_capacity = options.event_capacity,
            "tracker opened"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                hint_tx: RwLock::new(Some(hint_tx)),
                progress,
                subscribers,
                counters,
                // Ingest first: delivery drains only after ingest drops its sender.
                joins: Mutex::new(vec![ingest_join, delivery_join]),
            }),
            options,
        })
    }

    // ──────────────────── hints ────────────────────

    /// Queue a hint without waiting for it. Blocks while the queue is full.
    ///
    /// Reconciliation failures are logged and counted, not returned.
    pub fn submit(&self, hint: Hint) -> Result<()> {
        self.shared.submit(hint)
    }

    /// Queue a hint and wait for its committed result.
    ///
    /// Must not be called from a subscriber callback.
    pub fn apply(&self, hint: Hint) -> Result<Reconciliation> {
        hint.validate()?;
        let (job, rx) = Job::with_reply(hint);
        self.shared.enqueue(job)?;
        rx.recv().map_err(|_| TrackerError::ChannelClosed {
            component: "hint ingestion",
        })?
    }

    pub fn index_file(&self, path: impl Into<String>, identity: Option<Identity>) -> Result<()> {
        self.submit(Hint::File {
            path: path.into(),
            identity,
        })
    }

    pub fn index_directory(&self, path: impl Into<String>, children: Vec<ChildHint>) -> Result<()> {
        self.submit(Hint::directory(path, children))
    }

    pub fn delete(&self, path: impl Into<String>) -> Result<()> {
        self.submit(Hint::deleted(path))
    }

    /// Make the entry current and store `payload` under `key`, waiting for the commit.
    pub fn attach_data(
        &self,
        path: impl Into<String>,
        identity: Identity,
        key: impl Into<String>,
        payload: Vec<u8>,
        policy: DeletionPolicy,
    ) -> Result<AttachedDataRecord> {
        let path = path.into();
        let result = self.apply(Hint::AttachData {
            path: path.clone(),
            identity,
            key: key.into(),
            payload,
            policy,
        })?;
        match result.outcome {
            HintOutcome::Attached(record) => Ok(record),
            other => Err(TrackerError::consistency(
                &path,
                format!("attach produced {other:?}"),
            )),
        }
    }

    /// Remove one attached record; `false` if it did not exist.
    pub fn detach_data(&self, path: impl Into<String>, key: impl Into<String>) -> Result<bool> {
        let path = path.into();
        let result = self.apply(Hint::DetachData {
            path: path.clone(),
            key: key.into(),
        })?;
        match result.outcome {
            HintOutcome::Detached(removed) => Ok(removed),
            other => Err(TrackerError::consistency(
                &path,
                format!("detach produced {other:?}"),
            )),
        }
    }

    // ──────────────────── subscriptions ────────────────────

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&[ChangeEvent]) + Send + Sync + 'static,
    {
        self.shared.subscribers.add(Arc::new(callback))
    }

    pub fn subscribe_channel(&self) -> (SubscriptionId, Receiver<Vec<ChangeEvent>>) {
        self.shared.subscribers.add_channel()
    }

    /// Idempotent.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.subscribers.remove(id)
    }

    // ──────────────────── waiting & status ────────────────────

    /// Block until every hint queued so far is reconciled and its events delivered.
    pub fn wait_complete(&self) {
        self.shared.progress.wait_idle();
    }

    pub fn wait_complete_timeout(&self, timeout: Duration) -> bool {
        self.shared.progress.wait_idle_timeout(timeout)
    }

    /// Open a read connection on the same database.
    pub fn reader(&self) -> Result<TrackerReader> {
        TrackerReader::open(&self.options.database_path, self.options.busy_timeout)
    }

    #[must_use]
    pub fn stats(&self) -> TrackerStats {
        self.shared
            .counters
            .snapshot(self.shared.progress.pending())
    }

    // ──────────────────── walker ────────────────────

    /// Sink that queues walker hints on this tracker.
    ///
    /// Holds the tracker weakly; after it is dropped the sink reports `ChannelClosed`.
    #[must_use]
    pub fn hint_sink(&self) -> HintSink {
        let weak = Arc::downgrade(&self.shared);
        Arc::new(move |hint: Hint| match weak.upgrade() {
            Some(shared) => shared.submit(hint),
            None => Err(TrackerError::ChannelClosed {
                component: "hint ingestion",
            }),
        })
    }

    /// Start a background walker feeding this tracker.
    pub fn spawn_walker(
        &self,
        source: Arc<dyn DirectorySource>,
        config: WalkerConfig,
    ) -> Result<WalkerHandle> {
        DirectoryWalker::new(source, config, self.hint_sink()).spawn()
    }

    /// Stop accepting hints, drain both queues, and join the threads.
    ///
    /// Idempotent; later submits fail with `ChannelClosed`.
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }
}

impl Drop for HintedTracker {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}
