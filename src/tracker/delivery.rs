//! Event delivery pipeline: a bounded queue of committed event batches and a
//! single consumer thread that republishes them to subscribers.
//!
//! Each wake-up drains every batch already queued and hands subscribers one
//! concatenated slice in commit order.

#![allow(missing_docs)]

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use parking_lot::RwLock;

use crate::core::errors::{Result, TrackerError};
use crate::tracker::event::ChangeEvent;
use crate::tracker::progress::InFlight;
use crate::tracker::stats::PipelineCounters;

/// Callback invoked with each delivered batch.
pub type Subscriber = Arc<dyn Fn(&[ChangeEvent]) + Send + Sync>;

/// Handle returned by `subscribe`; pass it to `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// The subscriber registry.
#[derive(Default)]
pub struct Subscribers {
    next_id: AtomicU64,
    list: RwLock<Vec<(SubscriptionId, Subscriber)>>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, subscriber: Subscriber) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.list.write().push((id, subscriber));
        id
    }

    /// Channel-backed subscription. The channel is unbounded so a slow reader
    /// never stalls delivery to other subscribers.
    pub fn add_channel(&self) -> (SubscriptionId, Receiver<Vec<ChangeEvent>>) {
        let (tx, rx) = unbounded();
        let id = self.add(Arc::new(move |events: &[ChangeEvent]| {
            let _ = tx.send(events.to_vec());
        }));
        (id, rx)
    }

    /// Returns whether the subscription existed. Calling it twice is harmless.
    pub fn remove(&self, id: SubscriptionId) -> bool {
        let mut list = self.list.write();
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        list.len() != before
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.list.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.list.read().is_empty()
    }

    fn snapshot(&self) -> Vec<(SubscriptionId, Subscriber)> {
        self.list.read().clone()
    }
}

/// Producer side of the delivery queue, owned by the ingestion consumer.
pub struct DeliverySender {
    tx: Sender<Vec<ChangeEvent>>,
    progress: Arc<InFlight>,
}

impl DeliverySender {
    /// Queue one committed batch. Empty batches are skipped.
    ///
    /// Blocks while the queue is full.
    pub fn send(&self, batch: Vec<ChangeEvent>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.progress.begin();
        if self.tx.send(batch).is_err() {
            self.progress.finish(1);
            return Err(TrackerError::ChannelClosed {
                component: "event delivery",
            });
        }
        Ok(())
    }
}

/// Spawn the delivery consumer.
pub fn spawn_delivery(
    capacity: usize,
    subscribers: Arc<Subscribers>,
    progress: Arc<InFlight>,
    counters: Arc<PipelineCounters>,
) -> Result<(DeliverySender, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<Vec<ChangeEvent>>(capacity.max(1));
    let thread_progress = Arc::clone(&progress);
    let join = thread::Builder::new()
        .name("htrk-delivery".to_string())
        .spawn(move || {
            delivery_thread_main(&rx, &subscribers, &thread_progress, &counters);
        })
        .map_err(|e| TrackerError::Runtime {
            details: format!("failed to spawn delivery thread: {e}"),
        })?;
    Ok((DeliverySender { tx, progress }, join))
}

// ──────────────────── delivery thread ────────────────────

fn delivery_thread_main(
    rx: &Receiver<Vec<ChangeEvent>>,
    subscribers: &Subscribers,
    progress: &InFlight,
    counters: &PipelineCounters,
) {
    while let Ok(mut events) = rx.recv() {
        let mut batches: u64 = 1;
        while let Ok(more) = rx.try_recv() {
            events.extend(more);
            batches += 1;
        }

        dispatch(&events, subscribers, counters);

        PipelineCounters::bump(&counters.batches_delivered, batches);
        PipelineCounters::bump(&counters.events_delivered, events.len() as u64);
        progress.finish(batches);
    }
    tracing::debug!("delivery queue closed; consumer exiting");
}

fn dispatch(events: &[ChangeEvent], subscribers: &Subscribers, counters: &PipelineCounters) {
    for (id, subscriber) in subscribers.snapshot() {
        let outcome = catch_unwind(AssertUnwindSafe(|| subscriber(events)));
        if outcome.is_err() {
            PipelineCounters::bump(&counters.subscriber_panics, 1);
            tracing::error!(
                subscription = %id,
                events = events.len(),
                "subscriber panicked; continuing"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;
    use crate::store::entries::TrackedEntry;

    fn event(path: &str) -> ChangeEvent {
        ChangeEvent::created(
            TrackedEntry {
                id: 1,
                path: path.to_string(),
                parent_id: Some(0),
                is_directory: false,
                identifier_tag: Some("i".to_string()),
                content_tag: Some("c".to_string()),
            },
            Vec::new(),
        )
    }

    fn pipeline(
        subscribers: &Arc<Subscribers>,
    ) -> (DeliverySender, thread::JoinHandle<()>, Arc<InFlight>, Arc<PipelineCounters>) {
        let progress = Arc::new(InFlight::new());
        let counters = Arc::new(PipelineCounters::default());
        let (tx, join) = spawn_delivery(
            4,
            Arc::clone(subscribers),
            Arc::clone(&progress),
            Arc::clone(&counters),
        )
        .unwrap();
        (tx, join, progress, counters)
    }

    #[test]
    fn delivers_in_order_and_skips_empty_batches() {
        let subscribers = Arc::new(Subscribers::new());
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = Arc::clone(&seen);
        subscribers.add(Arc::new(move |events: &[ChangeEvent]| {
            sink.lock().extend(events.iter().map(|e| e.path().to_string()));
        }));
        let (tx, join, progress, counters) = pipeline(&subscribers);

        tx.send(Vec::new()).unwrap();
        tx.send(vec![event("/a"), event("/b")]).unwrap();
        tx.send(vec![event("/c")]).unwrap();
        progress.wait_idle();

        assert_eq!(*seen.lock(), vec!["/a", "/b", "/c"]);
        let stats = counters.snapshot(progress.pending());
        assert_eq!(stats.events_delivered, 3);
        assert!((1..=2).contains(&stats.batches_delivered));

        drop(tx);
        join.join().unwrap();
    }

    #[test]
    fn panicking_subscriber_does_not_stop_delivery() {
        let subscribers = Arc::new(Subscribers::new());
        subscribers.add(Arc::new(|_: &[ChangeEvent]| panic!("boom")));
        let (id, rx) = subscribers.add_channel();
        let (tx, join, progress, counters) = pipeline(&subscribers);

        tx.send(vec![event("/a")]).unwrap();
        tx.send(vec![event("/b")]).unwrap();
        progress.wait_idle();

        let mut paths = Vec::new();
        while let Ok(batch) = rx.recv_timeout(Duration::from_millis(50)) {
            paths.extend(batch.into_iter().map(|e| e.entry.path));
        }
        assert_eq!(paths, vec!["/a", "/b"]);
        assert!(counters.snapshot(0).subscriber_panics >= 1);

        assert!(subscribers.remove(id));
        assert!(!subscribers.remove(id));
        drop(tx);
        join.join().unwrap();
    }

    #[test]
    fn send_after_consumer_exit_fails() {
        let subscribers = Arc::new(Subscribers::new());
        let progress = Arc::new(InFlight::new());
        let (tx, rx) = bounded::<Vec<ChangeEvent>>(1);
        drop(rx);
        let sender = DeliverySender {
            tx,
            progress: Arc::clone(&progress),
        };
        let err = sender.send(vec![event("/a")]).unwrap_err();
        assert_eq!(err.code(), "HTR-3003");
        assert_eq!(progress.pending(), 0);
        assert!(subscribers.is_empty());
    }
}
