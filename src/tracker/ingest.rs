//! Hint ingestion queue: a bounded, strictly ordered queue with one consumer
//! that owns the only writing connection.
//!
//! Per hint the consumer opens one write transaction, reconciles, commits, and
//! only then hands the events to delivery and pulls the next job.

#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender, bounded};

use crate::core::errors::{Result, TrackerError};
use crate::store::database::IndexDatabase;
use crate::tracker::delivery::DeliverySender;
use crate::tracker::hint::Hint;
use crate::tracker::progress::InFlight;
use crate::tracker::reconcile::{Reconciliation, reconcile};
use crate::tracker::stats::PipelineCounters;

/// Where a job's result goes, if anyone is waiting for it.
pub type Reply = Sender<Result<Reconciliation>>;

pub struct Job {
    pub hint: Hint,
    pub reply: Option<Reply>,
}

impl Job {
    pub fn fire_and_forget(hint: Hint) -> Self {
        Self { hint, reply: None }
    }

    /// A job plus the receiver its result will arrive on.
    pub fn with_reply(hint: Hint) -> (Self, Receiver<Result<Reconciliation>>) {
        let (tx, rx) = bounded(1);
        (
            Self {
                hint,
                reply: Some(tx),
            },
            rx,
        )
    }
}

/// Spawn the ingestion consumer. It exits once every `Sender<Job>` is gone
/// and the queue is drained; dropping its `DeliverySender` then lets the
/// delivery consumer finish too.
pub fn spawn_ingest(
    capacity: usize,
    db: IndexDatabase,
    delivery: DeliverySender,
    progress: Arc<InFlight>,
    counters: Arc<PipelineCounters>,
) -> Result<(Sender<Job>, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<Job>(capacity.max(1));
    let join = thread::Builder::new()
        .name("htrk-ingest".to_string())
        .spawn(move || {
            ingest_thread_main(&rx, db, &delivery, &progress, &counters);
        })
        .map_err(|e| TrackerError::Runtime {
            details: format!("failed to spawn ingest thread: {e}"),
        })?;
    Ok((tx, join))
}

// ──────────────────── ingest thread ────────────────────

#[allow(clippy::needless_pass_by_value)]
fn ingest_thread_main(
    rx: &Receiver<Job>,
    mut db: IndexDatabase,
    delivery: &DeliverySender,
    progress: &InFlight,
    counters: &PipelineCounters,
) {
    while let Ok(job) = rx.recv() {
        let result = apply_one(&mut db, &job.hint);
        match &result {
            Ok(reconciliation) => {
                PipelineCounters::bump(&counters.hints_applied, 1);
                let count = reconciliation.events.len() as u64;
                PipelineCounters::bump(&counters.events_emitted, count);
                if let Err(e) = delivery.send(reconciliation.events.clone()) {
                    tracing::error!(code = e.code(), error = %e, "dropping committed events");
                }
            }
            Err(e) => {
                PipelineCounters::bump(&counters.failed_hints, 1);
                tracing::warn!(
                    code = e.code(),
                    hint = job.hint.kind(),
                    path = job.hint.path(),
                    error = %e,
                    "reconciliation failed; hint dropped"
                );
            }
        }
        // Delivery already holds its own unit for the batch.
        progress.finish(1);

        if let Some(reply) = job.reply {
            let _ = reply.send(result);
        }
    }
    tracing::debug!("ingest queue closed; consumer exiting");
}

/// One hint, one transaction. Nothing is committed on error.
fn apply_one(db: &mut IndexDatabase, hint: &Hint) -> Result<Reconciliation> {
    let tx = db.write_transaction()?;
    let reconciliation = reconcile(&tx, hint)?;
    tx.commit()?;
    Ok(reconciliation)
}
