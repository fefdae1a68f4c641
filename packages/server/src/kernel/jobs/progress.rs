//! Per-job progress reporting.
//!
//! A [`ProgressReporter`] never blocks the pipeline: reports go onto an
//! unbounded channel and a single writer task per job forwards them to the
//! queue in call order. Reported values are clamped into `[0, 100]` and never
//! go backwards.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::queue::QueueManager;

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub percent: f64,
    pub message: Option<String>,
}

enum ProgressCommand {
    Update(ProgressUpdate),
    Finish,
}

#[derive(Clone)]
pub struct ProgressReporter {
    job_id: Uuid,
    tx: mpsc::UnboundedSender<ProgressCommand>,
    /// Highest percent reported so far, as `f64` bits.
    last: Arc<AtomicU64>,
    finished: Arc<AtomicBool>,
}

pub struct ProgressReceiver {
    job_id: Uuid,
    rx: mpsc::UnboundedReceiver<ProgressCommand>,
}

/// Create a reporter and the receiving end for `job_id`.
pub fn progress_channel(job_id: Uuid) -> (ProgressReporter, ProgressReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let reporter = ProgressReporter {
        job_id,
        tx,
        last: Arc::new(AtomicU64::new(0f64.to_bits())),
        finished: Arc::new(AtomicBool::new(false)),
    };
    (reporter, ProgressReceiver { job_id, rx })
}

impl ProgressReporter {
    /// A reporter whose updates go nowhere.
    pub fn noop(job_id: Uuid) -> Self {
        progress_channel(job_id).0
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Report `percent` complete. Values below the last report are raised to it.
    pub fn report(&self, percent: f64, message: Option<&str>) {
        if self.finished.load(Ordering::SeqCst) {
            return;
        }
        let percent = if percent.is_finite() {
            percent.clamp(0.0, 100.0)
        } else {
            0.0
        };

        let previous = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |bits| {
                let last = f64::from_bits(bits);
                (percent > last).then(|| percent.to_bits())
            })
            .unwrap_or_else(|bits| bits);
        let percent = percent.max(f64::from_bits(previous));

        // A closed receiver means nobody is listening; progress is best-effort.
        let _ = self.tx.send(ProgressCommand::Update(ProgressUpdate {
            percent,
            message: message.map(str::to_string),
        }));
    }

    /// Highest percent reported so far.
    pub fn current(&self) -> f64 {
        f64::from_bits(self.last.load(Ordering::SeqCst))
    }

    /// Stop accepting reports and tell the writer to exit once drained.
    pub fn finish(&self) {
        if !self.finished.swap(true, Ordering::SeqCst) {
            let _ = self.tx.send(ProgressCommand::Finish);
        }
    }
}

impl ProgressReceiver {
    /// Forward updates to `queue` on behalf of `worker_id` until
    /// [`ProgressReporter::finish`] is called or every reporter is dropped.
    pub fn spawn_writer(self, queue: QueueManager, worker_id: String) -> JoinHandle<()> {
        let ProgressReceiver { job_id, mut rx } = self;
        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    ProgressCommand::Update(update) => {
                        if let Err(e) = queue
                            .update_job_progress_for_worker(
                                job_id,
                                &worker_id,
                                update.percent,
                                update.message.as_deref(),
                            )
                            .await
                        {
                            warn!(job_id = %job_id, error = %e, "progress write failed");
                        }
                    }
                    ProgressCommand::Finish => break,
                }
            }
            debug!(job_id = %job_id, "progress writer finished");
        })
    }

    /// Drain every pending update without writing it anywhere.
    pub fn drain(&mut self) -> Vec<ProgressUpdate> {
        let mut updates = Vec::new();
        while let Ok(command) = self.rx.try_recv() {
            if let ProgressCommand::Update(update) = command {
                updates.push(update);
            }
        }
        updates
    }
}
