//! Job scheduler
//!
//! A fixed pool of workers consumes job ids from one bounded FIFO channel.
//! The channel capacity is the waiting-queue depth: admission reserves a slot
//! without blocking and reports `capacity_exceeded` when none is left. Each
//! worker runs one job at a time through the [`PipelineExecutor`].

use anyhow::{Context, Result};
use gitcast_core::domain::job::JobStatus;
use gitcast_core::domain::stage::{Stage, StageError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc::{self, OwnedPermit};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::executor::PipelineExecutor;
use crate::repository::JobRepository;

/// The waiting queue has reached its configured depth
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("job queue is full")]
pub struct QueueFull;

/// State shared between the scheduler handle and its workers
struct Shared {
    executor: Arc<PipelineExecutor>,
    /// Cancellation hooks of queued and running jobs
    tokens: Mutex<HashMap<Uuid, CancellationToken>>,
    running: AtomicUsize,
}

impl Shared {
    fn token_for(&self, job_id: Uuid) -> CancellationToken {
        self.tokens.lock().entry(job_id).or_default().clone()
    }
}

pub struct Scheduler {
    sender: mpsc::Sender<Uuid>,
    shared: Arc<Shared>,
    worker_slots: usize,
}

/// A reserved place in the waiting queue
///
/// Dropping it without calling [`QueueSlot::enqueue`] gives the place back.
pub struct QueueSlot {
    permit: OwnedPermit<Uuid>,
    shared: Arc<Shared>,
}

impl QueueSlot {
    pub fn enqueue(self, job_id: Uuid) {
        self.shared
            .tokens
            .lock()
            .insert(job_id, CancellationToken::new());
        self.permit.send(job_id);
        debug!("Job {} enqueued", job_id);
    }
}

/// Outcome of startup recovery
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    pub interrupted: usize,
    pub requeued: usize,
}

impl Scheduler {
    /// Spawns `worker_slots` workers behind a queue holding `queue_depth` jobs
    pub fn start(executor: Arc<PipelineExecutor>, worker_slots: usize, queue_depth: usize) -> Self {
        let (sender, receiver) = mpsc::channel(queue_depth.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let shared = Arc::new(Shared {
            executor,
            tokens: Mutex::new(HashMap::new()),
            running: AtomicUsize::new(0),
        });

        for worker in 0..worker_slots {
            tokio::spawn(worker_loop(worker, receiver.clone(), shared.clone()));
        }

        info!(
            "Scheduler started ({} worker slots, queue depth {})",
            worker_slots, queue_depth
        );

        Self {
            sender,
            shared,
            worker_slots,
        }
    }

    /// Reserves a place in the waiting queue without blocking
    pub fn try_reserve(&self) -> Result<QueueSlot, QueueFull> {
        let permit = self
            .sender
            .clone()
            .try_reserve_owned()
            .map_err(|_| QueueFull)?;
        Ok(QueueSlot {
            permit,
            shared: self.shared.clone(),
        })
    }

    /// Signals cancellation to a queued or running job.
    ///
    /// Returns false when this scheduler holds no such job.
    pub fn cancel(&self, job_id: Uuid) -> bool {
        match self.shared.tokens.lock().get(&job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Jobs admitted but not yet picked up by a worker
    pub fn waiting(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Jobs currently held by a worker
    pub fn running(&self) -> usize {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn worker_slots(&self) -> usize {
        self.worker_slots
    }

    /// Reconciles records left behind by a previous process.
    ///
    /// Running jobs lost their executor and are failed; queued jobs are
    /// re-enqueued oldest first, waiting for queue space if needed.
    pub async fn recover(&self, jobs: &dyn JobRepository) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();

        let orphaned = jobs
            .find_by_status(JobStatus::Running)
            .await
            .context("Failed to load running jobs")?;
        for mut job in orphaned {
            let stage = job.current_stage.unwrap_or(Stage::Fetch);
            job.fail(StageError::internal(
                stage,
                "interrupted: orchestrator restarted while the job was running",
            ))
            .with_context(|| format!("Failed to mark job {} as interrupted", job.id))?;
            jobs.save(&job)
                .await
                .with_context(|| format!("Failed to save interrupted job {}", job.id))?;
            warn!("Job {} was interrupted by a restart during {}", job.id, stage);
            report.interrupted += 1;
        }

        let queued = jobs
            .find_by_status(JobStatus::Queued)
            .await
            .context("Failed to load queued jobs")?;
        for job in queued {
            let permit = self
                .sender
                .clone()
                .reserve_owned()
                .await
                .context("Job queue closed during recovery")?;
            QueueSlot {
                permit,
                shared: self.shared.clone(),
            }
            .enqueue(job.id);
            report.requeued += 1;
        }

        if report.interrupted > 0 || report.requeued > 0 {
            info!(
                "Recovered jobs: {} interrupted, {} re-queued",
                report.interrupted, report.requeued
            );
        }

        Ok(report)
    }
}

async fn worker_loop(
    worker: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Uuid>>>,
    shared: Arc<Shared>,
) {
    debug!("Worker {} ready", worker);

    loop {
        let next = receiver.lock().await.recv().await;
        let Some(job_id) = next else {
            debug!("Worker {} stopping: queue closed", worker);
            break;
        };

        let cancel = shared.token_for(job_id);
        shared.running.fetch_add(1, Ordering::SeqCst);
        debug!("Worker {} picked up job {}", worker, job_id);

        // Run in its own task so a panicking capability cannot take the worker down
        let executor = shared.executor.clone();
        let handle = tokio::spawn(async move { executor.run(job_id, cancel).await });
        let reason = match handle.await {
            Ok(Ok(status)) => {
                debug!("Worker {} finished job {}: {}", worker, job_id, status);
                None
            }
            Ok(Err(e)) => {
                error!("Job {} aborted by a storage failure: {}", job_id, e);
                Some("storage failure while the job was running")
            }
            Err(e) => {
                error!("Job {} task panicked: {}", job_id, e);
                Some("executor panicked while the job was running")
            }
        };
        if let Some(reason) = reason {
            match shared.executor.abandon(job_id, reason).await {
                Ok(true) => warn!("Job {} marked failed: {}", job_id, reason),
                Ok(false) => {}
                Err(e) => error!("Job {} could not be marked failed: {}", job_id, e),
            }
        }

        shared.tokens.lock().remove(&job_id);
        shared.running.fetch_sub(1, Ordering::SeqCst);
    }
}
