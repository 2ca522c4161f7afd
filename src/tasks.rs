use crate::error::{Error, Result};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Notify, Semaphore, broadcast, mpsc};
use tracing::{debug, warn};

const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Vectorize,
    ExtractSignals,
    MarkRead,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded,
    Failed(String),
}

/// Published once per finished background job.
#[derive(Debug, Clone)]
pub struct TaskEvent {
    pub kind: TaskKind,
    pub message_id: String,
    pub outcome: TaskOutcome,
}

impl TaskEvent {
    pub fn succeeded(&self) -> bool {
        self.outcome == TaskOutcome::Succeeded
    }
}

struct Job {
    kind: TaskKind,
    message_id: String,
    work: BoxFuture<'static, Result<()>>,
}

/// Bounded queue of detached jobs. At most `workers` jobs run at once; once
/// `capacity` jobs are waiting, `submit` waits for room.
#[derive(Clone)]
pub struct BackgroundTasks {
    tx: mpsc::Sender<Job>,
    events: broadcast::Sender<TaskEvent>,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

fn finish_one(pending: &AtomicUsize, idle: &Notify) {
    if pending.fetch_sub(1, Ordering::SeqCst) == 1 {
        idle.notify_waiters();
    }
}

impl BackgroundTasks {
    pub fn start(workers: usize, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Job>(capacity.max(1));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let permits = Arc::new(Semaphore::new(workers.max(1)));
        let pending = Arc::new(AtomicUsize::new(0));
        let idle = Arc::new(Notify::new());

        let evt_tx = events.clone();
        let job_pending = pending.clone();
        let job_idle = idle.clone();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let Ok(permit) = permits.clone().acquire_owned().await else {
                    break;
                };
                let evt_tx = evt_tx.clone();
                let pending = job_pending.clone();
                let idle = job_idle.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    let outcome = match job.work.await {
                        Ok(()) => {
                            debug!("{:?} finished for {}", job.kind, job.message_id);
                            TaskOutcome::Succeeded
                        }
                        Err(e) => {
                            warn!("{:?} failed for {}: {}", job.kind, job.message_id, e);
                            TaskOutcome::Failed(e.to_string())
                        }
                    };
                    // no subscribers is fine
                    let _ = evt_tx.send(TaskEvent {
                        kind: job.kind,
                        message_id: job.message_id,
                        outcome,
                    });
                    finish_one(&pending, &idle);
                });
            }
        });

        Self {
            tx,
            events,
            pending,
            idle,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Queues `work` without waiting for it to run.
    pub async fn submit<F>(&self, kind: TaskKind, message_id: &str, work: F) -> Result<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let job = Job {
            kind,
            message_id: message_id.to_string(),
            work: Box::pin(work),
        };
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(job).await.is_err() {
            finish_one(&self.pending, &self.idle);
            return Err(Error::QueueClosed);
        }
        Ok(())
    }

    /// Jobs queued or running right now.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Resolves once every submitted job has finished, including jobs
    /// submitted by other jobs while waiting.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}
