//! Deferred task queue.
//!
//! The pipeline schedules follow-up work (detail fetches, retries) through
//! [`TaskQueue`] instead of spawning directly, so the transport can change
//! without touching call sites. [`InProcessQueue`] is the bundled
//! implementation: an unbounded channel drained by [`TaskWorker`], which
//! waits out each task's delay before handing it to a [`TaskHandler`].
//!
//! Delivery is at least once and unordered. Handlers reload state and
//! tolerate duplicates.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, ScrapeError};
use crate::models::{CompanyId, JobId, SourceType};

/// Work the pipeline defers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScrapeTask {
    /// Scrape one company's board end to end.
    ScrapeCompany { company_id: CompanyId },
    /// Enrich one posting with fetched details. Carries enough context to
    /// log and fetch without a company read; handlers still reload the job.
    FetchJobDetails {
        job_id: JobId,
        company_id: CompanyId,
        url: String,
        source_type: SourceType,
    },
}

impl ScrapeTask {
    pub fn kind(&self) -> &'static str {
        match self {
            ScrapeTask::ScrapeCompany { .. } => "scrape_company",
            ScrapeTask::FetchJobDetails { .. } => "fetch_job_details",
        }
    }
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Schedule `task` to run after roughly `delay`. Fire and forget; the
    /// caller never observes the task's result.
    async fn enqueue(&self, task: ScrapeTask, delay: Duration) -> Result<()>;
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: ScrapeTask) -> Result<()>;
}

struct Scheduled {
    task: ScrapeTask,
    delay: Duration,
}

/// Channel-backed queue for a single process.
pub struct InProcessQueue {
    tx: mpsc::UnboundedSender<Scheduled>,
}

impl InProcessQueue {
    pub fn new() -> (Self, TaskReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, TaskReceiver { rx })
    }
}

#[async_trait]
impl TaskQueue for InProcessQueue {
    async fn enqueue(&self, task: ScrapeTask, delay: Duration) -> Result<()> {
        debug!(
            kind = task.kind(),
            delay_ms = delay.as_millis() as u64,
            "enqueueing task"
        );
        self.tx
            .send(Scheduled { task, delay })
            .map_err(|_| ScrapeError::Queue("worker channel closed".into()))
    }
}

/// Receiving half of the queue, handed to the worker.
pub struct TaskReceiver {
    rx: mpsc::UnboundedReceiver<Scheduled>,
}

/// Drains the queue until shutdown. Each task waits out its delay on its own
/// spawned task, so a long delay never holds up the tasks behind it.
pub struct TaskWorker {
    receiver: TaskReceiver,
    handler: Arc<dyn TaskHandler>,
}

impl TaskWorker {
    pub fn new(receiver: TaskReceiver, handler: Arc<dyn TaskHandler>) -> Self {
        Self { receiver, handler }
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("task worker started");
        let mut inflight = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("task worker shutting down");
                    break;
                }
                Some(_) = inflight.join_next(), if !inflight.is_empty() => {}
                scheduled = self.receiver.rx.recv() => {
                    let Some(Scheduled { task, delay }) = scheduled else {
                        info!("task queue closed, worker exiting");
                        break;
                    };
                    let handler = self.handler.clone();
                    let shutdown = shutdown.clone();
                    inflight.spawn(async move {
                        tokio::select! {
                            _ = shutdown.cancelled() => {}
                            _ = tokio::time::sleep(delay) => {
                                let kind = task.kind();
                                if let Err(e) = handler.handle(task).await {
                                    warn!(kind, error = %e, "deferred task failed");
                                }
                            }
                        }
                    });
                }
            }
        }
        // Tasks whose delay has not elapsed exit via the token; handlers
        // already running get to finish.
        while inflight.join_next().await.is_some() {}
    }
}
