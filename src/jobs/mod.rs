//! Asynchronous execution of repository updates
//!
//! Jobs run at least once; failures the engine reports as retryable are
//! attempted again up to `max_retries` times with a fixed delay in between.

pub mod tasks;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::domain::RepositoryStatus;
use crate::sync::{SyncError, SyncServices};

pub use tasks::update_repository_information;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Job queue is closed")]
    QueueClosed,

    #[error("Job was dropped before completion")]
    Dropped,

    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Arguments of one repository update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncJob {
    pub project_id: Uuid,
    /// Empty or `None` updates every deck
    pub deck_ids: Option<Vec<Uuid>>,
    pub render: bool,
}

/// Accepts jobs for asynchronous execution
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn submit(&self, job: SyncJob) -> Result<(), JobError>;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
        }
    }
}

type JobResult = Result<RepositoryStatus, JobError>;

struct QueuedJob {
    job: SyncJob,
    done: Option<oneshot::Sender<JobResult>>,
}

/// In-process job queue backed by a channel and a fixed set of workers
pub struct TaskRunner {
    sender: Mutex<Option<mpsc::UnboundedSender<QueuedJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskRunner {
    /// Spawn `workers` workers executing jobs against `services`
    pub fn start(services: SyncServices, workers: usize, policy: RetryPolicy) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel::<QueuedJob>();
        let receiver = Arc::new(Mutex::new(receiver));

        let handles = (0..workers.max(1))
            .map(|worker| {
                let services = services.clone();
                let receiver = receiver.clone();
                let policy = policy.clone();
                tokio::spawn(async move {
                    tracing::debug!("Job worker {} started", worker);
                    loop {
                        // Hold the receiver only while waiting for the next job
                        let next = receiver.lock().await.recv().await;
                        let Some(queued) = next else {
                            break;
                        };

                        let result = run_with_retries(&services, &queued.job, &policy).await;
                        if let Some(done) = queued.done {
                            let _ = done.send(result);
                        }
                    }
                    tracing::debug!("Job worker {} stopped", worker);
                })
            })
            .collect();

        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(handles),
        }
    }

    /// Submit a job and wait for its final result
    pub async fn run(&self, job: SyncJob) -> JobResult {
        let (done, result) = oneshot::channel();
        self.enqueue(QueuedJob {
            job,
            done: Some(done),
        })
        .await?;
        result.await.map_err(|_| JobError::Dropped)?
    }

    /// Stop accepting jobs and wait for queued ones to finish
    pub async fn shutdown(&self) {
        self.sender.lock().await.take();
        let handles = std::mem::take(&mut *self.workers.lock().await);
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                tracing::error!("Job worker panicked: {}", e);
            }
        }
    }

    async fn enqueue(&self, queued: QueuedJob) -> Result<(), JobError> {
        let sender = self.sender.lock().await;
        sender
            .as_ref()
            .ok_or(JobError::QueueClosed)?
            .send(queued)
            .map_err(|_| JobError::QueueClosed)
    }
}

#[async_trait]
impl JobQueue for TaskRunner {
    async fn submit(&self, job: SyncJob) -> Result<(), JobError> {
        tracing::info!("Queued repository update of project {}", job.project_id);
        self.enqueue(QueuedJob { job, done: None }).await
    }
}

async fn run_with_retries(services: &SyncServices, job: &SyncJob, policy: &RetryPolicy) -> JobResult {
    let mut attempt = 0;
    loop {
        let result =
            update_repository_information(services, job.project_id, job.deck_ids.as_deref(), job.render)
                .await;

        match result {
            Ok(status) => return Ok(status),
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                attempt += 1;
                tracing::warn!(
                    "Repository update of project {} failed, retry {}/{} in {:?}: {}",
                    job.project_id,
                    attempt,
                    policy.max_retries,
                    policy.retry_delay,
                    e
                );
                tokio::time::sleep(policy.retry_delay).await;
            }
            Err(e) => {
                tracing::error!(
                    "Repository update of project {} failed after {} attempts: {}",
                    job.project_id,
                    attempt + 1,
                    e
                );
                return Err(e.into());
            }
        }
    }
}
