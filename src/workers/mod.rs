use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{sync::Notify, time::sleep};
use tracing::{error, info, warn};

use crate::{
    jobs::backoff_for_attempt,
    models::Job,
    state::AppState,
    store::{JobQueue, StoreResult},
};

pub mod index;
pub mod publish;

/// Attempts after which a job is parked as failed instead of retried.
pub const MAX_ATTEMPTS: i32 = 10;

#[derive(Debug)]
pub enum JobExecution {
    Success,
    Retry { delay: Duration, error: String },
    Failed { error: String },
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> &'static str;
    async fn handle(&self, job: &Job) -> JobExecution;
}

pub struct Worker {
    queue: Arc<dyn JobQueue>,
    wakeup: Arc<Notify>,
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        wakeup: Arc<Notify>,
        handlers: Vec<Arc<dyn JobHandler>>,
        poll_interval: Duration,
    ) -> Self {
        let map = handlers
            .into_iter()
            .map(|handler| (handler.job_type(), handler))
            .collect();
        Self {
            queue,
            wakeup,
            handlers: map,
            poll_interval,
        }
    }

    pub fn from_state(state: &AppState, poll_interval: Duration) -> Self {
        Self::new(
            state.stores.jobs.clone(),
            state.outbox.clone(),
            default_handlers(state),
            poll_interval,
        )
    }

    pub async fn run(&self) {
        info!(job_types = ?self.handlers.keys().collect::<Vec<_>>(), "worker started");
        loop {
            match self.tick().await {
                Ok(true) => {}
                Ok(false) => self.idle().await,
                Err(err) => {
                    error!(error = %err, "worker tick failed");
                    self.idle().await;
                }
            }
        }
    }

    async fn idle(&self) {
        tokio::select! {
            _ = sleep(self.poll_interval) => {}
            _ = self.wakeup.notified() => {}
        }
    }

    /// Runs at most one job. `Ok(false)` when nothing was due.
    pub async fn tick(&self) -> StoreResult<bool> {
        let job_types: Vec<&'static str> = self.handlers.keys().copied().collect();
        if job_types.is_empty() {
            return Ok(false);
        }

        let Some(job) = self.queue.reserve(&job_types).await? else {
            return Ok(false);
        };

        let Some(handler) = self.handlers.get(job.job_type.as_str()) else {
            error!(job_type = %job.job_type, "no handler registered for job type");
            self.queue.fail(job.id, "no handler registered").await?;
            return Ok(true);
        };

        match handler.handle(&job).await {
            JobExecution::Success => {
                self.queue.complete(job.id).await?;
                info!(job_id = %job.id, job_type = %job.job_type, "job completed successfully");
            }
            JobExecution::Retry { delay, error } => {
                warn!(job_id = %job.id, job_type = %job.job_type, %error, "job will retry");
                self.queue.retry(job.id, delay, &error).await?;
            }
            JobExecution::Failed { error } => {
                error!(job_id = %job.id, job_type = %job.job_type, %error, "job failed");
                self.queue.fail(job.id, &error).await?;
            }
        }
        Ok(true)
    }

    /// Drains every job that is currently due.
    pub async fn drain(&self) -> StoreResult<usize> {
        let mut processed = 0;
        while self.tick().await? {
            processed += 1;
        }
        Ok(processed)
    }
}

/// Retries with linear backoff until the attempt budget runs out.
pub(crate) fn retry_or_fail(job: &Job, error: String) -> JobExecution {
    if job.attempts >= MAX_ATTEMPTS {
        JobExecution::Failed { error }
    } else {
        JobExecution::Retry {
            delay: backoff_for_attempt(job.attempts),
            error,
        }
    }
}

pub fn default_handlers(state: &AppState) -> Vec<Arc<dyn JobHandler>> {
    vec![
        Arc::new(publish::PublishDiaryEventJob::new(
            state.collaborators.events.clone(),
        )),
        Arc::new(index::IndexDiaryJob::new(
            state.stores.diaries.clone(),
            state.collaborators.vector.clone(),
        )),
    ]
}
