use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{
    clients::events::{DiaryEvent, EventPublisher},
    jobs::JOB_PUBLISH_DIARY_EVENT,
    models::Job,
};

use super::{retry_or_fail, JobExecution, JobHandler};

/// Delivers outbox rows to the event bus.
pub struct PublishDiaryEventJob {
    publisher: Option<Arc<dyn EventPublisher>>,
}

impl PublishDiaryEventJob {
    pub fn new(publisher: Option<Arc<dyn EventPublisher>>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl JobHandler for PublishDiaryEventJob {
    fn job_type(&self) -> &'static str {
        JOB_PUBLISH_DIARY_EVENT
    }

    async fn handle(&self, job: &Job) -> JobExecution {
        let event: DiaryEvent = match serde_json::from_value(job.payload.clone()) {
            Ok(event) => event,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("invalid diary event payload: {err}"),
                }
            }
        };

        let Some(publisher) = &self.publisher else {
            warn!(diary_id = event.diary_id, "event bus not configured; dropping diary event");
            return JobExecution::Success;
        };

        match publisher.publish(&event).await {
            Ok(()) => {
                debug!(
                    diary_id = event.diary_id,
                    event_type = ?event.event_type,
                    "diary event published"
                );
                JobExecution::Success
            }
            Err(err) => retry_or_fail(job, format!("event publish failed: {err}")),
        }
    }
}
