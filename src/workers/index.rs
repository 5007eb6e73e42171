use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::{
    clients::vector::{VectorDocument, VectorIndex},
    jobs::{IndexDiaryPayload, JOB_INDEX_DIARY},
    models::Job,
    store::DiaryStore,
};

use super::{retry_or_fail, JobExecution, JobHandler};

/// Re-embeds a diary into the vector index; used for repairs and reindexing.
pub struct IndexDiaryJob {
    diaries: Arc<dyn DiaryStore>,
    vector: Option<Arc<dyn VectorIndex>>,
}

impl IndexDiaryJob {
    pub fn new(diaries: Arc<dyn DiaryStore>, vector: Option<Arc<dyn VectorIndex>>) -> Self {
        Self { diaries, vector }
    }
}

#[async_trait]
impl JobHandler for IndexDiaryJob {
    fn job_type(&self) -> &'static str {
        JOB_INDEX_DIARY
    }

    async fn handle(&self, job: &Job) -> JobExecution {
        let payload: IndexDiaryPayload = match serde_json::from_value(job.payload.clone()) {
            Ok(payload) => payload,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("invalid index payload: {err}"),
                }
            }
        };

        let Some(vector) = &self.vector else {
            warn!("vector index not configured; skipping indexing");
            return JobExecution::Success;
        };

        let record = match self.diaries.find_diary(payload.diary_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                info!(diary_id = payload.diary_id, "diary gone before indexing; nothing to do");
                return JobExecution::Success;
            }
            Err(err) => return retry_or_fail(job, format!("failed to load diary: {err}")),
        };

        match vector.upsert(VectorDocument::for_diary(&record)).await {
            Ok(()) => JobExecution::Success,
            Err(err) => retry_or_fail(job, format!("vector upsert failed: {err}")),
        }
    }
}
