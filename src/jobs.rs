//! Postgres-backed job queue. Doubles as the outbox: rows written in the same
//! transaction as a diary change are delivered by the worker after commit.

use std::time::Duration;

use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Job, NewJob};
use crate::schema::jobs;

pub const STATUS_QUEUED: &str = "queued";
pub const STATUS_PROCESSING: &str = "processing";
pub const STATUS_SUCCEEDED: &str = "succeeded";
pub const STATUS_FAILED: &str = "failed";

pub const JOB_PUBLISH_DIARY_EVENT: &str = "publish-diary-event";
pub const JOB_INDEX_DIARY: &str = "index-diary";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDiaryPayload {
    pub diary_id: i64,
}

#[derive(Debug, Error)]
pub enum JobQueueError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

pub type JobQueueResult<T> = Result<T, JobQueueError>;

/// Builds the row without touching the database, so in-memory queues share it.
pub fn new_job(job_type: &str, payload: Value, run_after: Option<NaiveDateTime>) -> NewJob {
    NewJob {
        id: Uuid::new_v4(),
        job_type: job_type.to_string(),
        payload,
        status: STATUS_QUEUED.to_string(),
        run_after: run_after.unwrap_or_else(|| Utc::now().naive_utc()),
    }
}

pub fn retry_at(delay: Duration) -> NaiveDateTime {
    let delay = ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::seconds(30));
    (Utc::now() + delay).naive_utc()
}

pub fn enqueue_job(
    conn: &mut PgConnection,
    job_type: &str,
    payload: Value,
    run_after: Option<NaiveDateTime>,
) -> JobQueueResult<Job> {
    let job = diesel::insert_into(jobs::table)
        .values(&new_job(job_type, payload, run_after))
        .get_result(conn)?;
    Ok(job)
}

pub fn reserve_job(conn: &mut PgConnection, job_types: &[&str]) -> JobQueueResult<Option<Job>> {
    let now = Utc::now().naive_utc();

    conn.transaction(|conn| {
        let job_opt = jobs::table
            .filter(jobs::status.eq(STATUS_QUEUED))
            .filter(jobs::run_after.le(now))
            .filter(jobs::job_type.eq_any(job_types))
            .order(jobs::run_after.asc())
            .for_update()
            .skip_locked()
            .first::<Job>(conn)
            .optional()?;

        match job_opt {
            Some(job) => {
                let reserved = diesel::update(jobs::table.find(job.id))
                    .set((
                        jobs::status.eq(STATUS_PROCESSING),
                        jobs::attempts.eq(job.attempts + 1),
                        jobs::updated_at.eq(now),
                    ))
                    .get_result::<Job>(conn)?;
                Ok::<Option<Job>, diesel::result::Error>(Some(reserved))
            }
            None => Ok(None),
        }
    })
    .map_err(JobQueueError::from)
}

pub fn mark_job_succeeded(conn: &mut PgConnection, job_id: Uuid) -> JobQueueResult<()> {
    diesel::update(jobs::table.find(job_id))
        .set((
            jobs::status.eq(STATUS_SUCCEEDED),
            jobs::last_error.eq::<Option<String>>(None),
            jobs::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    Ok(())
}

pub fn retry_job_after(
    conn: &mut PgConnection,
    job_id: Uuid,
    delay: Duration,
    error_message: &str,
) -> JobQueueResult<()> {
    diesel::update(jobs::table.find(job_id))
        .set((
            jobs::status.eq(STATUS_QUEUED),
            jobs::run_after.eq(retry_at(delay)),
            jobs::last_error.eq(Some(error_message.to_string())),
            jobs::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    Ok(())
}

pub fn mark_job_failed(
    conn: &mut PgConnection,
    job_id: Uuid,
    error_message: &str,
) -> JobQueueResult<()> {
    diesel::update(jobs::table.find(job_id))
        .set((
            jobs::status.eq(STATUS_FAILED),
            jobs::last_error.eq(Some(error_message.to_string())),
            jobs::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    Ok(())
}

/// Linear backoff capped at ten minutes.
pub fn backoff_for_attempt(attempts: i32) -> Duration {
    let attempts = attempts.max(1) as u64;
    Duration::from_secs((attempts * 30).min(600))
}
