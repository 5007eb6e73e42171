//! Persistence ports. `postgres` backs them with diesel, `memory` keeps
//! everything in-process for tests and local runs without a database.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    jobs::JobQueueError,
    models::{
        DiaryChanges, DiaryRecord, Job, NewDiaryRecord, NewPhotoMetadata, NewRecapRecord,
        NewWalkRoute, Recap, RecapRecord, WalkRoute,
    },
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("database pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),
    #[error("job queue error: {0}")]
    Queue(#[from] JobQueueError),
    #[error("storage task failed: {0}")]
    Task(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Job written in the same transaction as a diary change. The payload is
/// rendered from the record as it looks inside that transaction.
#[derive(Clone, Copy)]
pub struct OutboxMessage {
    pub job_type: &'static str,
    pub payload: fn(&DiaryRecord) -> Value,
}

impl OutboxMessage {
    pub fn render(&self, record: &DiaryRecord) -> Value {
        (self.payload)(record)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PetOwner {
    pub pet_id: i64,
    pub user_id: i64,
}

#[async_trait]
pub trait DiaryStore: Send + Sync {
    /// Inserts the diary, its images, archive links and the outbox job atomically.
    async fn create_diary(
        &self,
        record: NewDiaryRecord,
        outbox: OutboxMessage,
    ) -> StoreResult<DiaryRecord>;

    async fn find_diary(&self, diary_id: i64) -> StoreResult<Option<DiaryRecord>>;

    async fn update_diary(
        &self,
        diary_id: i64,
        changes: DiaryChanges,
        outbox: OutboxMessage,
    ) -> StoreResult<Option<DiaryRecord>>;

    /// Returns the record as it was before deletion.
    async fn delete_diary(
        &self,
        diary_id: i64,
        outbox: OutboxMessage,
    ) -> StoreResult<Option<DiaryRecord>>;

    /// Inclusive on both ends, ordered by diary date.
    async fn diaries_for_pet(
        &self,
        pet_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StoreResult<Vec<DiaryRecord>>;

    /// Ordered by creation.
    async fn diaries_for_user_on(
        &self,
        user_id: i64,
        date: NaiveDate,
    ) -> StoreResult<Vec<DiaryRecord>>;

    /// AI-generated diaries only, newest first.
    async fn ai_diaries_for_user(&self, user_id: i64) -> StoreResult<Vec<DiaryRecord>>;

    async fn active_pets(&self, start: NaiveDate, end: NaiveDate) -> StoreResult<Vec<PetOwner>>;

    async fn diary_ids(&self) -> StoreResult<Vec<i64>>;
}

#[async_trait]
pub trait PhotoMetadataStore: Send + Sync {
    async fn save_metadata(&self, rows: Vec<NewPhotoMetadata>) -> StoreResult<usize>;

    async fn metadata_for_images(&self, image_ids: &[i64]) -> StoreResult<HashMap<i64, Value>>;

    async fn delete_for_images(&self, image_ids: &[i64]) -> StoreResult<usize>;
}

#[async_trait]
pub trait RecapStore: Send + Sync {
    async fn create_recap(&self, record: NewRecapRecord) -> StoreResult<RecapRecord>;

    async fn find_recap(&self, recap_id: i64) -> StoreResult<Option<RecapRecord>>;

    /// Newest first.
    async fn recaps_for_user(&self, user_id: i64) -> StoreResult<Vec<Recap>>;

    /// Newest first.
    async fn recaps_for_pet(&self, pet_id: i64) -> StoreResult<Vec<Recap>>;

    async fn waiting_recaps(&self) -> StoreResult<Vec<Recap>>;

    /// Deletes the WAITING placeholder and inserts its replacement in one
    /// transaction. `None` when the placeholder is no longer WAITING.
    async fn replace_waiting(
        &self,
        waiting_id: i64,
        record: NewRecapRecord,
    ) -> StoreResult<Option<RecapRecord>>;
}

#[async_trait]
pub trait LocationStore: Send + Sync {
    async fn append_point(&self, point: NewWalkRoute) -> StoreResult<WalkRoute>;

    /// Earliest point with `from <= created_at < to`.
    async fn first_point_between(
        &self,
        user_id: i64,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> StoreResult<Option<WalkRoute>>;
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job_type: &str, payload: Value) -> StoreResult<Job>;

    async fn reserve(&self, job_types: &[&'static str]) -> StoreResult<Option<Job>>;

    async fn complete(&self, job_id: Uuid) -> StoreResult<()>;

    async fn retry(&self, job_id: Uuid, delay: Duration, error: &str) -> StoreResult<()>;

    async fn fail(&self, job_id: Uuid, error: &str) -> StoreResult<()>;
}
