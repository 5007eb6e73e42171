use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    jobs::{new_job, retry_at, STATUS_FAILED, STATUS_PROCESSING, STATUS_QUEUED, STATUS_SUCCEEDED},
    models::{
        Diary, DiaryArchive, DiaryChanges, DiaryImage, DiaryRecord, Job, NewDiaryRecord,
        NewPhotoMetadata, NewRecapRecord, NewWalkRoute, PhotoMetadata, Recap, RecapHighlight,
        RecapRecord, RecapStatus, WalkRoute,
    },
};

use super::{
    DiaryStore, JobQueue, LocationStore, OutboxMessage, PetOwner, PhotoMetadataStore,
    RecapStore, StoreResult,
};

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    diaries: BTreeMap<i64, Diary>,
    images: Vec<DiaryImage>,
    archives: Vec<DiaryArchive>,
    metadata: Vec<PhotoMetadata>,
    recaps: BTreeMap<i64, Recap>,
    highlights: Vec<RecapHighlight>,
    walks: Vec<WalkRoute>,
    jobs: Vec<Job>,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn record(&self, diary: &Diary) -> DiaryRecord {
        let mut images: Vec<DiaryImage> = self
            .images
            .iter()
            .filter(|image| image.diary_id == diary.id)
            .cloned()
            .collect();
        images.sort_by_key(|image| (image.img_order, image.id));
        let archive_ids = self
            .archives
            .iter()
            .filter(|link| link.diary_id == diary.id)
            .map(|link| link.archive_id)
            .collect();
        DiaryRecord {
            diary: diary.clone(),
            images,
            archive_ids,
        }
    }

    fn push_job(&mut self, job_type: &str, payload: Value) -> Job {
        let row = new_job(job_type, payload, None);
        let now = Utc::now().naive_utc();
        let job = Job {
            id: row.id,
            job_type: row.job_type,
            payload: row.payload,
            status: row.status,
            attempts: 0,
            run_after: row.run_after,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        self.jobs.push(job.clone());
        job
    }

    fn insert_recap(&mut self, record: &NewRecapRecord) -> RecapRecord {
        let now = Utc::now().naive_utc();
        let id = self.next_id();
        let new = &record.recap;
        let recap = Recap {
            id,
            pet_id: new.pet_id,
            user_id: new.user_id,
            title: new.title.clone(),
            summary: new.summary.clone(),
            period_start: new.period_start,
            period_end: new.period_end,
            status: new.status,
            image_urls: new.image_urls.clone(),
            moment_count: new.moment_count,
            created_at: now,
            updated_at: now,
        };
        self.recaps.insert(id, recap.clone());

        let mut highlights = Vec::new();
        for row in record.highlight_rows(id) {
            let highlight = RecapHighlight {
                id: self.next_id(),
                recap_id: row.recap_id,
                position: row.position,
                title: row.title,
                content: row.content,
            };
            self.highlights.push(highlight.clone());
            highlights.push(highlight);
        }
        RecapRecord { recap, highlights }
    }

    fn remove_recap(&mut self, recap_id: i64) -> bool {
        self.highlights.retain(|highlight| highlight.recap_id != recap_id);
        self.recaps.remove(&recap_id).is_some()
    }

    fn job_mut(&mut self, job_id: Uuid) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|job| job.id == job_id)
    }
}

/// In-process adapter for every store port. Holds no connection, so tests
/// and database-less runs share it.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn diary_count(&self) -> usize {
        self.state.lock().await.diaries.len()
    }

    pub async fn image_count(&self) -> usize {
        self.state.lock().await.images.len()
    }

    pub async fn archive_link_count(&self) -> usize {
        self.state.lock().await.archives.len()
    }

    pub async fn metadata_count(&self) -> usize {
        self.state.lock().await.metadata.len()
    }

    pub async fn recaps(&self) -> Vec<Recap> {
        self.state.lock().await.recaps.values().cloned().collect()
    }

    pub async fn jobs(&self) -> Vec<Job> {
        self.state.lock().await.jobs.clone()
    }

    pub async fn jobs_of_type(&self, job_type: &str) -> Vec<Job> {
        self.state
            .lock()
            .await
            .jobs
            .iter()
            .filter(|job| job.job_type == job_type)
            .cloned()
            .collect()
    }

    /// Inserts a walk point with an explicit timestamp.
    pub async fn insert_point_at(
        &self,
        point: NewWalkRoute,
        created_at: NaiveDateTime,
    ) -> WalkRoute {
        let mut state = self.state.lock().await;
        let route = WalkRoute {
            id: state.next_id(),
            user_id: point.user_id,
            latitude: point.latitude,
            longitude: point.longitude,
            created_at,
        };
        state.walks.push(route.clone());
        route
    }
}

#[async_trait]
impl DiaryStore for MemoryStore {
    async fn create_diary(
        &self,
        record: NewDiaryRecord,
        outbox: OutboxMessage,
    ) -> StoreResult<DiaryRecord> {
        let mut state = self.state.lock().await;
        let now = Utc::now().naive_utc();
        let new = record.diary;
        let diary = Diary {
            id: state.next_id(),
            user_id: new.user_id,
            pet_id: new.pet_id,
            title: new.title,
            content: new.content,
            diary_date: new.diary_date,
            visibility: new.visibility,
            is_ai_gen: new.is_ai_gen,
            weather: new.weather,
            mood: new.mood,
            location_name: new.location_name,
            latitude: new.latitude,
            longitude: new.longitude,
            created_at: now,
            updated_at: now,
        };
        state.diaries.insert(diary.id, diary.clone());

        for draft in &record.images {
            let row = draft.attach(diary.id, diary.user_id);
            let image = DiaryImage {
                id: state.next_id(),
                diary_id: row.diary_id,
                user_id: row.user_id,
                image_url: row.image_url,
                img_order: row.img_order,
                main_image: row.main_image,
                source: row.source,
                created_at: now,
            };
            state.images.push(image);
        }
        for archive_id in &record.archive_ids {
            let link = DiaryArchive {
                id: state.next_id(),
                diary_id: diary.id,
                archive_id: *archive_id,
                created_at: now,
            };
            state.archives.push(link);
        }

        let saved = state.record(&diary);
        state.push_job(outbox.job_type, outbox.render(&saved));
        Ok(saved)
    }

    async fn find_diary(&self, diary_id: i64) -> StoreResult<Option<DiaryRecord>> {
        let state = self.state.lock().await;
        Ok(state.diaries.get(&diary_id).map(|diary| state.record(diary)))
    }

    async fn update_diary(
        &self,
        diary_id: i64,
        changes: DiaryChanges,
        outbox: OutboxMessage,
    ) -> StoreResult<Option<DiaryRecord>> {
        let mut state = self.state.lock().await;
        let Some(diary) = state.diaries.get_mut(&diary_id) else {
            return Ok(None);
        };
        changes.apply_to(diary);
        if changes.updated_at.is_none() {
            diary.updated_at = Utc::now().naive_utc();
        }
        let diary = diary.clone();

        let record = state.record(&diary);
        state.push_job(outbox.job_type, outbox.render(&record));
        Ok(Some(record))
    }

    async fn delete_diary(
        &self,
        diary_id: i64,
        outbox: OutboxMessage,
    ) -> StoreResult<Option<DiaryRecord>> {
        let mut state = self.state.lock().await;
        let Some(diary) = state.diaries.remove(&diary_id) else {
            return Ok(None);
        };
        let record = state.record(&diary);
        state.images.retain(|image| image.diary_id != diary_id);
        state.archives.retain(|link| link.diary_id != diary_id);
        state.push_job(outbox.job_type, outbox.render(&record));
        Ok(Some(record))
    }

    async fn diaries_for_pet(
        &self,
        pet_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StoreResult<Vec<DiaryRecord>> {
        let state = self.state.lock().await;
        let mut diaries: Vec<&Diary> = state
            .diaries
            .values()
            .filter(|diary| diary.pet_id == pet_id)
            .filter(|diary| diary.diary_date >= start && diary.diary_date <= end)
            .collect();
        diaries.sort_by_key(|diary| (diary.diary_date, diary.id));
        Ok(diaries.into_iter().map(|diary| state.record(diary)).collect())
    }

    async fn diaries_for_user_on(
        &self,
        user_id: i64,
        date: NaiveDate,
    ) -> StoreResult<Vec<DiaryRecord>> {
        let state = self.state.lock().await;
        let mut diaries: Vec<&Diary> = state
            .diaries
            .values()
            .filter(|diary| diary.user_id == user_id && diary.diary_date == date)
            .collect();
        diaries.sort_by_key(|diary| (diary.created_at, diary.id));
        Ok(diaries.into_iter().map(|diary| state.record(diary)).collect())
    }

    async fn ai_diaries_for_user(&self, user_id: i64) -> StoreResult<Vec<DiaryRecord>> {
        let state = self.state.lock().await;
        let mut diaries: Vec<&Diary> = state
            .diaries
            .values()
            .filter(|diary| diary.user_id == user_id && diary.is_ai_gen)
            .collect();
        diaries.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(diaries.into_iter().map(|diary| state.record(diary)).collect())
    }

    async fn active_pets(&self, start: NaiveDate, end: NaiveDate) -> StoreResult<Vec<PetOwner>> {
        let state = self.state.lock().await;
        let pairs: BTreeSet<PetOwner> = state
            .diaries
            .values()
            .filter(|diary| diary.diary_date >= start && diary.diary_date <= end)
            .map(|diary| PetOwner {
                pet_id: diary.pet_id,
                user_id: diary.user_id,
            })
            .collect();
        Ok(pairs.into_iter().collect())
    }

    async fn diary_ids(&self) -> StoreResult<Vec<i64>> {
        Ok(self.state.lock().await.diaries.keys().copied().collect())
    }
}

#[async_trait]
impl PhotoMetadataStore for MemoryStore {
    async fn save_metadata(&self, rows: Vec<NewPhotoMetadata>) -> StoreResult<usize> {
        let mut state = self.state.lock().await;
        let count = rows.len();
        for row in rows {
            let entry = PhotoMetadata {
                id: state.next_id(),
                image_id: row.image_id,
                metadata: row.metadata,
                created_at: Utc::now().naive_utc(),
            };
            state.metadata.push(entry);
        }
        Ok(count)
    }

    async fn metadata_for_images(&self, image_ids: &[i64]) -> StoreResult<HashMap<i64, Value>> {
        let state = self.state.lock().await;
        Ok(state
            .metadata
            .iter()
            .filter(|row| image_ids.contains(&row.image_id))
            .map(|row| (row.image_id, row.metadata.clone()))
            .collect())
    }

    async fn delete_for_images(&self, image_ids: &[i64]) -> StoreResult<usize> {
        let mut state = self.state.lock().await;
        let before = state.metadata.len();
        state.metadata.retain(|row| !image_ids.contains(&row.image_id));
        Ok(before - state.metadata.len())
    }
}

#[async_trait]
impl RecapStore for MemoryStore {
    async fn create_recap(&self, record: NewRecapRecord) -> StoreResult<RecapRecord> {
        Ok(self.state.lock().await.insert_recap(&record))
    }

    async fn find_recap(&self, recap_id: i64) -> StoreResult<Option<RecapRecord>> {
        let state = self.state.lock().await;
        Ok(state.recaps.get(&recap_id).map(|recap| {
            let mut highlights: Vec<RecapHighlight> = state
                .highlights
                .iter()
                .filter(|highlight| highlight.recap_id == recap_id)
                .cloned()
                .collect();
            highlights.sort_by_key(|highlight| highlight.position);
            RecapRecord {
                recap: recap.clone(),
                highlights,
            }
        }))
    }

    async fn recaps_for_user(&self, user_id: i64) -> StoreResult<Vec<Recap>> {
        let state = self.state.lock().await;
        Ok(newest_first(
            state.recaps.values().filter(|recap| recap.user_id == user_id),
        ))
    }

    async fn recaps_for_pet(&self, pet_id: i64) -> StoreResult<Vec<Recap>> {
        let state = self.state.lock().await;
        Ok(newest_first(
            state.recaps.values().filter(|recap| recap.pet_id == pet_id),
        ))
    }

    async fn waiting_recaps(&self) -> StoreResult<Vec<Recap>> {
        let state = self.state.lock().await;
        Ok(state
            .recaps
            .values()
            .filter(|recap| recap.status == RecapStatus::Waiting)
            .cloned()
            .collect())
    }

    async fn replace_waiting(
        &self,
        waiting_id: i64,
        record: NewRecapRecord,
    ) -> StoreResult<Option<RecapRecord>> {
        let mut state = self.state.lock().await;
        let is_waiting = state
            .recaps
            .get(&waiting_id)
            .is_some_and(|recap| recap.status == RecapStatus::Waiting);
        if !is_waiting {
            return Ok(None);
        }
        state.remove_recap(waiting_id);
        Ok(Some(state.insert_recap(&record)))
    }
}

fn newest_first<'a>(recaps: impl Iterator<Item = &'a Recap>) -> Vec<Recap> {
    let mut recaps: Vec<Recap> = recaps.cloned().collect();
    recaps.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
    recaps
}

#[async_trait]
impl LocationStore for MemoryStore {
    async fn append_point(&self, point: NewWalkRoute) -> StoreResult<WalkRoute> {
        Ok(self.insert_point_at(point, Utc::now().naive_utc()).await)
    }

    async fn first_point_between(
        &self,
        user_id: i64,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> StoreResult<Option<WalkRoute>> {
        let state = self.state.lock().await;
        Ok(state
            .walks
            .iter()
            .filter(|point| point.user_id == user_id)
            .filter(|point| point.created_at >= from && point.created_at < to)
            .min_by_key(|point| (point.created_at, point.id))
            .cloned())
    }
}

#[async_trait]
impl JobQueue for MemoryStore {
    async fn enqueue(&self, job_type: &str, payload: Value) -> StoreResult<Job> {
        Ok(self.state.lock().await.push_job(job_type, payload))
    }

    async fn reserve(&self, job_types: &[&'static str]) -> StoreResult<Option<Job>> {
        let mut state = self.state.lock().await;
        let now = Utc::now().naive_utc();
        let next = state
            .jobs
            .iter_mut()
            .filter(|job| job.status == STATUS_QUEUED)
            .filter(|job| job.run_after <= now)
            .filter(|job| job_types.iter().any(|job_type| *job_type == job.job_type))
            .min_by_key(|job| job.run_after);
        Ok(next.map(|job| {
            job.status = STATUS_PROCESSING.to_string();
            job.attempts += 1;
            job.updated_at = now;
            job.clone()
        }))
    }

    async fn complete(&self, job_id: Uuid) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if let Some(job) = state.job_mut(job_id) {
            job.status = STATUS_SUCCEEDED.to_string();
            job.last_error = None;
            job.updated_at = Utc::now().naive_utc();
        }
        Ok(())
    }

    async fn retry(&self, job_id: Uuid, delay: Duration, error: &str) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if let Some(job) = state.job_mut(job_id) {
            job.status = STATUS_QUEUED.to_string();
            job.run_after = retry_at(delay);
            job.last_error = Some(error.to_string());
            job.updated_at = Utc::now().naive_utc();
        }
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if let Some(job) = state.job_mut(job_id) {
            job.status = STATUS_FAILED.to_string();
            job.last_error = Some(error.to_string());
            job.updated_at = Utc::now().naive_utc();
        }
        Ok(())
    }
}
