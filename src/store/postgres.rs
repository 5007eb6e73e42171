use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde_json::Value;
use tokio::task;
use uuid::Uuid;

use crate::{
    db::PgPool,
    jobs::{enqueue_job, mark_job_failed, mark_job_succeeded, reserve_job, retry_job_after},
    models::{
        Diary, DiaryArchive, DiaryChanges, DiaryImage, DiaryRecord, Job, NewDiaryArchive,
        NewDiaryImage, NewDiaryRecord, NewPhotoMetadata, NewRecapRecord, NewWalkRoute,
        PhotoMetadata, Recap, RecapHighlight, RecapRecord, RecapStatus, WalkRoute,
    },
    schema::{
        diaries, diary_archives, diary_images, photo_metadata, recap_highlights, recaps,
        walk_routes,
    },
};

use super::{
    DiaryStore, JobQueue, LocationStore, OutboxMessage, PetOwner, PhotoMetadataStore,
    RecapStore, StoreError, StoreResult,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn run<T, F>(&self, work: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> StoreResult<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            work(&mut conn)
        })
        .await
        .map_err(|err| StoreError::Task(err.to_string()))?
    }
}

fn load_record(conn: &mut PgConnection, diary: Diary) -> QueryResult<DiaryRecord> {
    let images = DiaryImage::belonging_to(&diary)
        .order((diary_images::img_order.asc(), diary_images::id.asc()))
        .load::<DiaryImage>(conn)?;
    let archive_ids = DiaryArchive::belonging_to(&diary)
        .select(diary_archives::archive_id)
        .order(diary_archives::id.asc())
        .load::<i64>(conn)?;
    Ok(DiaryRecord {
        diary,
        images,
        archive_ids,
    })
}

fn load_records(conn: &mut PgConnection, diaries: Vec<Diary>) -> QueryResult<Vec<DiaryRecord>> {
    let images = DiaryImage::belonging_to(&diaries)
        .order((diary_images::img_order.asc(), diary_images::id.asc()))
        .load::<DiaryImage>(conn)?
        .grouped_by(&diaries);
    let archives = DiaryArchive::belonging_to(&diaries)
        .order(diary_archives::id.asc())
        .load::<DiaryArchive>(conn)?
        .grouped_by(&diaries);

    Ok(diaries
        .into_iter()
        .zip(images)
        .zip(archives)
        .map(|((diary, images), archives)| DiaryRecord {
            diary,
            images,
            archive_ids: archives.into_iter().map(|link| link.archive_id).collect(),
        })
        .collect())
}

fn load_recap(conn: &mut PgConnection, recap: Recap) -> QueryResult<RecapRecord> {
    let highlights = RecapHighlight::belonging_to(&recap)
        .order(recap_highlights::position.asc())
        .load::<RecapHighlight>(conn)?;
    Ok(RecapRecord { recap, highlights })
}

fn insert_recap(conn: &mut PgConnection, record: &NewRecapRecord) -> QueryResult<RecapRecord> {
    let recap: Recap = diesel::insert_into(recaps::table)
        .values(&record.recap)
        .get_result(conn)?;
    let rows = record.highlight_rows(recap.id);
    let mut highlights: Vec<RecapHighlight> = if rows.is_empty() {
        Vec::new()
    } else {
        diesel::insert_into(recap_highlights::table)
            .values(&rows)
            .get_results(conn)?
    };
    highlights.sort_by_key(|highlight| highlight.position);
    Ok(RecapRecord { recap, highlights })
}

#[async_trait]
impl DiaryStore for PgStore {
    async fn create_diary(
        &self,
        record: NewDiaryRecord,
        outbox: OutboxMessage,
    ) -> StoreResult<DiaryRecord> {
        self.run(move |conn| {
            conn.transaction::<_, StoreError, _>(|conn| {
                let diary: Diary = diesel::insert_into(diaries::table)
                    .values(&record.diary)
                    .get_result(conn)?;

                let image_rows: Vec<NewDiaryImage> = record
                    .images
                    .iter()
                    .map(|draft| draft.attach(diary.id, diary.user_id))
                    .collect();
                let mut images: Vec<DiaryImage> = diesel::insert_into(diary_images::table)
                    .values(&image_rows)
                    .get_results(conn)?;
                images.sort_by_key(|image| (image.img_order, image.id));

                if !record.archive_ids.is_empty() {
                    let links: Vec<NewDiaryArchive> = record
                        .archive_ids
                        .iter()
                        .map(|archive_id| NewDiaryArchive {
                            diary_id: diary.id,
                            archive_id: *archive_id,
                        })
                        .collect();
                    diesel::insert_into(diary_archives::table)
                        .values(&links)
                        .execute(conn)?;
                }

                let saved = DiaryRecord {
                    diary,
                    images,
                    archive_ids: record.archive_ids.clone(),
                };
                enqueue_job(conn, outbox.job_type, outbox.render(&saved), None)?;
                Ok(saved)
            })
        })
        .await
    }

    async fn find_diary(&self, diary_id: i64) -> StoreResult<Option<DiaryRecord>> {
        self.run(move |conn| {
            let diary = diaries::table
                .find(diary_id)
                .first::<Diary>(conn)
                .optional()?;
            match diary {
                Some(diary) => Ok(Some(load_record(conn, diary)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn update_diary(
        &self,
        diary_id: i64,
        changes: DiaryChanges,
        outbox: OutboxMessage,
    ) -> StoreResult<Option<DiaryRecord>> {
        self.run(move |conn| {
            conn.transaction::<_, StoreError, _>(|conn| {
                let changes = DiaryChanges {
                    updated_at: Some(changes.updated_at.unwrap_or_else(|| Utc::now().naive_utc())),
                    ..changes
                };
                let updated = diesel::update(diaries::table.find(diary_id))
                    .set(&changes)
                    .get_result::<Diary>(conn)
                    .optional()?;
                let Some(diary) = updated else {
                    return Ok(None);
                };

                let record = load_record(conn, diary)?;
                enqueue_job(conn, outbox.job_type, outbox.render(&record), None)?;
                Ok(Some(record))
            })
        })
        .await
    }

    async fn delete_diary(
        &self,
        diary_id: i64,
        outbox: OutboxMessage,
    ) -> StoreResult<Option<DiaryRecord>> {
        self.run(move |conn| {
            conn.transaction::<_, StoreError, _>(|conn| {
                let existing = diaries::table
                    .find(diary_id)
                    .for_update()
                    .first::<Diary>(conn)
                    .optional()?;
                let Some(diary) = existing else {
                    return Ok(None);
                };

                let record = load_record(conn, diary)?;
                // images and archive links go with the diary via ON DELETE CASCADE
                diesel::delete(diaries::table.find(diary_id)).execute(conn)?;
                enqueue_job(conn, outbox.job_type, outbox.render(&record), None)?;
                Ok(Some(record))
            })
        })
        .await
    }

    async fn diaries_for_pet(
        &self,
        pet_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StoreResult<Vec<DiaryRecord>> {
        self.run(move |conn| {
            let diaries = diaries::table
                .filter(diaries::pet_id.eq(pet_id))
                .filter(diaries::diary_date.between(start, end))
                .order((diaries::diary_date.asc(), diaries::id.asc()))
                .load::<Diary>(conn)?;
            Ok(load_records(conn, diaries)?)
        })
        .await
    }

    async fn diaries_for_user_on(
        &self,
        user_id: i64,
        date: NaiveDate,
    ) -> StoreResult<Vec<DiaryRecord>> {
        self.run(move |conn| {
            let diaries = diaries::table
                .filter(diaries::user_id.eq(user_id))
                .filter(diaries::diary_date.eq(date))
                .order((diaries::created_at.asc(), diaries::id.asc()))
                .load::<Diary>(conn)?;
            Ok(load_records(conn, diaries)?)
        })
        .await
    }

    async fn ai_diaries_for_user(&self, user_id: i64) -> StoreResult<Vec<DiaryRecord>> {
        self.run(move |conn| {
            let diaries = diaries::table
                .filter(diaries::user_id.eq(user_id))
                .filter(diaries::is_ai_gen.eq(true))
                .order((diaries::created_at.desc(), diaries::id.desc()))
                .load::<Diary>(conn)?;
            Ok(load_records(conn, diaries)?)
        })
        .await
    }

    async fn active_pets(&self, start: NaiveDate, end: NaiveDate) -> StoreResult<Vec<PetOwner>> {
        self.run(move |conn| {
            let pairs = diaries::table
                .filter(diaries::diary_date.between(start, end))
                .select((diaries::pet_id, diaries::user_id))
                .distinct()
                .order((diaries::pet_id.asc(), diaries::user_id.asc()))
                .load::<(i64, i64)>(conn)?;
            Ok(pairs
                .into_iter()
                .map(|(pet_id, user_id)| PetOwner { pet_id, user_id })
                .collect())
        })
        .await
    }

    async fn diary_ids(&self) -> StoreResult<Vec<i64>> {
        self.run(|conn| {
            Ok(diaries::table
                .select(diaries::id)
                .order(diaries::id.asc())
                .load::<i64>(conn)?)
        })
        .await
    }
}

#[async_trait]
impl PhotoMetadataStore for PgStore {
    async fn save_metadata(&self, rows: Vec<NewPhotoMetadata>) -> StoreResult<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        self.run(move |conn| {
            Ok(diesel::insert_into(photo_metadata::table)
                .values(&rows)
                .execute(conn)?)
        })
        .await
    }

    async fn metadata_for_images(&self, image_ids: &[i64]) -> StoreResult<HashMap<i64, Value>> {
        let image_ids = image_ids.to_vec();
        self.run(move |conn| {
            let rows = photo_metadata::table
                .filter(photo_metadata::image_id.eq_any(&image_ids))
                .order(photo_metadata::id.asc())
                .load::<PhotoMetadata>(conn)?;
            Ok(rows
                .into_iter()
                .map(|row| (row.image_id, row.metadata))
                .collect())
        })
        .await
    }

    async fn delete_for_images(&self, image_ids: &[i64]) -> StoreResult<usize> {
        let image_ids = image_ids.to_vec();
        self.run(move |conn| {
            let targets = photo_metadata::table.filter(photo_metadata::image_id.eq_any(&image_ids));
            Ok(diesel::delete(targets).execute(conn)?)
        })
        .await
    }
}

#[async_trait]
impl RecapStore for PgStore {
    async fn create_recap(&self, record: NewRecapRecord) -> StoreResult<RecapRecord> {
        self.run(move |conn| {
            conn.transaction::<_, StoreError, _>(|conn| Ok(insert_recap(conn, &record)?))
        })
        .await
    }

    async fn find_recap(&self, recap_id: i64) -> StoreResult<Option<RecapRecord>> {
        self.run(move |conn| {
            let recap = recaps::table
                .find(recap_id)
                .first::<Recap>(conn)
                .optional()?;
            match recap {
                Some(recap) => Ok(Some(load_recap(conn, recap)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn recaps_for_user(&self, user_id: i64) -> StoreResult<Vec<Recap>> {
        self.run(move |conn| {
            Ok(recaps::table
                .filter(recaps::user_id.eq(user_id))
                .order((recaps::created_at.desc(), recaps::id.desc()))
                .load::<Recap>(conn)?)
        })
        .await
    }

    async fn recaps_for_pet(&self, pet_id: i64) -> StoreResult<Vec<Recap>> {
        self.run(move |conn| {
            Ok(recaps::table
                .filter(recaps::pet_id.eq(pet_id))
                .order((recaps::created_at.desc(), recaps::id.desc()))
                .load::<Recap>(conn)?)
        })
        .await
    }

    async fn waiting_recaps(&self) -> StoreResult<Vec<Recap>> {
        self.run(|conn| {
            Ok(recaps::table
                .filter(recaps::status.eq(RecapStatus::Waiting))
                .order((recaps::created_at.asc(), recaps::id.asc()))
                .load::<Recap>(conn)?)
        })
        .await
    }

    async fn replace_waiting(
        &self,
        waiting_id: i64,
        record: NewRecapRecord,
    ) -> StoreResult<Option<RecapRecord>> {
        self.run(move |conn| {
            conn.transaction::<_, StoreError, _>(|conn| {
                let removed = diesel::delete(
                    recaps::table
                        .find(waiting_id)
                        .filter(recaps::status.eq(RecapStatus::Waiting)),
                )
                .execute(conn)?;
                if removed == 0 {
                    return Ok(None);
                }
                Ok(Some(insert_recap(conn, &record)?))
            })
        })
        .await
    }
}

#[async_trait]
impl LocationStore for PgStore {
    async fn append_point(&self, point: NewWalkRoute) -> StoreResult<WalkRoute> {
        self.run(move |conn| {
            Ok(diesel::insert_into(walk_routes::table)
                .values(&point)
                .get_result(conn)?)
        })
        .await
    }

    async fn first_point_between(
        &self,
        user_id: i64,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> StoreResult<Option<WalkRoute>> {
        self.run(move |conn| {
            Ok(walk_routes::table
                .filter(walk_routes::user_id.eq(user_id))
                .filter(walk_routes::created_at.ge(from))
                .filter(walk_routes::created_at.lt(to))
                .order((walk_routes::created_at.asc(), walk_routes::id.asc()))
                .first::<WalkRoute>(conn)
                .optional()?)
        })
        .await
    }
}

#[async_trait]
impl JobQueue for PgStore {
    async fn enqueue(&self, job_type: &str, payload: Value) -> StoreResult<Job> {
        let job_type = job_type.to_string();
        self.run(move |conn| Ok(enqueue_job(conn, &job_type, payload, None)?))
            .await
    }

    async fn reserve(&self, job_types: &[&'static str]) -> StoreResult<Option<Job>> {
        let job_types = job_types.to_vec();
        self.run(move |conn| Ok(reserve_job(conn, &job_types)?))
            .await
    }

    async fn complete(&self, job_id: Uuid) -> StoreResult<()> {
        self.run(move |conn| Ok(mark_job_succeeded(conn, job_id)?))
            .await
    }

    async fn retry(&self, job_id: Uuid, delay: Duration, error: &str) -> StoreResult<()> {
        let error = error.to_string();
        self.run(move |conn| Ok(retry_job_after(conn, job_id, delay, &error)?))
            .await
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> StoreResult<()> {
        let error = error.to_string();
        self.run(move |conn| Ok(mark_job_failed(conn, job_id, &error)?))
            .await
    }
}
