//! Diary publication: preview drafts, atomic saves with outbox events, and
//! best-effort fan-out to the metadata store and the vector index.

use std::{collections::HashMap, sync::Arc};

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::{
    clients::{
        ai::{ContentGenerator, ImageRef},
        archive::{ArchiveClient, ImageUpload},
        events::DiaryEvent,
        pets::PetDirectory,
        vector::{VectorDocument, VectorIndex},
    },
    error::{Degrade, ServiceError, ServiceResult},
    jobs::{IndexDiaryPayload, JOB_INDEX_DIARY, JOB_PUBLISH_DIARY_EVENT},
    models::{
        DiaryChanges, DiaryImage, DiaryRecord, ImageDraft, ImageSource, NewDiary, NewDiaryRecord,
        NewPhotoMetadata, Visibility,
    },
    state::{Collaborators, Stores},
    store::{DiaryStore, JobQueue, OutboxMessage, PhotoMetadataStore},
};

use super::{today, Coordinates, Enricher};

const CREATED: OutboxMessage = OutboxMessage {
    job_type: JOB_PUBLISH_DIARY_EVENT,
    payload: DiaryEvent::created,
};
const UPDATED: OutboxMessage = OutboxMessage {
    job_type: JOB_PUBLISH_DIARY_EVENT,
    payload: DiaryEvent::updated,
};
const DELETED: OutboxMessage = OutboxMessage {
    job_type: JOB_PUBLISH_DIARY_EVENT,
    payload: DiaryEvent::deleted,
};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageInput {
    pub image_url: Option<String>,
    pub img_order: Option<i32>,
    #[serde(default)]
    pub main_image: bool,
    pub source: Option<ImageSource>,
    pub archive_id: Option<i64>,
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedImage {
    pub draft: ImageDraft,
    pub archive_id: Option<i64>,
    pub metadata: Option<Map<String, Value>>,
}

/// Orders images by their requested order (position breaks ties), numbers
/// them from 1 and keeps exactly one main image.
pub fn normalize_images(inputs: Vec<ImageInput>) -> ServiceResult<Vec<NormalizedImage>> {
    let mut indexed: Vec<(usize, ImageInput)> = inputs.into_iter().enumerate().collect();
    indexed.sort_by_key(|(position, input)| {
        (input.img_order.unwrap_or(*position as i32 + 1), *position)
    });

    let main_position = indexed
        .iter()
        .position(|(_, input)| input.main_image)
        .unwrap_or(0);

    indexed
        .into_iter()
        .enumerate()
        .map(|(index, (_, input))| {
            let image_url = input
                .image_url
                .filter(|url| !url.trim().is_empty())
                .ok_or_else(|| ServiceError::invalid("every image needs an imageUrl"))?;
            let source = match input.archive_id {
                Some(_) => ImageSource::Archive,
                None => input.source.unwrap_or(ImageSource::Gallery),
            };
            Ok(NormalizedImage {
                draft: ImageDraft {
                    image_url,
                    img_order: index as i32 + 1,
                    main_image: index == main_position,
                    source,
                },
                archive_id: input.archive_id,
                metadata: input.metadata.filter(|map| !map.is_empty()),
            })
        })
        .collect()
}

fn legacy_images(urls: Vec<String>) -> Vec<ImageInput> {
    urls.into_iter()
        .enumerate()
        .map(|(index, url)| ImageInput {
            image_url: Some(url),
            img_order: Some(index as i32 + 1),
            main_image: index == 0,
            source: Some(ImageSource::Archive),
            ..Default::default()
        })
        .collect()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveDiaryRequest {
    pub user_id: Option<i64>,
    pub pet_id: Option<i64>,
    pub title: Option<String>,
    pub content: Option<String>,
    pub date: Option<NaiveDate>,
    pub visibility: Option<Visibility>,
    #[serde(default)]
    pub is_ai_gen: bool,
    pub weather: Option<String>,
    pub mood: Option<String>,
    pub location_name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub images: Option<Vec<ImageInput>>,
    pub image_urls: Option<Vec<String>>,
    #[serde(default)]
    pub archive_ids: Vec<i64>,
}

impl SaveDiaryRequest {
    fn image_inputs(&mut self) -> Vec<ImageInput> {
        match (self.images.take(), self.image_urls.take()) {
            (Some(images), _) if !images.is_empty() => images,
            (_, Some(urls)) => legacy_images(urls),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDiaryRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub date: Option<NaiveDate>,
    pub visibility: Option<Visibility>,
    pub weather: Option<String>,
    pub mood: Option<String>,
}

impl UpdateDiaryRequest {
    fn into_changes(self) -> DiaryChanges {
        DiaryChanges {
            title: self.title,
            content: self.content,
            diary_date: self.date,
            visibility: self.visibility,
            weather: self.weather,
            mood: self.mood,
            updated_at: Some(Utc::now().naive_utc()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PreviewRequest {
    pub user_id: i64,
    pub pet_id: i64,
    pub images: Vec<ImageInput>,
    pub uploads: Vec<ImageUpload>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub date: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiaryPreview {
    pub title: Option<String>,
    pub content: String,
    pub mood: Option<String>,
    pub weather: Option<String>,
    pub location_name: Option<String>,
    pub date: NaiveDate,
    pub image_urls: Vec<String>,
    pub archive_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageView {
    pub image_id: i64,
    pub image_url: String,
    pub img_order: i32,
    pub main_image: bool,
    pub source: ImageSource,
    pub metadata: Option<Value>,
}

impl ImageView {
    fn new(image: &DiaryImage, metadata: Option<Value>) -> Self {
        Self {
            image_id: image.id,
            image_url: image.image_url.clone(),
            img_order: image.img_order,
            main_image: image.main_image,
            source: image.source,
            metadata,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiaryView {
    pub diary_id: i64,
    pub user_id: i64,
    pub pet_id: i64,
    pub title: Option<String>,
    pub content: Option<String>,
    pub date: NaiveDate,
    pub visibility: Visibility,
    pub is_ai_gen: bool,
    pub weather: Option<String>,
    pub mood: Option<String>,
    pub location_name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub images: Vec<ImageView>,
    pub archive_ids: Vec<i64>,
}

impl DiaryView {
    pub fn new(record: &DiaryRecord, metadata: &HashMap<i64, Value>) -> Self {
        let diary = &record.diary;
        Self {
            diary_id: diary.id,
            user_id: diary.user_id,
            pet_id: diary.pet_id,
            title: diary.title.clone(),
            content: diary.content.clone(),
            date: diary.diary_date,
            visibility: diary.visibility,
            is_ai_gen: diary.is_ai_gen,
            weather: diary.weather.clone(),
            mood: diary.mood.clone(),
            location_name: diary.location_name.clone(),
            latitude: diary.latitude,
            longitude: diary.longitude,
            images: record
                .images
                .iter()
                .map(|image| ImageView::new(image, metadata.get(&image.id).cloned()))
                .collect(),
            archive_ids: record.archive_ids.clone(),
        }
    }
}

pub struct DiaryService {
    diaries: Arc<dyn DiaryStore>,
    metadata: Arc<dyn PhotoMetadataStore>,
    jobs: Arc<dyn JobQueue>,
    archive: Arc<dyn ArchiveClient>,
    generator: Arc<dyn ContentGenerator>,
    vector: Option<Arc<dyn VectorIndex>>,
    pets: Option<Arc<dyn PetDirectory>>,
    enricher: Arc<Enricher>,
    outbox: Arc<Notify>,
}

impl DiaryService {
    pub fn new(
        stores: &Stores,
        collaborators: &Collaborators,
        enricher: Arc<Enricher>,
        outbox: Arc<Notify>,
    ) -> Self {
        Self {
            diaries: stores.diaries.clone(),
            metadata: stores.metadata.clone(),
            jobs: stores.jobs.clone(),
            archive: collaborators.archive.clone(),
            generator: collaborators.generator.clone(),
            vector: collaborators.vector.clone(),
            pets: collaborators.pets.clone(),
            enricher,
            outbox,
        }
    }

    /// Drafts a diary from archived and freshly uploaded photos without
    /// persisting anything locally.
    pub async fn preview(&self, request: PreviewRequest) -> ServiceResult<DiaryPreview> {
        info!(user_id = request.user_id, pet_id = request.pet_id, "drafting diary preview");
        self.ensure_pet_exists(request.pet_id).await?;

        let mut image_urls = Vec::new();
        let mut archive_ids = Vec::new();
        for image in request.images {
            if image.source != Some(ImageSource::Archive) {
                continue;
            }
            if let (Some(url), Some(archive_id)) = (image.image_url, image.archive_id) {
                image_urls.push(url);
                archive_ids.push(archive_id);
            }
        }

        let uploads: Vec<ImageUpload> = request
            .uploads
            .into_iter()
            .filter(|upload| !upload.bytes.is_empty())
            .collect();
        if !uploads.is_empty() {
            let archived = self
                .archive
                .upload(request.user_id, uploads)
                .await
                .map_err(|err| ServiceError::Upstream(format!("archive upload: {err}")))?;
            for item in archived {
                image_urls.push(item.url);
                archive_ids.push(item.archive_id);
            }
        }

        if image_urls.is_empty() {
            return Err(ServiceError::invalid("at least one image is required"));
        }

        let refs: Vec<ImageRef> = image_urls.iter().cloned().map(ImageRef::Url).collect();
        let mut draft = self.generator.draft_diary(&refs).await?;

        let today = today();
        let date = match request.date.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => raw.parse::<NaiveDate>().unwrap_or_else(|_| {
                warn!(date = raw, "unparseable preview date; using today");
                today
            }),
            _ => today,
        };

        if let Some(coords) = Coordinates::from_parts(request.latitude, request.longitude) {
            let lookup = self.enricher.lookup_weather(date, today, coords).await;
            if let Ok(Some(weather)) = lookup.degrade("preview weather") {
                draft.weather = Some(weather);
            }
        }

        Ok(DiaryPreview {
            title: draft.title,
            content: draft.content,
            mood: draft.mood,
            weather: draft.weather,
            location_name: draft.location_name,
            date,
            image_urls,
            archive_ids,
        })
    }

    pub async fn save(&self, mut request: SaveDiaryRequest) -> ServiceResult<DiaryRecord> {
        let user_id = request
            .user_id
            .ok_or_else(|| ServiceError::invalid("userId is required"))?;
        let pet_id = request
            .pet_id
            .ok_or_else(|| ServiceError::invalid("petId is required"))?;

        let images = normalize_images(request.image_inputs())?;
        if images.is_empty() {
            return Err(ServiceError::invalid("at least one image is required"));
        }

        let date = request.date.unwrap_or_else(today);
        let coords = Coordinates::from_parts(request.latitude, request.longitude);
        let given_weather = request.weather.take().filter(|value| !value.is_empty());
        let given_location = request.location_name.take().filter(|value| !value.is_empty());
        let (weather, location_name) = match coords {
            Some(coords) => {
                let weather = async {
                    match given_weather {
                        Some(given) => given,
                        None => self.enricher.weather_or_default(date, today(), coords).await,
                    }
                };
                let location = async {
                    match given_location {
                        Some(given) => Some(given),
                        None => self.enricher.location_or_none(coords).await,
                    }
                };
                let (weather, location) = tokio::join!(weather, location);
                (Some(weather), location)
            }
            None => (given_weather, given_location),
        };

        let mut archive_ids: Vec<i64> = Vec::new();
        for id in request
            .archive_ids
            .iter()
            .copied()
            .chain(images.iter().filter_map(|image| image.archive_id))
        {
            if !archive_ids.contains(&id) {
                archive_ids.push(id);
            }
        }

        let record = NewDiaryRecord {
            diary: NewDiary {
                user_id,
                pet_id,
                title: request.title,
                content: request.content,
                diary_date: date,
                visibility: request.visibility.unwrap_or_default(),
                is_ai_gen: request.is_ai_gen,
                weather,
                mood: request.mood,
                location_name,
                latitude: request.latitude,
                longitude: request.longitude,
            },
            images: images.iter().map(|image| image.draft.clone()).collect(),
            archive_ids,
        };

        let saved = self.diaries.create_diary(record, CREATED).await?;
        self.outbox.notify_one();
        info!(diary_id = saved.diary.id, user_id, pet_id, "diary saved");

        self.save_metadata(&saved, &images).await.degrade("photo metadata")?;
        self.index(&saved).await;

        Ok(saved)
    }

    pub async fn get(&self, diary_id: i64) -> ServiceResult<DiaryView> {
        let record = self
            .diaries
            .find_diary(diary_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("diary {diary_id}")))?;

        let metadata = self.metadata_for(&record.image_ids()).await?;
        Ok(DiaryView::new(&record, &metadata))
    }

    /// Diaries the user dated on `date`, oldest first.
    pub async fn calendar(&self, user_id: i64, date: NaiveDate) -> ServiceResult<Vec<DiaryView>> {
        let records = self.diaries.diaries_for_user_on(user_id, date).await?;
        self.views(records).await
    }

    /// AI-drafted diaries of the user, newest first.
    pub async fn ai_archive(&self, user_id: i64) -> ServiceResult<Vec<DiaryView>> {
        let records = self.diaries.ai_diaries_for_user(user_id).await?;
        self.views(records).await
    }

    async fn views(&self, records: Vec<DiaryRecord>) -> ServiceResult<Vec<DiaryView>> {
        let image_ids: Vec<i64> = records.iter().flat_map(DiaryRecord::image_ids).collect();
        let metadata = self.metadata_for(&image_ids).await?;
        Ok(records
            .iter()
            .map(|record| DiaryView::new(record, &metadata))
            .collect())
    }

    async fn metadata_for(&self, image_ids: &[i64]) -> ServiceResult<HashMap<i64, Value>> {
        if image_ids.is_empty() {
            return Ok(HashMap::new());
        }
        Ok(self
            .metadata
            .metadata_for_images(image_ids)
            .await
            .map_err(|err| ServiceError::SideIndex(format!("metadata lookup: {err}")))
            .degrade("photo metadata")?
            .unwrap_or_default())
    }

    /// Unknown pets are rejected when a pet directory is configured; lookup
    /// failures only warn.
    async fn ensure_pet_exists(&self, pet_id: i64) -> ServiceResult<()> {
        let Some(pets) = &self.pets else {
            return Ok(());
        };
        let found = pets
            .find_pet(pet_id)
            .await
            .map_err(|err| ServiceError::Enrichment(format!("pet lookup: {err}")))
            .degrade("pet lookup")?;
        match found {
            Some(None) => Err(ServiceError::not_found(format!("pet {pet_id}"))),
            _ => Ok(()),
        }
    }

    pub async fn update(
        &self,
        diary_id: i64,
        request: UpdateDiaryRequest,
    ) -> ServiceResult<DiaryRecord> {
        let changes = request.into_changes();
        if changes.is_empty() {
            return Err(ServiceError::invalid("no fields to update"));
        }
        let updated = self
            .diaries
            .update_diary(diary_id, changes, UPDATED)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("diary {diary_id}")))?;
        self.outbox.notify_one();
        info!(diary_id, "diary updated");

        self.index(&updated).await;
        Ok(updated)
    }

    pub async fn delete(&self, diary_id: i64) -> ServiceResult<()> {
        let existing = self
            .diaries
            .find_diary(diary_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("diary {diary_id}")))?;

        let image_ids = existing.image_ids();
        let removed = self
            .metadata
            .delete_for_images(&image_ids)
            .await
            .map_err(|err| ServiceError::SideIndex(format!("metadata delete: {err}")))
            .degrade("photo metadata")?;

        self.diaries
            .delete_diary(diary_id, DELETED)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("diary {diary_id}")))?;
        self.outbox.notify_one();

        info!(
            diary_id,
            user_id = existing.diary.user_id,
            pet_id = existing.diary.pet_id,
            metadata_removed = removed.unwrap_or(0),
            "diary deleted"
        );
        Ok(())
    }

    /// Inline vector write; a failure leaves a repair job behind.
    pub async fn index(&self, record: &DiaryRecord) {
        let Some(vector) = &self.vector else {
            return;
        };
        let diary_id = record.diary.id;
        let result = vector
            .upsert(VectorDocument::for_diary(record))
            .await
            .map_err(|err| ServiceError::SideIndex(format!("vector upsert: {err}")));
        if let Ok(None) = result.degrade("vector index") {
            let payload = json!(IndexDiaryPayload { diary_id });
            if let Err(err) = self.jobs.enqueue(JOB_INDEX_DIARY, payload).await {
                warn!(diary_id, error = %err, "failed to enqueue index repair job");
            } else {
                self.outbox.notify_one();
            }
        }
    }

    /// Metadata rows are matched to stored images by their normalized order.
    async fn save_metadata(
        &self,
        saved: &DiaryRecord,
        images: &[NormalizedImage],
    ) -> ServiceResult<usize> {
        let rows: Vec<NewPhotoMetadata> = images
            .iter()
            .filter_map(|image| {
                let metadata = image.metadata.clone()?;
                let stored = saved
                    .images
                    .iter()
                    .find(|stored| stored.img_order == image.draft.img_order)?;
                Some(NewPhotoMetadata {
                    image_id: stored.id,
                    metadata: Value::Object(metadata),
                })
            })
            .collect();
        if rows.is_empty() {
            return Ok(0);
        }
        self.metadata
            .save_metadata(rows)
            .await
            .map_err(|err| ServiceError::SideIndex(format!("metadata write: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(url: &str, order: Option<i32>, main: bool) -> ImageInput {
        ImageInput {
            image_url: Some(url.into()),
            img_order: order,
            main_image: main,
            ..Default::default()
        }
    }

    #[test]
    fn orders_and_keeps_flagged_main() {
        let images = normalize_images(vec![
            input("c", Some(3), false),
            input("a", Some(1), false),
            input("b", Some(2), true),
        ])
        .unwrap();

        let urls: Vec<_> = images.iter().map(|image| image.draft.image_url.as_str()).collect();
        assert_eq!(urls, vec!["a", "b", "c"]);
        let mains: Vec<_> = images.iter().map(|image| image.draft.main_image).collect();
        assert_eq!(mains, vec![false, true, false]);
    }

    #[test]
    fn first_image_becomes_main_when_none_flagged() {
        let images =
            normalize_images(vec![input("a", None, false), input("b", None, false)]).unwrap();
        assert!(images[0].draft.main_image);
        assert!(!images[1].draft.main_image);
        assert_eq!(images[1].draft.img_order, 2);
    }

    #[test]
    fn only_first_flagged_image_stays_main() {
        let images = normalize_images(vec![
            input("a", Some(1), false),
            input("b", Some(2), true),
            input("c", Some(3), true),
        ])
        .unwrap();
        assert_eq!(images.iter().filter(|image| image.draft.main_image).count(), 1);
        assert!(images[1].draft.main_image);
    }

    #[test]
    fn archive_ids_mark_archive_source() {
        let mut archived = input("a", Some(1), true);
        archived.archive_id = Some(40);
        archived.source = Some(ImageSource::Gallery);
        let images = normalize_images(vec![archived, input("b", Some(2), false)]).unwrap();
        assert_eq!(images[0].draft.source, ImageSource::Archive);
        assert_eq!(images[1].draft.source, ImageSource::Gallery);
    }

    #[test]
    fn rejects_images_without_url() {
        let missing = ImageInput::default();
        assert!(matches!(
            normalize_images(vec![missing]),
            Err(ServiceError::InvalidInput(_))
        ));
    }

    #[test]
    fn legacy_urls_become_archive_images() {
        let mut request = SaveDiaryRequest {
            image_urls: Some(vec!["x".into(), "y".into()]),
            ..Default::default()
        };
        let images = normalize_images(request.image_inputs()).unwrap();
        assert_eq!(images.len(), 2);
        assert!(images[0].draft.main_image);
        assert!(images.iter().all(|image| image.draft.source == ImageSource::Archive));
    }
}
