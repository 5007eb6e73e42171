use std::sync::Arc;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{
    clients::{
        ai::{ContentGenerator, RecapPrompt},
        pets::PetDirectory,
    },
    error::{ServiceError, ServiceResult},
    models::{
        DiaryRecord, NewRecap, NewRecapRecord, Recap, RecapHighlight, RecapRecord, RecapStatus,
    },
    store::{DiaryStore, RecapStore},
};

pub const MAX_RECAP_IMAGES: usize = 8;
pub const WAITING_TITLE: &str = "리캡 생성 예정";
pub const WAITING_SUMMARY: &str = "다음 달 리캡이 자동으로 생성될 예정입니다.";

/// Keeps at most eight main-image URLs in random order.
pub fn sample_main_images<R: Rng + ?Sized>(records: &[DiaryRecord], rng: &mut R) -> Vec<String> {
    let mut urls: Vec<String> = records
        .iter()
        .flat_map(|record| record.images.iter())
        .filter(|image| image.main_image)
        .map(|image| image.image_url.clone())
        .collect();
    urls.shuffle(rng);
    urls.truncate(MAX_RECAP_IMAGES);
    urls
}

pub fn month_bounds(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let start = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some((start, next.pred_opt()?))
}

pub fn previous_month(today: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
    let last_of_previous = today.with_day(1)?.pred_opt()?;
    month_bounds(last_of_previous.year(), last_of_previous.month())
}

pub fn next_month(today: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
    let (_, end) = month_bounds(today.year(), today.month())?;
    let first_of_next = end.succ_opt()?;
    month_bounds(first_of_next.year(), first_of_next.month())
}

/// One pet's recap window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecapTarget {
    pub pet_id: i64,
    pub user_id: i64,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRecapRequest {
    #[serde(flatten)]
    pub target: RecapTarget,
    pub pet_name: Option<String>,
}

#[derive(Debug)]
pub enum Promotion {
    Generated(RecapRecord),
    /// No diaries in the window yet; the placeholder stays WAITING.
    Skipped,
    /// Someone else replaced the placeholder first.
    Superseded,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecapSummaryView {
    pub recap_id: i64,
    pub pet_id: i64,
    pub title: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub status: RecapStatus,
    pub main_image_url: Option<String>,
    pub moment_count: i32,
    pub created_at: NaiveDateTime,
}

impl From<&Recap> for RecapSummaryView {
    fn from(recap: &Recap) -> Self {
        Self {
            recap_id: recap.id,
            pet_id: recap.pet_id,
            title: recap.title.clone(),
            period_start: recap.period_start,
            period_end: recap.period_end,
            status: recap.status,
            main_image_url: recap.image_url_list().into_iter().next(),
            moment_count: recap.moment_count,
            created_at: recap.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HighlightView {
    pub title: String,
    pub content: String,
}

impl From<&RecapHighlight> for HighlightView {
    fn from(highlight: &RecapHighlight) -> Self {
        Self {
            title: highlight.title.clone(),
            content: highlight.content.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecapDetailView {
    pub recap_id: i64,
    pub pet_id: i64,
    pub user_id: i64,
    pub title: String,
    pub summary: Option<String>,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub status: RecapStatus,
    pub image_urls: Vec<String>,
    pub moment_count: i32,
    pub highlights: Vec<HighlightView>,
    pub created_at: NaiveDateTime,
}

impl From<&RecapRecord> for RecapDetailView {
    fn from(record: &RecapRecord) -> Self {
        let recap = &record.recap;
        Self {
            recap_id: recap.id,
            pet_id: recap.pet_id,
            user_id: recap.user_id,
            title: recap.title.clone(),
            summary: recap.summary.clone(),
            period_start: recap.period_start,
            period_end: recap.period_end,
            status: recap.status,
            image_urls: recap.image_url_list(),
            moment_count: recap.moment_count,
            highlights: record.highlights.iter().map(HighlightView::from).collect(),
            created_at: recap.created_at,
        }
    }
}

pub struct RecapService {
    diaries: Arc<dyn DiaryStore>,
    recaps: Arc<dyn RecapStore>,
    generator: Arc<dyn ContentGenerator>,
    pets: Option<Arc<dyn PetDirectory>>,
    placeholder_name: String,
    rng: Mutex<StdRng>,
}

impl RecapService {
    pub fn new(
        diaries: Arc<dyn DiaryStore>,
        recaps: Arc<dyn RecapStore>,
        generator: Arc<dyn ContentGenerator>,
        pets: Option<Arc<dyn PetDirectory>>,
        placeholder_name: String,
    ) -> Self {
        Self {
            diaries,
            recaps,
            generator,
            pets,
            placeholder_name,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn pets(&self) -> Option<&Arc<dyn PetDirectory>> {
        self.pets.as_ref()
    }

    /// Aggregates the window into a GENERATED recap without persisting it.
    pub async fn build_generated(
        &self,
        target: RecapTarget,
        pet_name: Option<String>,
    ) -> ServiceResult<NewRecapRecord> {
        if target.period_start > target.period_end {
            return Err(ServiceError::invalid("periodStart must not be after periodEnd"));
        }

        let records = self
            .diaries
            .diaries_for_pet(target.pet_id, target.period_start, target.period_end)
            .await?;
        if records.is_empty() {
            return Err(ServiceError::EmptyPeriod {
                pet_id: target.pet_id,
                start: target.period_start,
                end: target.period_end,
            });
        }

        let image_urls = {
            let mut rng = self.rng.lock().await;
            sample_main_images(&records, &mut *rng)
        };

        let prompt = RecapPrompt {
            pet_name: self.display_name(target.pet_id, pet_name).await,
            year: target.period_start.year(),
            month: target.period_start.month(),
            entries: records
                .iter()
                .filter_map(|record| record.diary.content.clone())
                .filter(|content| !content.trim().is_empty())
                .collect(),
        };
        let digest = self.generator.summarize_month(&prompt).await?;

        Ok(NewRecapRecord {
            recap: NewRecap {
                pet_id: target.pet_id,
                user_id: target.user_id,
                title: digest.title,
                summary: Some(digest.summary),
                period_start: target.period_start,
                period_end: target.period_end,
                status: RecapStatus::Generated,
                image_urls: Value::from(image_urls),
                moment_count: records.len() as i32,
            },
            highlights: digest.highlights,
        })
    }

    pub async fn generate(&self, request: GenerateRecapRequest) -> ServiceResult<RecapRecord> {
        let target = request.target;
        let record = self.build_generated(target, request.pet_name).await?;
        let saved = self.recaps.create_recap(record).await?;
        info!(
            recap_id = saved.recap.id,
            pet_id = target.pet_id,
            moments = saved.recap.moment_count,
            "recap generated"
        );
        Ok(saved)
    }

    /// Placeholder filled in later by the scheduler; no model call.
    pub async fn create_waiting(&self, target: RecapTarget) -> ServiceResult<RecapRecord> {
        if target.period_start > target.period_end {
            return Err(ServiceError::invalid("periodStart must not be after periodEnd"));
        }
        let record = NewRecapRecord {
            recap: NewRecap {
                pet_id: target.pet_id,
                user_id: target.user_id,
                title: WAITING_TITLE.to_string(),
                summary: Some(WAITING_SUMMARY.to_string()),
                period_start: target.period_start,
                period_end: target.period_end,
                status: RecapStatus::Waiting,
                image_urls: Value::Array(Vec::new()),
                moment_count: 0,
            },
            highlights: Vec::new(),
        };
        let saved = self.recaps.create_recap(record).await?;
        info!(recap_id = saved.recap.id, pet_id = target.pet_id, "waiting recap scheduled");
        Ok(saved)
    }

    pub async fn schedule_next_month(
        &self,
        pet_id: i64,
        user_id: i64,
        today: NaiveDate,
    ) -> ServiceResult<RecapRecord> {
        let (period_start, period_end) =
            next_month(today).ok_or_else(|| ServiceError::invalid("date out of range"))?;
        self.create_waiting(RecapTarget {
            pet_id,
            user_id,
            period_start,
            period_end,
        })
        .await
    }

    pub async fn promote(&self, waiting: &Recap) -> ServiceResult<Promotion> {
        let target = RecapTarget {
            pet_id: waiting.pet_id,
            user_id: waiting.user_id,
            period_start: waiting.period_start,
            period_end: waiting.period_end,
        };
        let record = match self.build_generated(target, None).await {
            Ok(record) => record,
            Err(ServiceError::EmptyPeriod { .. }) => return Ok(Promotion::Skipped),
            Err(err) => return Err(err),
        };

        match self.recaps.replace_waiting(waiting.id, record).await? {
            Some(saved) => {
                info!(
                    waiting_id = waiting.id,
                    recap_id = saved.recap.id,
                    "waiting recap promoted"
                );
                Ok(Promotion::Generated(saved))
            }
            None => Ok(Promotion::Superseded),
        }
    }

    pub async fn get(&self, recap_id: i64, user_id: i64) -> ServiceResult<RecapRecord> {
        self.recaps
            .find_recap(recap_id)
            .await?
            .filter(|record| record.recap.user_id == user_id)
            .ok_or_else(|| ServiceError::not_found(format!("recap {recap_id}")))
    }

    pub async fn list_for_user(&self, user_id: i64) -> ServiceResult<Vec<Recap>> {
        Ok(self.recaps.recaps_for_user(user_id).await?)
    }

    pub async fn list_for_pet(&self, pet_id: i64) -> ServiceResult<Vec<Recap>> {
        Ok(self.recaps.recaps_for_pet(pet_id).await?)
    }

    async fn display_name(&self, pet_id: i64, requested: Option<String>) -> String {
        if let Some(name) = requested.filter(|name| !name.trim().is_empty()) {
            return name;
        }
        if let Some(pets) = &self.pets {
            match pets.find_pet(pet_id).await {
                Ok(Some(profile)) => return profile.pet_name,
                Ok(None) => {}
                Err(err) => {
                    warn!(pet_id, error = %err, "pet lookup failed; using placeholder name")
                }
            }
        }
        self.placeholder_name.clone()
    }
}
