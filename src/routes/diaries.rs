use axum::extract::{Json, Multipart, Path, Query, State};
use axum::http::StatusCode;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::clients::archive::ImageUpload;
use crate::error::{AppError, AppResult};
use crate::services::{
    diary::{
        DiaryPreview, DiaryView, ImageInput, PreviewRequest, SaveDiaryRequest, UpdateDiaryRequest,
    },
    today, Coordinates,
};
use crate::state::AppState;

fn multipart_error(err: impl std::fmt::Display) -> AppError {
    error!(error = %err, "invalid multipart data");
    AppError::bad_request(format!("invalid multipart data: {err}"))
}

fn parse_part<T: std::str::FromStr>(name: &str, value: &str) -> AppResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| AppError::bad_request(format!("{name} is not a valid number")))
}

pub async fn preview_diary(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<Json<DiaryPreview>> {
    let mut user_id: Option<i64> = None;
    let mut pet_id: Option<i64> = None;
    let mut request = PreviewRequest::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("imageFiles") => {
                let file_name = field.file_name().unwrap_or("image").to_string();
                let content_type = field.content_type().map(|mime| mime.to_string());
                let bytes = field.bytes().await.map_err(multipart_error)?;
                request.uploads.push(ImageUpload {
                    file_name,
                    content_type,
                    bytes,
                });
            }
            Some("images") => {
                let raw = field.text().await.map_err(multipart_error)?;
                if !raw.trim().is_empty() {
                    let images: Vec<ImageInput> = serde_json::from_str(&raw).map_err(|err| {
                        AppError::bad_request(format!("images must be a JSON array: {err}"))
                    })?;
                    request.images.extend(images);
                }
            }
            Some("userId") => {
                let raw = field.text().await.map_err(multipart_error)?;
                user_id = Some(parse_part("userId", &raw)?);
            }
            Some("petId") => {
                let raw = field.text().await.map_err(multipart_error)?;
                pet_id = Some(parse_part("petId", &raw)?);
            }
            Some("latitude") => {
                let raw = field.text().await.map_err(multipart_error)?;
                request.latitude = Some(parse_part("latitude", &raw)?);
            }
            Some("longitude") => {
                let raw = field.text().await.map_err(multipart_error)?;
                request.longitude = Some(parse_part("longitude", &raw)?);
            }
            Some("date") => {
                request.date = Some(field.text().await.map_err(multipart_error)?);
            }
            _ => {}
        }
    }

    request.user_id = user_id.ok_or_else(|| AppError::bad_request("userId is required"))?;
    request.pet_id = pet_id.ok_or_else(|| AppError::bad_request("petId is required"))?;
    info!(
        user_id = request.user_id,
        pet_id = request.pet_id,
        uploads = request.uploads.len(),
        "diary preview requested"
    );

    let preview = state.diaries.preview(request).await?;
    Ok(Json(preview))
}

pub async fn create_diary(
    State(state): State<AppState>,
    Json(payload): Json<SaveDiaryRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let record = state.diaries.save(payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "diaryId": record.diary.id })),
    ))
}

pub async fn get_diary(
    State(state): State<AppState>,
    Path(diary_id): Path<i64>,
) -> AppResult<Json<DiaryView>> {
    Ok(Json(state.diaries.get(diary_id).await?))
}

pub async fn update_diary(
    State(state): State<AppState>,
    Path(diary_id): Path<i64>,
    Json(payload): Json<UpdateDiaryRequest>,
) -> AppResult<StatusCode> {
    state.diaries.update(diary_id, payload).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_diary(
    State(state): State<AppState>,
    Path(diary_id): Path<i64>,
) -> AppResult<StatusCode> {
    state.diaries.delete(diary_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct WeatherQuery {
    pub latitude: f64,
    pub longitude: f64,
    pub date: Option<NaiveDate>,
}

pub async fn lookup_weather(
    State(state): State<AppState>,
    Query(query): Query<WeatherQuery>,
) -> AppResult<Json<Value>> {
    let coords = Coordinates::from_parts(Some(query.latitude), Some(query.longitude))
        .ok_or_else(|| AppError::bad_request("latitude and longitude must be finite"))?;
    let today = today();
    let date = query.date.unwrap_or(today);
    let weather = state.enricher.weather_or_default(date, today, coords).await;
    Ok(Json(json!({ "weather": weather })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarQuery {
    pub user_id: i64,
    pub date: NaiveDate,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveQuery {
    pub user_id: i64,
}

pub async fn calendar(
    State(state): State<AppState>,
    Query(query): Query<CalendarQuery>,
) -> AppResult<Json<Vec<DiaryView>>> {
    Ok(Json(state.diaries.calendar(query.user_id, query.date).await?))
}

pub async fn ai_archive(
    State(state): State<AppState>,
    Query(query): Query<ArchiveQuery>,
) -> AppResult<Json<Vec<DiaryView>>> {
    Ok(Json(state.diaries.ai_archive(query.user_id).await?))
}
