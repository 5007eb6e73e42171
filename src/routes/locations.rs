use axum::extract::{Json, Query, State};
use axum::http::StatusCode;
use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::services::location::{LocationInput, LocationView};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub user_id: i64,
    pub date: NaiveDate,
}

pub async fn save_location(
    State(state): State<AppState>,
    Json(payload): Json<LocationInput>,
) -> AppResult<StatusCode> {
    state.locations.save_point(payload).await?;
    Ok(StatusCode::CREATED)
}

pub async fn location_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<LocationView>> {
    state
        .locations
        .representative_location(query.user_id, query.date)
        .await?
        .map(Json)
        .ok_or_else(AppError::not_found)
}
