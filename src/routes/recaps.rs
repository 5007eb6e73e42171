use axum::extract::{Json, Path, Query, State};
use axum::http::StatusCode;
use chrono::Datelike;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::AppResult;
use crate::services::{
    recap::{GenerateRecapRequest, RecapDetailView, RecapSummaryView},
    today,
};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleQuery {
    pub pet_id: i64,
    pub user_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerQuery {
    pub user_id: i64,
}

pub async fn schedule_auto(
    State(state): State<AppState>,
    Query(query): Query<ScheduleQuery>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let saved = state
        .recaps
        .schedule_next_month(query.pet_id, query.user_id, today())
        .await?;
    let start = saved.recap.period_start;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "recapId": saved.recap.id,
            "message": format!("다음 달({}월)의 리캡이 예약되었습니다.", start.month()),
            "scheduledDate": start,
        })),
    ))
}

pub async fn generate_manual(
    State(state): State<AppState>,
    Json(payload): Json<GenerateRecapRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let target = payload.target;
    let saved = state.recaps.generate(payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "recapId": saved.recap.id,
            "message": format!(
                "선택하신 기간({} ~ {})의 추억을 분석하여 리캡을 생성했습니다.",
                target.period_start, target.period_end
            ),
        })),
    ))
}

pub async fn get_recap(
    State(state): State<AppState>,
    Path(recap_id): Path<i64>,
    Query(query): Query<OwnerQuery>,
) -> AppResult<Json<RecapDetailView>> {
    let record = state.recaps.get(recap_id, query.user_id).await?;
    Ok(Json(RecapDetailView::from(&record)))
}

pub async fn list_for_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> AppResult<Json<Vec<RecapSummaryView>>> {
    let recaps = state.recaps.list_for_user(user_id).await?;
    Ok(Json(recaps.iter().map(RecapSummaryView::from).collect()))
}

pub async fn list_for_pet(
    State(state): State<AppState>,
    Path(pet_id): Path<i64>,
) -> AppResult<Json<Vec<RecapSummaryView>>> {
    let recaps = state.recaps.list_for_pet(pet_id).await?;
    Ok(Json(recaps.iter().map(RecapSummaryView::from).collect()))
}
