mod common;

use std::sync::atomic::Ordering;

use anyhow::Result;
use axum::http::StatusCode;
use chrono::{Datelike, NaiveDate};
use common::{json_body, TestApp};
use petlog::models::RecapStatus;
use petlog::services::recap::{next_month, WAITING_TITLE};
use petlog::services::today;
use serde_json::{json, Value};

async fn seed_diaries(app: &TestApp, user_id: i64, pet_id: i64, dates: &[NaiveDate]) -> Result<()> {
    for (index, date) in dates.iter().enumerate() {
        let response = app
            .post_json(
                "/api/diaries",
                &json!({
                    "userId": user_id,
                    "petId": pet_id,
                    "content": format!("{index}번째 기록"),
                    "date": date,
                    "imageUrls": [format!("https://cdn.test/{pet_id}/{index}.jpg")],
                }),
            )
            .await?;
        assert_eq!(response.status(), StatusCode::CREATED);
    }
    Ok(())
}

fn may(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, day).expect("valid date")
}

fn manual_request(pet_id: i64, user_id: i64) -> Value {
    json!({
        "petId": pet_id,
        "userId": user_id,
        "periodStart": "2024-05-01",
        "periodEnd": "2024-05-31",
        "petName": "콩이",
    })
}

#[tokio::test]
async fn manual_generation_over_empty_period_is_not_found() -> Result<()> {
    let app = TestApp::new().await?;

    let response = app
        .post_json("/api/recaps/generate/manual", &manual_request(10, 1))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(app.store.recaps().await.is_empty());
    assert!(app.generator.prompts().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn manual_generation_caps_images_and_counts_moments() -> Result<()> {
    let app = TestApp::new().await?;
    let dates: Vec<NaiveDate> = (1..=10).map(may).collect();
    seed_diaries(&app, 1, 10, &dates).await?;
    seed_diaries(&app, 1, 10, &[NaiveDate::from_ymd_opt(2024, 6, 1).expect("valid date")]).await?;

    let response = app
        .post_json("/api/recaps/generate/manual", &manual_request(10, 1))
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = json_body(response).await?;
    let recap_id = body["recapId"].as_i64().expect("recapId");
    assert!(body["message"]
        .as_str()
        .expect("message")
        .contains("2024-05-01 ~ 2024-05-31"));

    let response = app.get(&format!("/api/recaps/{recap_id}?userId=1")).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let recap: Value = json_body(response).await?;
    assert_eq!(recap["status"], "GENERATED");
    assert_eq!(recap["momentCount"], 10);
    assert_eq!(recap["title"], "2024년 5월의 소중한 기록");
    assert_eq!(recap["highlights"].as_array().map(Vec::len), Some(2));

    let urls = recap["imageUrls"].as_array().expect("imageUrls");
    assert_eq!(urls.len(), 8);
    let mut unique: Vec<&str> = urls.iter().filter_map(Value::as_str).collect();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), 8);
    assert!(unique.iter().all(|url| url.starts_with("https://cdn.test/10/")));

    let prompts = app.generator.prompts().await;
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0].pet_name, "콩이");
    assert_eq!((prompts[0].year, prompts[0].month), (2024, 5));
    assert_eq!(prompts[0].entries.len(), 10);
    Ok(())
}

#[tokio::test]
async fn manual_generation_rejects_inverted_period() -> Result<()> {
    let app = TestApp::new().await?;
    seed_diaries(&app, 1, 10, &[may(3)]).await?;

    let response = app
        .post_json(
            "/api/recaps/generate/manual",
            &json!({
                "petId": 10,
                "userId": 1,
                "periodStart": "2024-05-31",
                "periodEnd": "2024-05-01",
            }),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn generation_failure_writes_nothing() -> Result<()> {
    let app = TestApp::new().await?;
    seed_diaries(&app, 1, 10, &[may(3)]).await?;
    app.generator.fail.store(true, Ordering::SeqCst);

    let response = app
        .post_json("/api/recaps/generate/manual", &manual_request(10, 1))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(app.store.recaps().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn schedule_auto_creates_waiting_recap_for_next_month() -> Result<()> {
    let app = TestApp::new().await?;

    let response = app.post_empty("/api/recaps/schedule/auto?petId=10&userId=1").await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = json_body(response).await?;

    let (start, end) = next_month(today()).expect("next month");
    assert_eq!(body["scheduledDate"], json!(start.to_string()));
    assert_eq!(
        body["message"],
        format!("다음 달({}월)의 리캡이 예약되었습니다.", start.month())
    );

    let recaps = app.store.recaps().await;
    assert_eq!(recaps.len(), 1);
    let waiting = &recaps[0];
    assert_eq!(waiting.status, RecapStatus::Waiting);
    assert_eq!(waiting.title, WAITING_TITLE);
    assert_eq!((waiting.period_start, waiting.period_end), (start, end));
    assert_eq!(waiting.moment_count, 0);
    assert!(app.generator.prompts().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn promotion_waits_until_the_period_has_diaries() -> Result<()> {
    let app = TestApp::new().await?;
    let response = app.post_empty("/api/recaps/schedule/auto?petId=10&userId=1").await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let scheduler = app.state.scheduler();
    let report = scheduler.promote_waiting().await?;
    assert_eq!((report.processed, report.skipped, report.succeeded), (1, 1, 0));

    let recaps = app.store.recaps().await;
    assert_eq!(recaps.len(), 1);
    assert_eq!(recaps[0].status, RecapStatus::Waiting);
    Ok(())
}

#[tokio::test]
async fn promotion_replaces_placeholder_with_generated_recap() -> Result<()> {
    let app = TestApp::new().await?;
    let response = app.post_empty("/api/recaps/schedule/auto?petId=10&userId=1").await?;
    let body: Value = json_body(response).await?;
    let waiting_id = body["recapId"].as_i64().expect("recapId");

    let (start, _) = next_month(today()).expect("next month");
    let dates: Vec<NaiveDate> = (1..=5)
        .map(|day| start.with_day(day).expect("valid day"))
        .collect();
    seed_diaries(&app, 1, 10, &dates).await?;

    let report = app.state.scheduler().promote_waiting().await?;
    assert_eq!((report.processed, report.succeeded), (1, 1));

    let recaps = app.store.recaps().await;
    assert_eq!(recaps.len(), 1);
    let generated = &recaps[0];
    assert_ne!(generated.id, waiting_id);
    assert_eq!(generated.status, RecapStatus::Generated);
    assert_eq!(generated.moment_count, 5);

    let response = app.get(&format!("/api/recaps/{waiting_id}?userId=1")).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let prompts = app.generator.prompts().await;
    assert_eq!(prompts[0].pet_name, "우리 아이");

    let report = app.state.scheduler().promote_waiting().await?;
    assert_eq!(report.processed, 0);
    Ok(())
}

#[tokio::test]
async fn recap_detail_is_scoped_to_its_owner() -> Result<()> {
    let app = TestApp::new().await?;
    seed_diaries(&app, 1, 10, &[may(3)]).await?;

    let response = app
        .post_json("/api/recaps/generate/manual", &manual_request(10, 1))
        .await?;
    let body: Value = json_body(response).await?;
    let recap_id = body["recapId"].as_i64().expect("recapId");

    let response = app.get(&format!("/api/recaps/{recap_id}?userId=2")).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let response = app.get("/api/recaps/9999?userId=1").await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn lists_return_summaries_newest_first() -> Result<()> {
    let app = TestApp::new().await?;
    seed_diaries(&app, 1, 10, &[may(3), may(4)]).await?;
    seed_diaries(&app, 1, 20, &[may(5)]).await?;

    for pet_id in [10, 20] {
        let response = app
            .post_json("/api/recaps/generate/manual", &manual_request(pet_id, 1))
            .await?;
        assert_eq!(response.status(), StatusCode::CREATED);
    }
    let response = app.post_empty("/api/recaps/schedule/auto?petId=10&userId=1").await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let mine: Vec<Value> = json_body(app.get("/api/recaps/user/1").await?).await?;
    assert_eq!(mine.len(), 3);
    assert_eq!(mine[0]["status"], "WAITING");
    assert!(mine[0]["mainImageUrl"].is_null());

    let pet: Vec<Value> = json_body(app.get("/api/recaps/pet/10").await?).await?;
    assert_eq!(pet.len(), 2);
    let generated = pet
        .iter()
        .find(|recap| recap["status"] == "GENERATED")
        .expect("generated recap");
    assert_eq!(generated["momentCount"], 2);
    assert!(generated["mainImageUrl"]
        .as_str()
        .is_some_and(|url| url.starts_with("https://cdn.test/10/")));

    let nobody: Vec<Value> = json_body(app.get("/api/recaps/user/42").await?).await?;
    assert!(nobody.is_empty());
    Ok(())
}

#[tokio::test]
async fn monthly_batch_covers_every_active_pet() -> Result<()> {
    let app = TestApp::new().await?;
    seed_diaries(&app, 1, 10, &[may(1), may(31)]).await?;
    seed_diaries(&app, 2, 20, &[may(15)]).await?;
    seed_diaries(&app, 3, 30, &[NaiveDate::from_ymd_opt(2024, 4, 30).expect("valid date")]).await?;

    let reference = NaiveDate::from_ymd_opt(2024, 6, 1).expect("valid date");
    let report = app.state.scheduler().generate_monthly(reference).await?;
    assert_eq!((report.processed, report.succeeded, report.failed), (2, 2, 0));

    let recaps = app.store.recaps().await;
    assert_eq!(recaps.len(), 2);
    assert!(recaps.iter().all(|recap| recap.status == RecapStatus::Generated));
    assert!(recaps.iter().all(|recap| recap.period_start == may(1) && recap.period_end == may(31)));

    let prompts = app.generator.prompts().await;
    assert!(prompts.iter().all(|prompt| prompt.pet_name == "우리 아이"));
    Ok(())
}

#[tokio::test]
async fn monthly_batch_uses_pet_directory() -> Result<()> {
    let app = TestApp::with_pet_directory().await?;
    let pets = app.pets.clone().expect("pet directory");
    pets.insert(10, "콩이").await;
    seed_diaries(&app, 1, 10, &[may(2)]).await?;
    seed_diaries(&app, 2, 20, &[may(9)]).await?;

    let reference = NaiveDate::from_ymd_opt(2024, 6, 1).expect("valid date");
    let report = app.state.scheduler().generate_monthly(reference).await?;
    assert_eq!((report.processed, report.succeeded, report.skipped), (2, 1, 1));

    let recaps = app.store.recaps().await;
    assert_eq!(recaps.len(), 1);
    assert_eq!(recaps[0].pet_id, 10);
    assert_eq!(app.generator.prompts().await[0].pet_name, "콩이");
    Ok(())
}

#[tokio::test]
async fn monthly_batch_continues_after_one_pet_fails() -> Result<()> {
    let app = TestApp::with_pet_directory().await?;
    let pets = app.pets.clone().expect("pet directory");
    pets.insert(10, "콩이").await;
    pets.insert(20, "보리").await;
    app.generator.fail_for("콩이").await;
    seed_diaries(&app, 1, 10, &[may(2)]).await?;
    seed_diaries(&app, 2, 20, &[may(9)]).await?;

    let reference = NaiveDate::from_ymd_opt(2024, 6, 1).expect("valid date");
    let report = app.state.scheduler().generate_monthly(reference).await?;
    assert_eq!((report.processed, report.succeeded, report.failed), (2, 1, 1));

    let recaps = app.store.recaps().await;
    assert_eq!(recaps.len(), 1);
    assert_eq!(recaps[0].pet_id, 20);
    assert_eq!(recaps[0].status, RecapStatus::Generated);
    Ok(())
}

#[tokio::test]
async fn promotion_continues_after_one_recap_fails() -> Result<()> {
    let app = TestApp::with_pet_directory().await?;
    let pets = app.pets.clone().expect("pet directory");
    pets.insert(10, "콩이").await;
    pets.insert(20, "보리").await;
    app.generator.fail_for("콩이").await;

    for (pet_id, user_id) in [(10, 1), (20, 2)] {
        let response = app
            .post_empty(&format!("/api/recaps/schedule/auto?petId={pet_id}&userId={user_id}"))
            .await?;
        assert_eq!(response.status(), StatusCode::CREATED);
    }
    let (start, _) = next_month(today()).expect("next month");
    let dates: Vec<NaiveDate> = (1..=3)
        .map(|day| start.with_day(day).expect("valid day"))
        .collect();
    seed_diaries(&app, 1, 10, &dates).await?;
    seed_diaries(&app, 2, 20, &dates).await?;

    let report = app.state.scheduler().promote_waiting().await?;
    assert_eq!((report.processed, report.succeeded, report.failed), (2, 1, 1));

    let recaps = app.store.recaps().await;
    assert_eq!(recaps.len(), 2);
    let failed = recaps
        .iter()
        .find(|recap| recap.pet_id == 10)
        .expect("pet 10 recap");
    assert_eq!(failed.status, RecapStatus::Waiting);
    let promoted = recaps
        .iter()
        .find(|recap| recap.pet_id == 20)
        .expect("pet 20 recap");
    assert_eq!(promoted.status, RecapStatus::Generated);
    assert_eq!(promoted.moment_count, 3);
    Ok(())
}
