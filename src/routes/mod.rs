use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::state::AppState;

pub mod diaries;
pub mod health;
pub mod locations;
pub mod recaps;

const MAX_BODY_BYTES: usize = 1024 * 1024 * 100;

fn cors_layer(allowed: Option<&String>) -> CorsLayer {
    let allow_origin = match allowed {
        Some(origins) => {
            let headers: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .filter_map(|value| match value.parse::<HeaderValue>() {
                    Ok(header) => Some(header),
                    Err(_) => {
                        warn!(origin = value, "ignoring invalid CORS allowed origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(headers)
        }
        None => AllowOrigin::mirror_request(),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

pub fn create_router(state: AppState) -> Router<()> {
    let cors = cors_layer(state.config.cors_allowed_origin.as_ref());

    let diary_routes = Router::new()
        .route("/", post(diaries::create_diary))
        .route("/ai/preview", post(diaries::preview_diary))
        .route("/weather", get(diaries::lookup_weather))
        .route(
            "/:id",
            get(diaries::get_diary)
                .patch(diaries::update_diary)
                .delete(diaries::delete_diary),
        );

    let query_routes = Router::new()
        .route("/calendar", get(diaries::calendar))
        .route("/ai-archive", get(diaries::ai_archive));

    let recap_routes = Router::new()
        .route("/generate/manual", post(recaps::generate_manual))
        .route("/schedule/auto", post(recaps::schedule_auto))
        .route("/user/:user_id", get(recaps::list_for_user))
        .route("/pet/:pet_id", get(recaps::list_for_pet))
        .route("/:id", get(recaps::get_recap));

    let location_routes = Router::new()
        .route("/", post(locations::save_location))
        .route("/history", get(locations::location_history));

    Router::new()
        .nest("/api/diaries", diary_routes)
        .nest("/api/diary-queries", query_routes)
        .nest("/api/recaps", recap_routes)
        .nest("/api/locations", location_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
}
