use axum::{Json, Router, extract::State, routing::get};

use crate::{api::AppState, handler::ApiJsonResult, presets::RadioEntry};

pub fn playback_router() -> Router<AppState> {
    Router::new().route(
        "/radiolist",
        get(list_radios).post(upsert_radio).delete(delete_radio),
    )
}

async fn list_radios(State(state): State<AppState>) -> ApiJsonResult<Vec<RadioEntry>> {
    Ok(Json(state.presets.list().await?))
}

async fn upsert_radio(
    State(state): State<AppState>,
    Json(entry): Json<RadioEntry>,
) -> ApiJsonResult<Vec<RadioEntry>> {
    Ok(Json(state.presets.upsert(entry).await?))
}

async fn delete_radio(
    State(state): State<AppState>,
    Json(entry): Json<RadioEntry>,
) -> ApiJsonResult<Vec<RadioEntry>> {
    Ok(Json(state.presets.remove(&entry.name).await?))
}

#[cfg(test)]
#[path = "playback_test.rs"]
mod playback_test;
