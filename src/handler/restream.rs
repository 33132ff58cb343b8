use std::convert::Infallible;

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use futures::StreamExt;
use restream_engine::EngineStatus;

use crate::{api::AppState, handler::ApiJsonResult};

pub fn restream_router() -> Router<AppState> {
    Router::new()
        .route("/mp3", get(mp3))
        .route("/sourceUrl", get(get_source_url).post(set_source_url))
        .route("/stop", post(stop))
        .route("/status", get(status))
        .route("/version", get(version))
}

/// Live audio for as long as the client stays connected.
async fn mp3(State(state): State<AppState>) -> Response {
    let stream = state.engine.subscribe();
    log::info!("listener {} connected", stream.id());

    let body = Body::from_stream(stream.map(Ok::<Bytes, Infallible>));
    (
        [
            (header::CONTENT_TYPE, "audio/mpeg"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

async fn get_source_url(State(state): State<AppState>) -> String {
    state.engine.source_url().unwrap_or_default()
}

async fn set_source_url(
    State(state): State<AppState>,
    Json(url): Json<String>,
) -> ApiJsonResult<String> {
    let url = state.engine.set_source(&url).await?;
    Ok(Json(url))
}

async fn stop(State(state): State<AppState>) -> StatusCode {
    state.engine.stop().await;
    StatusCode::NO_CONTENT
}

async fn status(State(state): State<AppState>) -> Json<EngineStatus> {
    Json(state.engine.status())
}

async fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
#[path = "restream_test.rs"]
mod restream_test;
