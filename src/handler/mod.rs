use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use restream_engine::EngineError;

use crate::presets::PresetError;

pub mod playback;
pub mod restream;

pub type ApiResult<T> = Result<T, ApiError>;
pub type ApiJsonResult<T> = ApiResult<Json<T>>;

#[derive(Debug)]
pub struct ApiError(anyhow::Error);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        if let Some(e) = self.0.downcast_ref::<EngineError>() {
            return engine_status(e);
        }
        if self.0.downcast_ref::<PresetError>().is_some() {
            return StatusCode::BAD_REQUEST;
        }
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

pub fn engine_status(error: &EngineError) -> StatusCode {
    match error {
        EngineError::UnsupportedSource { .. } => StatusCode::BAD_REQUEST,
        EngineError::ResolutionFailed { .. } | EngineError::ResolutionEmpty => {
            StatusCode::BAD_GATEWAY
        }
        EngineError::Superseded => StatusCode::CONFLICT,
        EngineError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::StartFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("ApiError: {:#}", self.0);
        } else {
            log::warn!("ApiError: {:#}", self.0);
        }
        (status, format!("{:#}", self.0)).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
