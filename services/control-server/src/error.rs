use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use control_core::{DispatchError, SchedulerError, UnknownController};
use control_protocol::HttpErrorEnvelope;

/// The error kinds the HTTP surface can report. Each variant carries enough
/// context to build its message; the mapping to a status code lives
/// entirely in [`IntoResponse`] below.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("No such controller or not enabled")]
    UnknownController,
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Device(String),
    #[error("upstream unavailable")]
    UpstreamUnavailable,
    #[error("{0}")]
    Scheduler(String),
}

impl From<UnknownController> for ApiError {
    fn from(_: UnknownController) -> Self {
        ApiError::UnknownController
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Device(inner) => ApiError::Device(inner.0),
            DispatchError::UpstreamUnavailable => ApiError::UpstreamUnavailable,
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        ApiError::Scheduler(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::UnknownController => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) | ApiError::Scheduler(_) => StatusCode::BAD_REQUEST,
            ApiError::Device(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::UpstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        };
        let message = self.to_string();
        (status, Json(HttpErrorEnvelope::new(message))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_controller_maps_to_404() {
        let response = ApiError::UnknownController.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn upstream_unavailable_maps_to_503() {
        let response = ApiError::UpstreamUnavailable.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
