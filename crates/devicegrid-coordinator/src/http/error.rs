//! Mapping of coordinator errors onto HTTP responses.

use axum::{http::StatusCode, response::IntoResponse, Json};
use tracing::warn;

use devicegrid_core::wire::ErrorResponse;
use devicegrid_core::CoreError;

/// A coordinator error on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            CoreError::DeviceNotFound(_) | CoreError::TaskNotFound(_) => StatusCode::NOT_FOUND,
            CoreError::InvalidInput(_)
            | CoreError::NotAssigned { .. }
            | CoreError::DuplicateResult { .. }
            | CoreError::TaskClosed(_) => StatusCode::BAD_REQUEST,
            CoreError::AlreadyBusy(_) => StatusCode::CONFLICT,
            CoreError::Contended(_) | CoreError::StoreUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self.0, code = self.0.code(), "Request failed");
        }

        let body = ErrorResponse {
            error: self.0.to_string(),
            code: self.0.code().to_string(),
        };
        (status, Json(body)).into_response()
    }
}
