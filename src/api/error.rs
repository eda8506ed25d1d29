use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{error, warn};

use crate::core::models::ErrorBody;
use crate::errors::AgentError;

/// HTTP face of [`AgentError`]: caller mistakes become 400 with the error
/// text, everything else 500 with a generic prefix.
#[derive(Debug)]
pub struct ApiError(pub AgentError);

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        if self.0.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }

    #[must_use]
    pub fn detail(&self) -> String {
        if self.0.is_client_error() {
            self.0.to_string()
        } else {
            format!("An error occurred: {}", self.0)
        }
    }
}

impl From<AgentError> for ApiError {
    fn from(error: AgentError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            warn!("Rejected request: {}", self.0);
        }
        (status, Json(ErrorBody { detail: self.detail() })).into_response()
    }
}
