use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Handler error: a status code plus the underlying cause as plain text.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub error: anyhow::Error,
}

impl AppError {
    pub fn new(status: StatusCode, error: impl Into<anyhow::Error>) -> Self {
        Self { status, error: error.into() }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(error = %format!("{:#}", self.error), "request failed");
        }
        (self.status, format!("{:#}", self.error)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err)
    }
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;
