//! HTTP error mapping.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use {switchboard_conversations::Error as StoreError, switchboard_sessions::Error as SessionError};

/// An error returned by an API handler, rendered as `{ "error": "..." }`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::warn!(status = %self.status, error = %self.message, "api request failed");
        }
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        let status = match &err {
            SessionError::UnknownSession { .. } => StatusCode::NOT_FOUND,
            SessionError::AlreadyExists { .. } | SessionError::ResourceBusy { .. } => {
                StatusCode::CONFLICT
            },
            SessionError::NotConnected { .. } | SessionError::Unavailable { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            },
            SessionError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let status = match &err {
            StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
            StoreError::OfferNotHeld { .. } | StoreError::Duplicate { .. } => StatusCode::CONFLICT,
            StoreError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl From<switchboard_distribution::Error> for ApiError {
    fn from(err: switchboard_distribution::Error) -> Self {
        let switchboard_distribution::Error::Store(e) = err;
        e.into()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
