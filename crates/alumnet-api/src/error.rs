use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use alumnet_chat::ChatError;
use alumnet_types::api::ErrorBody;

use crate::session::AuthError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("authentication required")]
    Unauthenticated,

    #[error("not allowed")]
    Forbidden,

    #[error("{0}")]
    InvalidInput(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("payload too large")]
    PayloadTooLarge,

    #[error("service unavailable")]
    StoreUnavailable,

    #[error("internal error")]
    Internal,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    /// Logs a store failure and hides its details from the client.
    pub fn store(err: anyhow::Error) -> Self {
        error!("Document store error: {:#}", err);
        Self::StoreUnavailable
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Forbidden => "forbidden",
            Self::InvalidInput(_) => "invalid_input",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::PayloadTooLarge => "payload_too_large",
            Self::StoreUnavailable => "store_unavailable",
            Self::Internal => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.code().to_string(),
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Unauthenticated => Self::Unauthenticated,
            ChatError::InvalidInput(reason) => Self::InvalidInput(reason),
            ChatError::NotFound(what) => Self::NotFound(what),
            // Already logged where it was raised
            ChatError::StoreUnavailable(_) => Self::StoreUnavailable,
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials | AuthError::InvalidToken => Self::Unauthenticated,
            AuthError::EmailTaken => Self::Conflict("email already registered".into()),
            AuthError::Invalid(reason) => Self::InvalidInput(reason),
            AuthError::Store(e) => Self::store(e),
            AuthError::Hash => {
                error!("Password hashing failed");
                Self::Internal
            }
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidPath(path) => Self::InvalidInput(format!("invalid path '{}'", path)),
            StorageError::NotFound(path) => Self::NotFound(path),
            StorageError::TooLarge { .. } => Self::PayloadTooLarge,
            StorageError::Io(e) => {
                error!("Object store I/O error: {}", e);
                Self::Internal
            }
        }
    }
}
