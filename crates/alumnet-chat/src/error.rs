use thiserror::Error;
use tracing::error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("no authenticated user")]
    Unauthenticated,

    #[error("document store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ChatError {
    /// Stable machine-readable code used on the gateway and REST surfaces.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::NotFound(_) => "not_found",
            Self::InvalidInput(_) => "invalid_input",
        }
    }

    pub(crate) fn store(err: anyhow::Error) -> Self {
        error!("Document store error: {:#}", err);
        Self::StoreUnavailable(err.to_string())
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
