use rusqlite::ErrorCode;
use thiserror::Error;

/// Error type shared by the store, the coordinator and the HTTP surface.
///
/// Each variant is one outcome kind a caller can act on; `status_code` maps
/// them onto the HTTP statuses the server answers with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Missing or blank required field, or malformed input.
    #[error("{0}")]
    Validation(String),
    /// Unique-key collision (create, or an id rename onto an existing id).
    #[error("{0}")]
    Conflict(String),
    /// No matching document, version, filter, or sub-entity.
    #[error("{0}")]
    NotFound(String),
    /// Unsupported verb on a known route.
    #[error("method not allowed")]
    MethodNotAllowed,
    /// Storage engine or transport failure.
    #[error("{0}")]
    Internal(String),
}

impl StoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        StoreError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        StoreError::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        StoreError::Conflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        StoreError::Internal(msg.into())
    }

    /// Map this error to an HTTP status code.
    pub fn status_code(&self) -> u16 {
        match self {
            StoreError::Validation(_) => 400,
            StoreError::Conflict(_) => 409,
            StoreError::NotFound(_) => 404,
            StoreError::MethodNotAllowed => 405,
            StoreError::Internal(_) => 500,
        }
    }

    /// Rebuild an error from a status code and message, the inverse of
    /// `status_code`. Unknown statuses become `Internal`.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            400 => StoreError::Validation(message),
            404 => StoreError::NotFound(message),
            405 => StoreError::MethodNotAllowed,
            409 => StoreError::Conflict(message),
            _ => StoreError::Internal(message),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(failure, _)
                if failure.code == ErrorCode::ConstraintViolation =>
            {
                StoreError::Conflict(format!("unique constraint violated: {}", err))
            }
            _ => StoreError::Internal(format!("sqlite: {}", err)),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Internal(format!("json: {}", err))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Internal(format!("io: {}", err))
    }
}
