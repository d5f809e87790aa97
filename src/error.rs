//! Error types for the closeable handler and the SQLite adapter.

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Result type for handler and adapter operations
pub type SqlResult<T> = std::result::Result<T, SqlError>;

/// Errors returned by this crate
#[derive(Error, Debug)]
pub enum SqlError {
    /// A required handle was absent
    #[error("invalid argument: {0} must be present")]
    InvalidArgument(&'static str),

    /// Handler-level failure, see [`SqlHandlerError`]
    #[error(transparent)]
    Handler(#[from] SqlHandlerError),

    /// Driver error raised while preparing or running a statement
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Operation on a handle that was already closed
    #[error("{0} is closed")]
    Closed(&'static str),
}

/// Wraps a low-level database failure so it can be told apart from
/// ordinary driver errors.
///
/// Both the message and the cause are optional.
#[derive(Debug, Default)]
pub struct SqlHandlerError {
    message: Option<String>,
    cause: Option<BoxError>,
}

impl SqlHandlerError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            cause: None,
        }
    }

    pub fn with_cause(cause: impl Into<BoxError>) -> Self {
        Self {
            message: None,
            cause: Some(cause.into()),
        }
    }

    pub fn with_message_and_cause(message: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        Self {
            message: Some(message.into()),
            cause: Some(cause.into()),
        }
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }
}

impl fmt::Display for SqlHandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.message, &self.cause) {
            (Some(message), _) => f.write_str(message),
            (None, Some(cause)) => write!(f, "{}", cause),
            (None, None) => f.write_str("sql handler error"),
        }
    }
}

impl StdError for SqlHandlerError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_deref().map(|cause| cause as &(dyn StdError + 'static))
    }
}
