//! Error taxonomy surfaced to the boundary layer.
//!
//! Every access decision ends in one of four outcomes. The HTTP layer maps
//! them onto status codes via [`AccessError::status_code`]; the mapping lives
//! here so all call sites agree on it.

use thiserror::Error;

/// Errors produced by the access-control engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// The supplied path does not stay inside the root.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The path is not covered by any permitted prefix.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Missing, stale or invalidated session, or a bad credential.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Persistence failure on load or save.
    #[error("IO error: {0}")]
    Io(String),
}

impl AccessError {
    /// HTTP status the boundary layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            AccessError::InvalidPath(_) => 400,
            AccessError::Forbidden(_) => 403,
            AccessError::Unauthorized(_) => 401,
            AccessError::Io(_) => 500,
        }
    }

    /// Whether a caller may retry the same request unchanged.
    ///
    /// Only persistence failures qualify: store mutations rewrite the full
    /// set every time, so repeating them is idempotent.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AccessError::Io(_))
    }
}

impl From<std::io::Error> for AccessError {
    fn from(err: std::io::Error) -> Self {
        AccessError::Io(err.to_string())
    }
}

impl From<anyhow::Error> for AccessError {
    fn from(err: anyhow::Error) -> Self {
        AccessError::Io(format!("{:#}", err))
    }
}
