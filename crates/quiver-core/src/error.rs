use thiserror::Error;

/// Canonical error type for engine operations.
///
/// Every variant maps to a stable machine-readable code via [`CoreError::code`]
/// so callers (e.g. an HTTP layer) can translate without string matching.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Entity was not found.
    #[error("{entity} `{id}` was not found")]
    NotFound {
        /// Entity type name (e.g. `"collection"`).
        entity: &'static str,
        /// Identifier of the missing entity.
        id: String,
    },

    /// Entity already exists and cannot be created again.
    #[error("{entity} `{id}` already exists")]
    AlreadyExists {
        /// Entity type name (e.g. `"collection"`).
        entity: &'static str,
        /// Identifier or name that conflicts.
        id: String,
    },

    /// A vector's length disagrees with the committed dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension the collection or index was created with.
        expected: usize,
        /// Dimension of the offending vector.
        actual: usize,
    },

    /// Input failed validation.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Human-readable explanation of the rejected input.
        message: String,
    },

    /// The installed index is stale and the request forbids both stale reads
    /// and the brute-force fallback.
    #[error("index is stale and stale reads are disabled")]
    IndexStale,

    /// No index is installed and the brute-force fallback is disabled.
    #[error("no index is installed for this collection")]
    IndexUnavailable,

    /// The operation was cancelled cooperatively.
    #[error("operation was cancelled")]
    Cancelled,

    /// The operation's deadline expired before it completed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Invariant violation. Always a bug, never a caller error.
    #[error("internal error: {message}")]
    Internal {
        /// Human-readable details for debugging purposes.
        message: String,
    },
}

impl CoreError {
    /// Creates a `NotFound` variant.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Creates an `AlreadyExists` variant.
    #[must_use]
    pub fn already_exists(entity: &'static str, id: impl ToString) -> Self {
        Self::AlreadyExists {
            entity,
            id: id.to_string(),
        }
    }

    /// Creates a `DimensionMismatch` variant.
    #[must_use]
    pub const fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch { expected, actual }
    }

    /// Creates an `InvalidArgument` variant.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an `Internal` variant.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Stable machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::AlreadyExists { .. } => "already_exists",
            Self::DimensionMismatch { .. } => "dimension_mismatch",
            Self::InvalidArgument { .. } => "invalid_argument",
            Self::IndexStale => "index_stale",
            Self::IndexUnavailable => "index_unavailable",
            Self::Cancelled => "cancelled",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Convenient result alias for engine operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(CoreError::not_found("collection", "x").code(), "not_found");
        assert_eq!(CoreError::dimension_mismatch(8, 3).code(), "dimension_mismatch");
        assert_eq!(CoreError::IndexStale.code(), "index_stale");
        assert_eq!(CoreError::DeadlineExceeded.code(), "deadline_exceeded");
    }

    #[test]
    fn messages_name_the_entity() {
        let err = CoreError::not_found("record", "abc");
        assert_eq!(err.to_string(), "record `abc` was not found");

        let err = CoreError::dimension_mismatch(8, 3);
        assert_eq!(err.to_string(), "dimension mismatch: expected 8, got 3");
    }
}
