//! Error types for Mindgraph

use thiserror::Error;

/// Result type alias using Mindgraph's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Mindgraph error types
///
/// Every variant maps onto one [`ErrorKind`]. Callers branch on the kind;
/// the variant carries the detail. `Context` wraps another error with the
/// step that failed and keeps the inner kind.
#[derive(Error, Debug)]
pub enum Error {
    // Caller errors (E100-E199)
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    // Lookup errors (E200-E299)
    #[error("{entity} '{id}' not found")]
    NotFound { entity: String, id: String },

    // Ownership errors (E300-E399)
    #[error("Not authorized to {action} {resource}")]
    Unauthorized { resource: String, action: String },

    // Concurrency errors (E400-E499)
    #[error("Version conflict on {entity} '{id}': {reason}")]
    Conflict {
        entity: String,
        id: String,
        reason: String,
    },

    #[error("'{operation}' still conflicted after {attempts} attempts. Please retry.")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        #[source]
        last: Box<Error>,
    },

    // Cancellation (E500)
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    // Infrastructure errors (E900-E999)
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("{operation}: {source}")]
    Context {
        operation: String,
        #[source]
        source: Box<Error>,
    },
}

/// Coarse classification used for retry decisions and user-facing mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Unauthorized,
    Conflict,
    Cancelled,
    Internal,
}

impl Error {
    /// Create a validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Create an unauthorized error
    pub fn unauthorized(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self::Unauthorized {
            resource: resource.into(),
            action: action.into(),
        }
    }

    /// Create a version conflict error
    pub fn conflict(
        entity: impl Into<String>,
        id: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            entity: entity.into(),
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Wrap this error with the step that produced it
    pub fn with_context(self, operation: impl Into<String>) -> Self {
        Self::Context {
            operation: operation.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping `Context` wrappers
    pub fn root(&self) -> &Error {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Get the kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Unauthorized { .. } => ErrorKind::Unauthorized,
            Self::Conflict { .. } | Self::RetryExhausted { .. } => ErrorKind::Conflict,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::DatabaseError(_)
            | Self::Serialization(_)
            | Self::Internal(_)
            | Self::ConfigError(_) => ErrorKind::Internal,
            Self::Context { source, .. } => source.kind(),
        }
    }

    /// True for optimistic-lock conflicts that a read-modify-write loop may retry
    pub fn is_conflict(&self) -> bool {
        matches!(self.root(), Self::Conflict { .. })
    }

    /// True when the retry budget ran out on conflicts
    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self.root(), Self::RetryExhausted { .. })
    }

    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "E100",
            Self::NotFound { .. } => "E200",
            Self::Unauthorized { .. } => "E300",
            Self::Conflict { .. } => "E400",
            Self::RetryExhausted { .. } => "E401",
            Self::Cancelled(_) => "E500",
            Self::DatabaseError(_) => "E900",
            Self::Serialization(_) => "E901",
            Self::Internal(_) => "E902",
            Self::ConfigError(_) => "E903",
            Self::Context { source, .. } => source.code(),
        }
    }

    /// Get suggestion for how to handle this error
    pub fn suggestion(&self) -> Option<String> {
        match self.root() {
            Self::RetryExhausted { .. } => {
                Some("The node is being edited concurrently; retry the request".to_string())
            }
            Self::Conflict { .. } => Some("Reload the latest version and reapply".to_string()),
            Self::ConfigError(_) => Some("Check MINDGRAPH_CONFIG_DIR/config.toml".to_string()),
            _ => None,
        }
    }
}

/// Attach step context to results
pub trait ResultExt<T> {
    /// Wrap the error with the name of the step that failed
    fn context(self, operation: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, operation: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(operation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_keeps_kind_and_code() {
        let err = Error::conflict("node", "n-1", "version mismatch").with_context("persist node");

        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.code(), "E400");
        assert!(err.is_conflict());
        assert!(err.to_string().starts_with("persist node: "));
    }

    #[test]
    fn test_retry_exhausted_is_distinct_from_internal() {
        let err = Error::RetryExhausted {
            operation: "update_node".into(),
            attempts: 3,
            last: Box::new(Error::conflict("node", "n-1", "stale")),
        };

        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.is_retry_exhausted());
        assert!(!err.is_conflict());
        assert_ne!(err.code(), Error::internal("boom").code());
        assert!(err.to_string().contains("Please retry"));
        assert!(err.suggestion().is_some());
    }

    #[test]
    fn test_result_ext_context() {
        let result: Result<()> = Err(Error::not_found("node", "abc"));
        let err = result.context("load node").unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(matches!(err.root(), Error::NotFound { .. }));
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(Error::validation("content", "empty").kind(), ErrorKind::Validation);
        assert_eq!(Error::unauthorized("node", "read").kind(), ErrorKind::Unauthorized);
        assert_eq!(Error::Cancelled("deadline".into()).kind(), ErrorKind::Cancelled);
        assert_eq!(Error::ConfigError("bad".into()).kind(), ErrorKind::Internal);
    }
}
