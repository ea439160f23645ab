//! Error taxonomy shared by the core components.
//!
//! An unsafe query or file is *not* an error: the security gate reports it
//! as a [`SecurityVerdict`](crate::models::SecurityVerdict). Everything
//! here is a genuine failure that callers either propagate or convert into
//! a user-safe answer.

/// Failure raised by the scanner, chunker, index store, or providers.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A directory or file that was asked for does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A caller-supplied argument or configuration value is out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The caller exceeded its request budget for the current window.
    #[error("rate limit exceeded ({0} requests in the last minute)")]
    RateLimited(usize),

    /// The embedding or language-model provider failed or timed out.
    #[error("{provider} provider failed: {message}")]
    Provider {
        provider: &'static str,
        message: String,
    },

    /// The index backend could not be reached or rejected the operation.
    #[error("index store unavailable: {0}")]
    StoreUnavailable(String),

    /// Binary or non-UTF-8 data where text was required.
    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Provider {
            provider: "embedding",
            message: message.into(),
        }
    }

    pub fn language_model(message: impl Into<String>) -> Self {
        Self::Provider {
            provider: "language model",
            message: message.into(),
        }
    }

    /// Short diagnostic category that is safe to hand back to an end user.
    pub fn category(&self) -> &'static str {
        match self {
            CoreError::NotFound(_) => "not found",
            CoreError::InvalidArgument(_) => "invalid argument",
            CoreError::RateLimited(_) => "rate limited",
            CoreError::Provider {
                provider: "embedding",
                ..
            } => "embedding provider failed",
            CoreError::Provider { .. } => "language model failed",
            CoreError::StoreUnavailable(_) => "index store unavailable",
            CoreError::Encoding(_) => "encoding error",
            CoreError::Io(_) => "i/o error",
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::StoreUnavailable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_hides_provider_detail() {
        let err = CoreError::embedding("HTTP 500: upstream exploded at 0xdeadbeef");
        assert_eq!(err.category(), "embedding provider failed");
        let err = CoreError::language_model("quota");
        assert_eq!(err.category(), "language model failed");
    }

    #[test]
    fn test_sqlx_maps_to_store_unavailable() {
        let err: CoreError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, CoreError::StoreUnavailable(_)));
    }
}
