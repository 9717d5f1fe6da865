//! Error types for the flowindex pipeline.

use thiserror::Error;

/// Errors that can occur during indexing.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Entity already exists: {0}")]
    AlreadyExists(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Handler error in '{handler}': {reason}")]
    Handler { handler: String, reason: String },

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Returns `true` if the gateway or index reported a missing record.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns `true` if retrying the same operation on a later tick may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Gateway(_) | Self::Subscription(_) | Self::Storage(_))
    }

    pub(crate) fn decode(reason: impl Into<String>) -> Self {
        Self::Decode(reason.into())
    }
}

impl From<serde_json::Error> for IndexerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_helpers() {
        assert!(IndexerError::NotFound("0x01".into()).is_not_found());
        assert!(!IndexerError::Gateway("down".into()).is_not_found());
        assert!(IndexerError::Gateway("down".into()).is_retryable());
        assert!(!IndexerError::Decode("bad".into()).is_retryable());
    }
}
