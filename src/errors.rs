/// Domain-specific error types for vaultsearch
///
/// Connection-level failures (embedding service or database unreachable) get
/// their own variants so callers can tell a fatal outage apart from a
/// recoverable per-document failure.

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("Embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Embedding provider error: {0}")]
    ProviderError(String),

    #[error("Invalid weight for {name}: {value} (weights must be finite and >= 0)")]
    InvalidWeight {
        name: &'static str,
        value: f64,
    },

    #[error("Document store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Document not found: {id}")]
    NotFound {
        id: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for VaultError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => VaultError::StoreUnavailable(e.to_string()),
            other => VaultError::Storage(other.to_string()),
        }
    }
}

impl From<crate::embedding::EmbeddingError> for VaultError {
    fn from(e: crate::embedding::EmbeddingError) -> Self {
        if e.is_unavailable() {
            VaultError::ProviderUnavailable(e.to_string())
        } else {
            VaultError::ProviderError(e.to_string())
        }
    }
}

impl VaultError {
    /// Helper to create validation errors with field names
    ///
    /// Example:
    /// ```
    /// use vaultsearch::errors::VaultError;
    /// let err = VaultError::validation("limit", "limit must be at least 1");
    /// ```
    pub fn validation(field: &str, message: &str) -> Self {
        VaultError::Validation {
            message: message.to_string(),
            field: Some(field.to_string()),
        }
    }

    /// True for failures that mean a collaborator cannot be reached at all.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VaultError::ProviderUnavailable(_) | VaultError::StoreUnavailable(_)
        )
    }
}
