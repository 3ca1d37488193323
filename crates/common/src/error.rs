//! Common error types shared across crates.

use thiserror::Error;

/// Top-level service error type.
///
/// Every engine operation fails with exactly one of these variants, and no
/// partial version, permission grant or audit record is left behind. Variants
/// map to HTTP status codes for the API layer:
/// - [`ServiceError::ValidationFailed`] → 400
/// - [`ServiceError::Unauthorized`] → 403
/// - [`ServiceError::NotFound`] → 404
/// - [`ServiceError::ConflictRetryExhausted`] → 409
/// - [`ServiceError::GenerationFailed`] → 422
/// - [`ServiceError::DecryptionFailed`] / [`ServiceError::Internal`] → 500
/// - [`ServiceError::EncryptionUnavailable`] → 503
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Malformed or contradictory request parameters.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// The credential (or permission entry) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The acting identity lacks the permission the operation requires.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A generator could not produce a value.
    #[error("generation failed: {0}")]
    GenerationFailed(String),

    /// No encryption key is available to seal or unseal with.
    #[error("encryption unavailable: {0}")]
    EncryptionUnavailable(String),

    /// Integrity verification of a sealed value failed.
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// Concurrent writes kept conflicting after the bounded number of retries.
    #[error("conflict retries exhausted: {0}")]
    ConflictRetryExhausted(String),

    /// An unexpected internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Returns the HTTP status code that should be sent for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            ServiceError::ValidationFailed(_) => 400,
            ServiceError::Unauthorized(_) => 403,
            ServiceError::NotFound(_) => 404,
            ServiceError::ConflictRetryExhausted(_) => 409,
            ServiceError::GenerationFailed(_) => 422,
            ServiceError::DecryptionFailed(_) => 500,
            ServiceError::EncryptionUnavailable(_) => 503,
            ServiceError::Internal(_) => 500,
        }
    }

    /// Short machine-readable code used in [`crate::protocol::ErrorResponse`].
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::ValidationFailed(_) => "validation_failed",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::Unauthorized(_) => "unauthorized",
            ServiceError::GenerationFailed(_) => "generation_failed",
            ServiceError::EncryptionUnavailable(_) => "encryption_unavailable",
            ServiceError::DecryptionFailed(_) => "decryption_failed",
            ServiceError::ConflictRetryExhausted(_) => "conflict_retry_exhausted",
            ServiceError::Internal(_) => "internal_error",
        }
    }
}
