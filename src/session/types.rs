//! Session error taxonomy.

use serde::Serialize;
use thiserror::Error;

use crate::encryption::cipher::CipherError;
use crate::provider::types::ProviderError;

/// Errors surfaced to session callers and recorded as `last_error`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail")]
pub enum SessionError {
    /// No account provider in the host. Fatal to the session.
    #[error("account provider not available")]
    ProviderUnavailable,

    /// User declined a prompt. Retryable.
    #[error("user rejected the request: {0}")]
    UserRejected(String),

    /// Transport or runtime failure from the provider. Retryable.
    #[error("provider error: {0}")]
    ProviderError(String),

    /// Ciphertext and account key do not match. Requires re-encryption.
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// Local key material is unusable. Requires re-fetching the key.
    #[error("encryption error: {0}")]
    EncryptionError(String),

    /// Operation called in a state that does not allow it.
    #[error("{operation} is not allowed while {state}")]
    InvalidPhaseTransition {
        operation: &'static str,
        state: String,
    },

    #[error("message to encrypt is empty")]
    EmptyPlaintext,

    /// A provider request is already in flight.
    #[error("another provider request is pending")]
    RequestPending,

    /// The result arrived after an account change and was discarded.
    #[error("{0} result discarded: accounts changed while it was in flight")]
    Superseded(&'static str),

    #[error("session driver has stopped")]
    SessionClosed,
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

impl From<ProviderError> for SessionError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Unavailable => SessionError::ProviderUnavailable,
            ProviderError::UserRejected(msg) => SessionError::UserRejected(msg),
            ProviderError::DecryptionFailed(msg) => SessionError::DecryptionFailed(msg),
            other @ (ProviderError::Rpc { .. }
            | ProviderError::MalformedResponse { .. }
            | ProviderError::Timeout(_)) => SessionError::ProviderError(other.to_string()),
        }
    }
}

impl From<CipherError> for SessionError {
    fn from(err: CipherError) -> Self {
        SessionError::EncryptionError(err.to_string())
    }
}
