//! Provider-facing types and error definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Account address as reported by the provider.
///
/// Kept as the provider's string so ordering and casing survive round trips.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(pub String);

impl Address {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Chain identifier (`eth_chainId`), opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub String);

impl From<&str> for ChainId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Network identifier (`net_version`), opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkId(pub String);

impl From<&str> for NetworkId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Base64 x25519 public encryption key returned by `eth_getEncryptionPublicKey`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncryptionKey(pub String);

impl EncryptionKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Event kinds a provider can push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "accountsChanged")]
    AccountsChanged,
    #[serde(rename = "chainChanged")]
    ChainChanged,
    #[serde(rename = "networkChanged")]
    NetworkChanged,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [
        EventKind::AccountsChanged,
        EventKind::ChainChanged,
        EventKind::NetworkChanged,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::AccountsChanged => "accountsChanged",
            EventKind::ChainChanged => "chainChanged",
            EventKind::NetworkChanged => "networkChanged",
        }
    }
}

/// A pushed provider notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    AccountsChanged(Vec<Address>),
    ChainChanged(ChainId),
    NetworkChanged(NetworkId),
}

impl ProviderEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ProviderEvent::AccountsChanged(_) => EventKind::AccountsChanged,
            ProviderEvent::ChainChanged(_) => EventKind::ChainChanged,
            ProviderEvent::NetworkChanged(_) => EventKind::NetworkChanged,
        }
    }
}

/// Callback registered for one event kind.
///
/// Returns false once its subscriber is gone; providers may then drop it.
pub type EventHandler = Arc<dyn Fn(ProviderEvent) -> bool + Send + Sync>;

/// EIP-1193 error codes the client classifies on.
pub mod codes {
    pub const USER_REJECTED: i64 = 4001;
    pub const UNAUTHORIZED: i64 = 4100;
    pub const UNSUPPORTED_METHOD: i64 = 4200;
    pub const DISCONNECTED: i64 = 4900;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL: i64 = -32603;
}

/// Raw error shape returned by the capability (`ProviderRpcError`).
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("provider rpc error {code}: {message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn user_rejected() -> Self {
        Self::new(codes::USER_REJECTED, "User rejected the request.")
    }
}

/// Classified provider failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The account-provider capability is absent from the host.
    #[error("account provider not available")]
    Unavailable,

    /// The user declined a provider prompt.
    #[error("user rejected the request: {0}")]
    UserRejected(String),

    /// Transport or runtime failure reported by the provider.
    #[error("provider error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Provider could not decrypt the ciphertext with the account key.
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// The provider answered with a value of the wrong shape.
    #[error("malformed provider response for {method}: {reason}")]
    MalformedResponse { method: &'static str, reason: String },

    /// Request exceeded the configured timeout.
    #[error("provider request timed out after {0:?}")]
    Timeout(Duration),
}

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;
