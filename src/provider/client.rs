//! Typed façade over the account-provider capability.
//!
//! # Responsibilities
//! - Issue EIP-1193 requests and decode their results into typed values
//! - Classify raw provider errors (user rejection, decryption, transport)
//! - Forward event subscriptions to the capability
//!
//! Serialization of requests is the caller's job: the session driver never
//! has more than one request from this client in flight.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::Instrument;
use uuid::Uuid;

use crate::observability::metrics;
use crate::provider::types::{
    codes, Address, ChainId, EncryptionKey, EventHandler, EventKind, NetworkId, ProviderError,
    ProviderResult, RpcError,
};

/// The raw capability, shaped like an EIP-1193 provider.
#[async_trait]
pub trait Eip1193Provider: Send + Sync {
    /// Perform a request. Suspends until the provider (or its user) answers.
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError>;

    /// Register a push-notification handler for one event kind.
    fn on(&self, kind: EventKind, handler: EventHandler);
}

/// Typed provider client. Cheap to clone.
#[derive(Clone)]
pub struct ProviderClient {
    provider: Option<Arc<dyn Eip1193Provider>>,
    request_timeout: Option<Duration>,
}

impl ProviderClient {
    /// Client over a present capability.
    pub fn new(provider: Arc<dyn Eip1193Provider>) -> Self {
        Self {
            provider: Some(provider),
            request_timeout: None,
        }
    }

    /// Client for a host without any account provider.
    pub fn unavailable() -> Self {
        Self {
            provider: None,
            request_timeout: None,
        }
    }

    /// Bound every request by `duration`. Requests otherwise wait indefinitely.
    pub fn with_timeout(mut self, duration: Option<Duration>) -> Self {
        self.request_timeout = duration;
        self
    }

    /// True iff the capability is present.
    pub fn is_available(&self) -> bool {
        self.provider.is_some()
    }

    /// Prompt the user to authorize accounts (`eth_requestAccounts`).
    pub async fn request_accounts(&self) -> ProviderResult<Vec<Address>> {
        self.call("eth_requestAccounts", json!([])).await
    }

    /// Currently authorized accounts without prompting (`eth_accounts`).
    pub async fn get_accounts(&self) -> ProviderResult<Vec<Address>> {
        self.call("eth_accounts", json!([])).await
    }

    pub async fn get_chain_id(&self) -> ProviderResult<ChainId> {
        self.call("eth_chainId", json!([])).await
    }

    pub async fn get_network_version(&self) -> ProviderResult<NetworkId> {
        self.call("net_version", json!([])).await
    }

    /// Public encryption key of `address` (`eth_getEncryptionPublicKey`).
    pub async fn get_encryption_public_key(
        &self,
        address: &Address,
    ) -> ProviderResult<EncryptionKey> {
        self.call("eth_getEncryptionPublicKey", json!([address]))
            .await
    }

    /// Ask the provider to decrypt a hex-encoded ciphertext record (`eth_decrypt`).
    pub async fn decrypt(&self, ciphertext: &str, address: &Address) -> ProviderResult<String> {
        match self.call("eth_decrypt", json!([ciphertext, address])).await {
            Err(ProviderError::Rpc { code, message }) if is_decryption_failure(code, &message) => {
                Err(ProviderError::DecryptionFailed(message))
            }
            other => other,
        }
    }

    /// Register `handler` for `kind`.
    pub fn subscribe(&self, kind: EventKind, handler: EventHandler) -> ProviderResult<()> {
        let provider = self.provider.as_ref().ok_or(ProviderError::Unavailable)?;
        provider.on(kind, handler);
        tracing::debug!(event = kind.as_str(), "Subscribed to provider event");
        Ok(())
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: Value,
    ) -> ProviderResult<T> {
        let provider = self.provider.as_ref().ok_or(ProviderError::Unavailable)?;
        let span = tracing::debug_span!("provider_request", method, request_id = %Uuid::new_v4());

        let result = async {
            let response = match self.request_timeout {
                Some(limit) => timeout(limit, provider.request(method, params))
                    .await
                    .map_err(|_| ProviderError::Timeout(limit))?,
                None => provider.request(method, params).await,
            };

            let value = response.map_err(classify)?;
            serde_json::from_value(value).map_err(|e| ProviderError::MalformedResponse {
                method,
                reason: e.to_string(),
            })
        }
        .instrument(span)
        .await;

        match &result {
            Ok(_) => {
                tracing::debug!(method, "Provider request completed");
                metrics::record_provider_request(method, "ok");
            }
            Err(e) => {
                tracing::warn!(method, error = %e, "Provider request failed");
                metrics::record_provider_request(method, outcome_label(e));
            }
        }
        result
    }
}

impl std::fmt::Debug for ProviderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderClient")
            .field("available", &self.is_available())
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

fn classify(err: RpcError) -> ProviderError {
    match err.code {
        codes::USER_REJECTED => ProviderError::UserRejected(err.message),
        code => ProviderError::Rpc {
            code,
            message: err.message,
        },
    }
}

fn is_decryption_failure(code: i64, message: &str) -> bool {
    code == codes::INVALID_PARAMS || message.to_ascii_lowercase().contains("decrypt")
}

fn outcome_label(err: &ProviderError) -> &'static str {
    match err {
        ProviderError::Unavailable => "unavailable",
        ProviderError::UserRejected(_) => "rejected",
        ProviderError::Rpc { .. } => "rpc_error",
        ProviderError::DecryptionFailed(_) => "decryption_failed",
        ProviderError::MalformedResponse { .. } => "malformed",
        ProviderError::Timeout(_) => "timeout",
    }
}
