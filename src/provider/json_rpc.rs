//! Account provider reached over HTTP JSON-RPC.
//!
//! # Responsibilities
//! - Wrap provider methods in JSON-RPC 2.0 envelopes and POST them
//! - Turn transport failures into provider error codes
//! - Surface the endpoint's `error` object unchanged
//!
//! Plain HTTP has no push channel, so event subscriptions are accepted and
//! never fire.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use url::Url;

use crate::provider::client::Eip1193Provider;
use crate::provider::types::{codes, EventHandler, EventKind, RpcError};

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

/// EIP-1193 capability backed by a JSON-RPC endpoint.
#[derive(Debug)]
pub struct JsonRpcProvider {
    http: reqwest::Client,
    url: Url,
    next_id: AtomicU64,
}

impl JsonRpcProvider {
    pub fn new(url: Url) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
            next_id: AtomicU64::new(1),
        }
    }

    /// Parse `url` and build a provider for it.
    pub fn from_url(url: &str) -> Result<Self, url::ParseError> {
        Ok(Self::new(url.parse()?))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Eip1193Provider for JsonRpcProvider {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(self.url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(url = %self.url, method, error = %e, "JSON-RPC transport failed");
                RpcError::new(codes::DISCONNECTED, format!("transport error: {}", e))
            })?;

        let status = response.status();
        let envelope: RpcResponse = response.json().await.map_err(|e| {
            RpcError::new(
                codes::INTERNAL,
                format!("invalid JSON-RPC response (HTTP {}): {}", status, e),
            )
        })?;

        match envelope {
            RpcResponse {
                error: Some(error), ..
            } => Err(error),
            RpcResponse {
                result: Some(result),
                ..
            } => Ok(result),
            _ => Err(RpcError::new(
                codes::INTERNAL,
                "JSON-RPC response carries neither result nor error",
            )),
        }
    }

    fn on(&self, kind: EventKind, _handler: EventHandler) {
        tracing::debug!(
            event = kind.as_str(),
            url = %self.url,
            "HTTP provider cannot push events, subscription is inert"
        );
    }
}
