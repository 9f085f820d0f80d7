//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for a session
//! host. All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::provider::local::ApprovalMode;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SessionConfig {
    /// Which account provider to talk to.
    pub provider: ProviderConfig,

    /// In-process wallet settings (used when `provider.kind = "local"`).
    pub wallet: LocalWalletConfig,

    /// Session driver tuning.
    pub session: SessionSettings,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Kind of account provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// In-process wallet.
    #[default]
    Local,
    /// HTTP JSON-RPC endpoint exposing the account methods.
    JsonRpc,
    /// No provider; the session reports it as unavailable.
    None,
}

/// Provider configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,

    /// Endpoint for `kind = "json_rpc"`.
    pub rpc_url: String,

    /// Per-request timeout in seconds. Unset waits for the user indefinitely.
    pub request_timeout_secs: Option<u64>,
}

impl ProviderConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Local,
            rpc_url: "http://127.0.0.1:8545".to_string(),
            request_timeout_secs: None,
        }
    }
}

/// In-process wallet configuration.
///
/// Private keys are never read from this file. They come from the
/// `PROVIDER_SESSION_PRIVATE_KEYS` environment variable.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LocalWalletConfig {
    /// Number of dev accounts generated when no keys are in the environment.
    pub accounts: usize,

    /// Reported by `eth_chainId`.
    pub chain_id: String,

    /// Reported by `net_version`.
    pub network_id: String,

    /// How prompts are answered.
    pub approval: ApprovalMode,
}

impl Default for LocalWalletConfig {
    fn default() -> Self {
        Self {
            accounts: 1,
            chain_id: "0x539".to_string(),
            network_id: "1337".to_string(),
            approval: ApprovalMode::Auto,
        }
    }
}

/// Session driver configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Capacity of the handle → driver command channel.
    pub command_buffer: usize,

    /// Query `eth_accounts` at startup to pick up an earlier authorization.
    pub restore_on_start: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            command_buffer: 32,
            restore_on_start: true,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_filter: String,

    /// Emit JSON log lines instead of human-readable ones.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            json_logs: false,
        }
    }
}
