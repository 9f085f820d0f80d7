//! In-process account provider.
//!
//! Holds secp256k1 account keys and answers the provider methods the session
//! uses. The x25519 encryption key of an account is derived from its private
//! key bytes, so the same key always yields the same encryption key.
//!
//! # Security
//! - Private keys are loaded ONLY from environment variables or generated
//! - Keys and decrypted messages are never logged

use alloy::primitives::Address as EvmAddress;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use crypto_box::SecretKey;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::schema::LocalWalletConfig;
use crate::encryption::cipher::{self, CiphertextRecord};
use crate::provider::client::Eip1193Provider;
use crate::provider::types::{
    codes, Address, ChainId, EventHandler, EventKind, NetworkId, ProviderEvent, RpcError,
};

/// Environment variable holding comma-separated hex private keys.
pub const PRIVATE_KEYS_ENV_VAR: &str = "PROVIDER_SESSION_PRIVATE_KEYS";

/// How the wallet answers prompts (`eth_requestAccounts`,
/// `eth_getEncryptionPublicKey`, `eth_decrypt`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    /// Approve immediately.
    #[default]
    Auto,
    /// Decline every prompt.
    Reject,
    /// Wait for [`LocalWallet::approve`] or [`LocalWallet::reject`].
    Manual,
}

/// User's answer to a pending prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

/// Errors building a wallet.
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("Invalid private key format: {0}")]
    InvalidKey(String),

    #[error("Environment variable {0} not set")]
    MissingEnv(&'static str),

    #[error("wallet needs at least one account")]
    NoAccounts,
}

struct LocalAccount {
    address: Address,
    evm_address: EvmAddress,
    encryption_secret: SecretKey,
}

impl LocalAccount {
    fn from_signer(signer: PrivateKeySigner) -> Self {
        let evm_address = signer.address();
        Self {
            address: Address(evm_address.to_checksum(None)),
            evm_address,
            encryption_secret: SecretKey::from(signer.to_bytes().0),
        }
    }
}

/// Wallet that lives in the same process as the session.
pub struct LocalWallet {
    accounts: Vec<LocalAccount>,
    authorized: Mutex<Vec<Address>>,
    chain_id: Mutex<ChainId>,
    network_id: Mutex<NetworkId>,
    approval: Mutex<ApprovalMode>,
    decision_tx: mpsc::UnboundedSender<Decision>,
    decisions: tokio::sync::Mutex<mpsc::UnboundedReceiver<Decision>>,
    handlers: Mutex<Vec<(EventKind, EventHandler)>>,
}

impl LocalWallet {
    fn with_signers(
        signers: Vec<PrivateKeySigner>,
        chain_id: ChainId,
        network_id: NetworkId,
        approval: ApprovalMode,
    ) -> Result<Self, WalletError> {
        if signers.is_empty() {
            return Err(WalletError::NoAccounts);
        }
        let accounts: Vec<LocalAccount> = signers.into_iter().map(LocalAccount::from_signer).collect();
        let (decision_tx, decision_rx) = mpsc::unbounded_channel();

        tracing::info!(
            accounts = accounts.len(),
            primary = %accounts[0].address,
            chain_id = %chain_id,
            "Local wallet initialized"
        );

        Ok(Self {
            accounts,
            authorized: Mutex::new(Vec::new()),
            chain_id: Mutex::new(chain_id),
            network_id: Mutex::new(network_id),
            approval: Mutex::new(approval),
            decision_tx,
            decisions: tokio::sync::Mutex::new(decision_rx),
            handlers: Mutex::new(Vec::new()),
        })
    }

    /// Create a wallet from hex-encoded private keys (with or without `0x`).
    pub fn from_private_keys<S: AsRef<str>>(
        keys: &[S],
        chain_id: ChainId,
        network_id: NetworkId,
        approval: ApprovalMode,
    ) -> Result<Self, WalletError> {
        let signers = keys
            .iter()
            .map(|key| {
                let key = key.as_ref().trim();
                let key_hex = key.strip_prefix("0x").unwrap_or(key);
                key_hex
                    .parse::<PrivateKeySigner>()
                    .map_err(|e| WalletError::InvalidKey(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::with_signers(signers, chain_id, network_id, approval)
    }

    /// Load keys from `PROVIDER_SESSION_PRIVATE_KEYS`.
    pub fn from_env(
        chain_id: ChainId,
        network_id: NetworkId,
        approval: ApprovalMode,
    ) -> Result<Self, WalletError> {
        let keys = std::env::var(PRIVATE_KEYS_ENV_VAR)
            .map_err(|_| WalletError::MissingEnv(PRIVATE_KEYS_ENV_VAR))?;
        let keys: Vec<&str> = keys.split(',').filter(|k| !k.trim().is_empty()).collect();
        Self::from_private_keys(&keys, chain_id, network_id, approval)
    }

    /// Wallet with `count` freshly generated accounts.
    pub fn random(
        count: usize,
        chain_id: ChainId,
        network_id: NetworkId,
        approval: ApprovalMode,
    ) -> Result<Self, WalletError> {
        let signers = (0..count).map(|_| PrivateKeySigner::random()).collect();
        Self::with_signers(signers, chain_id, network_id, approval)
    }

    /// Keys from the environment when set, generated ones otherwise.
    pub fn from_config(config: &LocalWalletConfig) -> Result<Self, WalletError> {
        let chain_id = ChainId(config.chain_id.clone());
        let network_id = NetworkId(config.network_id.clone());
        match Self::from_env(chain_id.clone(), network_id.clone(), config.approval) {
            Err(WalletError::MissingEnv(_)) => {
                tracing::info!(
                    accounts = config.accounts,
                    "No private keys in environment, generating dev accounts"
                );
                Self::random(config.accounts, chain_id, network_id, config.approval)
            }
            other => other,
        }
    }

    /// Every account the wallet holds, authorized or not.
    pub fn addresses(&self) -> Vec<Address> {
        self.accounts.iter().map(|a| a.address.clone()).collect()
    }

    /// Accounts currently exposed to the session, primary first.
    pub fn authorized(&self) -> Vec<Address> {
        lock(&self.authorized).clone()
    }

    pub fn set_approval(&self, mode: ApprovalMode) {
        *lock(&self.approval) = mode;
    }

    /// Answer the next (or current) manual prompt with approval.
    pub fn approve(&self) {
        let _ = self.decision_tx.send(Decision::Approve);
    }

    /// Answer the next (or current) manual prompt with rejection.
    pub fn reject(&self) {
        let _ = self.decision_tx.send(Decision::Reject);
    }

    /// Replace the authorized accounts and push `accountsChanged`.
    pub fn switch_accounts(&self, accounts: Vec<Address>) {
        *lock(&self.authorized) = accounts.clone();
        self.emit(ProviderEvent::AccountsChanged(accounts));
    }

    /// Make `address` the primary account, authorizing it if needed.
    pub fn select_account(&self, address: &Address) {
        let mut accounts = self.authorized();
        accounts.retain(|a| a != address);
        accounts.insert(0, address.clone());
        self.switch_accounts(accounts);
    }

    /// Revoke every authorization (the user disconnects the site).
    pub fn revoke_all(&self) {
        self.switch_accounts(Vec::new());
    }

    /// Move to another chain and push `chainChanged` then `networkChanged`.
    pub fn switch_chain(&self, chain_id: ChainId, network_id: NetworkId) {
        *lock(&self.chain_id) = chain_id.clone();
        *lock(&self.network_id) = network_id.clone();
        self.emit(ProviderEvent::ChainChanged(chain_id));
        self.emit(ProviderEvent::NetworkChanged(network_id));
    }

    /// Deliver `event` to every handler registered for its kind, in
    /// registration order. Handlers whose subscriber is gone are removed.
    pub fn emit(&self, event: ProviderEvent) {
        let handlers: Vec<EventHandler> = lock(&self.handlers)
            .iter()
            .filter(|(kind, _)| *kind == event.kind())
            .map(|(_, handler)| handler.clone())
            .collect();
        tracing::debug!(
            event = event.kind().as_str(),
            handlers = handlers.len(),
            "Local wallet pushing event"
        );

        // Called outside the lock so a handler may call back into the wallet.
        let dead: Vec<EventHandler> = handlers
            .into_iter()
            .filter(|handler| !handler(event.clone()))
            .collect();
        if !dead.is_empty() {
            lock(&self.handlers)
                .retain(|(_, handler)| !dead.iter().any(|d| Arc::ptr_eq(d, handler)));
            tracing::debug!(removed = dead.len(), "Dropped handlers of closed subscribers");
        }
    }

    /// Number of registered event handlers.
    pub fn handler_count(&self) -> usize {
        lock(&self.handlers).len()
    }

    async fn prompt(&self, method: &str) -> Result<(), RpcError> {
        let mode = *lock(&self.approval);
        match mode {
            ApprovalMode::Auto => Ok(()),
            ApprovalMode::Reject => Err(RpcError::user_rejected()),
            ApprovalMode::Manual => {
                tracing::debug!(method, "Waiting for user decision");
                let mut decisions = self.decisions.lock().await;
                match decisions.recv().await {
                    Some(Decision::Approve) => Ok(()),
                    Some(Decision::Reject) | None => Err(RpcError::user_rejected()),
                }
            }
        }
    }

    fn authorized_account(&self, address: &str) -> Result<&LocalAccount, RpcError> {
        let unauthorized = || {
            RpcError::new(
                codes::UNAUTHORIZED,
                format!("Account {} has not been authorized", address),
            )
        };
        let evm_address = EvmAddress::from_str(address).map_err(|_| unauthorized())?;
        let authorized = lock(&self.authorized);
        if !authorized
            .iter()
            .any(|a| EvmAddress::from_str(a.as_str()).ok() == Some(evm_address))
        {
            return Err(unauthorized());
        }
        self.accounts
            .iter()
            .find(|a| a.evm_address == evm_address)
            .ok_or_else(unauthorized)
    }

    async fn request_accounts(&self) -> Result<Value, RpcError> {
        self.prompt("eth_requestAccounts").await?;
        let authorized = self.authorized();
        if !authorized.is_empty() {
            return Ok(json!(authorized));
        }
        let primary = vec![self.accounts[0].address.clone()];
        self.switch_accounts(primary.clone());
        Ok(json!(primary))
    }

    async fn encryption_public_key(&self, params: &Value) -> Result<Value, RpcError> {
        let address = string_param(params, 0)?;
        self.prompt("eth_getEncryptionPublicKey").await?;
        let account = self.authorized_account(address)?;
        Ok(json!(cipher::public_encryption_key(&account.encryption_secret)))
    }

    async fn decrypt(&self, params: &Value) -> Result<Value, RpcError> {
        let ciphertext = string_param(params, 0)?;
        let address = string_param(params, 1)?;
        self.prompt("eth_decrypt").await?;
        let account = self.authorized_account(address)?;

        let record = CiphertextRecord::from_hex(ciphertext)
            .map_err(|e| RpcError::new(codes::INVALID_PARAMS, e.to_string()))?;
        let plaintext = cipher::decrypt(&record, &account.encryption_secret)
            .map_err(|e| RpcError::new(codes::INTERNAL, format!("Decryption failed: {}", e)))?;
        Ok(json!(plaintext))
    }
}

#[async_trait]
impl Eip1193Provider for LocalWallet {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            "eth_requestAccounts" => self.request_accounts().await,
            "eth_accounts" => Ok(json!(self.authorized())),
            "eth_chainId" => Ok(json!(lock(&self.chain_id).clone())),
            "net_version" => Ok(json!(lock(&self.network_id).clone())),
            "eth_getEncryptionPublicKey" => self.encryption_public_key(&params).await,
            "eth_decrypt" => self.decrypt(&params).await,
            other => Err(RpcError::new(
                codes::UNSUPPORTED_METHOD,
                format!("The method \"{}\" is not supported", other),
            )),
        }
    }

    fn on(&self, kind: EventKind, handler: EventHandler) {
        lock(&self.handlers).push((kind, handler));
    }
}

impl std::fmt::Debug for LocalWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalWallet")
            .field("accounts", &self.addresses())
            .field("authorized", &self.authorized())
            .field("approval", &*lock(&self.approval))
            .finish()
    }
}

fn string_param(params: &Value, index: usize) -> Result<&str, RpcError> {
    params
        .get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::new(codes::INVALID_PARAMS, format!("missing parameter {}", index)))
}

/// Lock a std mutex, recovering the data if a holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
