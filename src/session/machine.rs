//! Connection state machine.
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──accounts──▶ Connected
//!      ▲                          │                        │
//!      └────── rejected/empty ────┘◀── accountsChanged([]) ┘
//! ```
//!
//! Every change of the account set advances the request epoch and resets the
//! encryption session. Responses tagged with an older epoch are stale.

use crate::encryption::workflow::EncryptionWorkflow;
use crate::observability::metrics;
use crate::provider::types::{Address, ChainId, NetworkId, ProviderEvent, ProviderResult};
use crate::session::state::{ConnectionState, Session};
use crate::session::types::{SessionError, SessionResult};

/// Owns the session and applies provider events and request outcomes to it.
#[derive(Debug, Default)]
pub struct ConnectionStateMachine {
    session: Session,
}

impl ConnectionStateMachine {
    pub fn new() -> Self {
        Self {
            session: Session::new(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Encryption workflow bound to this session.
    pub fn encryption(&mut self) -> EncryptionWorkflow<'_> {
        EncryptionWorkflow::new(&mut self.session)
    }

    /// True if a request issued at `epoch` may still be applied.
    pub fn is_current(&self, epoch: u64) -> bool {
        self.session.request_epoch == epoch
    }

    /// Start `connect()`: Disconnected → Connecting.
    pub fn begin_connect(&mut self, provider_available: bool) -> SessionResult<()> {
        if !provider_available {
            return Err(self.fail(SessionError::ProviderUnavailable));
        }
        if self.session.connection_state != ConnectionState::Disconnected {
            let err = SessionError::InvalidPhaseTransition {
                operation: "connect",
                state: format!("{:?}", self.session.connection_state),
            };
            tracing::warn!(error = %err, "Rejected connect");
            return Err(self.fail(err));
        }
        self.session.connection_state = ConnectionState::Connecting;
        tracing::info!("Requesting account authorization");
        Ok(())
    }

    /// Finish `connect()` with the provider's answer.
    pub fn complete_connect(&mut self, result: ProviderResult<Vec<Address>>) -> SessionResult<()> {
        match result {
            Ok(accounts) => {
                self.install_accounts(accounts);
                self.session.last_error = None;
                tracing::info!(
                    accounts = self.session.accounts.len(),
                    epoch = self.session.request_epoch,
                    "Accounts authorized"
                );
                Ok(())
            }
            Err(e) => {
                // A failed prompt never touches an account set that arrived by event.
                if self.session.connection_state == ConnectionState::Connecting {
                    self.session.connection_state = ConnectionState::Disconnected;
                }
                tracing::warn!(error = %e, "Account authorization failed");
                Err(self.fail(e.into()))
            }
        }
    }

    /// Accept an authorization answered after an `accountsChanged` push had
    /// already installed the same accounts.
    ///
    /// Returns false if the answer disagrees with the current account set; the
    /// caller then treats it as stale.
    pub fn confirm_connect(&mut self, accounts: &[Address]) -> bool {
        let accounts = dedup(accounts.to_vec());
        if accounts.is_empty() || accounts != self.session.accounts {
            return false;
        }
        self.session.last_error = None;
        tracing::info!(
            accounts = accounts.len(),
            epoch = self.session.request_epoch,
            "Authorization confirmed after accountsChanged"
        );
        true
    }

    /// Silent restore from `eth_accounts` during bootstrap.
    pub fn restore(&mut self, accounts: Vec<Address>) -> bool {
        self.on_accounts_changed(accounts)
    }

    /// Apply an `accountsChanged` payload. Returns true if the epoch advanced.
    ///
    /// A payload equal to the current account set is a duplicate and ignored,
    /// which also leaves a pending `connect()` prompt in Connecting.
    pub fn on_accounts_changed(&mut self, accounts: Vec<Address>) -> bool {
        let accounts = dedup(accounts);
        if accounts == self.session.accounts {
            tracing::debug!("Duplicate accountsChanged suppressed");
            return false;
        }
        self.install_accounts(accounts);
        tracing::info!(
            accounts = self.session.accounts.len(),
            epoch = self.session.request_epoch,
            state = ?self.session.connection_state,
            "Accounts changed"
        );
        true
    }

    pub fn on_chain_changed(&mut self, chain_id: ChainId) {
        tracing::info!(chain_id = %chain_id, "Chain changed");
        self.session.chain_id = Some(chain_id);
    }

    pub fn on_network_changed(&mut self, network_id: NetworkId) {
        tracing::info!(network_id = %network_id, "Network changed");
        self.session.network_id = Some(network_id);
    }

    /// Dispatch a pushed event to its handler.
    pub fn apply(&mut self, event: ProviderEvent) {
        match event {
            ProviderEvent::AccountsChanged(accounts) => {
                self.on_accounts_changed(accounts);
            }
            ProviderEvent::ChainChanged(id) => self.on_chain_changed(id),
            ProviderEvent::NetworkChanged(id) => self.on_network_changed(id),
        }
    }

    /// Record `err` as the session's last error and hand it back.
    pub fn fail(&mut self, err: SessionError) -> SessionError {
        self.session.last_error = Some(err.clone());
        err
    }

    pub fn clear_error(&mut self) {
        self.session.last_error = None;
    }

    fn install_accounts(&mut self, accounts: Vec<Address>) {
        self.session.accounts = dedup(accounts);
        self.session.connection_state = if self.session.accounts.is_empty() {
            ConnectionState::Disconnected
        } else {
            self.session.last_error = None;
            ConnectionState::Connected
        };
        self.session.request_epoch += 1;
        metrics::record_epoch_advance();
        if let Some(encryption) = self.session.encryption.as_mut() {
            encryption.reset();
        }
    }
}

/// Drop repeated addresses, keeping the first occurrence.
fn dedup(accounts: Vec<Address>) -> Vec<Address> {
    let mut unique: Vec<Address> = Vec::with_capacity(accounts.len());
    for account in accounts {
        if !unique.contains(&account) {
            unique.push(account);
        }
    }
    unique
}
