//! Session aggregate and the snapshots published to the UI.

use serde::Serialize;

use crate::encryption::workflow::{EncryptionSession, Phase};
use crate::provider::types::{Address, ChainId, EncryptionKey, NetworkId};
use crate::session::types::SessionError;

/// Overall connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Root aggregate. Mutated only through the connection state machine and the
/// encryption workflow it hands out.
#[derive(Debug, Clone)]
pub struct Session {
    pub(crate) accounts: Vec<Address>,
    pub(crate) chain_id: Option<ChainId>,
    pub(crate) network_id: Option<NetworkId>,
    pub(crate) connection_state: ConnectionState,
    pub(crate) request_epoch: u64,
    pub(crate) encryption: Option<EncryptionSession>,
    pub(crate) last_error: Option<SessionError>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            accounts: Vec::new(),
            chain_id: None,
            network_id: None,
            connection_state: ConnectionState::Disconnected,
            request_epoch: 0,
            encryption: None,
            last_error: None,
        }
    }

    pub fn accounts(&self) -> &[Address] {
        &self.accounts
    }

    /// The primary account, `accounts[0]`.
    pub fn primary_account(&self) -> Option<&Address> {
        self.accounts.first()
    }

    pub fn chain_id(&self) -> Option<&ChainId> {
        self.chain_id.as_ref()
    }

    pub fn network_id(&self) -> Option<&NetworkId> {
        self.network_id.as_ref()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state == ConnectionState::Connected
    }

    pub fn request_epoch(&self) -> u64 {
        self.request_epoch
    }

    pub fn encryption(&self) -> Option<&EncryptionSession> {
        self.encryption.as_ref()
    }

    pub fn encryption_phase(&self) -> Phase {
        self.encryption.as_ref().map_or(Phase::Idle, |e| e.phase())
    }

    pub fn last_error(&self) -> Option<&SessionError> {
        self.last_error.as_ref()
    }

    /// Copy of the UI-visible state.
    pub fn snapshot(&self, request_pending: bool) -> SessionSnapshot {
        let encryption = self.encryption.as_ref();
        SessionSnapshot {
            connection_state: self.connection_state,
            accounts: self.accounts.clone(),
            chain_id: self.chain_id.clone(),
            network_id: self.network_id.clone(),
            request_epoch: self.request_epoch,
            request_pending,
            encryption_phase: self.encryption_phase(),
            public_key: encryption.and_then(|e| e.public_key().cloned()),
            ciphertext: encryption
                .and_then(|e| e.ciphertext())
                .and_then(|c| c.to_hex().ok()),
            plaintext_out: encryption.and_then(|e| e.plaintext_out().map(str::to_string)),
            last_error: self.last_error.clone(),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// State the presentation layer renders from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub connection_state: ConnectionState,
    pub accounts: Vec<Address>,
    pub chain_id: Option<ChainId>,
    pub network_id: Option<NetworkId>,
    pub request_epoch: u64,
    /// A provider request is in flight; provider-bound controls should be disabled.
    pub request_pending: bool,
    pub encryption_phase: Phase,
    pub public_key: Option<EncryptionKey>,
    /// Hex transport form of the ciphertext record.
    pub ciphertext: Option<String>,
    pub plaintext_out: Option<String>,
    pub last_error: Option<SessionError>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Session::new().snapshot(false)
    }
}
