//! Key retrieval → encrypt → decrypt workflow.
//!
//! ```text
//! Idle ─▶ KeyRequested ─▶ KeyObtained ─▶ Encrypting ─▶ Encrypted ─▶ Decrypting ─▶ Decrypted
//!              │                             │                           │
//!              └──────────────┬──────────────┴───────────────────────────┘
//!                             ▼
//!                           Failed (retryable)
//! ```
//!
//! Provider-bound steps are split in `begin_*` / `complete_*` halves so the
//! driver can run the request between them. Encryption is local and runs in
//! one call.

use serde::Serialize;

use crate::encryption::cipher::{self, CiphertextRecord};
use crate::observability::metrics;
use crate::provider::types::{Address, EncryptionKey, ProviderResult};
use crate::session::state::Session;
use crate::session::types::{SessionError, SessionResult};

/// Discrete state of the encryption workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Phase {
    Idle,
    KeyRequested,
    KeyObtained,
    Encrypting,
    Encrypted,
    Decrypting,
    Decrypted,
    Failed,
}

impl Phase {
    /// A provider request for this workflow is in flight.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Phase::KeyRequested | Phase::Decrypting)
    }
}

/// Per-account encryption state. Reset on every account change.
#[derive(Debug, Clone)]
pub struct EncryptionSession {
    phase: Phase,
    public_key: Option<EncryptionKey>,
    key_owner: Option<Address>,
    plaintext_in: Option<String>,
    ciphertext: Option<CiphertextRecord>,
    plaintext_out: Option<String>,
    error: Option<SessionError>,
}

impl EncryptionSession {
    fn new() -> Self {
        Self {
            phase: Phase::Idle,
            public_key: None,
            key_owner: None,
            plaintext_in: None,
            ciphertext: None,
            plaintext_out: None,
            error: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn public_key(&self) -> Option<&EncryptionKey> {
        self.public_key.as_ref()
    }

    /// Account the public key was fetched for.
    pub fn key_owner(&self) -> Option<&Address> {
        self.key_owner.as_ref()
    }

    pub fn plaintext_in(&self) -> Option<&str> {
        self.plaintext_in.as_deref()
    }

    pub fn ciphertext(&self) -> Option<&CiphertextRecord> {
        self.ciphertext.as_ref()
    }

    pub fn plaintext_out(&self) -> Option<&str> {
        self.plaintext_out.as_deref()
    }

    pub fn error(&self) -> Option<&SessionError> {
        self.error.as_ref()
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::new();
    }
}

/// Workflow operations over a borrowed session.
pub struct EncryptionWorkflow<'a> {
    session: &'a mut Session,
}

impl<'a> EncryptionWorkflow<'a> {
    pub(crate) fn new(session: &'a mut Session) -> Self {
        Self { session }
    }

    pub fn phase(&self) -> Phase {
        self.session.encryption_phase()
    }

    /// Start `request_public_key()`. Returns the primary account to query.
    pub fn begin_key_request(&mut self) -> SessionResult<Address> {
        let ready = self.session.is_connected() && !self.phase().is_in_flight();
        let primary = match self.session.primary_account().cloned() {
            Some(primary) if ready => primary,
            _ => return Err(self.reject("request_public_key")),
        };

        let encryption = self.session.encryption.get_or_insert_with(EncryptionSession::new);
        encryption.reset();
        encryption.phase = Phase::KeyRequested;
        tracing::debug!(account = %primary, "Requesting encryption public key");
        Ok(primary)
    }

    /// Finish `request_public_key()` with the provider's answer.
    pub fn complete_key_request(&mut self, result: ProviderResult<EncryptionKey>) -> SessionResult<()> {
        let owner = self.session.primary_account().cloned();
        let encryption = self.in_flight(Phase::KeyRequested, "complete_key_request")?;
        match result {
            Ok(key) => {
                encryption.public_key = Some(key);
                encryption.key_owner = owner;
                encryption.phase = Phase::KeyObtained;
                encryption.error = None;
                self.session.last_error = None;
                tracing::info!("Encryption public key obtained");
                Ok(())
            }
            Err(e) => Err(self.fail("key_request", e.into())),
        }
    }

    /// Encrypt `plaintext` locally under the obtained key.
    pub fn encrypt(&mut self, plaintext: &str) -> SessionResult<()> {
        let ready = self.session.is_connected() && !self.phase().is_in_flight();
        let key = match self.session.encryption.as_ref().and_then(|e| e.public_key.clone()) {
            Some(key) if ready => key,
            _ => return Err(self.reject("encrypt")),
        };
        if plaintext.is_empty() {
            let err = SessionError::EmptyPlaintext;
            self.session.last_error = Some(err.clone());
            return Err(err);
        }

        let Some(encryption) = self.session.encryption.as_mut() else {
            return Err(self.reject("encrypt"));
        };
        encryption.phase = Phase::Encrypting;
        encryption.plaintext_in = Some(plaintext.to_string());
        encryption.ciphertext = None;
        encryption.plaintext_out = None;

        match cipher::encrypt(&key, plaintext) {
            Ok(record) => {
                encryption.ciphertext = Some(record);
                encryption.phase = Phase::Encrypted;
                encryption.error = None;
                self.session.last_error = None;
                tracing::info!(suite = cipher::CIPHER_SUITE, "Message encrypted");
                Ok(())
            }
            Err(e) => {
                // Unusable key material has to be fetched again.
                encryption.public_key = None;
                encryption.key_owner = None;
                Err(self.fail("encrypt", e.into()))
            }
        }
    }

    /// Start `decrypt()`. Returns the hex ciphertext and the primary account.
    pub fn begin_decrypt(&mut self) -> SessionResult<(String, Address)> {
        let ready = self.session.is_connected() && !self.phase().is_in_flight();
        let primary = self.session.primary_account().cloned();
        let ciphertext = self
            .session
            .encryption
            .as_ref()
            .and_then(|e| e.ciphertext.as_ref())
            .map(CiphertextRecord::to_hex);

        let (ciphertext, primary) = match (ready, primary, ciphertext) {
            (true, Some(primary), Some(Ok(hex))) => (hex, primary),
            (true, Some(_), Some(Err(e))) => return Err(self.fail("decrypt", e.into())),
            _ => return Err(self.reject("decrypt")),
        };

        if let Some(encryption) = self.session.encryption.as_mut() {
            encryption.phase = Phase::Decrypting;
            encryption.plaintext_out = None;
        }
        tracing::debug!(account = %primary, "Requesting decryption");
        Ok((ciphertext, primary))
    }

    /// Finish `decrypt()` with the provider's answer.
    pub fn complete_decrypt(&mut self, result: ProviderResult<String>) -> SessionResult<()> {
        let encryption = self.in_flight(Phase::Decrypting, "complete_decrypt")?;
        match result {
            Ok(plaintext) => {
                encryption.plaintext_out = Some(plaintext);
                encryption.phase = Phase::Decrypted;
                encryption.error = None;
                self.session.last_error = None;
                tracing::info!("Message decrypted by provider");
                Ok(())
            }
            Err(e) => {
                let err: SessionError = e.into();
                if matches!(err, SessionError::DecryptionFailed(_)) {
                    // Requires a fresh encryption.
                    encryption.ciphertext = None;
                }
                Err(self.fail("decrypt", err))
            }
        }
    }

    fn in_flight(
        &mut self,
        expected: Phase,
        operation: &'static str,
    ) -> SessionResult<&mut EncryptionSession> {
        if self.phase() != expected {
            return Err(self.reject(operation));
        }
        self.session
            .encryption
            .as_mut()
            .ok_or(SessionError::InvalidPhaseTransition {
                operation,
                state: format!("{:?}", Phase::Idle),
            })
    }

    fn fail(&mut self, stage: &'static str, err: SessionError) -> SessionError {
        metrics::record_workflow_failure(stage);
        tracing::warn!(stage, error = %err, "Encryption workflow failed");
        if let Some(encryption) = self.session.encryption.as_mut() {
            encryption.phase = Phase::Failed;
            encryption.error = Some(err.clone());
        }
        self.session.last_error = Some(err.clone());
        err
    }

    /// Refuse an operation whose precondition does not hold.
    ///
    /// Leaves the phase alone unless the session lost its connection, in which
    /// case the workflow falls back to Idle.
    fn reject(&mut self, operation: &'static str) -> SessionError {
        let state = if self.session.is_connected() {
            format!("{:?}", self.phase())
        } else {
            format!("{:?}", self.session.connection_state())
        };
        let err = SessionError::InvalidPhaseTransition { operation, state };
        tracing::warn!(error = %err, "Invalid encryption workflow transition");

        if !self.session.is_connected() {
            if let Some(encryption) = self.session.encryption.as_mut() {
                encryption.reset();
            }
        }
        self.session.last_error = Some(err.clone());
        err
    }
}
