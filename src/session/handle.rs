//! UI-facing handle to a running session driver.

use tokio::sync::{mpsc, oneshot, watch};

use crate::provider::types::Address;
use crate::session::driver::{Command, Responder};
use crate::session::state::SessionSnapshot;
use crate::session::types::{SessionError, SessionResult};

/// Cloneable front end of a [`SessionDriver`](crate::session::SessionDriver).
///
/// Provider-bound calls fail with [`SessionError::RequestPending`] while
/// another request is outstanding; callers should gate their controls on
/// `SessionSnapshot::request_pending`.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<Command>,
        snapshots: watch::Receiver<SessionSnapshot>,
    ) -> Self {
        Self {
            commands,
            snapshots,
        }
    }

    /// Prompt the provider for account authorization.
    pub async fn connect(&self) -> SessionResult<SessionSnapshot> {
        self.call(Command::Connect).await
    }

    /// Fetch the primary account's public encryption key.
    pub async fn request_public_key(&self) -> SessionResult<SessionSnapshot> {
        self.call(Command::RequestPublicKey).await
    }

    /// Encrypt `plaintext` locally under the obtained key.
    pub async fn encrypt(&self, plaintext: impl Into<String>) -> SessionResult<SessionSnapshot> {
        let plaintext = plaintext.into();
        self.call(|tx| Command::Encrypt(plaintext, tx)).await
    }

    /// Have the provider decrypt the current ciphertext.
    pub async fn decrypt(&self) -> SessionResult<SessionSnapshot> {
        self.call(Command::Decrypt).await
    }

    /// Currently authorized accounts, without prompting and without touching
    /// session state.
    pub async fn get_accounts(&self) -> SessionResult<Vec<Address>> {
        self.call(Command::GetAccounts).await
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified after every state transition.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    /// Wait until no provider request is pending or queued.
    pub async fn settled(&self) -> SessionResult<SessionSnapshot> {
        let mut rx = self.snapshots.clone();
        let snapshot = rx
            .wait_for(|s| !s.request_pending)
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        Ok(SessionSnapshot::clone(&snapshot))
    }

    async fn call<T>(&self, command: impl FnOnce(Responder<T>) -> Command) -> SessionResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        rx.await.map_err(|_| SessionError::SessionClosed)?
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshots.borrow();
        f.debug_struct("SessionHandle")
            .field("connection_state", &snapshot.connection_state)
            .field("request_epoch", &snapshot.request_epoch)
            .field("request_pending", &snapshot.request_pending)
            .finish()
    }
}
