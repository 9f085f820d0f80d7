//! Session driver: the cooperative scheduler.
//!
//! # Responsibilities
//! - Own the session, the event queue and the single provider request slot
//! - Apply pushed events as soon as they arrive, even mid-request
//! - Tag each request with the epoch it was issued under and drop stale results
//! - Publish a snapshot after every tick that changed something
//!
//! ```text
//!   SessionHandle ──commands──▶ ┌──────────────┐ ◀──events── provider callbacks
//!                               │ SessionDriver│
//!   watch::Receiver ◀─snapshot─ └──────┬───────┘ ──request──▶ ProviderClient
//!                                      └─── one pending request at a time
//! ```

use futures_util::future::{BoxFuture, FutureExt};
use std::collections::VecDeque;
use tokio::sync::{mpsc, oneshot, watch};

use crate::config::schema::SessionSettings;
use crate::observability::metrics;
use crate::provider::client::ProviderClient;
use crate::provider::types::{Address, ChainId, EncryptionKey, EventKind, NetworkId, ProviderResult};
use crate::session::events::EventQueue;
use crate::session::handle::SessionHandle;
use crate::session::machine::ConnectionStateMachine;
use crate::session::state::SessionSnapshot;
use crate::session::types::{SessionError, SessionResult};

pub(crate) type Responder<T> = oneshot::Sender<SessionResult<T>>;

/// Requests from the UI surface.
pub(crate) enum Command {
    Connect(Responder<SessionSnapshot>),
    RequestPublicKey(Responder<SessionSnapshot>),
    Encrypt(String, Responder<SessionSnapshot>),
    Decrypt(Responder<SessionSnapshot>),
    GetAccounts(Responder<Vec<Address>>),
}

/// Provider calls the driver can issue.
#[derive(Debug, Clone)]
enum Request {
    Authorize,
    Restore,
    ListAccounts,
    ChainId,
    NetworkVersion,
    EncryptionKey(Address),
    Decrypt { ciphertext: String, address: Address },
}

impl Request {
    fn method(&self) -> &'static str {
        match self {
            Request::Authorize => "eth_requestAccounts",
            Request::Restore | Request::ListAccounts => "eth_accounts",
            Request::ChainId => "eth_chainId",
            Request::NetworkVersion => "net_version",
            Request::EncryptionKey(_) => "eth_getEncryptionPublicKey",
            Request::Decrypt { .. } => "eth_decrypt",
        }
    }
}

enum Outcome {
    Authorized(ProviderResult<Vec<Address>>),
    Restored(ProviderResult<Vec<Address>>),
    Listed(ProviderResult<Vec<Address>>),
    Chain(ProviderResult<ChainId>),
    Network(ProviderResult<NetworkId>),
    Key(ProviderResult<EncryptionKey>),
    Plaintext(ProviderResult<String>),
}

enum Reply {
    Internal,
    Snapshot(Responder<SessionSnapshot>),
    Accounts(Responder<Vec<Address>>),
}

impl Reply {
    fn reject(self, err: SessionError) {
        match self {
            Reply::Internal => {}
            Reply::Snapshot(tx) => {
                let _ = tx.send(Err(err));
            }
            Reply::Accounts(tx) => {
                let _ = tx.send(Err(err));
            }
        }
    }
}

struct PendingRequest {
    method: &'static str,
    epoch: u64,
    reply: Reply,
    response: BoxFuture<'static, Outcome>,
}

/// Owns the session for the lifetime of the task running [`SessionDriver::run`].
pub struct SessionDriver {
    client: ProviderClient,
    machine: ConnectionStateMachine,
    events: EventQueue,
    commands: mpsc::Receiver<Command>,
    pending: Option<PendingRequest>,
    backlog: VecDeque<Request>,
    snapshots: watch::Sender<SessionSnapshot>,
}

impl SessionDriver {
    /// Build a driver and its handle.
    ///
    /// Event subscriptions are installed here, before the driver runs, so no
    /// push is lost between construction and the first tick.
    pub fn new(client: ProviderClient, settings: &SessionSettings) -> (Self, SessionHandle) {
        let (command_tx, commands) = mpsc::channel(settings.command_buffer);
        let mut machine = ConnectionStateMachine::new();
        let events = EventQueue::new();
        let mut backlog = VecDeque::new();

        if client.is_available() {
            for kind in EventKind::ALL {
                if let Err(e) = client.subscribe(kind, events.handler_for(kind)) {
                    tracing::warn!(event = kind.as_str(), error = %e, "Failed to subscribe");
                }
            }
            if settings.restore_on_start {
                backlog.push_back(Request::Restore);
            }
            backlog.push_back(Request::ChainId);
            backlog.push_back(Request::NetworkVersion);
        } else {
            tracing::warn!("No account provider available");
            machine.fail(SessionError::ProviderUnavailable);
        }

        let initial = machine.session().snapshot(!backlog.is_empty());
        let (snapshots, snapshot_rx) = watch::channel(initial);

        let driver = Self {
            client,
            machine,
            events,
            commands,
            pending: None,
            backlog,
            snapshots,
        };
        (driver, SessionHandle::new(command_tx, snapshot_rx))
    }

    /// Build a driver and run it on the current tokio runtime.
    pub fn spawn(client: ProviderClient, settings: &SessionSettings) -> SessionHandle {
        let (driver, handle) = Self::new(client, settings);
        tokio::spawn(driver.run());
        handle
    }

    /// Run until every handle has been dropped.
    pub async fn run(mut self) {
        tracing::info!(
            provider_available = self.client.is_available(),
            "Session driver started"
        );

        loop {
            if self.pending.is_none() {
                if let Some(request) = self.backlog.pop_front() {
                    self.dispatch(request, Reply::Internal);
                }
            }

            tokio::select! {
                biased;

                Some(event) = self.events.recv() => {
                    tracing::debug!(event = event.kind().as_str(), "Applying provider event");
                    self.machine.apply(event);
                }
                outcome = wait_pending(&mut self.pending), if self.pending.is_some() => {
                    if let Some(pending) = self.pending.take() {
                        self.complete(pending, outcome);
                    }
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
            }

            self.publish();
        }

        tracing::info!("Session driver stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect(tx) => {
                if let Err(e) = self.ensure_idle() {
                    let _ = tx.send(Err(e));
                    return;
                }
                match self.machine.begin_connect(self.client.is_available()) {
                    Ok(()) => self.dispatch(Request::Authorize, Reply::Snapshot(tx)),
                    Err(e) => {
                        let _ = tx.send(Err(e));
                    }
                }
            }
            Command::RequestPublicKey(tx) => {
                if let Err(e) = self.ensure_idle() {
                    let _ = tx.send(Err(e));
                    return;
                }
                match self.machine.encryption().begin_key_request() {
                    Ok(address) => {
                        self.dispatch(Request::EncryptionKey(address), Reply::Snapshot(tx))
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e));
                    }
                }
            }
            Command::Encrypt(plaintext, tx) => {
                let result = self.machine.encryption().encrypt(&plaintext);
                let _ = tx.send(result.map(|_| self.snapshot()));
            }
            Command::Decrypt(tx) => {
                if let Err(e) = self.ensure_idle() {
                    let _ = tx.send(Err(e));
                    return;
                }
                match self.machine.encryption().begin_decrypt() {
                    Ok((ciphertext, address)) => self.dispatch(
                        Request::Decrypt {
                            ciphertext,
                            address,
                        },
                        Reply::Snapshot(tx),
                    ),
                    Err(e) => {
                        let _ = tx.send(Err(e));
                    }
                }
            }
            Command::GetAccounts(tx) => {
                if let Err(e) = self.ensure_idle() {
                    let _ = tx.send(Err(e));
                    return;
                }
                if !self.client.is_available() {
                    let _ = tx.send(Err(SessionError::ProviderUnavailable));
                    return;
                }
                self.dispatch(Request::ListAccounts, Reply::Accounts(tx));
            }
        }
    }

    /// Provider-bound commands are refused while another request is outstanding.
    fn ensure_idle(&self) -> SessionResult<()> {
        match &self.pending {
            None => Ok(()),
            Some(pending) => {
                tracing::debug!(
                    pending = pending.method,
                    "Rejecting command: provider request already pending"
                );
                Err(SessionError::RequestPending)
            }
        }
    }

    fn dispatch(&mut self, request: Request, reply: Reply) {
        let client = self.client.clone();
        let method = request.method();
        let epoch = self.machine.session().request_epoch();

        let response: BoxFuture<'static, Outcome> = match request {
            Request::Authorize => {
                async move { Outcome::Authorized(client.request_accounts().await) }.boxed()
            }
            Request::Restore => {
                async move { Outcome::Restored(client.get_accounts().await) }.boxed()
            }
            Request::ListAccounts => {
                async move { Outcome::Listed(client.get_accounts().await) }.boxed()
            }
            Request::ChainId => async move { Outcome::Chain(client.get_chain_id().await) }.boxed(),
            Request::NetworkVersion => {
                async move { Outcome::Network(client.get_network_version().await) }.boxed()
            }
            Request::EncryptionKey(address) => async move {
                Outcome::Key(client.get_encryption_public_key(&address).await)
            }
            .boxed(),
            Request::Decrypt {
                ciphertext,
                address,
            } => async move { Outcome::Plaintext(client.decrypt(&ciphertext, &address).await) }
                .boxed(),
        };

        tracing::debug!(method, epoch, "Dispatching provider request");
        self.pending = Some(PendingRequest {
            method,
            epoch,
            reply,
            response,
        });
        self.publish();
    }

    fn complete(&mut self, pending: PendingRequest, outcome: Outcome) {
        let PendingRequest {
            method,
            epoch,
            reply,
            ..
        } = pending;

        // Wallets may push accountsChanged before resolving the prompt.
        let confirmed = !self.machine.is_current(epoch)
            && matches!(&outcome, Outcome::Authorized(Ok(accounts)) if self.machine.confirm_connect(accounts));
        if confirmed {
            self.backlog.push_back(Request::ChainId);
            self.backlog.push_back(Request::NetworkVersion);
            self.publish();
            if let Reply::Snapshot(tx) = reply {
                let _ = tx.send(Ok(self.snapshot()));
            }
            return;
        }

        if !self.machine.is_current(epoch) {
            tracing::info!(
                method,
                issued_epoch = epoch,
                current_epoch = self.machine.session().request_epoch(),
                "Discarding stale provider response"
            );
            metrics::record_stale_result(method);
            self.publish();
            reply.reject(SessionError::Superseded(method));
            return;
        }

        let result: SessionResult<Option<Vec<Address>>> = match outcome {
            Outcome::Authorized(result) => {
                let connected = self.machine.complete_connect(result);
                if connected.is_ok() {
                    self.backlog.push_back(Request::ChainId);
                    self.backlog.push_back(Request::NetworkVersion);
                }
                connected.map(|_| None)
            }
            Outcome::Restored(Ok(accounts)) => {
                self.machine.restore(accounts);
                Ok(None)
            }
            Outcome::Listed(Ok(accounts)) => Ok(Some(accounts)),
            Outcome::Chain(Ok(chain_id)) => {
                self.machine.on_chain_changed(chain_id);
                Ok(None)
            }
            Outcome::Network(Ok(network_id)) => {
                self.machine.on_network_changed(network_id);
                Ok(None)
            }
            Outcome::Restored(Err(e))
            | Outcome::Listed(Err(e))
            | Outcome::Chain(Err(e))
            | Outcome::Network(Err(e)) => {
                tracing::warn!(method, error = %e, "Provider request failed");
                Err(self.machine.fail(e.into()))
            }
            Outcome::Key(result) => self
                .machine
                .encryption()
                .complete_key_request(result)
                .map(|_| None),
            Outcome::Plaintext(result) => {
                self.machine.encryption().complete_decrypt(result).map(|_| None)
            }
        };

        self.publish();
        match reply {
            Reply::Internal => {}
            Reply::Snapshot(tx) => {
                let _ = tx.send(result.map(|_| self.snapshot()));
            }
            Reply::Accounts(tx) => {
                let _ = tx.send(result.map(Option::unwrap_or_default));
            }
        }
    }

    fn busy(&self) -> bool {
        self.pending.is_some() || !self.backlog.is_empty()
    }

    fn snapshot(&self) -> SessionSnapshot {
        self.machine.session().snapshot(self.busy())
    }

    fn publish(&self) {
        let next = self.snapshot();
        self.snapshots.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

/// Resolve the pending request, or never if there is none.
async fn wait_pending(slot: &mut Option<PendingRequest>) -> Outcome {
    match slot.as_mut() {
        Some(pending) => pending.response.as_mut().await,
        None => std::future::pending().await,
    }
}
