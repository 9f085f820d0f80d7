//! End-to-end session behaviour against the in-process wallet.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use provider_session::config::SessionSettings;
use provider_session::encryption::Phase;
use provider_session::provider::{
    Address, ApprovalMode, ChainId, Eip1193Provider, EventHandler, EventKind, NetworkId,
    ProviderClient, ProviderEvent, RpcError,
};
use provider_session::session::{ConnectionState, SessionDriver, SessionError};

mod common;
use common::{account, settle, settled_session, session_with_key, wait_until, wallet, CHAIN_ID, NETWORK_ID};

#[tokio::test]
async fn test_startup_reads_chain_and_network() {
    let wallet = wallet(ApprovalMode::Auto);
    let handle = settled_session(&wallet).await;

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.connection_state, ConnectionState::Disconnected);
    assert_eq!(snapshot.chain_id, Some(ChainId::from(CHAIN_ID)));
    assert_eq!(snapshot.network_id, Some(NetworkId::from(NETWORK_ID)));
    assert_eq!(snapshot.request_epoch, 0);
    assert!(snapshot.last_error.is_none());
}

#[tokio::test]
async fn test_full_round_trip() {
    let wallet = wallet(ApprovalMode::Auto);
    let handle = settled_session(&wallet).await;

    let connected = handle.connect().await.unwrap();
    assert_eq!(connected.connection_state, ConnectionState::Connected);
    assert_eq!(connected.accounts, vec![account(&wallet, 0)]);
    settle(&handle).await;

    let keyed = handle.request_public_key().await.unwrap();
    assert_eq!(keyed.encryption_phase, Phase::KeyObtained);
    assert!(keyed.public_key.is_some());

    let encrypted = handle.encrypt("hello provider").await.unwrap();
    assert_eq!(encrypted.encryption_phase, Phase::Encrypted);
    assert!(encrypted.ciphertext.as_deref().unwrap().starts_with("0x"));

    let decrypted = handle.decrypt().await.unwrap();
    assert_eq!(decrypted.encryption_phase, Phase::Decrypted);
    assert_eq!(decrypted.plaintext_out.as_deref(), Some("hello provider"));

    // The wallet's own accountsChanged after authorization is a duplicate.
    let settled = settle(&handle).await;
    assert_eq!(settled.request_epoch, 1);
    assert_eq!(settled.encryption_phase, Phase::Decrypted);
}

#[tokio::test]
async fn test_account_switch_invalidates_encryption_state() {
    let wallet = wallet(ApprovalMode::Auto);
    let handle = session_with_key(&wallet).await;
    handle.encrypt("secret").await.unwrap();
    let before = handle.snapshot();

    let second = account(&wallet, 1);
    wallet.select_account(&second);
    let after = wait_until(&handle, |s| s.accounts.first() == Some(&second)).await;

    assert_eq!(after.accounts, vec![second, account(&wallet, 0)]);
    assert_eq!(after.request_epoch, before.request_epoch + 1);
    assert_eq!(after.encryption_phase, Phase::Idle);
    assert!(after.public_key.is_none());
    assert!(after.ciphertext.is_none());

    // Decrypt has nothing to work with until a new key and ciphertext exist.
    assert!(matches!(
        handle.decrypt().await,
        Err(SessionError::InvalidPhaseTransition { operation: "decrypt", .. })
    ));
    let rekeyed = handle.request_public_key().await.unwrap();
    assert_ne!(rekeyed.public_key, before.public_key);
}

#[tokio::test]
async fn test_stale_key_response_is_discarded() {
    let wallet = wallet(ApprovalMode::Auto);
    let handle = settled_session(&wallet).await;
    handle.connect().await.unwrap();
    let connected = settle(&handle).await;

    wallet.set_approval(ApprovalMode::Manual);
    let in_flight = tokio::spawn({
        let handle = handle.clone();
        async move { handle.request_public_key().await }
    });
    wait_until(&handle, |s| s.encryption_phase == Phase::KeyRequested).await;

    let second = account(&wallet, 1);
    wallet.switch_accounts(vec![second.clone()]);
    wait_until(&handle, |s| s.request_epoch == connected.request_epoch + 1).await;

    wallet.approve();
    let result = tokio::time::timeout(common::WAIT, in_flight).await.unwrap().unwrap();
    assert_eq!(
        result.unwrap_err(),
        SessionError::Superseded("eth_getEncryptionPublicKey")
    );

    let snapshot = settle(&handle).await;
    assert_eq!(snapshot.accounts, vec![second]);
    assert_eq!(snapshot.encryption_phase, Phase::Idle);
    assert!(snapshot.public_key.is_none());
}

#[tokio::test]
async fn test_stale_decrypt_response_is_discarded() {
    let wallet = wallet(ApprovalMode::Auto);
    let handle = session_with_key(&wallet).await;
    handle.encrypt("for the old account").await.unwrap();

    wallet.set_approval(ApprovalMode::Manual);
    let in_flight = tokio::spawn({
        let handle = handle.clone();
        async move { handle.decrypt().await }
    });
    wait_until(&handle, |s| s.encryption_phase == Phase::Decrypting).await;

    wallet.select_account(&account(&wallet, 2));
    wait_until(&handle, |s| s.encryption_phase == Phase::Idle).await;
    wallet.approve();

    let result = tokio::time::timeout(common::WAIT, in_flight).await.unwrap().unwrap();
    assert_eq!(result.unwrap_err(), SessionError::Superseded("eth_decrypt"));
    assert!(settle(&handle).await.plaintext_out.is_none());
}

#[tokio::test]
async fn test_user_rejection_leaves_session_disconnected() {
    let wallet = wallet(ApprovalMode::Reject);
    let handle = settled_session(&wallet).await;

    let err = handle.connect().await.unwrap_err();
    assert!(matches!(err, SessionError::UserRejected(_)));

    let snapshot = settle(&handle).await;
    assert_eq!(snapshot.connection_state, ConnectionState::Disconnected);
    assert_eq!(snapshot.request_epoch, 0);
    assert!(matches!(snapshot.last_error, Some(SessionError::UserRejected(_))));

    // A later attempt is allowed and clears the error.
    wallet.set_approval(ApprovalMode::Auto);
    let snapshot = handle.connect().await.unwrap();
    assert_eq!(snapshot.connection_state, ConnectionState::Connected);
    assert!(snapshot.last_error.is_none());
}

#[tokio::test]
async fn test_rejected_key_request_can_be_retried() {
    let wallet = wallet(ApprovalMode::Auto);
    let handle = settled_session(&wallet).await;
    handle.connect().await.unwrap();
    settle(&handle).await;

    wallet.set_approval(ApprovalMode::Reject);
    let err = handle.request_public_key().await.unwrap_err();
    assert!(matches!(err, SessionError::UserRejected(_)));
    assert_eq!(handle.snapshot().encryption_phase, Phase::Failed);

    wallet.set_approval(ApprovalMode::Auto);
    let snapshot = handle.request_public_key().await.unwrap();
    assert_eq!(snapshot.encryption_phase, Phase::KeyObtained);
}

#[tokio::test]
async fn test_one_request_at_a_time() {
    let wallet = wallet(ApprovalMode::Manual);
    let handle = settled_session(&wallet).await;

    let connecting = tokio::spawn({
        let handle = handle.clone();
        async move { handle.connect().await }
    });
    let pending = wait_until(&handle, |s| s.request_pending).await;
    assert_eq!(pending.connection_state, ConnectionState::Connecting);

    assert_eq!(handle.connect().await.unwrap_err(), SessionError::RequestPending);
    assert_eq!(
        handle.request_public_key().await.unwrap_err(),
        SessionError::RequestPending
    );
    assert_eq!(handle.get_accounts().await.unwrap_err(), SessionError::RequestPending);
    // Encryption is local, so it is refused on phase grounds instead.
    assert!(matches!(
        handle.encrypt("early").await,
        Err(SessionError::InvalidPhaseTransition { operation: "encrypt", .. })
    ));

    wallet.approve();
    let connected = tokio::time::timeout(common::WAIT, connecting)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(connected.connection_state, ConnectionState::Connected);
}

#[tokio::test]
async fn test_connect_twice_is_rejected() {
    let wallet = wallet(ApprovalMode::Auto);
    let handle = settled_session(&wallet).await;
    handle.connect().await.unwrap();
    settle(&handle).await;

    let err = handle.connect().await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::InvalidPhaseTransition { operation: "connect", .. }
    ));
    assert_eq!(handle.snapshot().connection_state, ConnectionState::Connected);
}

#[tokio::test]
async fn test_chain_switch_keeps_accounts_and_key() {
    let wallet = wallet(ApprovalMode::Auto);
    let handle = session_with_key(&wallet).await;
    let before = settle(&handle).await;

    wallet.switch_chain(ChainId::from("0x1"), NetworkId::from("1"));
    let after = wait_until(&handle, |s| s.network_id == Some(NetworkId::from("1"))).await;

    assert_eq!(after.chain_id, Some(ChainId::from("0x1")));
    assert_eq!(after.accounts, before.accounts);
    assert_eq!(after.request_epoch, before.request_epoch);
    assert_eq!(after.encryption_phase, Phase::KeyObtained);
    assert_eq!(after.public_key, before.public_key);
}

#[tokio::test]
async fn test_revocation_disconnects() {
    let wallet = wallet(ApprovalMode::Auto);
    let handle = session_with_key(&wallet).await;

    wallet.revoke_all();
    let snapshot =
        wait_until(&handle, |s| s.connection_state == ConnectionState::Disconnected).await;
    assert!(snapshot.accounts.is_empty());
    assert_eq!(snapshot.encryption_phase, Phase::Idle);

    assert!(matches!(
        handle.request_public_key().await,
        Err(SessionError::InvalidPhaseTransition { .. })
    ));
}

#[tokio::test]
async fn test_existing_authorization_is_restored() {
    let wallet = wallet(ApprovalMode::Reject);
    wallet.switch_accounts(vec![account(&wallet, 1)]);

    let handle = settled_session(&wallet).await;
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.connection_state, ConnectionState::Connected);
    assert_eq!(snapshot.accounts, vec![account(&wallet, 1)]);
    assert_eq!(snapshot.request_epoch, 1);
}

#[tokio::test]
async fn test_restore_can_be_disabled() {
    let wallet = wallet(ApprovalMode::Auto);
    wallet.switch_accounts(vec![account(&wallet, 0)]);

    let settings = SessionSettings {
        restore_on_start: false,
        ..SessionSettings::default()
    };
    let handle = SessionDriver::spawn(ProviderClient::new(wallet.clone()), &settings);
    let snapshot = settle(&handle).await;
    assert_eq!(snapshot.connection_state, ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_get_accounts_leaves_session_untouched() {
    let wallet = wallet(ApprovalMode::Auto);
    let handle = settled_session(&wallet).await;
    assert!(handle.get_accounts().await.unwrap().is_empty());

    handle.connect().await.unwrap();
    let before = settle(&handle).await;
    assert_eq!(handle.get_accounts().await.unwrap(), vec![account(&wallet, 0)]);
    assert_eq!(settle(&handle).await, before);
}

#[tokio::test]
async fn test_no_provider() {
    let handle = SessionDriver::spawn(ProviderClient::unavailable(), &SessionSettings::default());

    let snapshot = settle(&handle).await;
    assert_eq!(snapshot.last_error, Some(SessionError::ProviderUnavailable));
    assert_eq!(
        handle.connect().await.unwrap_err(),
        SessionError::ProviderUnavailable
    );
    assert_eq!(
        handle.get_accounts().await.unwrap_err(),
        SessionError::ProviderUnavailable
    );
}

#[tokio::test]
async fn test_empty_message_is_refused() {
    let wallet = wallet(ApprovalMode::Auto);
    let handle = session_with_key(&wallet).await;

    assert_eq!(handle.encrypt("").await.unwrap_err(), SessionError::EmptyPlaintext);
    assert_eq!(handle.snapshot().encryption_phase, Phase::KeyObtained);
}

#[tokio::test]
async fn test_request_timeout() {
    let wallet = wallet(ApprovalMode::Manual);
    let client = ProviderClient::new(wallet.clone()).with_timeout(Some(Duration::from_secs(1)));
    let handle = SessionDriver::spawn(client, &SessionSettings::default());
    settle(&handle).await;

    let err = handle.connect().await.unwrap_err();
    assert!(matches!(err, SessionError::ProviderError(ref msg) if msg.contains("timed out")));
    assert_eq!(
        handle.snapshot().connection_state,
        ConnectionState::Disconnected
    );
}

#[tokio::test]
async fn test_closed_session_reports_closed() {
    let wallet = wallet(ApprovalMode::Auto);
    let (driver, handle) = SessionDriver::new(
        ProviderClient::new(wallet.clone()),
        &SessionSettings::default(),
    );
    drop(driver);
    assert_eq!(handle.connect().await.unwrap_err(), SessionError::SessionClosed);
}

/// Wallet that pushes `accountsChanged` before it resolves the prompt.
#[derive(Default)]
struct EagerWallet {
    handlers: Mutex<Vec<(EventKind, EventHandler)>>,
    chain_queries: AtomicU32,
}

#[async_trait]
impl Eip1193Provider for EagerWallet {
    async fn request(&self, method: &str, _params: Value) -> Result<Value, RpcError> {
        match method {
            "eth_accounts" => Ok(json!([])),
            "eth_chainId" => {
                self.chain_queries.fetch_add(1, Ordering::SeqCst);
                Ok(json!("0x1"))
            }
            "net_version" => Ok(json!("1")),
            "eth_requestAccounts" => {
                let event = ProviderEvent::AccountsChanged(vec![Address::from("0xAbc")]);
                let handlers: Vec<EventHandler> = self
                    .handlers
                    .lock()
                    .unwrap()
                    .iter()
                    .filter(|(kind, _)| *kind == EventKind::AccountsChanged)
                    .map(|(_, handler)| handler.clone())
                    .collect();
                for handler in handlers {
                    handler(event.clone());
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(json!(["0xAbc"]))
            }
            _ => Err(RpcError::new(4200, "unsupported")),
        }
    }

    fn on(&self, kind: EventKind, handler: EventHandler) {
        self.handlers.lock().unwrap().push((kind, handler));
    }
}

#[tokio::test]
async fn test_connect_survives_early_accounts_changed() {
    let wallet = Arc::new(EagerWallet::default());
    let handle = SessionDriver::spawn(ProviderClient::new(wallet.clone()), &SessionSettings::default());
    settle(&handle).await;
    assert_eq!(wallet.chain_queries.load(Ordering::SeqCst), 1);

    let connected = handle.connect().await.unwrap();
    assert_eq!(connected.connection_state, ConnectionState::Connected);
    assert_eq!(connected.accounts, vec![Address::from("0xAbc")]);
    assert!(connected.last_error.is_none());

    // Authorization still refreshes chain and network metadata.
    let settled = settle(&handle).await;
    assert_eq!(settled.request_epoch, 1);
    assert_eq!(wallet.chain_queries.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_external_authorization_clears_rejection() {
    let wallet = wallet(ApprovalMode::Reject);
    let handle = settled_session(&wallet).await;
    handle.connect().await.unwrap_err();
    assert!(handle.snapshot().last_error.is_some());

    wallet.switch_accounts(vec![account(&wallet, 0)]);
    let snapshot =
        wait_until(&handle, |s| s.connection_state == ConnectionState::Connected).await;
    assert!(snapshot.last_error.is_none());
}
