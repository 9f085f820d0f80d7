//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use serde_json::{json, Value};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use provider_session::config::SessionSettings;
use provider_session::provider::{
    Address, ApprovalMode, ChainId, LocalWallet, NetworkId, ProviderClient, RpcError,
};
use provider_session::session::{SessionDriver, SessionHandle, SessionSnapshot};

// Anvil's first three dev accounts.
pub const KEY_0: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub const KEY_1: &str = "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
pub const KEY_2: &str = "5de4111afa1a4b94908f83103eb1f1706367c2e68ca870fc3fb9a804cdab365a";

pub const CHAIN_ID: &str = "0x539";
pub const NETWORK_ID: &str = "1337";

/// Upper bound for any single wait in a test.
pub const WAIT: Duration = Duration::from_secs(5);

pub fn wallet(approval: ApprovalMode) -> Arc<LocalWallet> {
    Arc::new(
        LocalWallet::from_private_keys(
            &[KEY_0, KEY_1, KEY_2],
            ChainId::from(CHAIN_ID),
            NetworkId::from(NETWORK_ID),
            approval,
        )
        .unwrap(),
    )
}

pub fn account(wallet: &LocalWallet, index: usize) -> Address {
    wallet.addresses()[index].clone()
}

/// Spawn a driver over `wallet` with default settings.
pub fn start_session(wallet: &Arc<LocalWallet>) -> SessionHandle {
    SessionDriver::spawn(
        ProviderClient::new(wallet.clone()),
        &SessionSettings::default(),
    )
}

/// Spawn a driver and wait for its startup queries.
pub async fn settled_session(wallet: &Arc<LocalWallet>) -> SessionHandle {
    let handle = start_session(wallet);
    settle(&handle).await;
    handle
}

pub async fn settle(handle: &SessionHandle) -> SessionSnapshot {
    tokio::time::timeout(WAIT, handle.settled())
        .await
        .expect("session did not settle")
        .unwrap()
}

/// Wait for the first published snapshot matching `predicate`.
pub async fn wait_until<F>(handle: &SessionHandle, predicate: F) -> SessionSnapshot
where
    F: FnMut(&SessionSnapshot) -> bool,
{
    let mut rx = handle.subscribe();
    let snapshot = tokio::time::timeout(WAIT, rx.wait_for(predicate))
        .await
        .expect("condition not reached")
        .unwrap()
        .clone();
    snapshot
}

/// Connected session with the primary account's encryption key in hand.
pub async fn session_with_key(wallet: &Arc<LocalWallet>) -> SessionHandle {
    let handle = settled_session(wallet).await;
    handle.connect().await.unwrap();
    settle(&handle).await;
    handle.request_public_key().await.unwrap();
    handle
}

/// Start a JSON-RPC endpoint answering each call with `f(method, params)`.
///
/// Binds an ephemeral port; returns the address to point a provider at.
pub async fn start_rpc_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let _ = serve_one(socket, f.as_ref()).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

async fn serve_one<F, Fut>(mut socket: TcpStream, f: &F) -> std::io::Result<()>
where
    F: Fn(String, Value) -> Fut,
    Fut: Future<Output = Result<Value, RpcError>>,
{
    let request = read_body(&mut socket).await?;
    let request: Value = serde_json::from_slice(&request).unwrap_or(Value::Null);
    let id = request["id"].clone();
    let method = request["method"].as_str().unwrap_or_default().to_string();
    let params = request["params"].clone();

    let envelope = match f(method, params).await {
        Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
        Err(error) => json!({"jsonrpc": "2.0", "id": id, "error": error}),
    };
    let body = envelope.to_string();
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    socket.write_all(response.as_bytes()).await?;
    socket.shutdown().await
}

/// Read one HTTP request and return its body.
async fn read_body(socket: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(Vec::new());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let headers = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
    let content_length = headers
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Ok(buf[header_end..].to_vec())
}
