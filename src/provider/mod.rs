//! Account-provider access.
//!
//! # Data Flow
//! ```text
//! SessionDriver
//!     → ProviderClient (typed calls, error classification, timeout)
//!     → dyn Eip1193Provider
//!         ├── LocalWallet      (in-process keys)
//!         └── JsonRpcProvider  (HTTP endpoint)
//!
//! provider push → EventHandler → session event queue
//! ```

pub mod client;
pub mod json_rpc;
pub mod local;
pub mod types;

pub use client::{Eip1193Provider, ProviderClient};
pub use json_rpc::JsonRpcProvider;
pub use local::{ApprovalMode, LocalWallet, WalletError};
pub use types::{
    Address, ChainId, EncryptionKey, EventHandler, EventKind, NetworkId, ProviderError,
    ProviderEvent, ProviderResult, RpcError,
};
