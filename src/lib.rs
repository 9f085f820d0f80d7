//! Account-provider session with an encrypt/decrypt round trip.
//!
//! # Architecture Overview
//!
//! ```text
//!     UI / CLI
//!        │  SessionHandle (commands, snapshots)
//!        ▼
//!   ┌──────────────────────────────────────────────┐
//!   │ SessionDriver (one tokio task)               │
//!   │   ConnectionStateMachine ── EncryptionWorkflow│
//!   │   event queue   ·   single pending request   │
//!   └───────┬──────────────────────────▲───────────┘
//!           │ ProviderClient           │ pushed events
//!           ▼                          │
//!     dyn Eip1193Provider ─────────────┘
//!       LocalWallet | JsonRpcProvider
//! ```
//!
//! Every account-set change advances the session epoch; a provider response
//! tagged with an older epoch is discarded instead of applied.

pub mod config;
pub mod encryption;
pub mod observability;
pub mod provider;
pub mod session;

pub use config::SessionConfig;
pub use provider::{Eip1193Provider, ProviderClient};
pub use session::{SessionDriver, SessionHandle, SessionSnapshot};
