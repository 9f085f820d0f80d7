//! Encryption subsystem.
//!
//! - `cipher`: the `x25519-xsalsa20-poly1305` record and its hex wire form
//! - `workflow`: key retrieval → local encryption → provider decryption
//!
//! Encryption never leaves the process; decryption always goes through the
//! provider, which alone holds the account's private key.

pub mod cipher;
pub mod workflow;

pub use cipher::{CiphertextRecord, CIPHER_SUITE};
pub use workflow::{EncryptionSession, EncryptionWorkflow, Phase};
