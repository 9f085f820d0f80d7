//! Session subsystem.
//!
//! # Data Flow
//! ```text
//! provider events ─▶ events.rs (typed FIFO queue)
//!                          │
//! SessionHandle ─▶ driver.rs (one pending request, epoch tagging)
//!                          │
//!                   machine.rs (accounts, chain, network, epoch)
//!                          │
//!                   state.rs (Session aggregate → SessionSnapshot)
//! ```
//!
//! # Invariants
//! - Connected iff the account set is non-empty
//! - The encryption workflow only leaves Idle while Connected
//! - At most one provider request is outstanding
//! - Responses issued under an older epoch are discarded unread

pub mod driver;
pub mod events;
pub mod handle;
pub mod machine;
pub mod state;
pub mod types;

pub use driver::SessionDriver;
pub use handle::SessionHandle;
pub use machine::ConnectionStateMachine;
pub use state::{ConnectionState, Session, SessionSnapshot};
pub use types::{SessionError, SessionResult};
