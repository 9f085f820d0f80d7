//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! provider client, session driver, encryption workflow
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters via the metrics facade)
//! ```
//!
//! Private keys and plaintext never reach either sink.

pub mod logging;
pub mod metrics;
