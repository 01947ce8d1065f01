//! Page-lock protocol core
//!
//! This crate holds the platform-independent pieces of the fault-driven
//! page lock: participant identity, the shared-page byte layout, the lock
//! state machine, and the diagnostics counters. The POSIX runtime that
//! maps pages and fields faults lives in `faultgate-shm`.

pub mod error;
pub mod layout;
pub mod participant;
pub mod state;
pub mod stats;

pub use error::{ProtocolError, Result};
pub use layout::{FlagBank, Payload};
pub use participant::{ParticipantId, ParticipantPair};
pub use state::{LockState, StateCell};
pub use stats::{LockStats, StatsSnapshot};

/// Current version of the faultgate protocol
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
