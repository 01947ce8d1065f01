//! Error types for the shared-memory runtime

use crate::region::GateState;
use faultgate_core::ProtocolError;
use nix::errno::Errno;
use thiserror::Error;

/// Runtime error types
///
/// Everything carrying an [`Errno`] is a fatal resource error: the mapping
/// or protection syscalls failed and the protocol cannot continue. Denied
/// handshakes are not represented here at all.
#[derive(Error, Debug)]
pub enum RegionError {
    /// Region name failed validation, reported before any OS call
    #[error("invalid region name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// shm_open failed
    #[error("shm_open failed for {name:?}: {source}")]
    OpenFailed { name: String, source: Errno },

    /// ftruncate failed while sizing the object
    #[error("ftruncate to {len} bytes failed for {name:?}: {source}")]
    SizeFailed {
        name: String,
        len: usize,
        source: Errno,
    },

    /// mmap failed
    #[error("mmap of {len} bytes failed: {source}")]
    MapFailed { len: usize, source: Errno },

    /// mprotect failed while toggling the gate
    #[error("mprotect failed while setting the gate to {gate:?}: {source}")]
    ProtectFailed { gate: GateState, source: Errno },

    /// msync over the flag range failed
    #[error("msync over the flag range failed: {source}")]
    SyncFailed { source: Errno },

    /// shm_unlink failed
    #[error("shm_unlink failed for {name:?}: {source}")]
    UnlinkFailed { name: String, source: Errno },

    /// Installing the SIGSEGV action failed
    #[error("sigaction(SIGSEGV) installation failed: {source}")]
    TrapInstallFailed { source: Errno },

    /// A fault-driven lock is already registered in this process
    #[error("a fault-driven lock is already active in this process")]
    TrapBusy,

    /// Fault-driver call on a lock that never engaged the trap
    #[error("the fault trap is not engaged for this lock")]
    TrapNotEngaged,

    /// The explicit driver ran out of probe attempts
    #[error("acquire gave up after {attempts} denied attempts")]
    RetryBudgetExhausted { attempts: u64 },

    /// Protocol-level error bubbled up from the core
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Convenience type alias for Results
pub type Result<T> = std::result::Result<T, RegionError>;

impl RegionError {
    /// Whether the error is a configuration problem rather than a failed
    /// resource syscall
    pub fn is_config(&self) -> bool {
        match self {
            RegionError::InvalidName { .. }
            | RegionError::TrapBusy
            | RegionError::TrapNotEngaged => true,
            RegionError::Protocol(inner) => inner.is_config(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_classification() {
        let name_error = RegionError::InvalidName {
            name: "bad".to_string(),
            reason: "must start with '/'",
        };
        assert!(name_error.is_config());

        let map_error = RegionError::MapFailed {
            len: 4096,
            source: Errno::ENOMEM,
        };
        assert!(!map_error.is_config());
    }

    #[test]
    fn test_protocol_errors_pass_through() {
        let err: RegionError = ProtocolError::IdenticalParticipants { id: 2 }.into();
        assert!(err.is_config());
        assert!(err.to_string().contains("must differ"));
    }

    #[test]
    fn test_errno_is_preserved_in_messages() {
        let err = RegionError::ProtectFailed {
            gate: GateState::ReadWrite,
            source: Errno::EACCES,
        };
        let text = err.to_string();
        assert!(text.contains("ReadWrite"));
        assert!(text.contains("EACCES"));
    }
}
