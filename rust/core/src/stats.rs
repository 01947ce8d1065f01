//! Lock diagnostics counters
//!
//! Updates must stay async-signal-safe because the fault handler bumps
//! the grant and retry counters, so everything here is a lock-free atomic.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters for one lock
#[derive(Debug, Default)]
pub struct LockStats {
    grants: AtomicU64,
    retries: AtomicU64,
    cycles: AtomicU64,
}

impl LockStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handshake ended in a grant
    pub fn record_grant(&self) {
        self.grants.fetch_add(1, Ordering::Relaxed);
    }

    /// A handshake was denied and rolled back
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// The worker finished one acquire/verify/compute/release cycle
    pub fn record_cycle(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn grants(&self) -> u64 {
        self.grants.load(Ordering::Relaxed)
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            grants: self.grants(),
            retries: self.retries(),
            cycles: self.cycles(),
        }
    }
}

/// Serializable counter snapshot for run summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub grants: u64,
    pub retries: u64,
    pub cycles: u64,
}
