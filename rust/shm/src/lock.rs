//! The page lock: fault driver and explicit prober
//!
//! Both drivers run the same handshake against the flag bank: publish own
//! intent, force it visible, inspect the peer, then keep the grant or roll
//! back. The fault driver waits by letting the touched instruction fault
//! again, with no pacing anywhere on that path. The explicit prober returns
//! [`Outcome::Denied`] instead and leaves pacing and budgets to the layer
//! above the protocol.

use crate::error::{RegionError, Result};
use crate::region::{GateState, SharedRegion};
use crate::trap::{self, TrapContext};
use faultgate_core::participant::ParticipantPair;
use faultgate_core::state::{LockState, StateCell};
use faultgate_core::stats::{LockStats, StatsSnapshot};
use std::sync::atomic::{fence, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Handshake outcome of a single explicit probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Granted,
    /// Peer intent observed; rolled back and counted as a retry, not an error
    Denied,
}

/// One participant's handle on the lock
///
/// Wraps one view of the region. The context sits in a `Box` so its
/// address stays stable when the lock moves, which is what makes handing
/// it to the fault handler sound.
pub struct RegionLock {
    ctx: Box<TrapContext>,
    engaged: bool,
}

impl RegionLock {
    /// Wrap a mapped view for `pair`.
    ///
    /// The explicit prober works immediately; call [`engage`](Self::engage)
    /// to arm the fault driver.
    pub fn new(region: SharedRegion, pair: ParticipantPair) -> Self {
        let base = format!("{:#x}", region.base_addr());
        debug!(
            participant = %pair.local(),
            peer = %pair.peer(),
            base = %base,
            "page lock attached"
        );
        Self {
            ctx: Box::new(TrapContext {
                region,
                pair,
                state: StateCell::new(),
                stats: LockStats::new(),
            }),
            engaged: false,
        }
    }

    /// Arm the fault driver: install the process-wide trap once and
    /// register this lock as the active context. One fault-driven lock per
    /// process; a second `engage` fails with [`RegionError::TrapBusy`].
    pub fn engage(&mut self) -> Result<()> {
        if self.engaged {
            return Ok(());
        }
        trap::register(&mut *self.ctx as *mut TrapContext)?;
        self.engaged = true;
        debug!(participant = %self.ctx.pair.local(), "fault driver engaged");
        Ok(())
    }

    /// Acquire through the fault driver.
    ///
    /// Touches the fenced page and returns once the handler has granted.
    /// A contended touch spins fault-by-fault until the peer releases;
    /// there is no pacing on this path.
    pub fn acquire(&self) -> Result<()> {
        if !self.engaged {
            return Err(RegionError::TrapNotEngaged);
        }
        let state = self.ctx.state.load();
        if state != LockState::Idle {
            return Err(faultgate_core::ProtocolError::InvalidTransition {
                from: state,
                to: LockState::Requesting,
            }
            .into());
        }
        // the touch; any payload read faults while the gate is down
        let _ = self.ctx.region.read_payload();
        debug_assert_eq!(self.ctx.state.load(), LockState::Held);
        Ok(())
    }

    /// One explicit handshake from normal code.
    ///
    /// Needs no signal handler, so any number of in-process participants
    /// can probe through their own views concurrently.
    pub fn try_acquire(&self) -> Result<Outcome> {
        self.ctx.state.advance(LockState::Idle, LockState::Requesting)?;
        self.ctx.region.set_gate(GateState::ReadWrite)?;

        let flags = self.ctx.region.flags();
        flags.raise(self.ctx.pair.local());

        // own flag must be visible before the peer flag is inspected
        fence(Ordering::SeqCst);
        if self.ctx.region.is_file_backed() {
            self.ctx.region.sync_flags()?;
        }

        if flags.is_raised(self.ctx.pair.peer()) {
            flags.clear(self.ctx.pair.local());
            self.ctx.region.set_gate(GateState::NoAccess)?;
            self.ctx.stats.record_retry();
            self.ctx.state.advance(LockState::Requesting, LockState::Idle)?;
            return Ok(Outcome::Denied);
        }

        self.ctx.stats.record_grant();
        self.ctx.state.advance(LockState::Requesting, LockState::Held)?;
        Ok(Outcome::Granted)
    }

    /// Probe until granted or the attempt budget runs out.
    ///
    /// The optional pause is the protocol's one pacing knob and it lives
    /// here, above the handshake, never inside it.
    pub fn acquire_bounded(&self, max_attempts: u64, pause: Option<Duration>) -> Result<()> {
        for _ in 0..max_attempts {
            if self.try_acquire()? == Outcome::Granted {
                return Ok(());
            }
            match pause {
                Some(d) if !d.is_zero() => std::thread::sleep(d),
                _ => std::hint::spin_loop(),
            }
        }
        Err(RegionError::RetryBudgetExhausted {
            attempts: max_attempts,
        })
    }

    /// Leave the critical section: withdraw intent, fence the view again.
    pub fn release(&self) -> Result<()> {
        self.ctx.state.advance(LockState::Held, LockState::Releasing)?;
        self.ctx.region.flags().clear(self.ctx.pair.local());
        self.ctx.region.set_gate(GateState::NoAccess)?;
        self.ctx.state.advance(LockState::Releasing, LockState::Idle)?;
        Ok(())
    }

    pub fn state(&self) -> LockState {
        self.ctx.state.load()
    }

    pub fn gate(&self) -> GateState {
        self.ctx.region.gate()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.ctx.stats.snapshot()
    }

    pub fn pair(&self) -> ParticipantPair {
        self.ctx.pair
    }

    pub fn region(&self) -> &SharedRegion {
        &self.ctx.region
    }

    pub(crate) fn note_cycle(&self) {
        self.ctx.stats.record_cycle();
    }
}

impl Drop for RegionLock {
    fn drop(&mut self) {
        // best-effort hygiene; a holder that dies without dropping still
        // leaves its flag set and the peer spinning
        if self.ctx.state.load() == LockState::Held {
            warn!(participant = %self.ctx.pair.local(), "lock dropped while held, releasing");
            let _ = self.release();
        }
        if self.engaged {
            trap::unregister(&mut *self.ctx as *mut TrapContext);
        }
    }
}
