//! Lock protocol state machine
//!
//! Each participant tracks where it stands in the protocol through an
//! explicit state cell. The cell is process-local diagnostics state; it
//! never lives in the shared page.

use crate::error::{ProtocolError, Result};
use std::sync::atomic::{AtomicU8, Ordering};

/// Protocol states for one participant's side of the lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LockState {
    /// Outside the protocol: gate down, own flag clear
    Idle = 0,
    /// Handshake in flight
    Requesting = 1,
    /// Critical section: gate up, own flag set
    Held = 2,
    /// Tearing a grant back down
    Releasing = 3,
}

impl LockState {
    pub fn from_u8(value: u8) -> Option<LockState> {
        match value {
            0 => Some(LockState::Idle),
            1 => Some(LockState::Requesting),
            2 => Some(LockState::Held),
            3 => Some(LockState::Releasing),
            _ => None,
        }
    }

    /// Whether `next` is a legal successor of `self`
    ///
    /// Requesting may fall back to Idle: that is the denial edge.
    pub fn can_advance_to(self, next: LockState) -> bool {
        matches!(
            (self, next),
            (LockState::Idle, LockState::Requesting)
                | (LockState::Requesting, LockState::Held)
                | (LockState::Requesting, LockState::Idle)
                | (LockState::Held, LockState::Releasing)
                | (LockState::Releasing, LockState::Idle)
        )
    }
}

/// Atomically updated state cell
///
/// The explicit driver moves it with checked transitions; the fault
/// handler, which cannot surface errors, uses unchecked stores.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(LockState::Idle as u8))
    }

    pub fn load(&self) -> LockState {
        // the cell only ever holds values written from a LockState
        LockState::from_u8(self.0.load(Ordering::Acquire)).unwrap_or(LockState::Idle)
    }

    /// Checked transition: fails when the cell is not in `from` or when
    /// the move is not on the protocol diagram
    pub fn advance(&self, from: LockState, to: LockState) -> Result<()> {
        if !from.can_advance_to(to) {
            return Err(ProtocolError::InvalidTransition { from, to });
        }
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|actual| ProtocolError::InvalidTransition {
                from: LockState::from_u8(actual).unwrap_or(from),
                to,
            })?;
        Ok(())
    }

    /// Unchecked store for signal context
    pub fn force(&self, state: LockState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
