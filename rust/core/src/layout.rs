//! Byte layout of the shared page
//!
//! The layout is fixed by the protocol. Intent flags occupy the first
//! sixteen bytes, one per participant slot; the three payload cells sit at
//! fixed offsets further in. Everything else is padding that belongs to
//! nobody and must be preserved, not assumed zero.

use crate::participant::ParticipantId;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};

/// Number of intent-flag slots at the start of the region
pub const FLAG_SLOTS: usize = 16;

/// First operand cell
pub const ARG0_OFFSET: usize = 100;

/// Second operand cell
pub const ARG1_OFFSET: usize = 101;

/// Sum cell
pub const RESULT_OFFSET: usize = 200;

/// Smallest region that can hold the layout (one hardware page in practice)
pub const MIN_REGION_LEN: usize = RESULT_OFFSET + 1;

/// Atomic view of the intent-flag bank
///
/// Overlaid on the start of a mapped region. Slots are single bytes, so
/// the bank needs no alignment beyond the page itself. A nonzero slot
/// publishes that participant's claim to enter or stay in the critical
/// section.
#[repr(C)]
pub struct FlagBank {
    slots: [AtomicU8; FLAG_SLOTS],
}

impl FlagBank {
    /// Overlay the bank on a mapped region base.
    ///
    /// # Safety
    ///
    /// `base` must point at a mapping of at least [`FLAG_SLOTS`] bytes that
    /// stays valid for `'a`, and the caller must only touch it while the
    /// mapping is accessible.
    pub unsafe fn from_base<'a>(base: *mut u8) -> &'a FlagBank {
        &*(base as *const FlagBank)
    }

    /// Publish intent for `id`
    pub fn raise(&self, id: ParticipantId) {
        self.slots[id.slot()].store(1, Ordering::SeqCst);
    }

    /// Withdraw intent for `id`
    pub fn clear(&self, id: ParticipantId) {
        self.slots[id.slot()].store(0, Ordering::SeqCst);
    }

    /// Observe the slot for `id`
    pub fn is_raised(&self, id: ParticipantId) -> bool {
        self.slots[id.slot()].load(Ordering::SeqCst) != 0
    }
}

/// One observation of the payload cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub arg0: u8,
    pub arg1: u8,
    pub result: u8,
}

impl Payload {
    /// Build a payload whose sum cell is consistent by construction
    pub fn compute(arg0: u8, arg1: u8) -> Self {
        Self {
            arg0,
            arg1,
            result: arg0.wrapping_add(arg1),
        }
    }

    /// Whether the sum cell matches the operands modulo 256
    pub fn is_consistent(&self) -> bool {
        self.result == self.arg0.wrapping_add(self.arg1)
    }
}
