//! SIGSEGV interception for the fault driver
//!
//! The action is installed process-wide, once. A single lock context is
//! registered at a time; the handler works only against that context and
//! hands every other fault back to the default disposition so real bugs
//! still crash. Inside the handler: no allocation, no locks, no
//! formatting. Atomics, fences, and raw syscalls only.

use crate::error::{RegionError, Result};
use crate::region::{GateState, SharedRegion};
use faultgate_core::layout::FlagBank;
use faultgate_core::participant::ParticipantPair;
use faultgate_core::state::{LockState, StateCell};
use faultgate_core::stats::LockStats;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::ptr;
use std::sync::atomic::{fence, AtomicBool, AtomicPtr, Ordering};

/// Everything the handler needs, kept behind a stable heap address by the
/// owning lock for as long as it stays registered.
pub(crate) struct TrapContext {
    pub(crate) region: SharedRegion,
    pub(crate) pair: ParticipantPair,
    pub(crate) state: StateCell,
    pub(crate) stats: LockStats,
}

static ACTIVE_CONTEXT: AtomicPtr<TrapContext> = AtomicPtr::new(ptr::null_mut());
static HANDLER_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Install the process-wide SIGSEGV action. Idempotent.
fn install_handler() -> Result<()> {
    if HANDLER_INSTALLED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }
    let action = SigAction::new(
        SigHandler::SigAction(on_access_fault),
        SaFlags::SA_SIGINFO,
        SigSet::empty(),
    );
    // Safety: replacing the SIGSEGV action; the handler below follows
    // async-signal-safety rules.
    if let Err(source) = unsafe { signal::sigaction(Signal::SIGSEGV, &action) } {
        HANDLER_INSTALLED.store(false, Ordering::SeqCst);
        return Err(RegionError::TrapInstallFailed { source });
    }
    Ok(())
}

/// Register `ctx` as this process's one fault-driven lock.
pub(crate) fn register(ctx: *mut TrapContext) -> Result<()> {
    install_handler()?;
    ACTIVE_CONTEXT
        .compare_exchange(ptr::null_mut(), ctx, Ordering::AcqRel, Ordering::Acquire)
        .map_err(|_| RegionError::TrapBusy)?;
    Ok(())
}

/// Drop the registration if `ctx` still holds it.
pub(crate) fn unregister(ctx: *mut TrapContext) {
    let _ =
        ACTIVE_CONTEXT.compare_exchange(ctx, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire);
}

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        fn fault_address(info: *mut libc::siginfo_t) -> usize {
            // Safety: the kernel fills si_addr for SIGSEGV
            unsafe { (*info).si_addr() as usize }
        }
    } else {
        fn fault_address(info: *mut libc::siginfo_t) -> usize {
            unsafe { (*info).si_addr as usize }
        }
    }
}

/// The fault driver's half of the handshake.
///
/// Touching a fenced view lands here. Raise the gate, publish intent,
/// force it visible, inspect the peer: grant keeps the gate open and
/// returns so the instruction re-executes against the open page; denial
/// rolls everything back and returns so the instruction faults again,
/// which is the protocol's spin.
extern "C" fn on_access_fault(
    _sig: libc::c_int,
    info: *mut libc::siginfo_t,
    _ucontext: *mut libc::c_void,
) {
    let ctx = ACTIVE_CONTEXT.load(Ordering::Acquire);
    if ctx.is_null() {
        restore_default_disposition();
        return;
    }
    // Safety: registration guarantees the context outlives it, and the
    // handler runs on the thread that faulted, never concurrently with
    // unregistration.
    let ctx = unsafe { &*ctx };

    // anything outside the registered page is a real bug, not a handshake
    let addr = fault_address(info);
    if !ctx.region.contains(addr) {
        restore_default_disposition();
        return;
    }

    ctx.state.force(LockState::Requesting);

    if ctx.region.set_gate_raw(GateState::ReadWrite).is_err() {
        fail_fast(b"faultgate: mprotect(READ_WRITE) failed in fault handler\n");
    }

    let flags: &FlagBank = ctx.region.flags();
    flags.raise(ctx.pair.local());

    // own flag must be visible before the peer flag is inspected
    fence(Ordering::SeqCst);
    if ctx.region.is_file_backed() && ctx.region.sync_flags_raw().is_err() {
        fail_fast(b"faultgate: msync over the flag range failed in fault handler\n");
    }

    if flags.is_raised(ctx.pair.peer()) {
        // denied: withdraw, fence the view again, let the retry fault
        flags.clear(ctx.pair.local());
        if ctx.region.set_gate_raw(GateState::NoAccess).is_err() {
            fail_fast(b"faultgate: mprotect(NO_ACCESS) failed in fault handler\n");
        }
        ctx.stats.record_retry();
        ctx.state.force(LockState::Idle);
        return;
    }

    ctx.stats.record_grant();
    ctx.state.force(LockState::Held);
}

/// Hand SIGSEGV back to the default action so the re-executed instruction
/// crashes the process the normal way.
fn restore_default_disposition() {
    let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    // Safety: restoring the default disposition is always sound
    let _ = unsafe { signal::sigaction(Signal::SIGSEGV, &action) };
}

/// Last-resort exit from signal context: raw write, then _exit.
fn fail_fast(msg: &[u8]) -> ! {
    unsafe {
        let _ = libc::write(
            libc::STDERR_FILENO,
            msg.as_ptr() as *const libc::c_void,
            msg.len(),
        );
        libc::_exit(1);
    }
}

/// Serializes tests that touch the process-global trap state.
#[cfg(test)]
pub(crate) fn test_guard() -> std::sync::MutexGuard<'static, ()> {
    static GUARD: std::sync::Mutex<()> = std::sync::Mutex::new(());
    GUARD.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
