//! One-page shared region with a per-view protection gate
//!
//! A region is a single hardware page, backed either by a named POSIX
//! shared-memory object (any number of views across processes) or by an
//! anonymous mapping (one view, for solo runs and tests). Every view
//! carries its own gate: `mprotect` state local to this mapping and
//! deliberately not shared, because the protocol needs each participant to
//! fence its own window onto the page independently.
//!
//! A view always starts fenced. Raw access is only meaningful while the
//! gate is open; touching a fenced view is the intended fault-driver
//! trigger, not an API error.

use crate::error::{RegionError, Result};
use faultgate_core::layout::{self, FlagBank, Payload};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{self, MapFlags, MsFlags, ProtFlags};
use nix::sys::stat::Mode;
use std::fmt;
use std::num::NonZeroUsize;
use std::os::unix::io::AsRawFd;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::warn;

/// Hardware page size; a region is always exactly one page
pub fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

/// Per-view access state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GateState {
    /// Any access faults; the view is fenced
    NoAccess = 0,
    /// The view is open for the critical section
    ReadWrite = 1,
}

impl GateState {
    fn prot_flags(self) -> ProtFlags {
        match self {
            GateState::NoAccess => ProtFlags::PROT_NONE,
            GateState::ReadWrite => ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
        }
    }

    fn from_u8(value: u8) -> GateState {
        match value {
            1 => GateState::ReadWrite,
            _ => GateState::NoAccess,
        }
    }
}

/// Where the page lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionBacking {
    /// Named POSIX object, created if absent, shareable across processes
    Named(String),
    /// Anonymous page, private to this process, single view
    Anonymous,
}

/// One view of the shared page
pub struct SharedRegion {
    base: NonNull<libc::c_void>,
    len: usize,
    backing: RegionBacking,
    created: bool,
    gate: AtomicU8,
}

impl SharedRegion {
    /// Map one page of the chosen backing, gate down.
    ///
    /// Named objects are created on first open and zero-filled exactly
    /// once by the kernel; re-opening an existing object never clobbers
    /// its contents.
    pub fn open(backing: RegionBacking) -> Result<SharedRegion> {
        let len = page_size();
        let (base, created) = match backing {
            RegionBacking::Named(ref name) => open_named(name, len)?,
            RegionBacking::Anonymous => (open_anonymous(len)?, true),
        };
        Ok(SharedRegion {
            base,
            len,
            backing,
            created,
            gate: AtomicU8::new(GateState::NoAccess as u8),
        })
    }

    /// Remove a named object.
    ///
    /// Never called implicitly: a peer may still hold views, so teardown
    /// only ever unmaps. Tests and operators unlink explicitly.
    pub fn unlink(name: &str) -> Result<()> {
        validate_name(name)?;
        mman::shm_unlink(name).map_err(|source| RegionError::UnlinkFailed {
            name: name.to_string(),
            source,
        })
    }

    /// Toggle this view's protection
    pub fn set_gate(&self, gate: GateState) -> Result<()> {
        self.set_gate_raw(gate)
            .map_err(|source| RegionError::ProtectFailed { gate, source })
    }

    /// Gate toggle without error construction, for signal context
    pub(crate) fn set_gate_raw(&self, gate: GateState) -> std::result::Result<(), Errno> {
        unsafe { mman::mprotect(self.base, self.len, gate.prot_flags()) }?;
        self.gate.store(gate as u8, Ordering::Release);
        Ok(())
    }

    /// Last successfully applied gate state for this view
    pub fn gate(&self) -> GateState {
        GateState::from_u8(self.gate.load(Ordering::Acquire))
    }

    /// Force the flag range out to the shared backing.
    ///
    /// Part of the visibility barrier between publishing the own flag and
    /// inspecting the peer flag. Only meaningful for file-backed views;
    /// callers skip it for anonymous ones.
    pub fn sync_flags(&self) -> Result<()> {
        self.sync_flags_raw()
            .map_err(|source| RegionError::SyncFailed { source })
    }

    /// msync without error construction, for signal context
    pub(crate) fn sync_flags_raw(&self) -> std::result::Result<(), Errno> {
        unsafe { mman::msync(self.base, layout::FLAG_SLOTS, MsFlags::MS_SYNC) }
    }

    /// Atomic view of the intent flags.
    ///
    /// Valid only while the gate is open. Through a fenced view the first
    /// access faults, which is exactly what the fault driver feeds on.
    pub fn flags(&self) -> &FlagBank {
        unsafe { FlagBank::from_base(self.base.as_ptr() as *mut u8) }
    }

    /// Volatile read of the three payload cells
    pub fn read_payload(&self) -> Payload {
        let base = self.base.as_ptr() as *const u8;
        unsafe {
            Payload {
                arg0: ptr::read_volatile(base.add(layout::ARG0_OFFSET)),
                arg1: ptr::read_volatile(base.add(layout::ARG1_OFFSET)),
                result: ptr::read_volatile(base.add(layout::RESULT_OFFSET)),
            }
        }
    }

    /// Volatile write of the three payload cells
    pub fn write_payload(&self, payload: Payload) {
        let base = self.base.as_ptr() as *mut u8;
        unsafe {
            ptr::write_volatile(base.add(layout::ARG0_OFFSET), payload.arg0);
            ptr::write_volatile(base.add(layout::ARG1_OFFSET), payload.arg1);
            ptr::write_volatile(base.add(layout::RESULT_OFFSET), payload.result);
        }
    }

    /// Copy the whole page into `buf`.
    ///
    /// Readers may snapshot everything; writers must go through
    /// [`write_payload`](Self::write_payload) so the flag range is never
    /// clobbered by a write-back.
    pub fn snapshot_into(&self, buf: &mut [u8]) {
        let count = self.len.min(buf.len());
        unsafe {
            ptr::copy_nonoverlapping(self.base.as_ptr() as *const u8, buf.as_mut_ptr(), count);
        }
    }

    pub fn base_addr(&self) -> usize {
        self.base.as_ptr() as usize
    }

    pub fn size(&self) -> usize {
        self.len
    }

    /// Whether `addr` falls inside this view
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base_addr() && addr < self.base_addr() + self.len
    }

    pub fn backing(&self) -> &RegionBacking {
        &self.backing
    }

    /// File-backed views take part in msync barriers, anonymous ones do not
    pub fn is_file_backed(&self) -> bool {
        matches!(self.backing, RegionBacking::Named(_))
    }

    /// Whether this open created the backing object (fresh zero-filled page)
    pub fn was_created(&self) -> bool {
        self.created
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        // teardown unmaps the view only; named objects persist until unlink
        unsafe {
            let _ = mman::munmap(self.base, self.len);
        }
    }
}

impl fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedRegion")
            .field("base", &format_args!("{:#x}", self.base_addr()))
            .field("len", &self.len)
            .field("backing", &self.backing)
            .field("gate", &self.gate())
            .finish()
    }
}

// Safety: the region is a raw mapping. All mutation goes through volatile
// or atomic operations, and gate toggles are syscalls on this view only.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

/// POSIX shm names: one leading slash, nothing else path-like
fn validate_name(name: &str) -> Result<()> {
    let invalid = |reason| {
        Err(RegionError::InvalidName {
            name: name.to_string(),
            reason,
        })
    };
    if name.len() < 2 || name.len() > 255 {
        return invalid("length must be between 2 and 255 bytes");
    }
    if !name.starts_with('/') {
        return invalid("must start with '/'");
    }
    if name[1..].contains('/') {
        return invalid("only the leading '/' is allowed");
    }
    if name.contains('\0') {
        return invalid("must not contain NUL");
    }
    Ok(())
}

fn open_named(name: &str, len: usize) -> Result<(NonNull<libc::c_void>, bool)> {
    validate_name(name)?;
    let mode = Mode::S_IRUSR | Mode::S_IWUSR | Mode::S_IRGRP | Mode::S_IWGRP;

    // O_EXCL first so we know whether this open is the one that zero-fills
    let excl = OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR;
    let (fd, created) = match mman::shm_open(name, excl, mode) {
        Ok(fd) => (fd, true),
        Err(Errno::EEXIST) => {
            let fd = mman::shm_open(name, OFlag::O_RDWR, mode).map_err(|source| {
                RegionError::OpenFailed {
                    name: name.to_string(),
                    source,
                }
            })?;
            (fd, false)
        }
        Err(source) => {
            return Err(RegionError::OpenFailed {
                name: name.to_string(),
                source,
            })
        }
    };

    // Size before mapping; extending zero-fills, same-size is a no-op.
    let needs_truncate = if created {
        true
    } else {
        let stat = nix::sys::stat::fstat(fd.as_raw_fd()).map_err(|source| {
            RegionError::OpenFailed {
                name: name.to_string(),
                source,
            }
        })?;
        let have = stat.st_size as usize;
        if have < len {
            warn!(name, have, want = len, "named object undersized, extending");
        }
        have < len
    };
    if needs_truncate {
        if let Err(source) = nix::unistd::ftruncate(&fd, len as libc::off_t) {
            if created {
                let _ = mman::shm_unlink(name);
            }
            return Err(RegionError::SizeFailed {
                name: name.to_string(),
                len,
                source,
            });
        }
    }

    let length = match NonZeroUsize::new(len) {
        Some(length) => length,
        None => {
            return Err(RegionError::MapFailed {
                len,
                source: Errno::EINVAL,
            })
        }
    };
    let mapped = unsafe {
        mman::mmap(
            None,
            length,
            ProtFlags::PROT_NONE,
            MapFlags::MAP_SHARED,
            &fd,
            0,
        )
    };
    match mapped {
        Ok(base) => Ok((base, created)),
        Err(source) => {
            if created {
                let _ = mman::shm_unlink(name);
            }
            Err(RegionError::MapFailed { len, source })
        }
    }
    // fd closes here; the mapping keeps the object alive
}

fn open_anonymous(len: usize) -> Result<NonNull<libc::c_void>> {
    let length = match NonZeroUsize::new(len) {
        Some(length) => length,
        None => {
            return Err(RegionError::MapFailed {
                len,
                source: Errno::EINVAL,
            })
        }
    };
    unsafe { mman::mmap_anonymous(None, length, ProtFlags::PROT_NONE, MapFlags::MAP_SHARED) }
        .map_err(|source| RegionError::MapFailed { len, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultgate_core::participant::ParticipantId;
    use std::sync::atomic::AtomicU32;

    static NAME_COUNTER: AtomicU32 = AtomicU32::new(0);

    fn unique_name() -> String {
        format!(
            "/faultgate-test-{}-{}",
            std::process::id(),
            NAME_COUNTER.fetch_add(1, Ordering::Relaxed)
        )
    }

    #[test]
    fn test_page_size_is_sane() {
        let size = page_size();
        assert!(size >= layout::MIN_REGION_LEN);
        assert!(size.is_power_of_two());
    }

    #[test]
    fn test_name_validation() {
        assert!(validate_name("/ok").is_ok());
        assert!(validate_name("ok").is_err());
        assert!(validate_name("/").is_err());
        assert!(validate_name("/a/b").is_err());
        assert!(validate_name("").is_err());
        let long = format!("/{}", "x".repeat(300));
        assert!(validate_name(&long).is_err());
    }

    #[test]
    fn test_anonymous_region_starts_fenced_and_zeroed() {
        let region = SharedRegion::open(RegionBacking::Anonymous).unwrap();
        assert_eq!(region.gate(), GateState::NoAccess);
        assert!(region.was_created());
        assert!(!region.is_file_backed());

        region.set_gate(GateState::ReadWrite).unwrap();
        assert_eq!(region.gate(), GateState::ReadWrite);

        let mut buf = vec![0xAAu8; region.size()];
        region.snapshot_into(&mut buf);
        assert!(buf.iter().all(|&b| b == 0));

        region.write_payload(Payload::compute(9, 12));
        let payload = region.read_payload();
        assert_eq!(payload, Payload { arg0: 9, arg1: 12, result: 21 });

        // assertions done, fence again before dropping
        region.set_gate(GateState::NoAccess).unwrap();
        assert_eq!(region.gate(), GateState::NoAccess);
    }

    #[test]
    fn test_named_region_reopen_preserves_contents() {
        let name = unique_name();

        let first = SharedRegion::open(RegionBacking::Named(name.clone())).unwrap();
        assert!(first.was_created());
        first.set_gate(GateState::ReadWrite).unwrap();
        first.write_payload(Payload::compute(3, 4));
        first.flags().raise(ParticipantId::new(3).unwrap());

        let second = SharedRegion::open(RegionBacking::Named(name.clone())).unwrap();
        assert!(!second.was_created());
        assert_eq!(second.gate(), GateState::NoAccess);
        second.set_gate(GateState::ReadWrite).unwrap();

        // the second open must see the first view's bytes, not fresh zeros
        assert_eq!(second.read_payload(), Payload { arg0: 3, arg1: 4, result: 7 });
        assert!(second.flags().is_raised(ParticipantId::new(3).unwrap()));

        // gates are per view: fencing one leaves the other open
        first.set_gate(GateState::NoAccess).unwrap();
        assert_eq!(second.gate(), GateState::ReadWrite);
        assert_eq!(second.read_payload().result, 7);

        drop(first);
        drop(second);
        SharedRegion::unlink(&name).unwrap();
    }

    #[test]
    fn test_two_views_share_the_same_page() {
        let name = unique_name();

        let writer = SharedRegion::open(RegionBacking::Named(name.clone())).unwrap();
        let reader = SharedRegion::open(RegionBacking::Named(name.clone())).unwrap();
        writer.set_gate(GateState::ReadWrite).unwrap();
        reader.set_gate(GateState::ReadWrite).unwrap();

        writer.write_payload(Payload::compute(100, 200));
        let seen = reader.read_payload();
        assert_eq!(seen.arg0, 100);
        assert_eq!(seen.arg1, 200);
        assert_eq!(seen.result, 44);
        assert!(seen.is_consistent());

        drop(writer);
        drop(reader);
        SharedRegion::unlink(&name).unwrap();
    }

    #[test]
    fn test_contains_matches_bounds() {
        let region = SharedRegion::open(RegionBacking::Anonymous).unwrap();
        let base = region.base_addr();
        assert!(region.contains(base));
        assert!(region.contains(base + region.size() - 1));
        assert!(!region.contains(base + region.size()));
        assert!(!region.contains(base.wrapping_sub(1)));
    }

    #[test]
    fn test_unlink_of_missing_object_fails() {
        let err = SharedRegion::unlink("/faultgate-test-definitely-missing").unwrap_err();
        assert!(matches!(err, RegionError::UnlinkFailed { .. }));
    }
}
