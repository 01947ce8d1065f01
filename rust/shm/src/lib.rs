//! POSIX runtime for the fault-driven page lock
//!
//! One page of shared memory, two participants, no conventional lock: each
//! side keeps its own mapping fenced with `PROT_NONE` while it does not
//! hold the region and wins entry by touching the page, fielding the
//! SIGSEGV, and running an intent-flag handshake inside the handler. The
//! pieces:
//!
//! - [`region`]: the mapped page and its per-view protection gate
//! - [`lock`]: the handshake, as a fault driver and an explicit prober
//! - [`worker`]: acquire/verify/compute/release payload cycles
//!
//! The protocol itself (identity, layout, state machine, counters) lives
//! in `faultgate-core`.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        pub mod error;
        pub mod lock;
        pub mod region;
        mod trap;
        pub mod worker;

        pub use error::{RegionError, Result};
        pub use lock::{Outcome, RegionLock};
        pub use region::{page_size, GateState, RegionBacking, SharedRegion};
        pub use worker::{AcquireDriver, CycleMode, PayloadWorker, RunSummary, WorkerConfig};
    } else {
        compile_error!("faultgate-shm needs POSIX mprotect and SIGSEGV semantics");
    }
}
