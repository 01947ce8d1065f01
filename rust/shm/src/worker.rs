//! Payload cycles over the locked page
//!
//! A worker repeats one unit of work: take the lock, check that the sum
//! cell still matches the operands, publish a fresh operand pair with its
//! sum, and let go. Two flavors exist. In-place does all of it under a
//! single grant. Snapshot, the default, copies the page out under one
//! grant, verifies and computes on the copy with the lock released, then
//! takes a second grant to write back; it holds the grant only for the two
//! copies, never for computation or simulated delay.

use crate::error::Result;
use crate::lock::RegionLock;
use faultgate_core::layout::{self, Payload};
use faultgate_core::participant::ParticipantId;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// How much of the cycle runs under the grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CycleMode {
    /// Verify and overwrite while holding, one grant per cycle
    InPlace,
    /// Copy out, work on the copy unheld, write back under a second grant
    #[default]
    Snapshot,
}

/// Which side of the protocol performs the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireDriver {
    /// Touch the fenced page and let the trap negotiate
    Fault,
    /// Explicit probes with an attempt budget and optional pacing
    Probe {
        max_attempts: u64,
        pause: Option<Duration>,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    pub mode: CycleMode,
    pub driver: AcquireDriver,
    /// Check the sum rule on every cycle after the first
    pub verify: bool,
    /// Unheld pause between copy-out and write-back, snapshot mode only
    pub think_time: Option<Duration>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            mode: CycleMode::default(),
            driver: AcquireDriver::Fault,
            verify: true,
            think_time: None,
        }
    }
}

/// End-of-run report, printable as JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub participant: ParticipantId,
    pub peer: ParticipantId,
    pub cycles: u64,
    pub grants: u64,
    pub retries: u64,
    pub final_payload: Option<Payload>,
}

/// Drives verify/compute/publish cycles through one lock
pub struct PayloadWorker {
    lock: RegionLock,
    config: WorkerConfig,
    completed: u64,
    scratch: Box<[u8]>,
    last: Option<Payload>,
}

impl PayloadWorker {
    pub fn new(lock: RegionLock, config: WorkerConfig) -> Self {
        let scratch = vec![0u8; lock.region().size()].into_boxed_slice();
        Self {
            lock,
            config,
            completed: 0,
            scratch,
            last: None,
        }
    }

    fn acquire(&self) -> Result<()> {
        match self.config.driver {
            AcquireDriver::Fault => self.lock.acquire(),
            AcquireDriver::Probe {
                max_attempts,
                pause,
            } => self.lock.acquire_bounded(max_attempts, pause),
        }
    }

    /// One full cycle in the configured mode
    pub fn run_cycle(&mut self) -> Result<()> {
        let written = match self.config.mode {
            CycleMode::InPlace => self.cycle_in_place()?,
            CycleMode::Snapshot => self.cycle_snapshot()?,
        };
        self.completed += 1;
        self.lock.note_cycle();
        debug!(
            cycle = self.completed,
            arg0 = written.arg0,
            arg1 = written.arg1,
            result = written.result,
            retries = self.lock.stats().retries,
            "cycle complete"
        );
        self.last = Some(written);
        Ok(())
    }

    fn cycle_in_place(&mut self) -> Result<Payload> {
        self.acquire()?;
        let seen = self.lock.region().read_payload();
        if self.config.verify && self.completed > 0 {
            verify_payload(seen);
        }
        let next = next_payload();
        self.lock.region().write_payload(next);
        self.lock.release()?;
        Ok(next)
    }

    fn cycle_snapshot(&mut self) -> Result<Payload> {
        self.acquire()?;
        self.lock.region().snapshot_into(&mut self.scratch);
        self.lock.release()?;

        let seen = Payload {
            arg0: self.scratch[layout::ARG0_OFFSET],
            arg1: self.scratch[layout::ARG1_OFFSET],
            result: self.scratch[layout::RESULT_OFFSET],
        };
        if self.config.verify && self.completed > 0 {
            verify_payload(seen);
        }
        if let Some(pause) = self.config.think_time {
            if !pause.is_zero() {
                std::thread::sleep(pause);
            }
        }
        let next = next_payload();

        // write-back touches only the payload cells, never the flag bank
        self.acquire()?;
        self.lock.region().write_payload(next);
        self.lock.release()?;
        Ok(next)
    }

    /// Run `budget` cycles, or forever when `None`
    pub fn run(&mut self, budget: Option<u64>) -> Result<()> {
        match budget {
            Some(n) => {
                for _ in 0..n {
                    self.run_cycle()?;
                }
            }
            None => loop {
                self.run_cycle()?;
            },
        }
        Ok(())
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn lock(&self) -> &RegionLock {
        &self.lock
    }

    pub fn summary(&self) -> RunSummary {
        let stats = self.lock.stats();
        let pair = self.lock.pair();
        RunSummary {
            participant: pair.local(),
            peer: pair.peer(),
            cycles: stats.cycles,
            grants: stats.grants,
            retries: stats.retries,
            final_payload: self.last,
        }
    }
}

/// The sum rule is the only integrity oracle; a miss means exclusion broke
/// and the run must die loudly.
fn verify_payload(seen: Payload) {
    if !seen.is_consistent() {
        panic!(
            "payload invariant violated: {} != {} + {} (mod 256)",
            seen.result, seen.arg0, seen.arg1
        );
    }
}

fn next_payload() -> Payload {
    Payload::compute(rand::random::<u8>(), rand::random::<u8>())
}
