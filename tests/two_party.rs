//! End-to-end runs of the faultgate binary
//!
//! Spawns real processes so the trap installation, the named object
//! lifecycle, and the handshake are exercised across true address spaces
//! rather than threads.

use faultgate_shm::{GateState, RegionBacking, SharedRegion};
use std::process::{Command, Output, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

const BIN: &str = env!("CARGO_BIN_EXE_faultgate");

fn unique_region(tag: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    format!("/faultgate-e2e-{tag}-{}-{nanos}", std::process::id())
}

fn summary_from(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout.lines().last().unwrap_or_default();
    serde_json::from_str(line).expect("run summary should be JSON on stdout")
}

#[test]
fn two_fault_driven_processes_preserve_the_sum() {
    const ITERATIONS: u64 = 100_000;
    let region = unique_region("pair");

    let spawn = |own: &str, other: &str| {
        Command::new(BIN)
            .args([
                own,
                other,
                "--region",
                &region,
                "--iterations",
                &ITERATIONS.to_string(),
                "--stats-json",
                "--log-level",
                "warn",
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("faultgate binary should spawn")
    };

    let first = spawn("0", "1");
    let second = spawn("1", "0");

    let first = first.wait_with_output().expect("participant 0 should finish");
    let second = second.wait_with_output().expect("participant 1 should finish");

    // a sum-rule miss panics the worker, so success already means every
    // cycle verified the peer's writes
    assert!(
        first.status.success(),
        "participant 0 failed: {}",
        String::from_utf8_lossy(&first.stderr)
    );
    assert!(
        second.status.success(),
        "participant 1 failed: {}",
        String::from_utf8_lossy(&second.stderr)
    );

    let a = summary_from(&first);
    let b = summary_from(&second);
    assert_eq!(a["cycles"], ITERATIONS);
    assert_eq!(b["cycles"], ITERATIONS);
    assert_eq!(a["grants"], ITERATIONS * 2);
    assert_eq!(b["grants"], ITERATIONS * 2);

    let denials = a["retries"].as_u64().unwrap_or(0) + b["retries"].as_u64().unwrap_or(0);
    assert!(denials > 0, "no contention across {ITERATIONS} concurrent cycles");

    let observer = SharedRegion::open(RegionBacking::Named(region.clone()))
        .expect("region should still exist after both runs");
    observer.set_gate(GateState::ReadWrite).expect("gate");
    assert!(observer.read_payload().is_consistent());

    drop(observer);
    SharedRegion::unlink(&region).expect("unlink");
}

#[test]
fn two_probing_processes_share_the_region_too() {
    const ITERATIONS: u64 = 5_000;
    let region = unique_region("probe");

    let spawn = |own: &str, other: &str| {
        Command::new(BIN)
            .args([
                own,
                other,
                "--region",
                &region,
                "--iterations",
                &ITERATIONS.to_string(),
                "--probe",
                "--mode",
                "in-place",
                "--retry-pause-us",
                "10",
                "--stats-json",
                "--log-level",
                "warn",
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("faultgate binary should spawn")
    };

    let first = spawn("0", "1");
    let second = spawn("1", "0");

    let first = first.wait_with_output().expect("participant 0 should finish");
    let second = second.wait_with_output().expect("participant 1 should finish");

    assert!(
        first.status.success(),
        "participant 0 failed: {}",
        String::from_utf8_lossy(&first.stderr)
    );
    assert!(
        second.status.success(),
        "participant 1 failed: {}",
        String::from_utf8_lossy(&second.stderr)
    );

    let a = summary_from(&first);
    let b = summary_from(&second);
    assert_eq!(a["cycles"], ITERATIONS);
    assert_eq!(b["cycles"], ITERATIONS);
    assert_eq!(a["grants"], ITERATIONS);
    assert_eq!(b["grants"], ITERATIONS);

    SharedRegion::unlink(&region).expect("unlink");
}

#[test]
fn solo_participant_is_never_denied() {
    let output = Command::new(BIN)
        .args([
            "5",
            "6",
            "--anonymous",
            "--iterations",
            "1000",
            "--stats-json",
            "--log-level",
            "warn",
        ])
        .output()
        .expect("faultgate binary should run");

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let summary = summary_from(&output);
    assert_eq!(summary["cycles"], 1000u64);
    assert_eq!(summary["grants"], 2000u64);
    assert_eq!(summary["retries"], 0u64);
}

#[test]
fn identical_ids_are_rejected_before_any_mapping() {
    let output = Command::new(BIN)
        .args(["3", "3", "--anonymous", "--iterations", "1"])
        .output()
        .expect("faultgate binary should run");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("must differ"), "stderr: {stderr}");
}

#[test]
fn out_of_range_ids_are_rejected() {
    let output = Command::new(BIN)
        .args(["0", "16", "--anonymous", "--iterations", "1"])
        .output()
        .expect("faultgate binary should run");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("out of range"), "stderr: {stderr}");
}
