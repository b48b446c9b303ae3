//! Subprocess harness for the two-phase crash/recovery protocol.
//!
//! The setup phase runs in a child process with a crash point armed
//! through the environment; the child kills itself at that point, with no
//! destructors and no clean shutdown. The verify phase reopens the same
//! data directory in a fresh process; its exit status is the verdict. On
//! failure the data directory is intentionally left on disk for
//! postmortem.

use std::path::Path;
use std::process::{Command, Output};

/// Exit code the crash points die with, mirroring a SIGKILL'd process.
pub const CRASH_EXIT_CODE: i32 = 137;

fn binary() -> Command {
    Command::new(env!("CARGO_BIN_EXE_corvusdb"))
}

pub struct PhaseResult {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl PhaseResult {
    fn from_output(output: Output) -> Self {
        Self {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }
    }

    /// The `recovered` count the verify phase prints.
    pub fn recovered(&self) -> Option<u64> {
        self.stdout.lines().find_map(|line| {
            serde_json::from_str::<serde_json::Value>(line)
                .ok()?
                .get("recovered")?
                .as_u64()
        })
    }
}

/// Runs the setup phase; `crash_point` (if any) is armed in the child's
/// environment.
pub fn run_setup(data_dir: &Path, documents: usize, crash_point: Option<&str>) -> PhaseResult {
    let mut command = binary();
    command
        .arg("recovery-test")
        .arg("setup")
        .arg("--data-dir")
        .arg(data_dir)
        .arg("--documents")
        .arg(documents.to_string());
    match crash_point {
        Some(point) => command.env("CORVUS_CRASH_POINT", point),
        None => command.env_remove("CORVUS_CRASH_POINT"),
    };
    PhaseResult::from_output(command.output().expect("spawning setup phase"))
}

/// Runs the verify phase on the same directory, crash points disarmed.
pub fn run_verify(data_dir: &Path, documents: usize) -> PhaseResult {
    let mut command = binary();
    command
        .arg("recovery-test")
        .arg("verify")
        .arg("--data-dir")
        .arg(data_dir)
        .arg("--documents")
        .arg(documents.to_string())
        .env_remove("CORVUS_CRASH_POINT");
    PhaseResult::from_output(command.output().expect("spawning verify phase"))
}
