//! Crash-point injection for recovery testing.
//!
//! When `CORVUS_CRASH_POINT` names an active crash point, reaching it
//! aborts the process immediately (no destructors, no clean shutdown),
//! simulating a crash at that exact spot. The recovery test harness runs a
//! setup phase with a crash point armed, then restarts on the same data
//! directory and verifies the replayed state.

use std::process;

pub const CRASH_POINT_ENV: &str = "CORVUS_CRASH_POINT";

/// Returns true if the named crash point is armed.
pub fn is_armed(name: &str) -> bool {
    match std::env::var(CRASH_POINT_ENV) {
        Ok(value) => value == name,
        Err(_) => false,
    }
}

/// Kills the process if the named crash point is armed.
pub fn crash_if_armed(name: &str) {
    if is_armed(name) {
        // exit code 137 mirrors a SIGKILL'd process
        eprintln!("crash point '{}' hit, aborting", name);
        process::exit(137);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unarmed_crash_point_is_a_no_op() {
        // the env var is not set in unit tests
        crash_if_armed("recovery::test_point");
        assert!(!is_armed("recovery::test_point"));
    }
}
