//! Child process management for crash tests
//!
//! A scenario is a pair of tests: a child that is a no-op unless
//! `BITINDEX_CRASH_TEST_DIR` is set, and a parent that runs the child
//! through this harness and checks what the crash left behind.

use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

/// Directory the child works in; unset outside a crash run
pub const CHILD_DIR_ENV: &str = "BITINDEX_CRASH_TEST_DIR";

/// Result of a crash test execution
#[derive(Debug)]
pub struct CrashTestResult {
    /// Whether the child aborted at the requested point
    pub crashed: bool,
    pub exit_status: Option<ExitStatus>,
    pub stderr: String,
}

/// Data directory when running as a crash child
pub fn child_dir() -> Option<PathBuf> {
    env::var_os(CHILD_DIR_ENV).map(PathBuf::from)
}

/// Runs the test `child_test` of this binary with `crash_point` enabled
pub fn run_child(child_test: &str, crash_point: &str, data_dir: &Path) -> CrashTestResult {
    let exe = match env::current_exe() {
        Ok(exe) => exe,
        Err(e) => {
            return CrashTestResult {
                crashed: false,
                exit_status: None,
                stderr: format!("Failed to locate test binary: {}", e),
            }
        }
    };

    let output = Command::new(exe)
        .args([child_test, "--exact", "--nocapture", "--test-threads=1"])
        .env("BITINDEX_CRASH_POINT", crash_point)
        .env(CHILD_DIR_ENV, data_dir)
        .output();

    match output {
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            CrashTestResult {
                crashed: !output.status.success() && stderr.contains("[CRASH]"),
                exit_status: Some(output.status),
                stderr,
            }
        }
        Err(e) => CrashTestResult {
            crashed: false,
            exit_status: None,
            stderr: format!("Failed to execute: {}", e),
        },
    }
}

/// Report crash test failure
pub fn report_failure(crash_point: &str, expected: &str, result: &CrashTestResult) {
    eprintln!("=== CRASH TEST FAILURE ===");
    eprintln!("Crash point: {}", crash_point);
    eprintln!("Expected: {}", expected);
    eprintln!("Exit status: {:?}", result.exit_status);
    eprintln!("Child stderr:\n{}", result.stderr);
    eprintln!("==========================");
}
