//! Finding the processes a check is about: by pid file or by name.

use crate::error::CheckError;
use crate::runner::{self, CommandSpec};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use std::time::Duration;

fn parse_pids(s: &str, what: &str) -> Result<Vec<u32>, CheckError> {
    s.split_whitespace()
        .map(|p| {
            p.parse()
                .map_err(|e| CheckError::parse(what, format!("'{}': {}", p, e)))
        })
        .collect()
}

/// Pids listed in a pid file, separated by whitespace.
pub fn read_pid_file(path: &Path) -> Result<Vec<u32>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(parse_pids(&content, &format!("pid file {}", path.display()))?)
}

/// Pids of all processes running `name`, as reported by `pidof`. Empty if there is none.
pub fn pidof(pidof: &str, name: &str, timeout: Duration) -> Result<Vec<u32>> {
    let spec = CommandSpec::new(pidof).arg(name).timeout(timeout);
    let res = runner::run(&spec)?;
    if res.timed_out() {
        res.require_output()?;
    }
    // pidof exits 1 when nothing matches
    Ok(parse_pids(res.stdout(), "pidof output")?)
}

/// `1,2,3`
pub fn join(pids: &[u32]) -> String {
    pids.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
