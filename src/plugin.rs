//! Process boundary of a check: flags in, one status line and an exit code out.

use crate::error::{state_of, CheckError};
use crate::state::Verdict;
use anyhow::Result;
use clap::ErrorKind;
use env_logger::{Builder, Env};
use std::process::exit;
use structopt::StructOpt;

/// Logs go to stderr so that stdout carries nothing but the status line. `RUST_LOG=debug`
/// shows the commands being run.
pub fn init_logging() {
    Builder::from_env(Env::default().default_filter_or("warn"))
        .format_timestamp(None)
        .try_init()
        .ok();
}

/// Parses the command line into `T`. Unusable flags are an UNKNOWN check result, reported before
/// anything else runs. `--help` and `--version` behave as usual.
pub fn parse_flags<T: StructOpt>(name: &str) -> T {
    match T::from_iter_safe(std::env::args_os()) {
        Ok(opt) => opt,
        Err(e) if e.kind == ErrorKind::HelpDisplayed || e.kind == ErrorKind::VersionDisplayed => {
            e.exit()
        }
        Err(e) => {
            let msg = e.message.lines().next().unwrap_or_default();
            let msg = msg.trim_start_matches("error: ").to_owned();
            report(name, Err(CheckError::InvalidArgument(msg).into()))
        }
    }
}

/// Collapses an error into a verdict. The state comes from the first `CheckError` found in the
/// context chain, UNKNOWN if there is none.
pub fn outcome(result: Result<Verdict>) -> Verdict {
    match result {
        Ok(verdict) => verdict,
        Err(e) => Verdict::new(state_of(&e), format!("{:#}", e)),
    }
}

/// The only place where a check result turns into output and an exit code.
pub fn report(name: &str, result: Result<Verdict>) -> ! {
    let verdict = outcome(result);
    println!("{} {}", name, verdict);
    exit(verdict.exit_code())
}

/// Entry point shared by all checks: logging, flags, run, report.
pub fn main<T, F>(name: &str, check: F) -> !
where
    T: StructOpt,
    F: FnOnce(&T) -> Result<Verdict>,
{
    init_logging();
    let opt = parse_flags::<T>(name);
    report(name, check(&opt))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::state::State;
    use anyhow::Context;
    use std::time::Duration;

    #[test]
    fn timeout_becomes_critical() {
        let r: Result<Verdict> =
            Err(CheckError::Timeout(Duration::from_secs(10))).context("ceph osd tree");
        assert_eq!(
            outcome(r),
            Verdict::critical("ceph osd tree: Execution timed out after 10s")
        );
    }

    #[test]
    fn plain_error_becomes_unknown() {
        let r: Result<Verdict> = Err(anyhow::anyhow!("Format not recognized"));
        assert_eq!(outcome(r).state, State::UNKNOWN);
    }

    #[test]
    fn verdict_passes_through() {
        assert_eq!(outcome(Ok(Verdict::warning("w"))), Verdict::warning("w"));
    }
}
