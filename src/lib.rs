//! Sensu/Nagios check plugins, a mail handler and a status mutator.
//!
//! Every check binary follows the same shape: flags are parsed into a `structopt` struct once,
//! one or more external commands are run through the bounded [`runner`], their output is parsed
//! and classified against warning/critical [`threshold`]s, and the resulting [`Verdict`] is
//! turned into a status line and an exit code exactly once by [`plugin::report`].
//!
//! Exit codes: 0 = OK, 1 = WARNING, 2 = CRITICAL, 3 = UNKNOWN.

pub mod ceph;
pub mod error;
pub mod event;
pub mod kafka;
pub mod plugin;
pub mod process;
pub mod runner;
pub mod state;
pub mod threshold;

pub use crate::error::CheckError;
pub use crate::runner::{CommandResult, CommandSpec, Exit};
pub use crate::state::{State, Verdict};
pub use crate::threshold::{Direction, Report, Thresholds};
