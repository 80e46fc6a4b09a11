//! Run one external command to completion or kill it after a fixed wall-clock timeout.
//!
//! The child is made the leader of its own process group so that anything it forks (shell
//! pipelines, JVM helpers) is killed along with it. Output is captured while waiting, with a
//! single deadline shared by reading and reaping. Every call spawns exactly one child and reaps
//! it before returning, on all paths.

use crate::error::CheckError;
use anyhow::{Context, Result};
use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::ffi::OsString;
use std::fmt;
use std::io;
use std::time::{Duration, Instant};
use subprocess::{ExitStatus, Popen, PopenConfig, Redirection};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

// how long a SIGKILLed process group may take to disappear
const KILL_GRACE: Duration = Duration::from_secs(1);

/// What to run. Assembled by the caller from trusted configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    merge_stderr: bool,
    input: Option<Vec<u8>>,
    env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            merge_stderr: false,
            input: None,
            env: Vec::new(),
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I>(mut self, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Redirect stderr into the captured stdout (like `2>&1`).
    pub fn merge_stderr(mut self, merge: bool) -> Self {
        self.merge_stderr = merge;
        self
    }

    /// Bytes fed to the child's stdin. Without input, stdin is closed right away.
    pub fn stdin<B: Into<Vec<u8>>>(mut self, input: B) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_timeout(&self) -> Duration {
        self.timeout
    }

    fn argv(&self) -> Vec<&str> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.program.as_str());
        argv.extend(self.args.iter().map(String::as_str));
        argv
    }

    fn environment(&self) -> Option<Vec<(OsString, OsString)>> {
        if self.env.is_empty() {
            return None;
        }
        let mut env = PopenConfig::current_env();
        for (k, v) in &self.env {
            env.retain(|(key, _)| key != k.as_str());
            env.push((k.into(), v.into()));
        }
        Some(env)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv().join(" "))?;
        if self.merge_stderr {
            write!(f, " 2>&1")?;
        }
        Ok(())
    }
}

/// How the child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Code(u32),
    Signal(u8),
    Undetermined,
}

impl From<ExitStatus> for Exit {
    fn from(status: ExitStatus) -> Self {
        match status {
            ExitStatus::Exited(c) => Exit::Code(c),
            ExitStatus::Signaled(s) => Exit::Signal(s),
            ExitStatus::Other(_) | ExitStatus::Undetermined => Exit::Undetermined,
        }
    }
}

impl fmt::Display for Exit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exit::Code(c) => write!(f, "exit code {}", c),
            Exit::Signal(s) => write!(f, "signal {}", s),
            Exit::Undetermined => write!(f, "undetermined status"),
        }
    }
}

/// Outcome of one bounded run. Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResult {
    command: String,
    exit: Exit,
    stdout: String,
    stderr: String,
    timed_out: bool,
    timeout: Duration,
}

impl CommandResult {
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn exit(&self) -> Exit {
        self.exit
    }

    /// Captured stdout (including stderr if merged). Partial if the command timed out.
    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    /// Captured stderr. Always empty when stderr was merged into stdout.
    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// A timed-out run is never successful, whatever it printed before being killed.
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit == Exit::Code(0)
    }

    /// Turns the three command failure modes into errors: timeout, non-zero exit and no output
    /// at all. Returns the captured stdout otherwise.
    pub fn require_output(&self) -> Result<&str, CheckError> {
        if self.timed_out {
            return Err(CheckError::Timeout(self.timeout));
        }
        if !self.success() {
            let output = if self.stdout.trim().is_empty() {
                &self.stderr
            } else {
                &self.stdout
            };
            return Err(CheckError::NonZeroExit {
                command: self.command.clone(),
                status: self.exit.to_string(),
                output: output.trim().to_owned(),
            });
        }
        if self.stdout.trim().is_empty() {
            return Err(CheckError::EmptyOutput(self.command.clone()));
        }
        Ok(&self.stdout)
    }
}

/// Runs `spec` to completion or until its timeout elapses, whichever comes first.
///
/// A non-zero exit is data, not an error. Errors are reserved for failures of the runner itself,
/// e.g. the program could not be started.
pub fn run(spec: &CommandSpec) -> Result<CommandResult> {
    if spec.timeout == Duration::from_secs(0) {
        return Err(CheckError::InvalidArgument("timeout must be positive".into()).into());
    }
    debug!("running `{}' (timeout {:?})", spec, spec.timeout);
    let deadline = Instant::now() + spec.timeout;
    let mut child = Popen::create(
        &spec.argv(),
        PopenConfig {
            stdin: Redirection::Pipe,
            stdout: Redirection::Pipe,
            stderr: if spec.merge_stderr {
                Redirection::Merge
            } else {
                Redirection::Pipe
            },
            env: spec.environment(),
            setpgid: true,
            ..Default::default()
        },
    )
    .map_err(|source| CheckError::Spawn {
        command: spec.to_string(),
        source,
    })?;

    let collected = collect(&mut child, spec, deadline);
    if collected.is_err() {
        // don't leave anything behind, the error is what gets reported
        let _ = kill_group(&mut child, spec);
    }
    collected
}

fn collect(child: &mut Popen, spec: &CommandSpec, deadline: Instant) -> Result<CommandResult> {
    let (capture, mut timed_out) = match child
        // stdin is a pipe, so there is always input, possibly none at all
        .communicate_start(Some(spec.input.clone().unwrap_or_default()))
        .limit_time(spec.timeout)
        .read()
    {
        Ok(capture) => (capture, false),
        Err(e) if e.error.kind() == io::ErrorKind::TimedOut => (e.capture, true),
        Err(e) => {
            return Err(e.error).with_context(|| format!("Failed to read output of `{}'", spec))
        }
    };

    let mut status = None;
    if !timed_out {
        // output is closed, but the process may still linger
        let remaining = deadline.saturating_duration_since(Instant::now());
        status = child
            .wait_timeout(remaining)
            .with_context(|| format!("Failed to wait for `{}'", spec))?;
        timed_out = status.is_none();
    }
    if timed_out {
        warn!("`{}' timed out after {:?}", spec, spec.timeout);
        match kill_group(child, spec)? {
            Killed::Yes(s) => status = Some(s),
            Killed::AlreadyExited(s) => {
                status = Some(s);
                timed_out = false;
            }
        }
    }

    let (stdout, stderr) = capture;
    Ok(CommandResult {
        command: spec.to_string(),
        exit: status.map(Exit::from).unwrap_or(Exit::Undetermined),
        stdout: decode(stdout),
        stderr: decode(stderr),
        timed_out,
        timeout: spec.timeout,
    })
}

enum Killed {
    Yes(ExitStatus),
    AlreadyExited(ExitStatus),
}

fn kill_group(child: &mut Popen, spec: &CommandSpec) -> Result<Killed> {
    let pid = match child.pid() {
        Some(pid) => pid,
        None => {
            // already reaped
            let status = child.exit_status().unwrap_or(ExitStatus::Undetermined);
            return Ok(Killed::AlreadyExited(status));
        }
    };
    let mut raced = false;
    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) => (),
        Err(Errno::ESRCH) => {
            debug!("process group {} of `{}' already gone", pid, spec);
            raced = true;
        }
        Err(e) => {
            warn!("killpg({}) failed: {}, killing `{}' only", pid, e, spec);
            child
                .kill()
                .with_context(|| format!("Failed to kill `{}'", spec))?;
        }
    }
    let status = match child.wait_timeout(KILL_GRACE)? {
        Some(s) => s,
        None => {
            warn!("`{}' survived SIGKILL for {:?}, waiting", spec, KILL_GRACE);
            child.kill().ok();
            child.wait()?
        }
    };
    if raced {
        Ok(Killed::AlreadyExited(status))
    } else {
        Ok(Killed::Yes(status))
    }
}

fn decode(buf: Option<Vec<u8>>) -> String {
    buf.map(|b| String::from_utf8_lossy(&b).into_owned())
        .unwrap_or_default()
}
