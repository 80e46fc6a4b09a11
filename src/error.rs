use crate::state::State;
use std::time::Duration;
use thiserror::Error;

/// Distinguished failure kinds of a check run. Everything else that goes wrong inside a check is
/// an ordinary `anyhow::Error` and is reported as UNKNOWN.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("Execution timed out after {}", humantime::format_duration(*.0))]
    Timeout(Duration),

    #[error("Command '{command}' exited with {status}: {output}")]
    NonZeroExit {
        command: String,
        status: String,
        output: String,
    },

    #[error("Command '{0}' returned no output")]
    EmptyOutput(String),

    #[error("Failed to parse {what}: {detail}")]
    Parse { what: String, detail: String },

    #[error("{0}")]
    Connection(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to execute '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: subprocess::PopenError,
    },
}

impl CheckError {
    pub fn parse<W: Into<String>, D: ToString>(what: W, detail: D) -> Self {
        CheckError::Parse {
            what: what.into(),
            detail: detail.to_string(),
        }
    }

    /// State a check ends in when this error reaches the outermost boundary.
    ///
    /// Timeouts, failing commands and unreachable services are the monitored condition itself
    /// and go CRITICAL. Missing or garbled data and bad arguments mean nothing was measured.
    pub fn state(&self) -> State {
        match self {
            CheckError::Timeout(_) | CheckError::NonZeroExit { .. } | CheckError::Connection(_) => {
                State::CRITICAL
            }
            CheckError::EmptyOutput(_)
            | CheckError::Parse { .. }
            | CheckError::InvalidArgument(_)
            | CheckError::Spawn { .. } => State::UNKNOWN,
        }
    }
}

/// Looks through an error's context chain for a `CheckError` and returns its state.
pub fn state_of(err: &anyhow::Error) -> State {
    err.chain()
        .find_map(|e| e.downcast_ref::<CheckError>())
        .map(CheckError::state)
        .unwrap_or(State::UNKNOWN)
}
