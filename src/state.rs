use std::fmt;

/// Check outcome as understood by Sensu and Nagios. The discriminant is the process exit code.
///
/// Ordering follows severity: `OK < WARNING < CRITICAL < UNKNOWN`. UNKNOWN sorts highest since
/// it means no trustworthy observation could be made at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum State {
    OK = 0,
    WARNING,
    CRITICAL,
    UNKNOWN,
}

impl State {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Maps a process exit status back to a state. Anything outside 0..=2 is UNKNOWN.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => State::OK,
            1 => State::WARNING,
            2 => State::CRITICAL,
            _ => State::UNKNOWN,
        }
    }
}

impl Default for State {
    fn default() -> Self {
        State::OK
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Final result of a check run: a state plus the human-readable text printed after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub state: State,
    pub message: String,
}

impl Verdict {
    pub fn new<S: Into<String>>(state: State, message: S) -> Self {
        Self {
            state,
            message: message.into(),
        }
    }

    pub fn ok<S: Into<String>>(message: S) -> Self {
        Self::new(State::OK, message)
    }

    pub fn warning<S: Into<String>>(message: S) -> Self {
        Self::new(State::WARNING, message)
    }

    pub fn critical<S: Into<String>>(message: S) -> Self {
        Self::new(State::CRITICAL, message)
    }

    pub fn unknown<S: Into<String>>(message: S) -> Self {
        Self::new(State::UNKNOWN, message)
    }

    pub fn exit_code(&self) -> i32 {
        self.state.code()
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.state)
        } else {
            write!(f, "{}: {}", self.state, self.message)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(State::OK.code(), 0);
        assert_eq!(State::WARNING.code(), 1);
        assert_eq!(State::CRITICAL.code(), 2);
        assert_eq!(State::UNKNOWN.code(), 3);
        assert_eq!(State::from_code(2), State::CRITICAL);
        assert_eq!(State::from_code(-1), State::UNKNOWN);
        assert_eq!(State::from_code(127), State::UNKNOWN);
    }

    #[test]
    fn severity_order() {
        assert!(State::CRITICAL > State::WARNING);
        assert!(State::WARNING > State::OK);
        assert_eq!(
            vec![State::WARNING, State::CRITICAL, State::OK]
                .into_iter()
                .max(),
            Some(State::CRITICAL)
        );
    }

    #[test]
    fn display() {
        assert_eq!(Verdict::ok("etcd is up").to_string(), "OK: etcd is up");
        assert_eq!(Verdict::critical("").to_string(), "CRITICAL");
    }
}
