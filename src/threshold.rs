//! Warning/critical bounds and aggregation of independent sub-checks.

use crate::state::{State, Verdict};

/// Which side of a bound counts as breached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// value > bound
    Above,
    /// value >= bound
    AtOrAbove,
    /// value < bound
    Below,
    /// value <= bound
    AtOrBelow,
}

impl Direction {
    pub fn breached<T: PartialOrd>(self, value: &T, bound: &T) -> bool {
        match self {
            Direction::Above => value > bound,
            Direction::AtOrAbove => value >= bound,
            Direction::Below => value < bound,
            Direction::AtOrBelow => value <= bound,
        }
    }

    /// Operator text as used in messages.
    pub fn symbol(self) -> &'static str {
        match self {
            Direction::Above => ">",
            Direction::AtOrAbove => ">=",
            Direction::Below => "<",
            Direction::AtOrBelow => "<=",
        }
    }
}

/// A warning and a critical bound. Either may be absent, in which case it never fires.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds<T> {
    pub warn: Option<T>,
    pub crit: Option<T>,
    pub direction: Direction,
}

impl<T: PartialOrd + Copy> Thresholds<T> {
    pub fn new(warn: T, crit: T, direction: Direction) -> Self {
        Self::optional(Some(warn), Some(crit), direction)
    }

    pub fn optional(warn: Option<T>, crit: Option<T>, direction: Direction) -> Self {
        Self {
            warn,
            crit,
            direction,
        }
    }

    /// Critical is evaluated first and always dominates a simultaneous warning breach.
    pub fn classify(&self, value: T) -> State {
        match (self.crit, self.warn) {
            (Some(c), _) if self.direction.breached(&value, &c) => State::CRITICAL,
            (_, Some(w)) if self.direction.breached(&value, &w) => State::WARNING,
            _ => State::OK,
        }
    }

    /// The bound that was breached for `state`, if any.
    pub fn bound(&self, state: State) -> Option<T> {
        match state {
            State::CRITICAL => self.crit,
            State::WARNING => self.warn,
            _ => None,
        }
    }
}

/// Collects the outcome of independent sub-checks (per host, per filesystem, per topic...).
///
/// The overall state is the most severe one pushed. The resulting message concatenates every
/// message recorded with exactly that state.
#[derive(Debug, Clone)]
pub struct Report {
    entries: Vec<(State, String)>,
    separator: &'static str,
}

impl Default for Report {
    fn default() -> Self {
        Self::new()
    }
}

impl Report {
    pub fn new() -> Self {
        Self::with_separator("; ")
    }

    pub fn with_separator(separator: &'static str) -> Self {
        Self {
            entries: Vec::new(),
            separator,
        }
    }

    pub fn push<S: Into<String>>(&mut self, state: State, message: S) {
        self.entries.push((state, message.into()))
    }

    /// Classifies `value` and records `message` unless the result is OK.
    pub fn check<T, F>(&mut self, thresholds: &Thresholds<T>, value: T, message: F) -> State
    where
        T: PartialOrd + Copy,
        F: FnOnce(State) -> String,
    {
        let state = thresholds.classify(value);
        if state != State::OK {
            self.push(state, message(state));
        }
        state
    }

    pub fn state(&self) -> State {
        self.entries
            .iter()
            .map(|(s, _)| *s)
            .max()
            .unwrap_or(State::OK)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Messages recorded with `state`, in insertion order.
    pub fn messages(&self, state: State) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(s, _)| *s == state)
            .map(|(_, m)| m.as_str())
            .collect()
    }

    pub fn verdict<S: Into<String>>(self, ok_message: S) -> Verdict {
        let state = self.state();
        if state == State::OK {
            return Verdict::new(State::OK, ok_message);
        }
        let message = self.messages(state).join(self.separator);
        Verdict::new(state, message)
    }
}
