use serde::{Deserialize, Serialize};
use std::fmt;

/// Result kind of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    Pass,
    Fail,
    Skip,
    Warn,
    Omit,
}

impl OutcomeKind {
    /// Precedence when several outcomes are folded into one verdict.
    fn rank(&self) -> u8 {
        match self {
            OutcomeKind::Pass => 0,
            OutcomeKind::Warn => 1,
            OutcomeKind::Omit => 2,
            OutcomeKind::Skip => 3,
            OutcomeKind::Fail => 4,
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OutcomeKind::Pass => "pass",
            OutcomeKind::Fail => "fail",
            OutcomeKind::Skip => "skip",
            OutcomeKind::Warn => "warn",
            OutcomeKind::Omit => "omit",
        };
        f.write_str(label)
    }
}

/// The unit result of one check, with a message sufficient to reproduce the
/// judgment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub kind: OutcomeKind,
    pub message: String,
}

impl ValidationOutcome {
    pub fn new(kind: OutcomeKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn pass(message: impl Into<String>) -> Self {
        Self::new(OutcomeKind::Pass, message)
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self::new(OutcomeKind::Fail, message)
    }

    pub fn skip(message: impl Into<String>) -> Self {
        Self::new(OutcomeKind::Skip, message)
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::new(OutcomeKind::Warn, message)
    }

    pub fn omit(message: impl Into<String>) -> Self {
        Self::new(OutcomeKind::Omit, message)
    }

    pub fn is_fail(&self) -> bool {
        self.kind == OutcomeKind::Fail
    }
}

impl fmt::Display for ValidationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// Outcomes of one named check, folded into a single verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckReport {
    pub name: String,
    pub outcomes: Vec<ValidationOutcome>,
}

impl CheckReport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcomes: Vec::new(),
        }
    }

    pub fn with_outcomes(name: impl Into<String>, outcomes: Vec<ValidationOutcome>) -> Self {
        Self {
            name: name.into(),
            outcomes,
        }
    }

    pub fn push(&mut self, outcome: ValidationOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn extend(&mut self, outcomes: impl IntoIterator<Item = ValidationOutcome>) {
        self.outcomes.extend(outcomes);
    }

    /// fail > skip > omit > warn > pass. A report with no outcomes is a skip.
    pub fn verdict(&self) -> OutcomeKind {
        self.outcomes
            .iter()
            .map(|o| o.kind)
            .max_by_key(OutcomeKind::rank)
            .unwrap_or(OutcomeKind::Skip)
    }

    pub fn count(&self, kind: OutcomeKind) -> usize {
        self.outcomes.iter().filter(|o| o.kind == kind).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ValidationOutcome> {
        self.outcomes.iter().filter(|o| o.is_fail())
    }
}
