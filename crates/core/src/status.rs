//! Execution statuses and their roll-up ordering.

use serde::Serialize;

/// Outcome of one execution slot or rolled-up record.
///
/// The ordering is a severity scale: combining two statuses keeps the
/// stronger one, with `Error` strongest and `NoRun` meaning nothing executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum Status {
    #[default]
    NoRun,
    Passed,
    Failed,
    NotCompleted,
    Error,
}

impl Status {
    fn severity(self) -> u8 {
        match self {
            Status::NoRun => 0,
            Status::Passed => 1,
            Status::Failed => 2,
            Status::NotCompleted => 3,
            Status::Error => 4,
        }
    }

    /// The stronger of two statuses.
    pub fn combine(self, other: Status) -> Status {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::NoRun => "NO_RUN",
            Status::Passed => "PASSED",
            Status::Failed => "FAILED",
            Status::NotCompleted => "NOT_COMPLETED",
            Status::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
