//! The error taxonomy test code and the scheduler speak.

use thiserror::Error;

use crate::status::Status;

/// Errors raised by steps, fixtures and the machinery underneath them.
///
/// The variant decides both the recorded status and how far the error
/// unwinds: `FailThis` stays on the step, `Fail` fails the case and its
/// suite, `Abort` unwinds the whole worker.
#[derive(Debug, Error)]
pub enum TestError {
    /// Halts the current case and every enclosing context on this worker.
    #[error("aborted: {0}")]
    Abort(String),

    /// Fails the current case and its immediate parent suite.
    #[error("failed: {0}")]
    Fail(String),

    /// Fails only the current step; the case continues.
    #[error("failed (local): {0}")]
    FailThis(String),

    /// Any other failure; recorded as ERROR.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TestError {
    pub fn abort(msg: impl Into<String>) -> Self {
        TestError::Abort(msg.into())
    }

    pub fn fail(msg: impl Into<String>) -> Self {
        TestError::Fail(msg.into())
    }

    pub fn fail_this(msg: impl Into<String>) -> Self {
        TestError::FailThis(msg.into())
    }

    /// The status this error stamps onto the slot it is recorded on.
    pub fn status(&self) -> Status {
        match self {
            TestError::Abort(_) => Status::NotCompleted,
            TestError::Fail(_) | TestError::FailThis(_) => Status::Failed,
            TestError::Other(_) => Status::Error,
        }
    }
}

impl From<dtx_runtime::Error> for TestError {
    fn from(err: dtx_runtime::Error) -> Self {
        // A dead device cannot continue its session; everything else is an
        // ordinary test failure.
        if err.is_disconnect() {
            TestError::Abort(err.to_string())
        } else {
            TestError::Other(anyhow::Error::new(err))
        }
    }
}

/// Result alias for steps and fixture hooks.
pub type StepResult = std::result::Result<(), TestError>;

/// Renders an error for a result slot. Without `debug`, only the surface
/// message is kept; with it, the full cause chain is included.
pub fn format_error(err: &TestError, debug: bool) -> String {
    match err {
        TestError::Other(source) if debug => format!("ERROR: {source:?}"),
        TestError::Other(source) => format!("ERROR: {source}"),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_taxonomy() {
        assert_eq!(TestError::abort("x").status(), Status::NotCompleted);
        assert_eq!(TestError::fail("x").status(), Status::Failed);
        assert_eq!(TestError::fail_this("x").status(), Status::Failed);
        assert_eq!(
            TestError::from(anyhow::anyhow!("boom")).status(),
            Status::Error
        );
    }

    #[test]
    fn disconnects_become_aborts() {
        let err = TestError::from(dtx_runtime::Error::ConnectionLost("reset".into()));
        assert!(matches!(err, TestError::Abort(_)));

        let err = TestError::from(dtx_runtime::Error::ResponseTimeout {
            id: 1,
            timeout: std::time::Duration::from_secs(1),
        });
        assert!(matches!(err, TestError::Other(_)));
    }

    #[test]
    fn formatting_elides_causes_unless_debug() {
        let inner = anyhow::anyhow!("root cause").context("outer");
        let err = TestError::Other(inner);
        let plain = format_error(&err, false);
        assert!(plain.contains("outer"));
        assert!(!plain.contains("root cause"));
        let verbose = format_error(&err, true);
        assert!(verbose.contains("root cause"));
    }
}
