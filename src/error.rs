//! Error taxonomy for the grading harness
//!
//! Every failure a run can hit maps to an explicit kind so the orchestrator
//! can branch on category instead of string-matching. The split that matters
//! at the top level:
//!
//! - **Grading failure**: the submission is at fault (syntax error). The run
//!   still "completes" and the process exits 0.
//! - **Infrastructure failure**: everything else (hypervisor, transport,
//!   integrity, protocol). The run aborts and the process exits non-zero.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraderError {
    /// Could not establish a shell session to the guest (unreachable host,
    /// auth failure, protocol mismatch). Distinct from hypervisor errors.
    #[error("connection to host '{host}' failed: {detail}")]
    Connection { host: String, detail: String },

    /// The transport dropped mid-operation (command, stream, or upload).
    #[error("remote execution failed: {0}")]
    RemoteExecution(String),

    /// No domain of that name is defined on the hypervisor.
    #[error("failed to find domain '{0}'")]
    DomainNotFound(String),

    /// The hypervisor refused to start the domain, or it did not come up.
    #[error("failed to start domain '{0}': {1}")]
    DomainStart(String, String),

    /// Snapshot create/lookup/delete failed.
    #[error("snapshot operation failed for domain '{domain}': {detail}")]
    Snapshot { domain: String, detail: String },

    /// Guest-side checksum verification rejected an uploaded artifact.
    #[error("integrity check failed for '{0}'")]
    Integrity(PathBuf),

    /// The test suite exited with a status outside [0, 100]: it crashed or
    /// misbehaved rather than reporting a percentage.
    #[error("test suite returned error code {0}")]
    GradingProtocol(i64),

    /// Local syntax pre-check rejected the submission. The only kind that
    /// counts as a grading outcome.
    #[error("{0}")]
    SubmissionSyntax(String),

    /// Local syntax pre-check rejected the grader's own test-suite payload.
    /// Not the student's fault, so this is an infrastructure failure.
    #[error("test suite failed syntax pre-check: {0}")]
    TestSuiteSyntax(String),

    #[error("io error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl GraderError {
    /// True when the failure is the submission's fault rather than the
    /// harness's. Drives report wording and the process exit status.
    pub fn is_grading_failure(&self) -> bool {
        matches!(self, GraderError::SubmissionSyntax(_))
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        GraderError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, GraderError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_syntax_errors_are_grading_failures() {
        assert!(GraderError::SubmissionSyntax("bad indent".into()).is_grading_failure());

        assert!(!GraderError::Connection {
            host: "mininet".into(),
            detail: "timed out".into()
        }
        .is_grading_failure());
        assert!(!GraderError::DomainNotFound("mininet-test".into()).is_grading_failure());
        assert!(!GraderError::Integrity(PathBuf::from("submission.py")).is_grading_failure());
        assert!(!GraderError::GradingProtocol(101).is_grading_failure());
        assert!(!GraderError::TestSuiteSyntax("bad indent".into()).is_grading_failure());
    }

    #[test]
    fn test_display_messages() {
        let e = GraderError::GradingProtocol(255);
        assert_eq!(e.to_string(), "test suite returned error code 255");

        let e = GraderError::Integrity(PathBuf::from("tests.py"));
        assert_eq!(e.to_string(), "integrity check failed for 'tests.py'");

        let e = GraderError::Connection {
            host: "mininet".into(),
            detail: "no route".into(),
        };
        assert!(e.to_string().contains("mininet"));
        assert!(e.to_string().contains("no route"));
    }
}
