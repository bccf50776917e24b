//! Test Execution Driver: run the delivered suite on the guest and grade it
//!
//! The suite runs with elevated privilege (mininet needs root on the guest)
//! and its stdout is streamed chunk-by-chunk to the reporter as it arrives.
//! The exit status encodes the grade: a status in [0, 100] IS the
//! percentage, anything else means the suite crashed or misbehaved and is a
//! protocol error, never "grade 101%". Percentage derivation (e.g. from
//! reachability-pair differences) lives inside the test-suite payload; this
//! layer does no scaling.

use crate::error::{GraderError, Result};
use crate::reporter::Reporter;
use crate::shell::ShellSession;

/// Run the test suite at `remote_test_path` and return the grade.
///
/// The output stream is drained to completion before the exit status is
/// read; draining is what forwards live progress to the reporter.
pub fn run_tests(
    session: &mut dyn ShellSession,
    remote_test_path: &str,
    reporter: &mut dyn Reporter,
) -> Result<u8> {
    let command = format!("sudo python3 {}", remote_test_path);
    let mut stream = session.run_streaming(&command)?;

    while let Some(chunk) = stream.next_chunk()? {
        reporter.on_test_output(&chunk);
    }

    grade_from_status(stream.exit_status()?)
}

/// Convert a remote exit status into a grade, rejecting anything outside
/// the valid [0, 100] range.
pub fn grade_from_status(status: i64) -> Result<u8> {
    if (0..=100).contains(&status) {
        Ok(status as u8)
    } else {
        Err(GraderError::GradingProtocol(status))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grade_range_boundaries() {
        assert_eq!(grade_from_status(0).unwrap(), 0);
        assert_eq!(grade_from_status(87).unwrap(), 87);
        assert_eq!(grade_from_status(100).unwrap(), 100);
    }

    #[test]
    fn test_out_of_range_status_is_protocol_error() {
        assert!(matches!(
            grade_from_status(101),
            Err(GraderError::GradingProtocol(101))
        ));
        assert!(matches!(
            grade_from_status(-1),
            Err(GraderError::GradingProtocol(-1))
        ));
        assert!(matches!(
            grade_from_status(255),
            Err(GraderError::GradingProtocol(255))
        ));
    }
}
