//! Reporter Module: Trait-based output for Human (CLI) and Machine (JSON) formats
//!
//! ## Architecture
//!
//! - `Reporter` trait defines the run event callbacks
//! - `JsonReporter` outputs NDJSON to stdout (for --format=json)
//! - `HumanReporter` outputs human-readable text to stderr
//!
//! ## Stdout Purity
//!
//! When JsonReporter is active, ONLY valid JSON goes to stdout. All other
//! output (progress, test chunks, errors) must go to stderr.

use serde::Serialize;
use std::io::Write;

/// Machine-readable events for JSON output
#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MachineEvent<'a> {
    /// Emitted once at the start of a grading run
    RunStart { domain: &'a str, host: &'a str },
    /// Emitted when an orchestration phase begins
    PhaseStart { phase: &'a str },
    /// Emitted when an orchestration phase completes
    PhaseComplete { phase: &'a str },
    /// A chunk of live test-suite output from the guest
    TestOutput { chunk: &'a str },
    /// The run completed and produced a grade
    Grade { percent: u8 },
    /// The submission failed grading (syntax pre-check)
    GradingFailure { detail: &'a str },
    /// The harness failed before a grade could be produced
    InfrastructureFailure { message: &'a str },
    /// Teardown failed after the run's primary outcome was already known
    TeardownFailure { message: &'a str },
}

/// Reporter trait for output abstraction
pub trait Reporter {
    /// Called once at the start of a grading run
    fn on_run_start(&mut self, domain: &str, host: &str);

    /// Called when an orchestration phase begins
    fn on_phase_start(&mut self, phase: &str);

    /// Called when an orchestration phase completes
    fn on_phase_complete(&mut self, phase: &str);

    /// Called for each live output chunk from the remote test suite.
    /// This is the only progress signal during test execution.
    fn on_test_output(&mut self, chunk: &str);

    /// Called when the run produced a grade
    fn on_grade(&mut self, percent: u8);

    /// Called when the submission failed grading
    fn on_grading_failure(&mut self, detail: &str);

    /// Called when the harness failed before a grade could be produced
    fn on_infrastructure_failure(&mut self, message: &str);

    /// Called when teardown failed; never replaces the primary outcome
    fn on_teardown_failure(&mut self, message: &str);
}

/// JSON Reporter - outputs NDJSON to stdout
pub struct JsonReporter;

impl JsonReporter {
    fn emit(&self, event: &MachineEvent) {
        // ONLY JsonReporter touches stdout
        println!("{}", serde_json::to_string(event).unwrap());
    }
}

impl Reporter for JsonReporter {
    fn on_run_start(&mut self, domain: &str, host: &str) {
        self.emit(&MachineEvent::RunStart { domain, host });
    }

    fn on_phase_start(&mut self, phase: &str) {
        self.emit(&MachineEvent::PhaseStart { phase });
    }

    fn on_phase_complete(&mut self, phase: &str) {
        self.emit(&MachineEvent::PhaseComplete { phase });
    }

    fn on_test_output(&mut self, chunk: &str) {
        self.emit(&MachineEvent::TestOutput { chunk });
    }

    fn on_grade(&mut self, percent: u8) {
        self.emit(&MachineEvent::Grade { percent });
    }

    fn on_grading_failure(&mut self, detail: &str) {
        self.emit(&MachineEvent::GradingFailure { detail });
    }

    fn on_infrastructure_failure(&mut self, message: &str) {
        self.emit(&MachineEvent::InfrastructureFailure { message });
    }

    fn on_teardown_failure(&mut self, message: &str) {
        self.emit(&MachineEvent::TeardownFailure { message });
    }
}

/// Human Reporter - outputs readable text to stderr
pub struct HumanReporter;

impl Reporter for HumanReporter {
    fn on_run_start(&mut self, domain: &str, host: &str) {
        eprintln!("[vmgrade] Grading on domain '{}' (guest '{}')", domain, host);
    }

    fn on_phase_start(&mut self, phase: &str) {
        eprint!("[vmgrade] {}...", phase);
        let _ = std::io::stderr().flush();
    }

    fn on_phase_complete(&mut self, _phase: &str) {
        eprintln!("complete");
    }

    fn on_test_output(&mut self, chunk: &str) {
        eprint!("{}", chunk);
        let _ = std::io::stderr().flush();
    }

    fn on_grade(&mut self, percent: u8) {
        eprintln!();
        eprintln!("Grade: {}%", percent);
    }

    fn on_grading_failure(&mut self, detail: &str) {
        eprintln!();
        eprintln!("fail:\n{}", detail);
    }

    fn on_infrastructure_failure(&mut self, message: &str) {
        eprintln!();
        eprintln!("[vmgrade] Error occurred grading submission ({})", message);
    }

    fn on_teardown_failure(&mut self, message: &str) {
        eprintln!("[vmgrade] Failed to clean up test environment ({})", message);
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grade_event_serialization() {
        let event = MachineEvent::Grade { percent: 87 };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"grade\""));
        assert!(json.contains("\"percent\":87"));
    }

    #[test]
    fn test_phase_event_serialization() {
        let event = MachineEvent::PhaseStart {
            phase: "Standing up test environment",
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"phase_start\""));
        assert!(json.contains("Standing up test environment"));
    }

    #[test]
    fn test_failure_events_are_distinct() {
        let grading = serde_json::to_string(&MachineEvent::GradingFailure {
            detail: "invalid syntax (line 3)",
        })
        .unwrap();
        let infra = serde_json::to_string(&MachineEvent::InfrastructureFailure {
            message: "connection to host 'mininet' failed",
        })
        .unwrap();
        assert!(grading.contains("\"event\":\"grading_failure\""));
        assert!(infra.contains("\"event\":\"infrastructure_failure\""));
    }

    #[test]
    fn test_teardown_event_serialization() {
        let event = MachineEvent::TeardownFailure {
            message: "snapshot already gone",
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"teardown_failure\""));
    }
}
