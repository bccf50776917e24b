//! Orchestrator: sequences one grading run end to end
//!
//! setup -> syntax pre-checks -> deliver(submission) -> deliver(tests)
//!       -> run tests -> teardown
//!
//! Teardown runs whenever setup succeeded, no matter where the main
//! sequence failed, and a teardown error never masks the primary outcome:
//! it is reported on its own channel and the original result keeps
//! precedence in both the report and the process exit status.
//!
//! Failure classification:
//! - grading failure (submission at fault): syntax pre-check rejection.
//!   The run still "completes"; the process exits 0.
//! - infrastructure failure (harness at fault): everything else. The
//!   process exits non-zero, no grade is produced.

use crate::config::GraderConfig;
use crate::delivery::{deliver, Artifact};
use crate::error::{GraderError, Result};
use crate::executor::run_tests;
use crate::hypervisor::Hypervisor;
use crate::lifecycle::LifecycleManager;
use crate::precheck::check_syntax;
use crate::reporter::Reporter;
use crate::shell::{Connector, ShellSession};

/// How a completed run ended. Both variants exit 0; an `Err` from
/// [`Orchestrator::run`] is an infrastructure failure and exits non-zero.
#[derive(Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// The suite ran and reported a percentage.
    Graded(u8),
    /// The submission failed grading before execution (syntax detail).
    GradingFailed(String),
}

pub struct Orchestrator<'a> {
    config: &'a GraderConfig,
    hypervisor: &'a dyn Hypervisor,
    connector: &'a dyn Connector,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a GraderConfig,
        hypervisor: &'a dyn Hypervisor,
        connector: &'a dyn Connector,
    ) -> Self {
        Self {
            config,
            hypervisor,
            connector,
        }
    }

    /// Run one grading pass. Every outcome is reported through `reporter`
    /// before this returns.
    pub fn run(&self, reporter: &mut dyn Reporter) -> Result<RunOutcome> {
        reporter.on_run_start(&self.config.domain_name, &self.config.hostname);

        let lifecycle =
            LifecycleManager::new(self.hypervisor, self.connector, self.config.retry.clone());

        // Setup failures abort before anything needs tearing down.
        reporter.on_phase_start("Standing up test environment");
        let env = match lifecycle.setup(&self.config.domain_name, &self.config.hostname) {
            Ok(env) => env,
            Err(e) => {
                reporter.on_infrastructure_failure(&e.to_string());
                return Err(e);
            }
        };
        reporter.on_phase_complete("Standing up test environment");

        // From here on the snapshot exists; teardown is owed regardless of
        // how the graded phases end.
        let outcome = self.graded_phases(&mut *reporter);

        reporter.on_phase_start("Tearing down test environment");
        match lifecycle.teardown(&env) {
            Ok(()) => reporter.on_phase_complete("Tearing down test environment"),
            Err(td) => reporter.on_teardown_failure(&td.to_string()),
        }

        match &outcome {
            Ok(RunOutcome::Graded(grade)) => reporter.on_grade(*grade),
            Ok(RunOutcome::GradingFailed(detail)) => reporter.on_grading_failure(detail),
            Err(e) => reporter.on_infrastructure_failure(&e.to_string()),
        }
        outcome
    }

    /// The phases that run between setup and teardown.
    fn graded_phases(&self, reporter: &mut dyn Reporter) -> Result<RunOutcome> {
        // Submission syntax failure is the one grading (not infrastructure)
        // outcome; the guest is never contacted for delivery or execution.
        reporter.on_phase_start("Checking submission syntax");
        if let Err(fault) = check_syntax(&self.config.submission) {
            return Ok(RunOutcome::GradingFailed(fault.detail));
        }
        reporter.on_phase_complete("Checking submission syntax");

        // A broken test-suite payload is the harness's fault, not the
        // student's.
        reporter.on_phase_start("Checking test suite syntax");
        check_syntax(&self.config.test_suite)
            .map_err(|fault| GraderError::TestSuiteSyntax(fault.detail))?;
        reporter.on_phase_complete("Checking test suite syntax");

        reporter.on_phase_start("Installing submission on guest");
        let submission = Artifact::new(&self.config.submission, &self.config.submission_dest);
        self.with_session(|session| deliver(session, &submission))?;
        reporter.on_phase_complete("Installing submission on guest");

        reporter.on_phase_start("Installing test suite on guest");
        let tests = Artifact::new(&self.config.test_suite, &self.config.test_suite_dest);
        self.with_session(|session| deliver(session, &tests))?;
        reporter.on_phase_complete("Installing test suite on guest");

        reporter.on_phase_start("Running test suite");
        let grade = self.with_session(|session| {
            run_tests(session, &self.config.test_suite_dest, &mut *reporter)
        })?;
        reporter.on_phase_complete("Running test suite");

        Ok(RunOutcome::Graded(grade))
    }

    /// One shell session per phase, closed even when the phase fails.
    fn with_session<T>(
        &self,
        f: impl FnOnce(&mut dyn ShellSession) -> Result<T>,
    ) -> Result<T> {
        let mut session = self.connector.connect(&self.config.hostname)?;
        let result = f(session.as_mut());
        session.close();
        result
    }
}
