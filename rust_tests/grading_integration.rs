//! End-to-end orchestrator tests over scripted collaborators
//!
//! These drive the full sequence (setup, pre-checks, delivery, execution,
//! teardown) and pin down the failure classification and the
//! teardown-always-runs / never-masks guarantees.

mod common;

use common::{MockConnector, MockHypervisor, RecordingReporter, SessionScript};
use std::io::Write;
use tempfile::NamedTempFile;
use vmgrade::config::{GraderConfig, RetryPolicy};
use vmgrade::error::GraderError;
use vmgrade::hypervisor::PowerState;
use vmgrade::orchestrator::{Orchestrator, RunOutcome};
use vmgrade::shell::ShellConfig;

struct Fixture {
    // Held so the files outlive the config that points at them
    _submission: NamedTempFile,
    _tests: NamedTempFile,
    config: GraderConfig,
}

fn fixture(submission_code: &[u8]) -> Fixture {
    let mut submission = NamedTempFile::new().unwrap();
    submission.write_all(submission_code).unwrap();
    submission.flush().unwrap();

    let mut tests = NamedTempFile::new().unwrap();
    tests
        .write_all(b"import sys\nsys.exit(87)\n")
        .unwrap();
    tests.flush().unwrap();

    let config = GraderConfig {
        submission: submission.path().to_path_buf(),
        submission_dest: "/tmp/submission.py".to_string(),
        test_suite: tests.path().to_path_buf(),
        test_suite_dest: "/tmp/tests.py".to_string(),
        domain_name: "mininet-test".to_string(),
        hostname: "mininet".to_string(),
        shell: ShellConfig::default(),
        retry: RetryPolicy {
            attempts: 1,
            backoff_ms: 0,
        },
        hypervisor_uri: None,
    };

    Fixture {
        _submission: submission,
        _tests: tests,
        config,
    }
}

fn graded_script(status: i64) -> SessionScript {
    SessionScript {
        stream_chunks: vec![
            "*** Ping: testing ping reachability\n".to_string(),
            "Results: 13% dropped\n".to_string(),
        ],
        stream_status: status,
        ..Default::default()
    }
}

#[test]
fn full_run_reports_the_remote_exit_status_as_the_grade() {
    let fx = fixture(b"x = 1\n");
    let hv = MockHypervisor::with_domain("mininet-test", PowerState::ShutOff);
    let connector = MockConnector::new(graded_script(87));
    let mut reporter = RecordingReporter::default();

    let outcome = Orchestrator::new(&fx.config, &hv, &connector)
        .run(&mut reporter)
        .unwrap();

    assert_eq!(outcome, RunOutcome::Graded(87));
    assert_eq!(reporter.grade, Some(87));
    // Chunks arrive at the sink concatenated in guest order
    assert_eq!(
        reporter.output,
        "*** Ping: testing ping reachability\nResults: 13% dropped\n"
    );
    assert!(reporter.teardown_failure.is_none());

    // Snapshot created during setup no longer exists after the run
    assert_eq!(*hv.created.borrow(), vec!["vmgrade-mininet-test".to_string()]);
    assert_eq!(*hv.deleted.borrow(), vec!["vmgrade-mininet-test".to_string()]);
    assert!(!hv.has_snapshot("mininet-test", "vmgrade-mininet-test"));

    // Probe, two deliveries, one execution; every session closed
    let log = connector.log.borrow();
    assert_eq!(log.connects, 4);
    assert_eq!(log.closes, 4);
    assert_eq!(
        log.commands,
        vec![
            "mn --version".to_string(),
            "sha1sum -c /tmp/submission.py.sha1sum".to_string(),
            "sha1sum -c /tmp/tests.py.sha1sum".to_string(),
            "sudo python3 /tmp/tests.py".to_string(),
        ]
    );
}

#[test]
fn grade_zero_is_a_completed_run() {
    let fx = fixture(b"x = 1\n");
    let hv = MockHypervisor::with_domain("mininet-test", PowerState::Running);
    let connector = MockConnector::new(graded_script(0));
    let mut reporter = RecordingReporter::default();

    let outcome = Orchestrator::new(&fx.config, &hv, &connector)
        .run(&mut reporter)
        .unwrap();

    assert_eq!(outcome, RunOutcome::Graded(0));
    assert_eq!(reporter.grade, Some(0));
}

#[test]
fn out_of_range_exit_status_is_not_a_grade() {
    let fx = fixture(b"x = 1\n");
    let hv = MockHypervisor::with_domain("mininet-test", PowerState::Running);
    let connector = MockConnector::new(graded_script(101));
    let mut reporter = RecordingReporter::default();

    let err = Orchestrator::new(&fx.config, &hv, &connector)
        .run(&mut reporter)
        .unwrap_err();

    assert!(matches!(err, GraderError::GradingProtocol(101)));
    assert_eq!(reporter.grade, None);
    assert!(reporter
        .infrastructure_failure
        .as_deref()
        .unwrap()
        .contains("101"));

    // Teardown still ran
    assert!(!hv.has_snapshot("mininet-test", "vmgrade-mininet-test"));
}

#[test]
fn submission_syntax_error_is_a_grading_failure_and_skips_the_guest() {
    let fx = fixture(b"def broken(:\n    pass\n");
    let hv = MockHypervisor::with_domain("mininet-test", PowerState::Running);
    let connector = MockConnector::new(graded_script(87));
    let mut reporter = RecordingReporter::default();

    let outcome = Orchestrator::new(&fx.config, &hv, &connector)
        .run(&mut reporter)
        .unwrap();

    assert!(matches!(outcome, RunOutcome::GradingFailed(_)));
    assert!(reporter.grading_failure.is_some());
    assert!(reporter.infrastructure_failure.is_none());

    // Nothing was delivered or executed: only the setup probe touched the
    // guest
    let log = connector.log.borrow();
    assert_eq!(log.commands, vec!["mn --version".to_string()]);
    assert!(log.uploads.is_empty());

    // ...but the environment setup created was still torn down
    assert!(!hv.has_snapshot("mininet-test", "vmgrade-mininet-test"));
}

#[test]
fn broken_test_suite_payload_is_an_infrastructure_failure() {
    let mut fx = fixture(b"x = 1\n");
    let mut bad_tests = NamedTempFile::new().unwrap();
    bad_tests.write_all(b"import sys\nsys.exit(\n").unwrap();
    bad_tests.flush().unwrap();
    fx.config.test_suite = bad_tests.path().to_path_buf();

    let hv = MockHypervisor::with_domain("mininet-test", PowerState::Running);
    let connector = MockConnector::new(graded_script(87));
    let mut reporter = RecordingReporter::default();

    let err = Orchestrator::new(&fx.config, &hv, &connector)
        .run(&mut reporter)
        .unwrap_err();

    assert!(matches!(err, GraderError::TestSuiteSyntax(_)));
    assert!(reporter.grading_failure.is_none());
    assert!(connector.log.borrow().uploads.is_empty());
    assert!(!hv.has_snapshot("mininet-test", "vmgrade-mininet-test"));
}

#[test]
fn integrity_failure_aborts_before_execution_but_still_tears_down() {
    let fx = fixture(b"x = 1\n");
    let hv = MockHypervisor::with_domain("mininet-test", PowerState::Running);
    let connector = MockConnector::new(SessionScript {
        command_status: vec![("sha1sum -c /tmp/tests.py.sha1sum".to_string(), 1)],
        ..graded_script(87)
    });
    let mut reporter = RecordingReporter::default();

    let err = Orchestrator::new(&fx.config, &hv, &connector)
        .run(&mut reporter)
        .unwrap_err();

    assert!(matches!(err, GraderError::Integrity(_)));

    // The suite never ran
    let log = connector.log.borrow();
    assert!(!log
        .commands
        .iter()
        .any(|c| c.starts_with("sudo python3")));
    drop(log);

    assert!(!hv.has_snapshot("mininet-test", "vmgrade-mininet-test"));
}

#[test]
fn teardown_failure_never_masks_a_successful_grade() {
    let fx = fixture(b"x = 1\n");
    let mut hv = MockHypervisor::with_domain("mininet-test", PowerState::Running);
    hv.fail_delete = true;
    let connector = MockConnector::new(graded_script(87));
    let mut reporter = RecordingReporter::default();

    let outcome = Orchestrator::new(&fx.config, &hv, &connector)
        .run(&mut reporter)
        .unwrap();

    // The grade survives; the teardown failure rides the secondary channel
    assert_eq!(outcome, RunOutcome::Graded(87));
    assert_eq!(reporter.grade, Some(87));
    assert!(reporter
        .teardown_failure
        .as_deref()
        .unwrap()
        .contains("in use"));
}

#[test]
fn teardown_failure_never_masks_the_original_error() {
    let fx = fixture(b"x = 1\n");
    let mut hv = MockHypervisor::with_domain("mininet-test", PowerState::Running);
    hv.fail_delete = true;
    let connector = MockConnector::new(graded_script(255));
    let mut reporter = RecordingReporter::default();

    let err = Orchestrator::new(&fx.config, &hv, &connector)
        .run(&mut reporter)
        .unwrap_err();

    // The primary error keeps precedence; both are surfaced
    assert!(matches!(err, GraderError::GradingProtocol(255)));
    assert!(reporter.infrastructure_failure.is_some());
    assert!(reporter.teardown_failure.is_some());
}

#[test]
fn exit_status_is_unavailable_until_the_stream_is_drained() {
    use vmgrade::shell::{Connector, ShellSession};

    let connector = MockConnector::new(graded_script(87));
    let mut session = connector.connect("mininet").unwrap();
    let mut stream = session.run_streaming("sudo python3 /tmp/tests.py").unwrap();

    // One chunk consumed is not a drained stream
    assert!(stream.next_chunk().unwrap().is_some());
    assert!(matches!(
        stream.exit_status(),
        Err(GraderError::RemoteExecution(_))
    ));

    while stream.next_chunk().unwrap().is_some() {}
    assert_eq!(stream.exit_status().unwrap(), 87);
}

#[test]
fn setup_failure_aborts_before_anything_needs_teardown() {
    let fx = fixture(b"x = 1\n");
    let hv = MockHypervisor::default(); // no domains defined
    let connector = MockConnector::new(graded_script(87));
    let mut reporter = RecordingReporter::default();

    let err = Orchestrator::new(&fx.config, &hv, &connector)
        .run(&mut reporter)
        .unwrap_err();

    assert!(matches!(err, GraderError::DomainNotFound(_)));
    assert!(hv.deleted.borrow().is_empty());
    assert!(reporter.teardown_failure.is_none());
    // Teardown phase never even started
    assert!(!reporter
        .phases
        .iter()
        .any(|p| p.contains("Tearing down")));
}
