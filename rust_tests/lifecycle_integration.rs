//! Environment lifecycle integration tests
//!
//! Exercise the setup/teardown state machine against a scripted hypervisor
//! and transport: snapshot ownership, reachability retries, and failure
//! ordering.

mod common;

use common::{MockConnector, MockHypervisor, SessionScript};
use vmgrade::config::RetryPolicy;
use vmgrade::error::GraderError;
use vmgrade::hypervisor::PowerState;
use vmgrade::lifecycle::{snapshot_name, LifecycleManager, LIVENESS_PROBE};

fn fast_retry(attempts: u32) -> RetryPolicy {
    RetryPolicy {
        attempts,
        backoff_ms: 0,
    }
}

#[test]
fn setup_starts_shutoff_domain_and_snapshots_it() {
    let hv = MockHypervisor::with_domain("mininet-test", PowerState::ShutOff);
    let connector = MockConnector::new(SessionScript::default());
    let lifecycle = LifecycleManager::new(&hv, &connector, fast_retry(1));

    let env = lifecycle.setup("mininet-test", "mininet").unwrap();

    assert_eq!(env.domain_name, "mininet-test");
    assert_eq!(env.snapshot_name, "vmgrade-mininet-test");
    assert!(hv.has_snapshot("mininet-test", "vmgrade-mininet-test"));

    // The probe ran over its own session, which was closed afterwards
    let log = connector.log.borrow();
    assert_eq!(log.commands, vec![LIVENESS_PROBE.to_string()]);
    assert_eq!(log.connects, 1);
    assert_eq!(log.closes, 1);
}

#[test]
fn setup_skips_start_when_already_running() {
    let hv = MockHypervisor::with_domain("mininet-test", PowerState::Running);
    let connector = MockConnector::new(SessionScript::default());
    let lifecycle = LifecycleManager::new(&hv, &connector, fast_retry(1));

    assert!(lifecycle.setup("mininet-test", "mininet").is_ok());
}

#[test]
fn teardown_deletes_exactly_the_snapshot_setup_created() {
    let hv = MockHypervisor::with_domain("mininet-test", PowerState::Running);
    // A snapshot someone else owns must survive the run
    hv.seed_snapshot("mininet-test", "nightly-backup");

    let connector = MockConnector::new(SessionScript::default());
    let lifecycle = LifecycleManager::new(&hv, &connector, fast_retry(1));

    let env = lifecycle.setup("mininet-test", "mininet").unwrap();
    lifecycle.teardown(&env).unwrap();

    assert!(!hv.has_snapshot("mininet-test", &env.snapshot_name));
    assert!(hv.has_snapshot("mininet-test", "nightly-backup"));
    assert_eq!(*hv.deleted.borrow(), vec![snapshot_name("mininet-test")]);
}

#[test]
fn unknown_domain_aborts_with_no_side_effects() {
    let hv = MockHypervisor::default();
    let connector = MockConnector::new(SessionScript::default());
    let lifecycle = LifecycleManager::new(&hv, &connector, fast_retry(1));

    let err = lifecycle.setup("ghost-vm", "mininet").unwrap_err();
    assert!(matches!(err, GraderError::DomainNotFound(name) if name == "ghost-vm"));

    // The guest was never contacted and nothing was created
    assert_eq!(connector.log.borrow().connects, 0);
    assert!(hv.created.borrow().is_empty());
}

#[test]
fn refused_start_is_fatal() {
    let mut hv = MockHypervisor::with_domain("mininet-test", PowerState::ShutOff);
    hv.refuse_start = true;
    let connector = MockConnector::new(SessionScript::default());
    let lifecycle = LifecycleManager::new(&hv, &connector, fast_retry(1));

    let err = lifecycle.setup("mininet-test", "mininet").unwrap_err();
    assert!(matches!(err, GraderError::DomainStart(_, _)));
    assert_eq!(connector.log.borrow().connects, 0);
}

#[test]
fn domain_stuck_after_start_is_fatal_not_retried() {
    let mut hv = MockHypervisor::with_domain("mininet-test", PowerState::ShutOff);
    hv.stuck_after_start = true;
    let connector = MockConnector::new(SessionScript::default());
    let lifecycle = LifecycleManager::new(&hv, &connector, fast_retry(3));

    let err = lifecycle.setup("mininet-test", "mininet").unwrap_err();
    assert!(matches!(err, GraderError::DomainStart(_, detail)
        if detail.contains("shut off")));
    assert!(hv.created.borrow().is_empty());
}

#[test]
fn unsupported_power_state_is_fatal() {
    let hv = MockHypervisor::with_domain(
        "mininet-test",
        PowerState::Unsupported("paused".to_string()),
    );
    let connector = MockConnector::new(SessionScript::default());
    let lifecycle = LifecycleManager::new(&hv, &connector, fast_retry(1));

    let err = lifecycle.setup("mininet-test", "mininet").unwrap_err();
    assert!(matches!(err, GraderError::DomainStart(_, detail)
        if detail.contains("paused")));
}

#[test]
fn unreachable_guest_exhausts_retries_then_fails_without_snapshot() {
    let hv = MockHypervisor::with_domain("mininet-test", PowerState::Running);
    let connector = MockConnector::new(SessionScript {
        command_status: vec![(LIVENESS_PROBE.to_string(), 127)],
        ..Default::default()
    });
    let lifecycle = LifecycleManager::new(&hv, &connector, fast_retry(4));

    let err = lifecycle.setup("mininet-test", "mininet").unwrap_err();
    assert!(matches!(err, GraderError::Connection { ref host, .. } if host == "mininet"));

    // One probe per attempt, every session closed, no snapshot taken
    let log = connector.log.borrow();
    assert_eq!(log.connects, 4);
    assert_eq!(log.closes, 4);
    assert!(hv.created.borrow().is_empty());
}

#[test]
fn connect_refusals_also_count_as_attempts() {
    let hv = MockHypervisor::with_domain("mininet-test", PowerState::Running);
    let connector = MockConnector::new(SessionScript {
        connect_fail: true,
        ..Default::default()
    });
    let lifecycle = LifecycleManager::new(&hv, &connector, fast_retry(2));

    let err = lifecycle.setup("mininet-test", "mininet").unwrap_err();
    assert!(matches!(err, GraderError::Connection { detail, .. }
        if detail.contains("2 attempt(s)")));
    assert!(hv.created.borrow().is_empty());
}

#[test]
fn teardown_of_missing_snapshot_is_a_snapshot_error() {
    let hv = MockHypervisor::with_domain("mininet-test", PowerState::Running);
    let connector = MockConnector::new(SessionScript::default());
    let lifecycle = LifecycleManager::new(&hv, &connector, fast_retry(1));

    let env = lifecycle.setup("mininet-test", "mininet").unwrap();
    // Someone deleted it behind our back
    lifecycle.teardown(&env).unwrap();

    let err = lifecycle.teardown(&env).unwrap_err();
    assert!(matches!(err, GraderError::Snapshot { detail, .. }
        if detail.contains("no longer exists")));
}
